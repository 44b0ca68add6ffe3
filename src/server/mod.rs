//! Local IPC: newline-delimited JSON over a Unix domain socket, one thread
//! per connection.

pub mod client;
pub mod protocol;

use std::io::{BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::app::App;
use crate::error::SearchError;
use crate::session::SessionEvent;
use protocol::*;

pub use client::Client;

// ─── Shutdown signal ────────────────────────────────────────────────

/// Set once by a `shutdown` request or an OS signal; the serve loop waits
/// on it.
#[derive(Default)]
pub struct ShutdownSignal {
    triggered: Mutex<bool>,
    cond: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn trigger(&self) {
        let mut t = self.triggered.lock().unwrap_or_else(|e| e.into_inner());
        *t = true;
        self.cond.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.triggered.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn wait(&self) {
        let mut t = self.triggered.lock().unwrap_or_else(|e| e.into_inner());
        while !*t {
            t = self.cond.wait(t).unwrap_or_else(|e| e.into_inner());
        }
    }
}

// ─── Server ─────────────────────────────────────────────────────────

pub struct Server {
    socket_path: PathBuf,
    done: Arc<AtomicBool>,
    accept: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Bind `socket_path` and start accepting. Refuses when a live daemon
    /// answers on the path; a stale socket file is removed first.
    pub fn bind(app: Arc<App>, socket_path: &Path, shutdown: Arc<ShutdownSignal>) -> Result<Self, SearchError> {
        if socket_path.exists() {
            if UnixStream::connect(socket_path).is_ok() {
                return Err(SearchError::AlreadyRunning {
                    socket: socket_path.display().to_string(),
                });
            }
            info!(socket = %socket_path.display(), "Removing stale socket");
            std::fs::remove_file(socket_path)?;
        }
        let listener = UnixListener::bind(socket_path)?;
        let done = Arc::new(AtomicBool::new(false));
        let accept_done = Arc::clone(&done);

        let handle = std::thread::Builder::new()
            .name("codescout-accept".to_string())
            .spawn(move || accept_loop(listener, app, shutdown, accept_done))?;

        info!(socket = %socket_path.display(), "Listening");
        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            done,
            accept: Mutex::new(Some(handle)),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Stop accepting and remove the socket file. In-flight connections
    /// finish on their own threads. Idempotent.
    pub fn stop(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        // wake the blocking accept
        let _ = UnixStream::connect(&self.socket_path);
        if let Some(handle) = self.accept.lock().unwrap_or_else(|e| e.into_inner()).take() {
            if handle.join().is_err() {
                warn!("Accept thread panicked");
            }
        }
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            debug!(error = %e, "Socket file already gone");
        }
        info!(socket = %self.socket_path.display(), "Server stopped");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: UnixListener, app: Arc<App>, shutdown: Arc<ShutdownSignal>, done: Arc<AtomicBool>) {
    for stream in listener.incoming() {
        if done.load(Ordering::Acquire) {
            break;
        }
        match stream {
            Ok(stream) => {
                let app = Arc::clone(&app);
                let shutdown = Arc::clone(&shutdown);
                let spawned = std::thread::Builder::new()
                    .name("codescout-conn".to_string())
                    .spawn(move || {
                        if let Err(e) = handle_connection(&app, &shutdown, stream) {
                            debug!(error = %e, "Connection closed with error");
                        }
                    });
                if let Err(e) = spawned {
                    warn!(error = %e, "Failed to spawn connection thread");
                }
            }
            Err(e) => warn!(error = %e, "Accept failed"),
        }
    }
}

fn handle_connection(app: &App, shutdown: &ShutdownSignal, stream: UnixStream) -> Result<(), SearchError> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;

    loop {
        let line = match read_message(&mut reader) {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                write_response(&mut writer, &Response::error("", "message too large"))?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let request: Request = match serde_json::from_slice(&line) {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "Unparseable request");
                write_response(&mut writer, &Response::error("", "invalid request JSON"))?;
                continue;
            }
        };

        let response = dispatch(app, &request);
        write_response(&mut writer, &response)?;

        if request.method == METHOD_SHUTDOWN {
            info!("Shutdown requested over IPC");
            shutdown.trigger();
            return Ok(());
        }
    }
}

fn write_response(writer: &mut UnixStream, response: &Response) -> Result<(), SearchError> {
    let mut bytes = serde_json::to_vec(response)?;
    bytes.push(b'\n');
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

// ─── Dispatch ───────────────────────────────────────────────────────

/// Route one request to the app. Failures become error responses.
pub fn dispatch(app: &App, request: &Request) -> Response {
    let id = request.id.as_str();
    let method = request.method.as_str();
    let start = Instant::now();

    let result = match method {
        METHOD_SEARCH => params::<SearchParams>(method, &request.params).and_then(|p| {
            let t0 = Instant::now();
            let r = app.search(&p.query, &p.options);
            to_json(&SearchResponse {
                count: r.count,
                exit_code: r.exit_code,
                total_match_chars: r.total_match_chars,
                hits: r.hits,
                elapsed_us: t0.elapsed().as_micros() as u64,
            })
        }),
        METHOD_HEALTH => to_json(&app.health()),
        METHOD_FILES => params::<FilesParams>(method, &request.params)
            .and_then(|p| to_json(&app.files(p.glob.as_deref(), p.name.as_deref()))),
        METHOD_DOMAINS => to_json(&app.domains()),
        METHOD_BIGRAMS => to_json(&app.bigrams()),
        METHOD_STATS => to_json(&app.stats()),
        METHOD_REINDEX => app.reindex().and_then(|r| {
            info!(files = r.file_count, symbols = r.symbol_count, elapsed_ms = r.elapsed_ms, "Reindex complete");
            to_json(&r)
        }),
        METHOD_WIPE => app.wipe().map(|()| json!({})),
        METHOD_SHUTDOWN => Ok(json!({})),
        METHOD_SESSION_EVENT => serde_json::from_value::<SessionEvent>(request.params.clone())
            .map_err(|e| SearchError::InvalidArgs(format!("invalid {} params: {}", method, e)))
            .map(|ev| {
                app.on_session_event(&ev);
                json!({})
            }),
        METHOD_SESSIONS => app.sessions().and_then(|sessions| {
            to_json(&SessionsResponse {
                count: sessions.len(),
                sessions,
            })
        }),
        _ => return Response::error(id, format!("unknown method: {}", method)),
    };

    debug!(method, elapsed_us = start.elapsed().as_micros() as u64, ok = result.is_ok(), "Handled request");
    match result {
        Ok(value) => Response::ok(id, value),
        Err(e) => {
            warn!(method, error = %e, "Request failed");
            Response::error(id, e.to_string())
        }
    }
}

/// Absent params decode as the type's default.
fn params<T: DeserializeOwned + Default>(method: &str, value: &Value) -> Result<T, SearchError> {
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value.clone()).map_err(|e| SearchError::InvalidArgs(format!("invalid {} params: {}", method, e)))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, SearchError> {
    Ok(serde_json::to_value(value)?)
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
