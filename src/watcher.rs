//! Filesystem watcher: debounces notify events into batches of changed
//! paths and hands each path to a callback.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::error::SearchError;
use crate::indexer::in_skipped_dir;

pub const DEFAULT_DEBOUNCE_MS: u64 = 50;
/// Longest a change may wait while events keep arriving.
pub const MAX_BATCH_DELAY: Duration = Duration::from_secs(1);

/// Whether a path under `root` lives in a skipped directory (or the state
/// directory) and must not reach the index.
pub fn is_ignored(root: &Path, state_dir_name: Option<&str>, path: &Path) -> bool {
    match path.strip_prefix(root) {
        Ok(rel) => in_skipped_dir(rel, state_dir_name),
        Err(_) => true,
    }
}

/// Pending paths plus the time the oldest one arrived.
struct Batch {
    pending: BTreeSet<PathBuf>,
    oldest: Option<Instant>,
    max_wait: Duration,
}

impl Batch {
    fn new(max_wait: Duration) -> Self {
        Self {
            pending: BTreeSet::new(),
            oldest: None,
            max_wait,
        }
    }

    fn add(&mut self, path: PathBuf, now: Instant) {
        self.oldest.get_or_insert(now);
        self.pending.insert(path);
    }

    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The oldest pending change has waited at least `max_wait`.
    fn overdue(&self, now: Instant) -> bool {
        self.oldest.is_some_and(|t| now.saturating_duration_since(t) >= self.max_wait)
    }

    fn take(&mut self) -> BTreeSet<PathBuf> {
        self.oldest = None;
        std::mem::take(&mut self.pending)
    }
}

/// A running watcher. Stops on [`FileWatcher::stop`] or drop.
pub struct FileWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FileWatcher {
    /// Watch `root` recursively. Created, modified and removed paths are
    /// collected until no event arrives for `debounce` (or the oldest has
    /// waited [`MAX_BATCH_DELAY`]), then delivered to `on_change` once each,
    /// in path order.
    pub fn start<F>(root: &Path, state_dir: Option<&Path>, debounce: Duration, on_change: F) -> Result<Self, SearchError>
    where
        F: Fn(&Path) + Send + 'static,
    {
        let (tx, rx) = std::sync::mpsc::channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(tx, Config::default()).map_err(watch_error)?;
        watcher.watch(root, RecursiveMode::Recursive).map_err(watch_error)?;

        let root = root.to_path_buf();
        let state_dir_name = state_dir
            .filter(|d| d.starts_with(&root))
            .and_then(|d| d.file_name())
            .and_then(|n| n.to_str())
            .map(str::to_string);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        info!(root = %root.display(), debounce_ms = debounce.as_millis() as u64, "File watcher started");

        let handle = std::thread::Builder::new()
            .name("codescout-watcher".to_string())
            .spawn(move || {
                let _watcher = watcher; // keep alive for the thread's lifetime
                let mut batch = Batch::new(MAX_BATCH_DELAY.max(debounce));
                let flush = |batch: &mut Batch| {
                    let paths = batch.take();
                    debug!(changes = paths.len(), "Applying file changes");
                    for path in paths {
                        on_change(&path);
                    }
                };

                while !stop_flag.load(Ordering::Acquire) {
                    match rx.recv_timeout(debounce) {
                        Ok(Ok(event)) => {
                            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
                                continue;
                            }
                            let now = Instant::now();
                            for path in event.paths {
                                if !is_ignored(&root, state_dir_name.as_deref(), &path) {
                                    batch.add(path, now);
                                }
                            }
                            if batch.overdue(now) {
                                flush(&mut batch);
                            }
                        }
                        Ok(Err(e)) => warn!(error = %e, "File watcher error"),
                        Err(RecvTimeoutError::Timeout) => {
                            if !batch.is_empty() {
                                flush(&mut batch);
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            info!("Watcher channel disconnected, stopping");
                            break;
                        }
                    }
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop watching and wait for the debounce thread. Pending, undelivered
    /// changes are dropped. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Watcher thread panicked");
            }
            info!("File watcher stopped");
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch_error(e: notify::Error) -> SearchError {
    SearchError::Io(std::io::Error::other(e.to_string()))
}
