//! Blocking client for the daemon socket. One connection per call.

use std::io::{BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::protocol::*;
use crate::error::SearchError;
use crate::session::SessionEvent;
use crate::types::SearchOptions;

/// Deadline for a whole request/response exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const REINDEX_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct Client {
    socket_path: PathBuf,
}

impl Client {
    pub fn new(socket_path: &Path) -> Self {
        Self {
            socket_path: socket_path.to_path_buf(),
        }
    }

    /// Whether a daemon accepts connections on the socket.
    pub fn ping(&self) -> bool {
        UnixStream::connect(&self.socket_path).is_ok()
    }

    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResponse, SearchError> {
        let params = SearchParams {
            query: query.to_string(),
            options: options.clone(),
        };
        self.call_typed(METHOD_SEARCH, serde_json::to_value(params)?)
    }

    pub fn files(&self, glob: Option<&str>, name: Option<&str>) -> Result<Value, SearchError> {
        let params = FilesParams {
            glob: glob.map(str::to_string),
            name: name.map(str::to_string),
        };
        self.call(METHOD_FILES, serde_json::to_value(params)?)
    }

    pub fn session_event(&self, event: &SessionEvent) -> Result<(), SearchError> {
        self.call(METHOD_SESSION_EVENT, serde_json::to_value(event)?).map(drop)
    }

    pub fn sessions(&self) -> Result<SessionsResponse, SearchError> {
        self.call_typed(METHOD_SESSIONS, Value::Null)
    }

    pub fn shutdown(&self) -> Result<(), SearchError> {
        self.call(METHOD_SHUTDOWN, json!({})).map(drop)
    }

    /// `health`, `domains`, `bigrams`, `stats`, `reindex` and `wipe` take no
    /// params and return loosely typed results.
    pub fn simple(&self, method: &str) -> Result<Value, SearchError> {
        self.call(method, Value::Null)
    }

    fn call_typed<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, SearchError> {
        Ok(serde_json::from_value(self.call(method, params)?)?)
    }

    /// Send one request and return its `result`. Server-side failures come
    /// back as [`SearchError::Remote`].
    pub fn call(&self, method: &str, params: Value) -> Result<Value, SearchError> {
        let timeout = if method == METHOD_REINDEX {
            REINDEX_TIMEOUT
        } else {
            DEFAULT_TIMEOUT
        };
        let response = self.exchange(&Request::new(method, params), timeout)?;
        match response.error {
            Some(message) => Err(SearchError::Remote(message)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }

    fn exchange(&self, request: &Request, timeout: Duration) -> Result<Response, SearchError> {
        let mut stream = UnixStream::connect(&self.socket_path)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let mut bytes = serde_json::to_vec(request)?;
        bytes.push(b'\n');
        stream.write_all(&bytes)?;
        stream.flush()?;

        let mut reader = BufReader::new(stream);
        match read_message(&mut reader)? {
            Some(line) => Ok(serde_json::from_slice(&line)?),
            None => Err(SearchError::Transient("empty response".to_string())),
        }
    }
}
