//! Wire format: one JSON object per line in each direction.

use std::io::{self, BufRead, Read};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::SessionSummary;
use crate::types::{Hit, SearchOptions};

/// Longest accepted line, in bytes, newline excluded.
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

// ─── Methods ────────────────────────────────────────────────────────

pub const METHOD_SEARCH: &str = "search";
pub const METHOD_HEALTH: &str = "health";
pub const METHOD_FILES: &str = "files";
pub const METHOD_DOMAINS: &str = "domains";
pub const METHOD_BIGRAMS: &str = "bigrams";
pub const METHOD_STATS: &str = "stats";
pub const METHOD_REINDEX: &str = "reindex";
pub const METHOD_WIPE: &str = "wipe";
pub const METHOD_SHUTDOWN: &str = "shutdown";
pub const METHOD_SESSION_EVENT: &str = "session_event";
pub const METHOD_SESSIONS: &str = "sessions";

// ─── Envelopes ──────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Request {
    #[serde(default)]
    pub id: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Request {
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            id: "1".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// Exactly one of `result` and `error` is set.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Response {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: &str, result: Value) -> Self {
        Self {
            id: id.to_string(),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: &str, message: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            result: None,
            error: Some(message.into()),
        }
    }
}

// ─── Params and results ─────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
    pub query: String,
    #[serde(default)]
    pub options: SearchOptions,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResponse {
    pub hits: Vec<Hit>,
    pub count: usize,
    pub exit_code: i32,
    #[serde(default)]
    pub total_match_chars: usize,
    #[serde(default)]
    pub elapsed_us: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct FilesParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glob: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionSummary>,
    pub count: usize,
}

/// Read one newline-terminated message of at most [`MAX_MESSAGE_BYTES`].
/// `Ok(None)` at end of stream; `InvalidData` when the line is too long.
pub fn read_message<R: BufRead>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    let n = reader.by_ref().take(MAX_MESSAGE_BYTES as u64 + 1).read_until(b'\n', &mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > MAX_MESSAGE_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "message exceeds 1 MiB"));
    }
    Ok(Some(buf))
}
