//! Unified error type for the search daemon.

use thiserror::Error;

/// Coarse classification of failures, used by callers to pick a recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Decode,
    Io,
    LockConflict,
    QueryInvalid,
    Unsupported,
    Transient,
}

/// All errors that can occur in index, learner, storage and server operations.
#[derive(Error, Debug)]
pub enum SearchError {
    /// I/O error (file read/write, directory access, socket)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary envelope (bincode) encode/decode error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON encode/decode error (learner state, atlas, metadata blobs, IPC)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid regex pattern
    #[error("Invalid regex pattern '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Posting-list blob is malformed
    #[error("Posting list decode failed: {message} (token {token}, offset {offset})")]
    PostingDecode {
        token: usize,
        offset: usize,
        message: String,
    },

    /// Atlas document is malformed or empty
    #[error("Atlas error in {source_name}: {message}")]
    Atlas { source_name: String, message: String },

    /// Failed to load an index or state blob from disk
    #[error("Failed to load index from {path}: {message}")]
    IndexLoad { path: String, message: String },

    /// Another daemon holds the project store
    #[error("Project store {path} is locked by pid {pid}; stop the other daemon or remove the lock file")]
    LockConflict { path: String, pid: u32 },

    /// Capability not installed (e.g. no grammar for a language)
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Timeout, connection reset and friends
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Mutually exclusive flags or other argument validation error
    #[error("{0}")]
    InvalidArgs(String),

    /// A live daemon already answers on the socket
    #[error("Daemon already running at {socket}")]
    AlreadyRunning { socket: String },

    /// Error reported by the daemon in a response
    #[error("Server error: {0}")]
    Remote(String),
}

impl SearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(e) => match e.kind() {
                std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::WouldBlock
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe => ErrorKind::Transient,
                _ => ErrorKind::Io,
            },
            Self::Serialization(_)
            | Self::Json(_)
            | Self::PostingDecode { .. }
            | Self::Atlas { .. }
            | Self::IndexLoad { .. } => ErrorKind::Decode,
            Self::LockConflict { .. } | Self::AlreadyRunning { .. } => {
                ErrorKind::LockConflict
            }
            Self::InvalidRegex { .. } | Self::InvalidArgs(_) => {
                ErrorKind::QueryInvalid
            }
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Transient(_) => ErrorKind::Transient,
            Self::Remote(_) => ErrorKind::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let err = SearchError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        assert!(err.to_string().contains("I/O error"));
        assert!(err.to_string().contains("file not found"));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_timeout_is_transient() {
        let err = SearchError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"));
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_invalid_regex_display() {
        let regex_err = regex::Regex::new("[invalid").unwrap_err();
        let err = SearchError::InvalidRegex {
            pattern: "[invalid".to_string(),
            source: regex_err,
        };
        assert!(err.to_string().contains("[invalid"));
        assert_eq!(err.kind(), ErrorKind::QueryInvalid);
    }

    #[test]
    fn test_posting_decode_display() {
        let err = SearchError::PostingDecode {
            token: 3,
            offset: 17,
            message: "truncated key".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("token 3"));
        assert!(msg.contains("offset 17"));
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn test_lock_conflict_display() {
        let err = SearchError::LockConflict {
            path: "/tmp/proj/.codescout".to_string(),
            pid: 4242,
        };
        assert!(err.to_string().contains("4242"));
        assert_eq!(err.kind(), ErrorKind::LockConflict);
    }

    #[test]
    fn test_io_error_from_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let search_err: SearchError = io_err.into();
        assert!(matches!(search_err, SearchError::Io(_)));
    }
}
