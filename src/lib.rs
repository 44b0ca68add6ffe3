//! # codescout: per-project semantic code search daemon
//!
//! A symbol index (tree-sitter or line-0 content tokens), a trigram-backed
//! content scanner over an in-memory file cache, and a learner that turns
//! what an agent searches and reads into domain keywords, bigrams and
//! adaptive thresholds. One daemon per project root, reached over a Unix
//! socket with newline-delimited JSON.
//!
//! ## Library usage
//!
//! The crate ships as the `codescout` binary; the modules are public so the
//! benchmarks and integration tests can drive the engine directly.

pub mod app;
pub mod cache;
pub mod cli;
pub mod codec;
pub mod engine;
pub mod enricher;
pub mod error;
pub mod index;
pub mod indexer;
pub mod learner;
pub mod parser;
pub mod server;
pub mod session;
pub mod storage;
pub mod tokenizer;
pub mod types;
pub mod watcher;

pub use error::SearchError;
pub use tokenizer::{MIN_TOKEN_LEN, tokenize, tokenize_content_line};

// ─── Stable hashing ─────────────────────────────────────────────────

/// Stable FNV-1a hash (deterministic across Rust versions, unlike `DefaultHasher`).
///
/// Parts are fed in sequence, so `&[a, b]` hashes like `a ++ b`.
#[must_use]
pub fn stable_hash(parts: &[&[u8]]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;
    let mut hash = FNV_OFFSET;
    for part in parts {
        for &byte in *part {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

/// Read a file as a String, using lossy UTF-8 conversion for non-UTF8 files.
/// Returns `(content, was_lossy)`.
pub fn read_file_lossy(path: &std::path::Path) -> std::io::Result<(String, bool)> {
    let raw = std::fs::read(path)?;
    match String::from_utf8(raw) {
        Ok(s) => Ok((s, false)),
        Err(e) => Ok((String::from_utf8_lossy(e.as_bytes()).into_owned(), true)),
    }
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_stable_hash_multi_part_equivalent_to_concat() {
        let split = stable_hash(&[b"hello", b"world"]);
        let concat = stable_hash(&[b"helloworld"]);
        assert_eq!(split, concat, "multi-part hash should equal concatenated hash");
    }

    #[test]
    fn test_stable_hash_known_fnv1a_vector() {
        // FNV-1a 64-bit of the empty input is the offset basis
        assert_eq!(stable_hash(&[]), 0xcbf2_9ce4_8422_2325);
        assert_eq!(stable_hash(&[b"a"]), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_read_file_lossy() {
        let dir = tempfile::TempDir::new().unwrap();
        let good = dir.path().join("good.go");
        let bad = dir.path().join("bad.go");
        std::fs::write(&good, "package main\n").unwrap();
        std::fs::write(&bad, b"// caf\xe9\n").unwrap();

        assert_eq!(read_file_lossy(&good).unwrap(), ("package main\n".to_string(), false));
        let (text, lossy) = read_file_lossy(&bad).unwrap();
        assert!(lossy);
        assert!(text.starts_with("// caf"));
        assert!(read_file_lossy(&dir.path().join("missing")).is_err());
    }
}

// ─── Property-based tests (proptest) ─────────────────────────────────
