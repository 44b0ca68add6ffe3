//! Persistence: per-project blob store for the index, learner state and
//! session summaries, plus the single-daemon project lock.
//!
//! Every write goes to a temporary file that is fsynced and renamed over the
//! target, so readers always see either the previous or the new snapshot.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::{decode_postings, encode_postings};
use crate::error::SearchError;
use crate::index::Index;
use crate::learner::LearnerState;
use crate::session::SessionSummary;
use crate::types::{FileMeta, SymbolMeta, TokenRef};

// ─── LZ4 compression helpers ────────────────────────────────────────

/// Magic bytes identifying LZ4-compressed blobs.
pub const LZ4_MAGIC: &[u8; 4] = b"LZ4S";

/// Write `bytes` to `path` atomically (temp file + fsync + rename).
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SearchError> {
    let tmp = tmp_path(path);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Save a serializable value with LZ4 frame compression: magic bytes, then
/// LZ4-compressed bincode. The file is replaced atomically.
pub fn save_compressed<T: Serialize>(path: &Path, data: &T, label: &str) -> Result<(), SearchError> {
    let start = Instant::now();
    let tmp = tmp_path(path);

    {
        let file = fs::File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(LZ4_MAGIC)?;
        let mut encoder = lz4_flex::frame::FrameEncoder::new(writer);
        bincode::serialize_into(&mut encoder, data)?;
        let mut writer = encoder.finish().map_err(std::io::Error::other)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)?;

    let compressed_size = fs::metadata(path)?.len();
    debug!(
        label,
        bytes = compressed_size,
        elapsed_ms = format_args!("{:.1}", start.elapsed().as_secs_f64() * 1000.0),
        path = %path.display(),
        "Saved compressed blob"
    );
    Ok(())
}

/// Load a value written by [`save_compressed`].
/// Returns `Err(SearchError::IndexLoad)` with a descriptive message on failure.
pub fn load_compressed<T: serde::de::DeserializeOwned>(path: &Path, label: &str) -> Result<T, SearchError> {
    let path_str = path.display().to_string();
    let start = Instant::now();

    let file = fs::File::open(path).map_err(|e| SearchError::IndexLoad {
        path: path_str.clone(),
        message: format!("cannot open file: {}", e),
    })?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(|e| SearchError::IndexLoad {
        path: path_str.clone(),
        message: format!("read error (magic bytes): {}", e),
    })?;
    if &magic != LZ4_MAGIC {
        return Err(SearchError::IndexLoad {
            path: path_str,
            message: "missing LZ4S magic bytes".to_string(),
        });
    }

    let decoder = lz4_flex::frame::FrameDecoder::new(reader);
    let value = bincode::deserialize_from(decoder).map_err(|e| SearchError::IndexLoad {
        path: path_str.clone(),
        message: format!("LZ4 deserialization failed: {}", e),
    })?;

    debug!(
        label,
        elapsed_ms = format_args!("{:.1}", start.elapsed().as_secs_f64() * 1000.0),
        "Loaded compressed blob"
    );
    Ok(value)
}

// ─── Index blob ─────────────────────────────────────────────────────

const INDEX_BLOB_VERSION: u32 = 1;

/// On-disk envelope. `tokens` uses the binary posting format; metadata and
/// files are JSON keyed by `"{file_id}:{line}"` and `"{file_id}"`.
#[derive(Serialize, Deserialize, Debug)]
struct IndexBlob {
    version: u32,
    tokens: Vec<u8>,
    metadata: Vec<u8>,
    files: Vec<u8>,
}

fn encode_index(index: &Index) -> Result<IndexBlob, SearchError> {
    let metadata: BTreeMap<String, &SymbolMeta> =
        index.metadata.iter().map(|(r, m)| (r.to_key(), m)).collect();
    let files: BTreeMap<String, &FileMeta> =
        index.files.iter().map(|(id, f)| (id.to_string(), f)).collect();
    Ok(IndexBlob {
        version: INDEX_BLOB_VERSION,
        tokens: encode_postings(&index.tokens)?,
        metadata: serde_json::to_vec(&metadata)?,
        files: serde_json::to_vec(&files)?,
    })
}

fn decode_index(blob: IndexBlob, path: &Path) -> Result<Index, SearchError> {
    let load_err = |message: String| SearchError::IndexLoad {
        path: path.display().to_string(),
        message,
    };
    if blob.version != INDEX_BLOB_VERSION {
        return Err(load_err(format!("unsupported index version {}", blob.version)));
    }

    let tokens = decode_postings(&blob.tokens)?;

    let raw_meta: HashMap<String, SymbolMeta> = serde_json::from_slice(&blob.metadata)?;
    let mut metadata = HashMap::with_capacity(raw_meta.len());
    for (key, meta) in raw_meta {
        let r = TokenRef::from_key(&key).ok_or_else(|| load_err(format!("bad metadata key '{}'", key)))?;
        metadata.insert(r, meta);
    }

    let raw_files: HashMap<String, FileMeta> = serde_json::from_slice(&blob.files)?;
    let mut files = HashMap::with_capacity(raw_files.len());
    for (key, fm) in raw_files {
        let id: u32 = key.parse().map_err(|_| load_err(format!("bad file key '{}'", key)))?;
        files.insert(id, fm);
    }

    Ok(Index { tokens, metadata, files })
}

// ─── Store port ─────────────────────────────────────────────────────

/// Transactional per-project blob store.
pub trait Store: Send + Sync {
    fn save_index(&self, project_id: &str, index: &Index) -> Result<(), SearchError>;
    /// `Ok(None)` for a fresh project.
    fn load_index(&self, project_id: &str) -> Result<Option<Index>, SearchError>;
    fn save_learner_state(&self, project_id: &str, state: &LearnerState) -> Result<(), SearchError>;
    /// `Ok(None)` for a fresh project.
    fn load_learner_state(&self, project_id: &str) -> Result<Option<LearnerState>, SearchError>;
    /// Idempotent.
    fn delete_project(&self, project_id: &str) -> Result<(), SearchError>;
    fn save_session_summary(&self, project_id: &str, summary: &SessionSummary) -> Result<(), SearchError>;
    fn load_session_summary(&self, project_id: &str, session_id: &str) -> Result<Option<SessionSummary>, SearchError>;
    fn list_session_summaries(&self, project_id: &str) -> Result<Vec<SessionSummary>, SearchError>;
}

/// Directory-backed [`Store`]: `<base>/projects/<project_id>/{index.lz4, learner.json, sessions/}`.
pub struct FileStore {
    base: PathBuf,
}

impl FileStore {
    pub fn open(base: &Path) -> Result<Self, SearchError> {
        fs::create_dir_all(base.join("projects"))?;
        Ok(Self { base: base.to_path_buf() })
    }

    fn project_dir(&self, project_id: &str) -> PathBuf {
        self.base.join("projects").join(sanitize(project_id))
    }

    fn ensure_project_dir(&self, project_id: &str) -> Result<PathBuf, SearchError> {
        let dir = self.project_dir(project_id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn sessions_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("sessions")
    }
}

/// Keep file names portable: anything outside `[A-Za-z0-9_.-]` becomes `_`.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') { c } else { '_' })
        .collect()
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, SearchError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl Store for FileStore {
    fn save_index(&self, project_id: &str, index: &Index) -> Result<(), SearchError> {
        let dir = self.ensure_project_dir(project_id)?;
        let blob = encode_index(index)?;
        save_compressed(&dir.join("index.lz4"), &blob, "index")
    }

    fn load_index(&self, project_id: &str) -> Result<Option<Index>, SearchError> {
        let path = self.project_dir(project_id).join("index.lz4");
        if !path.exists() {
            return Ok(None);
        }
        let blob: IndexBlob = load_compressed(&path, "index")?;
        decode_index(blob, &path).map(Some)
    }

    fn save_learner_state(&self, project_id: &str, state: &LearnerState) -> Result<(), SearchError> {
        let dir = self.ensure_project_dir(project_id)?;
        let bytes = serde_json::to_vec_pretty(state)?;
        write_atomic(&dir.join("learner.json"), &bytes)
    }

    fn load_learner_state(&self, project_id: &str) -> Result<Option<LearnerState>, SearchError> {
        read_json(&self.project_dir(project_id).join("learner.json"))
    }

    fn delete_project(&self, project_id: &str) -> Result<(), SearchError> {
        let dir = self.project_dir(project_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(project = project_id, "Deleted project data");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn save_session_summary(&self, project_id: &str, summary: &SessionSummary) -> Result<(), SearchError> {
        let dir = self.sessions_dir(project_id);
        fs::create_dir_all(&dir)?;
        let bytes = serde_json::to_vec_pretty(summary)?;
        write_atomic(&dir.join(format!("{}.json", sanitize(&summary.session_id))), &bytes)
    }

    fn load_session_summary(&self, project_id: &str, session_id: &str) -> Result<Option<SessionSummary>, SearchError> {
        read_json(&self.sessions_dir(project_id).join(format!("{}.json", sanitize(session_id))))
    }

    fn list_session_summaries(&self, project_id: &str) -> Result<Vec<SessionSummary>, SearchError> {
        let dir = self.sessions_dir(project_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            match read_json::<SessionSummary>(&path) {
                Ok(Some(s)) => summaries.push(s),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable session summary"),
            }
        }
        summaries.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.session_id.cmp(&b.session_id)));
        Ok(summaries)
    }
}

// ─── Project lock ───────────────────────────────────────────────────

/// Exclusive claim on a state directory, held for the daemon's lifetime.
/// The lock file stores the owner's pid; a lock whose owner is gone is stale
/// and gets replaced.
#[derive(Debug)]
pub struct ProjectLock {
    path: PathBuf,
}

impl ProjectLock {
    pub fn acquire(state_dir: &Path) -> Result<Self, SearchError> {
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join("daemon.lock");
        let pid = std::process::id();

        for _ in 0..2 {
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{}", pid)?;
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let owner = fs::read_to_string(&path)
                        .ok()
                        .and_then(|s| s.trim().parse::<u32>().ok());
                    match owner {
                        Some(owner) if owner != pid && process_alive(owner) => {
                            return Err(SearchError::LockConflict {
                                path: path.display().to_string(),
                                pid: owner,
                            });
                        }
                        _ => {
                            warn!(path = %path.display(), "Removing stale project lock");
                            fs::remove_file(&path)?;
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SearchError::LockConflict {
            path: path.display().to_string(),
            pid: 0,
        })
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
