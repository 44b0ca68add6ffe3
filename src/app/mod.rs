//! The per-project daemon aggregate: engine, learner and session tracker
//! behind one coordinating lock, plus the lifecycle around them.

mod queries;
mod signals;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};

use crate::cache::{DEFAULT_CACHE_BYTES, FileCache};
use crate::engine::SearchEngine;
use crate::enricher::Enricher;
use crate::error::SearchError;
use crate::index::Index;
use crate::indexer::{LoadedFile, ReindexResult, build_index, is_indexable, relative_path};
use crate::learner::{Learner, LearnerState};
use crate::parser::{SymbolParser, TreeSitterParser};
use crate::session::SessionTracker;
use crate::stable_hash;
use crate::storage::{FileStore, ProjectLock, Store};
use crate::types::{SearchOptions, SearchResult};
use crate::watcher::{DEFAULT_DEBOUNCE_MS, FileWatcher};

pub use queries::{
    BigramsResult, DomainEntry, DomainsResult, FileEntry, FilesResult, HealthResult, StatsResult, TermEntry,
};
pub use signals::SignalCollector;

/// Name of the per-project state directory under the root.
pub const STATE_DIR_NAME: &str = ".codescout";

// ─── Configuration ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Canonical project root.
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub socket_path: PathBuf,
    pub cache_budget_bytes: u64,
    pub debounce: Duration,
    pub use_parser: bool,
}

impl DaemonConfig {
    /// Defaults for `root`: state under `<root>/.codescout`, socket derived
    /// from the project id.
    pub fn new(root: &Path) -> Result<Self, SearchError> {
        let root = std::fs::canonicalize(root)?;
        Ok(Self {
            state_dir: root.join(STATE_DIR_NAME),
            socket_path: default_socket_path(&root),
            root,
            cache_budget_bytes: DEFAULT_CACHE_BYTES,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            use_parser: true,
        })
    }

    pub fn project_id(&self) -> String {
        project_id(&self.root)
    }
}

/// FNV-1a of the canonical root, as 16 hex digits.
pub fn project_id(root: &Path) -> String {
    format!("{:016x}", stable_hash(&[root.to_string_lossy().as_bytes()]))
}

/// `/tmp/codescout-<first 12 hex digits of the project id>.sock`
pub fn default_socket_path(root: &Path) -> PathBuf {
    let id = project_id(root);
    PathBuf::from(format!("/tmp/codescout-{}.sock", &id[..12]))
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

// ─── App ────────────────────────────────────────────────────────────

/// Everything a query, an observer or a session event may touch.
pub struct EngineState {
    pub engine: SearchEngine,
    pub learner: Learner,
    pub session: SessionTracker,
}

/// Outcome of one watcher notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    Ignored,
    Removed(u32),
    Updated(u32),
}

pub struct App {
    config: DaemonConfig,
    project_id: String,
    store: Arc<dyn Store>,
    parser: Option<Arc<dyn SymbolParser>>,
    state: Arc<RwLock<EngineState>>,
    started: Instant,
    needs_reindex: AtomicBool,
    reindexing: AtomicBool,
    /// Paths changed while a reindex was building, replayed after the swap.
    changed_during_reindex: Mutex<BTreeSet<PathBuf>>,
    stopped: AtomicBool,
    watcher: Mutex<Option<FileWatcher>>,
    lock: Mutex<Option<ProjectLock>>,
}

/// Clears a busy flag when dropped.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl App {
    /// Acquire the project lock, open the state directory and load
    /// everything persisted. A lock conflict is fatal.
    pub fn start(config: DaemonConfig) -> Result<Arc<Self>, SearchError> {
        let lock = ProjectLock::acquire(&config.state_dir)?;
        let store: Arc<dyn Store> = Arc::new(FileStore::open(&config.state_dir)?);
        Self::with_store(config, store, Some(lock))
    }

    /// Build the aggregate over an already opened store.
    pub fn with_store(config: DaemonConfig, store: Arc<dyn Store>, lock: Option<ProjectLock>) -> Result<Arc<Self>, SearchError> {
        let start = Instant::now();
        let project_id = config.project_id();
        let enricher = Arc::new(Enricher::embedded()?);

        let (index, needs_reindex) = match store.load_index(&project_id) {
            Ok(Some(index)) => (index, false),
            Ok(None) => {
                info!(project = %project_id, "No persisted index");
                (Index::new(), true)
            }
            Err(e) => {
                warn!(project = %project_id, error = %e, "Persisted index unreadable, starting empty");
                (Index::new(), true)
            }
        };
        let learner = match store.load_learner_state(&project_id) {
            Ok(Some(state)) => Learner::from_state(state),
            Ok(None) => Learner::new(),
            Err(e) => {
                warn!(project = %project_id, error = %e, "Learner state unreadable, starting fresh");
                Learner::new()
            }
        };

        let mut engine = SearchEngine::new(index, enricher, Some(config.root.clone()));
        engine.set_cache(Arc::new(FileCache::new(config.cache_budget_bytes)));
        engine.warm_cache();

        let parser = config
            .use_parser
            .then(|| Arc::new(TreeSitterParser::new()) as Arc<dyn SymbolParser>);

        let state = Arc::new(RwLock::new(EngineState {
            engine,
            learner,
            session: SessionTracker::new(),
        }));
        let observer = signals::search_observer(Arc::downgrade(&state), Arc::clone(&store), project_id.clone());
        state.write().unwrap_or_else(|e| e.into_inner()).engine.set_observer(observer);

        let app = Arc::new(Self {
            config,
            project_id,
            store,
            parser,
            state,
            started: Instant::now(),
            needs_reindex: AtomicBool::new(needs_reindex),
            reindexing: AtomicBool::new(false),
            changed_during_reindex: Mutex::new(BTreeSet::new()),
            stopped: AtomicBool::new(false),
            watcher: Mutex::new(None),
            lock: Mutex::new(lock),
        });
        {
            let st = app.read_state();
            info!(
                root = %app.config.root.display(),
                project = %app.project_id,
                files = st.engine.index().files.len(),
                tokens = st.engine.index().tokens.len(),
                prompts = st.learner.prompt_count(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Project loaded"
            );
        }
        Ok(app)
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn read_state(&self) -> RwLockReadGuard<'_, EngineState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn write_state(&self) -> RwLockWriteGuard<'_, EngineState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the learner state.
    pub fn learner_state(&self) -> LearnerState {
        self.read_state().learner.state().clone()
    }

    // ─── Search ─────────────────────────────────────────────────────

    pub fn search(&self, query: &str, opts: &SearchOptions) -> SearchResult {
        self.read_state().engine.search(query, opts)
    }

    /// Block until every queued search has been observed.
    pub fn wait_observers(&self) {
        let handle = self.read_state().engine.observer_handle();
        if let Some(worker) = handle {
            worker.wait();
        }
    }

    // ─── Watcher coupling ───────────────────────────────────────────

    /// Start delivering filesystem changes to [`App::on_file_changed`].
    pub fn start_watcher(self: &Arc<Self>) -> Result<(), SearchError> {
        let weak = Arc::downgrade(self);
        let watcher = FileWatcher::start(
            &self.config.root,
            Some(&self.config.state_dir),
            self.config.debounce,
            move |path: &Path| {
                if let Some(app) = weak.upgrade() {
                    app.on_file_changed(path);
                }
            },
        )?;
        *self.watcher.lock().unwrap_or_else(|e| e.into_inner()) = Some(watcher);
        Ok(())
    }

    /// Apply one created, modified or deleted file to the index, cache and
    /// persisted blob.
    pub fn on_file_changed(&self, abs: &Path) -> FileChange {
        if self.reindexing.load(Ordering::Acquire) {
            self.changed_during_reindex
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(abs.to_path_buf());
        }
        let change = self.apply_file_change(abs);
        if change != FileChange::Ignored {
            self.persist_index();
        }
        change
    }

    fn apply_file_change(&self, abs: &Path) -> FileChange {
        if !is_indexable(abs, self.parser.as_deref()) {
            return FileChange::Ignored;
        }
        let Some(rel) = relative_path(&self.config.root, abs) else {
            return FileChange::Ignored;
        };

        if std::fs::metadata(abs).is_err() {
            let removed = {
                let mut st = self.write_state();
                let Some(file_id) = st.engine.index().file_id_for_path(&rel) else {
                    return FileChange::Ignored;
                };
                let postings = st.engine.update_index(|idx| idx.remove_file(file_id));
                st.engine.remove_cache_file(file_id);
                info!(path = %rel, file_id, postings, "File removed from index");
                file_id
            };
            return FileChange::Removed(removed);
        }

        let Some(loaded) = LoadedFile::load(abs, &rel, self.parser.as_deref()) else {
            return FileChange::Ignored;
        };

        let file_id = {
            let mut st = self.write_state();
            let existing = st.engine.index().file_id_for_path(&rel);
            let file_id = existing.unwrap_or_else(|| st.engine.index().next_file_id());
            let symbols = st.engine.update_index(|idx| {
                if existing.is_some() {
                    idx.remove_file(file_id);
                }
                loaded.insert_into(idx, file_id)
            });
            st.engine.update_cache_file(file_id);
            info!(path = %rel, file_id, symbols, "File reindexed");
            file_id
        };
        FileChange::Updated(file_id)
    }

    // ─── Reindex / wipe ─────────────────────────────────────────────

    /// Rebuild the whole index from disk. Built outside the lock and
    /// swapped in together with a freshly warmed cache; watcher changes that
    /// arrive meanwhile are applied again on top of the new index.
    pub fn reindex(&self) -> Result<ReindexResult, SearchError> {
        if self.reindexing.swap(true, Ordering::AcqRel) {
            return Err(SearchError::Transient("reindex already running".to_string()));
        }
        let _busy = BusyGuard(&self.reindexing);
        self.changed_during_reindex.lock().unwrap_or_else(|e| e.into_inner()).clear();

        let (index, cache, result) = self.build_fresh();
        self.install_rebuilt(index, cache)?;
        self.needs_reindex.store(false, Ordering::Release);
        Ok(result)
    }

    fn build_fresh(&self) -> (Index, Arc<FileCache>, ReindexResult) {
        let (index, result) = build_index(&self.config.root, Some(&self.config.state_dir), self.parser.as_deref());
        let cache = Arc::new(FileCache::new(self.config.cache_budget_bytes));
        cache.warm_from_index(&index.files, &self.config.root);
        (index, cache, result)
    }

    /// Swap in a rebuilt index and cache, replay the recorded changes, then
    /// persist. Changes recorded after the drain already see the new state.
    fn install_rebuilt(&self, index: Index, cache: Arc<FileCache>) -> Result<(), SearchError> {
        {
            let mut st = self.write_state();
            st.engine.replace_index(index);
            st.engine.set_cache(cache);
        }
        let changed = std::mem::take(&mut *self.changed_during_reindex.lock().unwrap_or_else(|e| e.into_inner()));
        if !changed.is_empty() {
            info!(files = changed.len(), "Replaying changes seen during reindex");
        }
        for path in &changed {
            self.apply_file_change(path);
        }
        self.store.save_index(&self.project_id, self.read_state().engine.index())?;
        Ok(())
    }

    /// Reindex on a background thread when the persisted index was missing
    /// or unreadable.
    pub fn reindex_in_background_if_needed(self: &Arc<Self>) {
        if !self.needs_reindex.load(Ordering::Acquire) {
            return;
        }
        let app = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("codescout-reindex".to_string())
            .spawn(move || {
                if let Err(e) = app.reindex() {
                    error!(error = %e, "Background reindex failed");
                }
            });
        if let Err(e) = spawned {
            error!(error = %e, "Failed to spawn background reindex");
        }
    }

    /// Zero the index, cache, learner and session, and delete everything
    /// persisted for the project. Nothing in memory changes if the delete
    /// fails.
    pub fn wipe(&self) -> Result<(), SearchError> {
        self.wait_observers();
        let mut st = self.write_state();
        self.store.delete_project(&self.project_id)?;
        st.engine.replace_index(Index::new());
        if let Some(cache) = st.engine.cache() {
            cache.clear();
        }
        st.learner.reset();
        st.session.reset();
        info!(project = %self.project_id, "Project wiped");
        Ok(())
    }

    // ─── Shutdown ───────────────────────────────────────────────────

    /// Stop the watcher, drain observers, flush the session summary, persist
    /// index and learner state and release the project lock. Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(mut watcher) = self.watcher.lock().unwrap_or_else(|e| e.into_inner()).take() {
            watcher.stop();
        }
        self.wait_observers();

        {
            let st = self.read_state();
            if let Some(summary) = st.session.summary(unix_now()) {
                if let Err(e) = self.store.save_session_summary(&self.project_id, &summary) {
                    warn!(error = %e, "Failed to save session summary");
                }
            }
            if let Err(e) = self.store.save_index(&self.project_id, st.engine.index()) {
                warn!(error = %e, "Failed to save index");
            }
            if let Err(e) = self.store.save_learner_state(&self.project_id, st.learner.state()) {
                warn!(error = %e, "Failed to save learner state");
            }
        }

        self.lock.lock().unwrap_or_else(|e| e.into_inner()).take();
        info!(project = %self.project_id, uptime_secs = self.uptime().as_secs(), "Daemon stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    // ─── Persistence ────────────────────────────────────────────────

    fn persist_index(&self) {
        let st = self.read_state();
        if let Err(e) = self.store.save_index(&self.project_id, st.engine.index()) {
            warn!(error = %e, "Failed to save index");
        }
    }

    fn persist_learner(&self, learner: &Learner) {
        if let Err(e) = self.store.save_learner_state(&self.project_id, learner.state()) {
            warn!(error = %e, "Failed to save learner state");
        }
    }
}

#[cfg(test)]
#[path = "app_tests.rs"]
mod tests;
