//! Background delivery of search events to a single observer callback.
//!
//! Events go through a bounded queue; when the queue is full the event is
//! dropped so `search` never blocks on learning.

use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use crate::types::{SearchOptions, SearchResult};

/// Queue depth before events are dropped.
pub const OBSERVER_QUEUE_CAPACITY: usize = 64;

/// Callback invoked with `(query, options, result, elapsed)` after each search.
pub type SearchObserver = Arc<dyn Fn(&str, &SearchOptions, &SearchResult, Duration) + Send + Sync>;

struct SearchEvent {
    query: String,
    options: SearchOptions,
    result: SearchResult,
    elapsed: Duration,
}

/// Count of queued plus running events.
#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn add(&self) {
        let mut n = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *n += 1;
    }

    fn done(&self) {
        let mut n = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *n = n.saturating_sub(1);
        if *n == 0 {
            self.idle.notify_all();
        }
    }

    fn wait(&self) {
        let mut n = self.count.lock().unwrap_or_else(|e| e.into_inner());
        while *n > 0 {
            n = self.idle.wait(n).unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// Owns the worker thread. Dropping it closes the queue and joins the worker
/// after the remaining events are delivered.
pub struct ObserverWorker {
    tx: Mutex<Option<SyncSender<SearchEvent>>>,
    pending: Arc<Pending>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ObserverWorker {
    pub fn spawn(observer: SearchObserver) -> Self {
        Self::with_capacity(observer, OBSERVER_QUEUE_CAPACITY)
    }

    pub fn with_capacity(observer: SearchObserver, capacity: usize) -> Self {
        let (tx, rx) = mpsc::sync_channel::<SearchEvent>(capacity);
        let pending = Arc::new(Pending::default());
        let worker_pending = Arc::clone(&pending);

        let handle = std::thread::Builder::new()
            .name("search-observer".to_string())
            .spawn(move || {
                for ev in rx {
                    observer(&ev.query, &ev.options, &ev.result, ev.elapsed);
                    worker_pending.done();
                }
            });

        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                warn!(error = %e, "Failed to spawn search observer thread; search signals disabled");
                None
            }
        };
        let tx = handle.as_ref().map(|_| tx);

        Self {
            tx: Mutex::new(tx),
            pending,
            handle: Mutex::new(handle),
        }
    }

    /// Queue an event. Returns false when it was dropped.
    pub fn submit(&self, query: &str, options: &SearchOptions, result: &SearchResult, elapsed: Duration) -> bool {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = guard.as_ref() else {
            return false;
        };
        self.pending.add();
        let ev = SearchEvent {
            query: query.to_string(),
            options: options.clone(),
            result: result.clone(),
            elapsed,
        };
        match tx.try_send(ev) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.pending.done();
                debug!(query, "Observer queue full, dropping search event");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.pending.done();
                false
            }
        }
    }

    /// Block until every queued event has been delivered.
    pub fn wait(&self) {
        self.pending.wait();
    }

    /// Close the queue and join the worker.
    pub fn shutdown(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(h) = handle {
            if h.join().is_err() {
                warn!("Search observer thread panicked");
            }
        }
    }
}

impl Drop for ObserverWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::Receiver;

    #[test]
    fn test_events_delivered_and_wait_returns() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let worker = ObserverWorker::spawn(Arc::new(move |q: &str, _: &SearchOptions, _: &SearchResult, _: Duration| {
            assert_eq!(q, "login");
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        for _ in 0..5 {
            assert!(worker.submit("login", &SearchOptions::default(), &SearchResult::default(), Duration::ZERO));
        }
        worker.wait();
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_full_queue_drops_events() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let worker = ObserverWorker::with_capacity(
            Arc::new(move |_: &str, _: &SearchOptions, _: &SearchResult, _: Duration| {
                let rx: &Mutex<Receiver<()>> = &release_rx;
                let _ = rx.lock().unwrap().recv();
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            1,
        );

        let opts = SearchOptions::default();
        let res = SearchResult::default();
        let accepted = (0..10)
            .filter(|_| worker.submit("q", &opts, &res, Duration::ZERO))
            .count();
        assert!(accepted < 10, "some events must be dropped");
        assert!(accepted >= 1);

        for _ in 0..accepted {
            release_tx.send(()).unwrap();
        }
        worker.wait();
        assert_eq!(seen.load(Ordering::SeqCst), accepted);
    }

    #[test]
    fn test_submit_after_shutdown_is_dropped() {
        let worker = ObserverWorker::spawn(Arc::new(|_: &str, _: &SearchOptions, _: &SearchResult, _: Duration| {}));
        worker.shutdown();
        assert!(!worker.submit("q", &SearchOptions::default(), &SearchResult::default(), Duration::ZERO));
        worker.wait();
    }
}
