//! Lazy reference sweeper
//!
//! Holds a weak registry of all live lazy references and periodically
//! unloads those idle past the configured threshold, bounding the memory
//! footprint of lazily loaded sub-graphs. Runs in a dedicated background
//! thread independent of any store/load session.
//!
//! The sweeper only ever transitions references Loaded -> Unloaded; it never
//! forces a load, and the per-reference state lock keeps it from racing a
//! concurrent resolution.
//!
//! # Design Notes
//!
//! - Registry holds `Weak` handles, so it never keeps a reference alive
//! - Dead entries are pruned on every sweep
//! - Background thread sleeps in short slices to notice shutdown quickly
//! - Graceful shutdown via atomic flag + join

use crate::lazy::{Lazy, LazyInner};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

/// Supervises all live lazy references of one store.
pub struct LazyReferenceManager {
    refs: Mutex<Vec<Weak<LazyInner>>>,
    idle_timeout: Duration,
    sweep_interval: Duration,
    shutdown: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LazyReferenceManager {
    /// Create a manager with the given idle/interval policy.
    pub fn new(idle_timeout: Duration, sweep_interval: Duration) -> Self {
        Self {
            refs: Mutex::new(Vec::new()),
            idle_timeout,
            sweep_interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Register a lazy reference for supervision.
    ///
    /// The registry holds it weakly; dropping the last [`Lazy`] clone
    /// removes it from supervision on the next sweep.
    pub fn track(&self, lazy: &Lazy) {
        self.refs.lock().push(lazy.inner_weak());
    }

    /// Number of currently supervised (live) references.
    pub fn tracked_count(&self) -> usize {
        self.refs
            .lock()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Run one sweep synchronously: prune dead entries, unload idle ones.
    ///
    /// Returns the number of references unloaded.
    pub fn sweep_now(&self) -> usize {
        let mut refs = self.refs.lock();
        let mut unloaded = 0;

        refs.retain(|weak| match weak.upgrade() {
            Some(inner) => {
                if Lazy::from_inner(inner).try_unload_idle(self.idle_timeout) {
                    unloaded += 1;
                }
                true
            }
            None => false,
        });

        if unloaded > 0 {
            debug!(unloaded, tracked = refs.len(), "lazy sweep released references");
        }
        unloaded
    }

    /// Start the background sweeper thread.
    ///
    /// Idempotent: a second call while running does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }

        let manager = Arc::downgrade(self);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.sweep_interval;

        let handle = std::thread::Builder::new()
            .name("stow-lazy-sweeper".to_string())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    // Sleep in slices so shutdown is noticed promptly.
                    let slice = Duration::from_millis(50).min(interval);
                    let mut elapsed = Duration::ZERO;
                    while elapsed < interval {
                        if shutdown.load(Ordering::Relaxed) {
                            return;
                        }
                        std::thread::sleep(slice);
                        elapsed += slice;
                    }

                    // Weak upgrade keeps the thread from pinning the manager.
                    match manager.upgrade() {
                        Some(manager) => {
                            manager.sweep_now();
                        }
                        None => return,
                    }
                }
            })
            .expect("failed to spawn lazy sweeper thread");

        *worker = Some(handle);
    }

    /// Signal shutdown and join the background thread.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    /// True once shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

impl Drop for LazyReferenceManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for LazyReferenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyReferenceManager")
            .field("tracked", &self.refs.lock().len())
            .field("idle_timeout", &self.idle_timeout)
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lazy::ReferenceLoader;
    use std::sync::atomic::AtomicUsize;
    use stow_core::error::Result;
    use stow_core::types::ObjectId;
    use stow_types::object::Obj;

    struct CountingLoader {
        calls: AtomicUsize,
    }

    impl ReferenceLoader for CountingLoader {
        fn load_reference(&self, _oid: ObjectId) -> Result<Obj> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(1i64))
        }
    }

    fn loader() -> Arc<CountingLoader> {
        Arc::new(CountingLoader {
            calls: AtomicUsize::new(0),
        })
    }

    fn manager(idle_ms: u64) -> LazyReferenceManager {
        LazyReferenceManager::new(
            Duration::from_millis(idle_ms),
            Duration::from_millis(20),
        )
    }

    #[test]
    fn test_sweep_unloads_idle_reference() {
        let manager = manager(0);
        let lazy = Lazy::unresolved(ObjectId::new(10), loader());
        manager.track(&lazy);

        lazy.get().unwrap();
        assert!(lazy.is_loaded());

        assert_eq!(manager.sweep_now(), 1);
        assert_eq!(lazy.state_name(), "unloaded");
    }

    #[test]
    fn test_sweep_keeps_active_reference() {
        let manager = manager(60_000);
        let lazy = Lazy::unresolved(ObjectId::new(10), loader());
        manager.track(&lazy);

        lazy.get().unwrap();
        assert_eq!(manager.sweep_now(), 0);
        assert!(lazy.is_loaded());
    }

    #[test]
    fn test_sweep_prunes_dead_entries() {
        let manager = manager(0);
        {
            let lazy = Lazy::unresolved(ObjectId::new(10), loader());
            manager.track(&lazy);
            assert_eq!(manager.tracked_count(), 1);
        }
        manager.sweep_now();
        assert_eq!(manager.tracked_count(), 0);
    }

    #[test]
    fn test_sweep_never_loads() {
        let manager = manager(0);
        let counting = loader();
        let lazy = Lazy::unresolved(ObjectId::new(10), counting.clone());
        manager.track(&lazy);

        manager.sweep_now();
        manager.sweep_now();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
        assert_eq!(lazy.state_name(), "unresolved");
    }

    #[test]
    fn test_background_sweeper_unloads() {
        let manager = Arc::new(manager(0));
        manager.start();

        let counting = loader();
        let lazy = Lazy::unresolved(ObjectId::new(10), counting);
        manager.track(&lazy);
        lazy.get().unwrap();

        // Give the sweeper a few intervals to run.
        let mut waited = Duration::ZERO;
        while lazy.is_loaded() && waited < Duration::from_secs(2) {
            std::thread::sleep(Duration::from_millis(20));
            waited += Duration::from_millis(20);
        }
        assert_eq!(lazy.state_name(), "unloaded");

        manager.stop();
    }

    #[test]
    fn test_stop_joins_quickly() {
        let manager = Arc::new(LazyReferenceManager::new(
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
        manager.start();

        let start = std::time::Instant::now();
        manager.stop();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(manager.is_shutdown());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let manager = Arc::new(manager(0));
        manager.start();
        manager.stop();
        manager.stop();
    }

    #[test]
    fn test_reload_after_sweep_reproduces_value() {
        let manager = manager(0);
        let counting = loader();
        let lazy = Lazy::unresolved(ObjectId::new(10), counting.clone());
        manager.track(&lazy);

        let before = lazy.get().unwrap().unwrap();
        let before_value = *before.as_any().downcast_ref::<i64>().unwrap();
        drop(before);

        manager.sweep_now();
        assert_eq!(lazy.state_name(), "unloaded");

        let after = lazy.get().unwrap().unwrap();
        assert_eq!(*after.as_any().downcast_ref::<i64>().unwrap(), before_value);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    }
}
