//! Observer hooks for sync progress.

use std::sync::{Arc, RwLock};

use dav_common::{TableId, TableObject, User};

use crate::download::DownloadReport;

/// Receives notifications after state changes were written to the cache.
///
/// All hooks default to no-ops, so implementors only override what they
/// need. Hooks run on the sync task and should return quickly.
pub trait SyncObserver: Send + Sync {
    /// A user profile was loaded from the cache or refreshed.
    fn user_loaded(&self, _user: &User) {}

    /// The local session was discarded.
    fn logged_out(&self) {}

    /// A table object was written from a remote copy.
    fn table_object_updated(&self, _object: &TableObject, _file_downloaded: bool) {}

    /// A table object was removed from the cache.
    fn table_object_deleted(&self, _uuid: &str, _table_id: TableId) {}

    /// A table finished reconciling.
    fn table_synced(&self, _table_name: &str, _changed: bool) {}

    /// A download run finished.
    fn sync_finished(&self, _report: &DownloadReport) {}
}

/// Registry of observers.
#[derive(Default)]
pub struct Observers {
    observers: RwLock<Vec<Arc<dyn SyncObserver>>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn SyncObserver>) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call `f` for every registered observer.
    pub fn emit(&self, f: impl Fn(&dyn SyncObserver)) {
        // Snapshot so hooks may register further observers.
        let observers: Vec<Arc<dyn SyncObserver>> = self
            .observers
            .read()
            .map(|o| o.clone())
            .unwrap_or_default();

        for observer in &observers {
            f(observer.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        deleted: AtomicUsize,
        logged_out: AtomicUsize,
    }

    impl SyncObserver for Counter {
        fn table_object_deleted(&self, _uuid: &str, _table_id: u32) {
            self.deleted.fetch_add(1, Ordering::SeqCst);
        }

        fn logged_out(&self) {
            self.logged_out.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_emit_reaches_every_observer() {
        let observers = Observers::new();
        let first = Arc::new(Counter::default());
        let second = Arc::new(Counter::default());
        observers.register(first.clone());
        observers.register(second.clone());
        assert_eq!(observers.len(), 2);

        observers.emit(|o| o.table_object_deleted("u", 1));
        observers.emit(|o| o.logged_out());

        for counter in [&first, &second] {
            assert_eq!(counter.deleted.load(Ordering::SeqCst), 1);
            assert_eq!(counter.logged_out.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_default_hooks_are_noops() {
        struct Silent;
        impl SyncObserver for Silent {}

        let observers = Observers::new();
        observers.register(Arc::new(Silent));
        observers.emit(|o| o.table_synced("notes", true));
    }
}
