//! Weak listener registry
//!
//! A session keeps only weak references to its listeners: dropping a
//! listener unregisters it, and removing every listener leaves the session
//! running. Registrations are addressed by [`ListenerId`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::api::SessionListener;

/// Handle returned by a listener registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<ListenerId, Weak<dyn SessionListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` without keeping it alive
    pub fn add(&self, listener: &Arc<dyn SessionListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().insert(id, Arc::downgrade(listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        self.listeners.lock().remove(&id).is_some()
    }

    /// Listeners still alive
    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Calls `f` on every live listener, pruning dropped ones.
    ///
    /// The lock is released before any callback runs, so a listener may
    /// register or remove listeners from inside a callback.
    pub fn for_each(&self, f: impl Fn(&dyn SessionListener)) {
        let live: Vec<Arc<dyn SessionListener>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|_, weak| weak.strong_count() > 0);
            let mut ids: Vec<_> = listeners.keys().copied().collect();
            ids.sort();
            ids.iter()
                .filter_map(|id| listeners.get(id).and_then(Weak::upgrade))
                .collect()
        };
        for listener in live {
            f(listener.as_ref());
        }
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SessionInfo;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl SessionListener for Counter {
        fn on_established(&self, _session: &SessionInfo) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn info() -> SessionInfo {
        SessionInfo {
            id: crate::api::SessionId::new(),
            call_id: "listeners".into(),
            kind: crate::feature::FeatureKind::Chat,
            direction: crate::api::SessionDirection::Outgoing,
            remote_uri: "sip:bob@example.com".into(),
        }
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let registry = ListenerRegistry::new();
        let kept = Arc::new(Counter::default());
        let kept_dyn: Arc<dyn SessionListener> = kept.clone();
        registry.add(&kept_dyn);
        {
            let dropped: Arc<dyn SessionListener> = Arc::new(Counter::default());
            registry.add(&dropped);
            assert_eq!(registry.len(), 2);
        }
        assert_eq!(registry.len(), 1);

        let info = info();
        registry.for_each(|l| l.on_established(&info));
        assert_eq!(kept.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_removed_listener_is_not_called() {
        let registry = ListenerRegistry::new();
        let counter = Arc::new(Counter::default());
        let as_dyn: Arc<dyn SessionListener> = counter.clone();
        let id = registry.add(&as_dyn);
        assert!(registry.remove(id));
        assert!(!registry.remove(id));

        let info = info();
        registry.for_each(|l| l.on_established(&info));
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }
}
