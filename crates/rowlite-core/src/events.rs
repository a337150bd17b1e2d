//! Change notification after successful mutations.
//!
//! Listeners run synchronously on the mutating thread, after the SQL
//! completes and before the mutating call returns. Panics inside a listener
//! propagate to the caller; there is no isolation at this level.
//!
//! Snapshot-on-emit semantics:
//!   - A listener removed during emission is still called in that round.
//!   - A listener added during emission is not called until the next emit.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// The kind of mutation that happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
    Upsert,
}

/// A table-level change, emitted only when the underlying operation
/// reported a positive affected-row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub table: &'static str,
    pub action: ChangeAction,
}

/// A listener ID returned by [`ChangeNotifier::on`], used to unsubscribe.
pub type ListenerId = u64;

type ListenerFn = dyn Fn(&ChangeEvent) + Send + Sync;

/// Synchronous subscriber registry for change events.
///
/// All methods take `&self`; state is behind a `Mutex` that is never held
/// while a listener runs, so listeners may subscribe and unsubscribe from
/// inside a callback.
pub struct ChangeNotifier {
    listeners: Mutex<Vec<(ListenerId, Arc<ListenerFn>)>>,
    next_id: AtomicU64,
}

impl ChangeNotifier {
    /// Create a new, empty notifier.
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `callback` and return its [`ListenerId`].
    pub fn on(&self, callback: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .expect("listener registry poisoned")
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove the listener identified by `id`. Safe to call repeatedly.
    pub fn off(&self, id: ListenerId) {
        self.listeners
            .lock()
            .expect("listener registry poisoned")
            .retain(|(lid, _)| *lid != id);
    }

    /// Dispatch `event` to all currently registered listeners.
    pub fn emit(&self, event: &ChangeEvent) {
        let snapshot: Vec<Arc<ListenerFn>> = {
            let guard = self.listeners.lock().expect("listener registry poisoned");
            guard.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for cb in snapshot {
            cb(event);
        }
    }

    /// Number of currently registered listeners.
    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .expect("listener registry poisoned")
            .len()
    }

    /// Whether no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_listeners() {
        let notifier = ChangeNotifier::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        notifier.on(move |ev| {
            assert_eq!(ev.table, "items");
            assert_eq!(ev.action, ChangeAction::Insert);
            c.fetch_add(1, Ordering::SeqCst);
        });

        notifier.emit(&ChangeEvent {
            table: "items",
            action: ChangeAction::Insert,
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_removes_listener() {
        let notifier = ChangeNotifier::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        let id = notifier.on(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        notifier.off(id);
        notifier.off(id); // idempotent

        notifier.emit(&ChangeEvent {
            table: "items",
            action: ChangeAction::Delete,
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(notifier.is_empty());
    }

    #[test]
    fn test_listener_added_during_emit_waits_a_round() {
        let notifier = Arc::new(ChangeNotifier::new());
        let count = Arc::new(AtomicUsize::new(0));

        let n = Arc::clone(&notifier);
        let c = Arc::clone(&count);
        notifier.on(move |_| {
            let c2 = Arc::clone(&c);
            n.on(move |_| {
                c2.fetch_add(1, Ordering::SeqCst);
            });
        });

        let ev = ChangeEvent {
            table: "items",
            action: ChangeAction::Update,
        };
        notifier.emit(&ev);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        notifier.emit(&ev);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
