//! Publish/subscribe primitive for change notification
//!
//! Handlers run synchronously on the notifying thread, in registration
//! order. A publisher that notifies while committing therefore delivers
//! changes in commit order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Callback invoked with each published value
pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: AtomicU64,
    handlers: Mutex<BTreeMap<u64, Handler<T>>>,
}

impl<T> Registry<T> {
    fn handlers(&self) -> MutexGuard<'_, BTreeMap<u64, Handler<T>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fan-out point for values of type `T`
pub struct Observer<T> {
    inner: Arc<Registry<T>>,
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Default for Observer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Observer<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Registry {
                next_id: AtomicU64::new(0),
                handlers: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Subscribe a handler. The returned [`Disconnect`] removes it.
    pub fn on_change(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> Disconnect {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.handlers().insert(id, Arc::new(handler));
        let weak: Weak<Registry<T>> = Arc::downgrade(&self.inner);
        Disconnect::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.handlers().remove(&id);
            }
        })
    }

    /// Deliver a value to every current handler
    pub fn notify(&self, value: &T) {
        // Snapshot so handlers may subscribe or disconnect while running
        let handlers: Vec<Handler<T>> = self.inner.handlers().values().cloned().collect();
        for handler in handlers {
            handler(value);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.inner.handlers().len()
    }
}

/// Handle that cancels a subscription. Calling [`Disconnect::disconnect`]
/// more than once is a no-op.
pub struct Disconnect {
    f: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Disconnect {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self {
            f: Mutex::new(Some(Box::new(f))),
        }
    }

    /// A handle with nothing to disconnect, for static resource sets
    pub fn noop() -> Self {
        Self { f: Mutex::new(None) }
    }

    /// Combine several handles into one
    pub fn all(handles: Vec<Disconnect>) -> Self {
        Self::new(move || handles.iter().for_each(Disconnect::disconnect))
    }

    pub fn disconnect(&self) {
        let f = self.f.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(f) = f {
            f();
        }
    }
}

impl std::fmt::Debug for Disconnect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disconnect").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_in_registration_order() {
        let observer: Observer<u32> = Observer::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = Arc::clone(&seen);
        let _d1 = observer.on_change(move |v| s1.lock().unwrap().push(("a", *v)));
        let s2 = Arc::clone(&seen);
        let _d2 = observer.on_change(move |v| s2.lock().unwrap().push(("b", *v)));

        observer.notify(&1);
        observer.notify(&2);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("a", 1), ("b", 1), ("a", 2), ("b", 2)]
        );
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let observer: Observer<u32> = Observer::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        let d = observer.on_change(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        observer.notify(&0);
        d.disconnect();
        d.disconnect();
        observer.notify(&0);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(observer.handler_count(), 0);
    }

    #[test]
    fn test_disconnect_all() {
        let observer: Observer<()> = Observer::new();
        let d = Disconnect::all(vec![observer.on_change(|_| {}), observer.on_change(|_| {})]);
        assert_eq!(observer.handler_count(), 2);
        d.disconnect();
        assert_eq!(observer.handler_count(), 0);
        Disconnect::noop().disconnect();
    }
}
