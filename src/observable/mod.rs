//! Publish/subscribe primitive linking prices and rates to portfolios
//!
//! Publishers (variable-price assets and FX rates) keep their subscribers by weak reference so
//! that dropping the last strong handle to a subscriber silently removes it from every publisher.
//! Notification is synchronous: a mutation that triggers a notify completes every subscriber's
//! `on_update` before the mutating call returns.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::error::Result;

/// Reacts to a change in something it subscribed to.
///
/// `on_update` must be idempotent, it can run more than once per timestamp when several
/// publishers the subscriber watches change in the same batch.
pub trait Observer {
    fn on_update(&mut self) -> Result<()>;
}

pub type ObserverHandle = Rc<RefCell<dyn Observer>>;
pub type WeakObserver = Weak<RefCell<dyn Observer>>;

//Subscriber identity is the allocation, not the vtable, so comparisons go through the data
//pointer of the live handle. Comparing fat pointers directly is unreliable across codegen
//units; dead subscribers compare as null and never match a live key.
fn data_ptr(observer: &WeakObserver) -> *const () {
    observer
        .upgrade()
        .map_or(std::ptr::null(), |live| Rc::as_ptr(&live) as *const ())
}

/// The publisher half of the graph: a set of weak subscriber edges.
pub struct Subscribers {
    observers: Vec<WeakObserver>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    /// Add is idempotent, re-subscribing an existing observer is a no-op.
    pub fn add(&mut self, observer: WeakObserver) {
        if !self.contains(&observer) {
            self.observers.push(observer);
        }
    }

    /// Removal is idempotent, removing an absent observer is a no-op.
    pub fn remove(&mut self, observer: &WeakObserver) {
        let key = data_ptr(observer);
        self.observers.retain(|existing| data_ptr(existing) != key);
    }

    pub fn contains(&self, observer: &WeakObserver) -> bool {
        let key = data_ptr(observer);
        self.observers.iter().any(|existing| data_ptr(existing) == key)
    }

    pub fn live_count(&self) -> usize {
        self.observers
            .iter()
            .filter(|observer| observer.strong_count() > 0)
            .count()
    }

    /// Upgrade the current live subscribers and drop the dead edges.
    ///
    /// Publishers iterate the returned snapshot rather than the set itself so that subscriber
    /// mutations during notification cannot invalidate the iteration.
    pub fn snapshot(&mut self) -> Vec<ObserverHandle> {
        let live: Vec<ObserverHandle> = self.observers.iter().filter_map(Weak::upgrade).collect();
        self.observers.retain(|observer| observer.strong_count() > 0);
        live
    }
}

impl Default for Subscribers {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers")
            .field("live", &self.live_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{Observer, ObserverHandle, Subscribers};
    use crate::error::Result;

    struct Counter {
        updates: usize,
    }

    impl Observer for Counter {
        fn on_update(&mut self) -> Result<()> {
            self.updates += 1;
            Ok(())
        }
    }

    fn counter() -> Rc<RefCell<Counter>> {
        Rc::new(RefCell::new(Counter { updates: 0 }))
    }

    fn as_weak(counter: &Rc<RefCell<Counter>>) -> super::WeakObserver {
        let observer: ObserverHandle = counter.clone();
        Rc::downgrade(&observer)
    }

    #[test]
    fn test_that_subscribers_receive_updates() {
        let first = counter();
        let second = counter();

        let mut subscribers = Subscribers::new();
        subscribers.add(as_weak(&first));
        subscribers.add(as_weak(&second));

        for observer in subscribers.snapshot() {
            observer.borrow_mut().on_update().unwrap();
        }
        assert_eq!(first.borrow().updates, 1);
        assert_eq!(second.borrow().updates, 1);
    }

    #[test]
    fn test_that_subscription_is_idempotent() {
        let observer = counter();

        let mut subscribers = Subscribers::new();
        let weak = as_weak(&observer);
        subscribers.add(weak.clone());
        subscribers.add(weak.clone());
        assert_eq!(subscribers.live_count(), 1);

        subscribers.remove(&weak);
        subscribers.remove(&weak);
        assert_eq!(subscribers.live_count(), 0);
    }

    #[test]
    fn test_that_dropped_subscribers_are_pruned() {
        let observer = counter();

        let mut subscribers = Subscribers::new();
        subscribers.add(as_weak(&observer));
        assert_eq!(subscribers.live_count(), 1);

        drop(observer);
        assert_eq!(subscribers.live_count(), 0);
        assert!(subscribers.snapshot().is_empty());
    }
}
