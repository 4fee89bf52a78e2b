//! Typed broadcast signals with cancellable subscriptions.
//!
//! A [`Signal`] delivers every emitted event to all live listeners on the
//! synchronous call stack of the emitter. Listeners are function-like
//! (closures) or object-like (any [`SignalHandler`] implementation), can be
//! revoked by id, by dropping a [`Subscription`] guard, or by cancelling a
//! [`CancelToken`] — cancellation wins even between dispatch and delivery.
//!
//! A [`SignalController`] separates emission from observation: the owner
//! keeps the controller (and with it the only way to emit), observers get a
//! [`SignalObserver`] view that can only subscribe and unsubscribe.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Object-like signal listener.
///
/// Closures `Fn(&T)` implement this automatically, so both handler styles
/// go through one subscription surface.
pub trait SignalHandler<T> {
    fn handle(&self, event: &T);
}

impl<T, F: Fn(&T)> SignalHandler<T> for F {
    fn handle(&self, event: &T) {
        self(event)
    }
}

/// Identifier of one subscription on one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Shared cancellation flag.
///
/// Cancelling revokes every subscription registered with this token without
/// the handler being called again, including events already dispatched but
/// not yet delivered.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Rc<Cell<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

struct ListenerEntry<T> {
    id: SubscriptionId,
    handler: Rc<dyn SignalHandler<T>>,
    token: Option<CancelToken>,
}

struct SignalInner<T> {
    listeners: Vec<ListenerEntry<T>>,
    next_id: u64,
}

impl<T> SignalInner<T> {
    fn subscribe(
        &mut self,
        handler: Rc<dyn SignalHandler<T>>,
        token: Option<CancelToken>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push(ListenerEntry { id, handler, token });
        id
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|entry| entry.id != id);
        self.listeners.len() != before
    }

    fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.listeners.iter().any(|entry| entry.id == id)
    }
}

/// Broadcast signal of `T`.
pub struct Signal<T> {
    inner: Rc<RefCell<SignalInner<T>>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SignalInner { listeners: Vec::new(), next_id: 0 })),
        }
    }

    pub fn subscribe(&self, handler: impl SignalHandler<T> + 'static) -> SubscriptionId {
        self.inner.borrow_mut().subscribe(Rc::new(handler), None)
    }

    pub fn subscribe_with_token(
        &self,
        handler: impl SignalHandler<T> + 'static,
        token: CancelToken,
    ) -> SubscriptionId {
        self.inner.borrow_mut().subscribe(Rc::new(handler), Some(token))
    }

    /// Subscribes and returns a guard that revokes the subscription when
    /// dropped.
    pub fn subscribe_guarded(&self, handler: impl SignalHandler<T> + 'static) -> Subscription
    where
        T: 'static,
    {
        let id = self.subscribe(handler);
        Subscription::for_signal(Rc::downgrade(&self.inner), id)
    }

    /// Removes the subscription. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.borrow_mut().unsubscribe(id)
    }

    /// Emits an event to every live listener, in subscription order, on the
    /// current call stack.
    ///
    /// The listener list is snapshotted up front; each entry is re-checked
    /// immediately before its delivery so that unsubscription or token
    /// cancellation performed by an earlier handler still suppresses it.
    pub fn emit(&self, event: &T) {
        let snapshot: Vec<(SubscriptionId, Rc<dyn SignalHandler<T>>, Option<CancelToken>)> = self
            .inner
            .borrow()
            .listeners
            .iter()
            .map(|entry| (entry.id, Rc::clone(&entry.handler), entry.token.clone()))
            .collect();

        for (id, handler, token) in snapshot {
            if token.as_ref().is_some_and(CancelToken::is_cancelled) {
                self.inner.borrow_mut().unsubscribe(id);
                continue;
            }
            if !self.inner.borrow().is_subscribed(id) {
                continue;
            }
            handler.handle(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    /// Observe-only view of this signal.
    pub fn observer(&self) -> SignalObserver<T> {
        SignalObserver { inner: Rc::downgrade(&self.inner) }
    }
}

/// Observe-only view of a [`Signal`]: subscribe and unsubscribe, no
/// emission.
///
/// Holds the signal weakly; subscribing to a dead signal is a no-op that
/// still hands back an id, so observers never keep an abandoned node alive.
pub struct SignalObserver<T> {
    inner: Weak<RefCell<SignalInner<T>>>,
}

impl<T> Clone for SignalObserver<T> {
    fn clone(&self) -> Self {
        Self { inner: Weak::clone(&self.inner) }
    }
}

impl<T> SignalObserver<T> {
    pub fn subscribe(&self, handler: impl SignalHandler<T> + 'static) -> SubscriptionId {
        match self.inner.upgrade() {
            Some(inner) => inner.borrow_mut().subscribe(Rc::new(handler), None),
            None => SubscriptionId(u64::MAX),
        }
    }

    pub fn subscribe_with_token(
        &self,
        handler: impl SignalHandler<T> + 'static,
        token: CancelToken,
    ) -> SubscriptionId {
        match self.inner.upgrade() {
            Some(inner) => inner.borrow_mut().subscribe(Rc::new(handler), Some(token)),
            None => SubscriptionId(u64::MAX),
        }
    }

    /// Subscribes and returns a guard that revokes the subscription when
    /// dropped.
    pub fn subscribe_guarded(&self, handler: impl SignalHandler<T> + 'static) -> Subscription
    where
        T: 'static,
    {
        let id = self.subscribe(handler);
        Subscription::for_signal(Weak::clone(&self.inner), id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.borrow_mut().unsubscribe(id),
            None => false,
        }
    }
}

/// Pairs a privately held emitting signal with its public observer view.
pub struct SignalController<T> {
    signal: Signal<T>,
}

impl<T> Default for SignalController<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SignalController<T> {
    pub fn new() -> Self {
        Self { signal: Signal::new() }
    }

    /// Emits through the private signal.
    pub fn emit(&self, event: &T) {
        self.signal.emit(event);
    }

    /// The external, observe-only view.
    pub fn observer(&self) -> SignalObserver<T> {
        self.signal.observer()
    }
}

/// Subscription guard: revokes its subscription on drop (or explicitly via
/// [`Subscription::cancel`]).
pub struct Subscription {
    revoke: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Guard that revokes nothing; stands in where a subscription could not
    /// be established.
    pub(crate) fn noop() -> Self {
        Self { revoke: None }
    }

    fn for_signal<T: 'static>(inner: Weak<RefCell<SignalInner<T>>>, id: SubscriptionId) -> Self {
        Self {
            revoke: Some(Box::new(move || {
                if let Some(inner) = inner.upgrade() {
                    inner.borrow_mut().unsubscribe(id);
                }
            })),
        }
    }

    pub fn cancel(mut self) {
        if let Some(revoke) = self.revoke.take() {
            revoke();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(revoke) = self.revoke.take() {
            revoke();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_to_all_listeners_in_order() {
        let signal = Signal::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        for tag in ["a", "b"] {
            let seen = Rc::clone(&seen);
            signal.subscribe(move |event: &u32| seen.borrow_mut().push((tag, *event)));
        }

        signal.emit(&7);
        assert_eq!(*seen.borrow(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn unsubscribe_actually_removes_the_listener() {
        let signal = Signal::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let id = {
            let seen = Rc::clone(&seen);
            signal.subscribe(move |event: &u32| seen.borrow_mut().push(*event))
        };

        assert!(signal.unsubscribe(id));
        assert!(!signal.unsubscribe(id));
        signal.emit(&1);
        assert!(seen.borrow().is_empty());
        assert_eq!(signal.listener_count(), 0);
    }

    #[test]
    fn cancellation_between_dispatch_and_delivery_suppresses_the_handler() {
        let signal = Signal::new();
        let token = CancelToken::new();
        let late_called = Rc::new(Cell::new(false));

        // First handler cancels the second one's token mid-emission.
        {
            let token = token.clone();
            signal.subscribe(move |_: &u32| token.cancel());
        }
        {
            let late_called = Rc::clone(&late_called);
            signal.subscribe_with_token(move |_: &u32| late_called.set(true), token);
        }

        signal.emit(&0);
        assert!(!late_called.get());
        // The cancelled entry was purged as part of delivery.
        assert_eq!(signal.listener_count(), 1);
    }

    #[test]
    fn unsubscribe_during_emission_suppresses_later_delivery() {
        let signal: Signal<u32> = Signal::new();
        let late_called = Rc::new(Cell::new(false));
        let late_id = Rc::new(Cell::new(None));

        {
            let signal = signal.clone();
            let late_id = Rc::clone(&late_id);
            signal.clone().subscribe(move |_: &u32| {
                if let Some(id) = late_id.get() {
                    signal.unsubscribe(id);
                }
            });
        }
        let id = {
            let late_called = Rc::clone(&late_called);
            signal.subscribe(move |_: &u32| late_called.set(true))
        };
        late_id.set(Some(id));

        signal.emit(&0);
        assert!(!late_called.get());
    }

    #[test]
    fn object_like_handlers_are_accepted() {
        struct Recorder {
            seen: Rc<RefCell<Vec<u32>>>,
        }
        impl SignalHandler<u32> for Recorder {
            fn handle(&self, event: &u32) {
                self.seen.borrow_mut().push(*event);
            }
        }

        let signal = Signal::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        signal.subscribe(Recorder { seen: Rc::clone(&seen) });

        signal.emit(&3);
        assert_eq!(*seen.borrow(), vec![3]);
    }

    #[test]
    fn controller_view_cannot_emit_but_observes() {
        let controller = SignalController::new();
        let observer = controller.observer();
        let seen = Rc::new(Cell::new(0u32));

        let _sub = {
            let seen = Rc::clone(&seen);
            observer.subscribe_guarded(move |event: &u32| seen.set(*event))
        };

        controller.emit(&9);
        assert_eq!(seen.get(), 9);
    }

    #[test]
    fn subscription_guard_revokes_on_drop() {
        let signal = Signal::new();
        let seen = Rc::new(Cell::new(0u32));

        let sub = {
            let seen = Rc::clone(&seen);
            signal.subscribe_guarded(move |event: &u32| seen.set(*event))
        };
        signal.emit(&1);
        drop(sub);
        signal.emit(&2);

        assert_eq!(seen.get(), 1);
    }
}
