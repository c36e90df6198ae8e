//! Observable Implementation
//!
//! An Observable is the writable reactive primitive. It holds a value,
//! reports reads to the evaluating computed, and notifies subscribers when
//! the value changes.
//!
//! # How Observables Work
//!
//! 1. When an observable is read while a computed is evaluating, it reports
//!    itself to the top capture frame. The computed subscribes to it once
//!    the evaluation finishes.
//!
//! 2. A write first asks the equality comparer whether the new value is
//!    different. Equal writes are dropped silently.
//!
//! 3. A different write announces `beforeChange` with the old value, stores
//!    the new value, then announces `spectate` and the default channel with
//!    the new value. The default channel bumps the registry version.
//!
//! 4. Computeds that re-evaluate during the write may fail. `set` logs
//!    those failures; `try_set` returns the first one to the writer.
//!
//! # Sharing
//!
//! Cloning an `Observable` clones a handle: both handles read and write the
//! same cell.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::Result;
use crate::extend::{Extender, NotificationPolicy};

use super::cascade;
use super::context::ReactiveContext;
use super::dependency::{CellId, Dependency};
use super::notifier::{eq_comparer, Comparer, Notifier};
use super::subscribable::{Channel, Subscription};

/// A reactive cell holding a value of type `T`.
///
/// # Example
///
/// ```rust,ignore
/// let count = Observable::new(0);
///
/// // Read the value (tracked inside a computed)
/// let value = count.get();
///
/// // Write the value (notifies subscribers if it changed)
/// count.set(5);
/// ```
pub struct Observable<T: 'static> {
    inner: Rc<ObservableInner<T>>,
}

struct ObservableInner<T> {
    id: CellId,
    value: RefCell<T>,
    notifier: Notifier<T>,
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    /// Create an observable that compares values with `==`.
    pub fn new(value: T) -> Self {
        Self::build(value, Some(eq_comparer()))
    }
}

impl<T: Clone + 'static> Observable<T> {
    /// Create an observable with a custom equality comparer.
    pub fn with_comparer<F>(value: T, comparer: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        Self::build(value, Some(Rc::new(comparer)))
    }

    /// Create an observable that treats every write as a change.
    ///
    /// Useful for values that have no meaningful equality.
    pub fn always_notify(value: T) -> Self {
        Self::build(value, None)
    }

    fn build(value: T, comparer: Option<Comparer<T>>) -> Self {
        let inner = Rc::new(ObservableInner {
            id: CellId::new(),
            value: RefCell::new(value),
            notifier: Notifier::new(comparer),
        });

        tracing::trace!(cell = %inner.id, "observable created");
        Self { inner }
    }

    /// Get the observable's unique ID.
    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// Get the current value.
    ///
    /// Inside an evaluating computed this also registers the observable as
    /// a dependency.
    pub fn get(&self) -> T {
        self.track();
        self.peek()
    }

    /// Get the current value without registering a dependency.
    pub fn peek(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value, registering a dependency.
    ///
    /// The value must not be written from inside `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        self.with_untracked(f)
    }

    /// Borrow the current value without registering a dependency.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Write a new value.
    ///
    /// Nothing happens if the comparer considers `value` equal to the
    /// current value.
    pub fn set(&self, value: T) {
        let changed = self.inner.notifier.is_different(&self.inner.value.borrow(), &value);
        if !changed {
            return;
        }

        self.value_will_mutate();
        *self.inner.value.borrow_mut() = value;
        self.value_has_mutated();
    }

    /// Write a new value and report how the computeds downstream fared.
    ///
    /// Returns the first evaluation error raised by a computed that
    /// re-evaluated because of this write. The failing computed keeps its
    /// last good value.
    pub fn try_set(&self, value: T) -> Result<()> {
        let ((), error) = cascade::collect(|| self.set(value));
        error.map_or(Ok(()), Err)
    }

    /// Write a value computed from the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = {
            let current = self.inner.value.borrow();
            f(&current)
        };
        self.set(next);
    }

    /// Mutate the value in place.
    ///
    /// There is no old value to compare against, so subscribers are always
    /// notified.
    pub fn modify<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.value_will_mutate();
        let result = {
            let mut value = self.inner.value.borrow_mut();
            f(&mut value)
        };
        self.value_has_mutated();
        result
    }

    /// Announce `beforeChange` with the current value.
    pub fn value_will_mutate(&self) {
        let notifier = &self.inner.notifier;
        if notifier.is_observed(&Channel::BeforeChange) {
            notifier.notify(&self.peek(), &Channel::BeforeChange);
        }
    }

    /// Announce `spectate` and the default channel with the current value.
    pub fn value_has_mutated(&self) {
        let current = self.peek();
        self.inner.notifier.notify(&current, &Channel::Spectate);
        self.inner.notifier.notify(&current, &Channel::Change);
    }

    /// Subscribe to the default channel.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + 'static,
    {
        self.subscribe_to(Channel::Change, callback)
    }

    /// Subscribe to a specific channel.
    pub fn subscribe_to<F>(&self, channel: Channel, callback: F) -> Subscription
    where
        F: Fn(&T) + 'static,
    {
        self.inner.notifier.subscribers().subscribe(channel, callback)
    }

    /// Count live subscriptions on `channel`, or on every channel.
    pub fn subscription_count(&self, channel: Option<&Channel>) -> usize {
        self.inner.notifier.subscribers().subscription_count(channel)
    }

    /// Whether anyone listens on `channel`.
    pub fn has_subscriptions(&self, channel: &Channel) -> bool {
        self.inner.notifier.subscribers().has_subscriptions(channel)
    }

    /// The registry version. It increments on every delivered change.
    pub fn version(&self) -> u64 {
        self.inner.notifier.subscribers().version()
    }

    /// Whether a change was delivered since `version`.
    pub fn has_changed(&self, version: u64) -> bool {
        self.inner.notifier.subscribers().has_changed(version)
    }

    /// Apply an extender.
    pub fn extend(&self, extender: Extender) -> Result<()> {
        self.inner.notifier.extend(self.inner.id, &extender)
    }

    /// Gate default-channel notifications behind `policy`.
    pub fn limit(&self, policy: Rc<dyn NotificationPolicy>) {
        self.inner.notifier.limit(policy);
    }

    /// Replace the equality comparer. `None` treats every write as a change.
    pub fn set_equality_comparer(&self, comparer: Option<Comparer<T>>) {
        self.inner.notifier.set_comparer(comparer);
    }

    /// Whether a limited change is waiting for its flush.
    pub fn has_pending_notification(&self) -> bool {
        self.inner.notifier.has_pending_notification()
    }

    /// Whether deferred notifications are on.
    pub fn is_deferred(&self) -> bool {
        self.inner.notifier.is_deferred()
    }

    /// Name of the installed notification policy, if any.
    pub fn policy_name(&self) -> Option<&'static str> {
        self.inner.notifier.policy_name()
    }

    fn track(&self) {
        if ReactiveContext::is_tracking() {
            ReactiveContext::track(self.inner.clone());
        }
    }
}

impl<T: Clone + 'static> Dependency for ObservableInner<T> {
    fn id(&self) -> CellId {
        self.id
    }

    fn version(&self) -> u64 {
        self.notifier.subscribers().version()
    }

    fn has_changed_since(&self, version: u64) -> bool {
        self.notifier.subscribers().has_changed(version)
    }

    fn subscribe_change(&self, callback: Rc<dyn Fn()>) -> Subscription {
        self.notifier
            .subscribers()
            .subscribe(Channel::Change, move |_: &T| callback())
    }
}

impl<T: 'static> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + Default + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("notifier", &self.inner.notifier)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks;
    use std::cell::Cell;
    use std::time::Duration;

    fn recorder<T: Clone + 'static>() -> (Rc<RefCell<Vec<T>>>, impl Fn(&T) + 'static) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        (log, move |value: &T| sink.borrow_mut().push(value.clone()))
    }

    #[test]
    fn observable_get_and_set() {
        let observable = Observable::new(0);
        assert_eq!(observable.get(), 0);

        observable.set(42);
        assert_eq!(observable.get(), 42);
    }

    #[test]
    fn observable_update() {
        let observable = Observable::new(10);
        observable.update(|v| v + 5);
        assert_eq!(observable.peek(), 15);
    }

    #[test]
    fn equal_writes_are_silent() {
        let observable = Observable::new(1);
        let (seen, callback) = recorder();
        let _sub = observable.subscribe(callback);

        observable.set(1);
        assert!(seen.borrow().is_empty());
        assert_eq!(observable.version(), 0);

        observable.set(2);
        assert_eq!(*seen.borrow(), vec![2]);
        assert_eq!(observable.version(), 1);
    }

    #[test]
    fn write_announces_before_change_then_spectate_then_change() {
        let observable = Observable::new("a".to_string());
        let log = Rc::new(RefCell::new(Vec::new()));

        let subs: Vec<Subscription> = [Channel::Change, Channel::Spectate, Channel::BeforeChange]
            .into_iter()
            .map(|channel| {
                let log = log.clone();
                let name = channel.name().to_string();
                observable.subscribe_to(channel, move |v: &String| {
                    log.borrow_mut().push(format!("{name}:{v}"));
                })
            })
            .collect();

        observable.set("b".to_string());
        assert_eq!(*log.borrow(), vec!["beforeChange:a", "spectate:b", "change:b"]);
        assert_eq!(subs.len(), 3);
    }

    #[test]
    fn modify_always_notifies() {
        let observable = Observable::new(vec![1, 2]);
        let (seen, callback) = recorder();
        let _sub = observable.subscribe(callback);

        let len = observable.modify(|items| {
            items.push(3);
            items.len()
        });

        assert_eq!(len, 3);
        assert_eq!(*seen.borrow(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn custom_comparer_decides_equality() {
        let observable = Observable::with_comparer(1.0_f64, |a, b| (a - b).abs() < 0.5);
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let _sub = observable.subscribe(move |_| c.set(c.get() + 1));

        observable.set(1.2);
        assert_eq!(count.get(), 0);
        assert_eq!(observable.peek(), 1.0);

        observable.set(2.0);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn notify_always_announces_equal_writes() {
        let observable = Observable::new(5);
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let _sub = observable.subscribe(move |_| c.set(c.get() + 1));

        observable.extend(Extender::notify_always()).unwrap();
        observable.set(5);
        observable.set(5);
        assert_eq!(count.get(), 2);

        observable
            .extend(Extender::Notify(crate::extend::NotifyMode::Changed))
            .unwrap();
        observable.set(5);
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn unsubscribed_callback_is_not_called() {
        let observable = Observable::new(0);
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let sub = observable.subscribe(move |_| c.set(c.get() + 1));

        observable.set(1);
        sub.dispose();
        observable.set(2);

        // Should not have been called again
        assert_eq!(count.get(), 1);
        assert_eq!(observable.subscription_count(None), 0);
    }

    #[test]
    fn observable_clone_shares_state() {
        let observable1 = Observable::new(0);
        let observable2 = observable1.clone();

        observable1.set(42);
        assert_eq!(observable2.get(), 42);
        assert_eq!(observable1.id(), observable2.id());
    }

    #[test]
    fn rate_limited_burst_that_reverts_is_silent() {
        let observable = Observable::new("x");
        let (changes, on_change) = recorder();
        let (befores, on_before) = recorder();
        let _a = observable.subscribe(on_change);
        let _b = observable.subscribe_to(Channel::BeforeChange, on_before);

        observable
            .extend(Extender::rate_limit(
                Duration::from_millis(50),
                crate::extend::RateLimitMethod::NotifyAtFixedRate,
            ))
            .unwrap();

        observable.set("y");
        observable.set("x");
        assert!(observable.has_pending_notification());

        tasks::advance(Duration::from_millis(50));
        assert!(!observable.has_pending_notification());
        assert!(changes.borrow().is_empty());
        assert_eq!(*befores.borrow(), vec!["x"]);
    }

    #[test]
    fn throttled_writes_deliver_the_last_value() {
        let observable = Observable::new(0);
        let (seen, callback) = recorder();
        let _sub = observable.subscribe(callback);
        observable.extend(Extender::throttle(Duration::from_millis(20))).unwrap();

        for n in 1..=5 {
            observable.set(n);
            tasks::advance(Duration::from_millis(10));
        }
        assert!(seen.borrow().is_empty());

        tasks::advance(Duration::from_millis(20));
        assert_eq!(*seen.borrow(), vec![5]);
        assert_eq!(observable.policy_name(), Some("debounce"));
    }

    #[test]
    fn deferred_cannot_be_turned_off() {
        let observable = Observable::new(0);

        // Turning it off before it was ever on is fine
        observable.extend(Extender::Deferred(false)).unwrap();

        observable.extend(Extender::deferred()).unwrap();
        observable.extend(Extender::deferred()).unwrap();
        assert!(observable.is_deferred());

        let err = observable.extend(Extender::Deferred(false)).unwrap_err();
        assert!(matches!(err, crate::ReactiveError::DeferredIrrevocable { .. }));
    }

    #[test]
    fn deferred_changes_wait_for_the_task_queue() {
        let observable = Observable::new(0);
        let (seen, callback) = recorder();
        let _sub = observable.subscribe(callback);
        observable.extend(Extender::deferred()).unwrap();

        observable.set(1);
        observable.set(2);
        observable.set(3);
        assert!(seen.borrow().is_empty());
        assert_eq!(observable.version(), 0);

        tasks::run_early();
        assert_eq!(*seen.borrow(), vec![3]);
        assert_eq!(observable.version(), 1);
    }

    #[test]
    fn debug_includes_notifier_state() {
        let observable = Observable::new(vec![1, 2]);
        observable.extend(Extender::deferred()).unwrap();

        let shown = format!("{observable:?}");
        assert!(shown.contains("value: [1, 2]"));
        assert!(shown.contains("Notifier"));
        assert!(shown.contains("deferred: true"));
    }
}
