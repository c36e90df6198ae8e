//! Observable Array Implementation
//!
//! An `ObservableArray` is an observable whose value is a `Vec`, plus
//! sequence mutators and a fine-grained `arrayChange` channel.
//!
//! # How Change Tracking Works
//!
//! Tracking is off until someone subscribes to `arrayChange`, and goes off
//! again when the last such subscriber leaves. While it is on:
//!
//! 1. Every `spectate` notification of the underlying observable counts one
//!    pending change. `spectate` is never rate limited, so this counts
//!    writes, not deliveries.
//!
//! 2. Mutators whose effect is known up front (push, unshift, pop, shift,
//!    splice) cache the edit script before mutating, provided nothing is
//!    pending yet.
//!
//! 3. When the default channel delivers, the tracker uses the cached script
//!    if exactly one change is pending, and otherwise diffs the contents it
//!    last delivered against the current ones. A non-empty script goes out
//!    on `arrayChange`.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::Result;
use crate::extend::{Extender, NotificationPolicy};
use crate::reactive::{
    Channel, CellId, Observable, Readable, Subscribable, Subscription, SubscriptionHooks, Value,
};

use super::compare::{compare_arrays, find_moves, ArrayChange, CompareOptions};

/// Name of the channel edit scripts are delivered on.
pub const ARRAY_CHANGE: &str = "arrayChange";

fn array_change() -> Channel {
    Channel::custom(ARRAY_CHANGE)
}

/// A mutation whose edit script can be derived without diffing.
enum KnownOperation<'a, T> {
    Push(&'a [T]),
    Unshift(&'a [T]),
    Pop,
    Shift,
    Splice {
        start: usize,
        end: usize,
        items: &'a [T],
    },
}

/// An observable sequence with mutators and edit-script notifications.
///
/// # Example
///
/// ```rust,ignore
/// let todos = ObservableArray::new(vec!["write docs"]);
/// let _sub = todos.subscribe_changes(|changes| println!("{changes:?}"));
///
/// todos.push("ship it");
/// // prints: [ArrayChange { status: Added, value: "ship it", index: Some(1), moved: None }]
/// ```
pub struct ObservableArray<T: 'static> {
    items: Observable<Vec<T>>,
    tracker: Rc<ChangeTracker<T>>,
}

struct ChangeTracker<T: 'static> {
    items: Observable<Vec<T>>,
    changes: Subscribable<Vec<ArrayChange<T>>>,
    state: RefCell<TrackerState<T>>,
    this: Weak<ChangeTracker<T>>,
}

struct TrackerState<T> {
    tracking: bool,
    disposed: bool,
    /// Contents as of the last delivered change.
    previous: Vec<T>,
    cached_diff: Option<Vec<ArrayChange<T>>>,
    pending_changes: usize,
    options: CompareOptions,
    subscriptions: Vec<Subscription>,
}

impl<T: Clone + PartialEq + 'static> ObservableArray<T> {
    /// Create an array holding `items`.
    pub fn new(items: Vec<T>) -> Self {
        let items = Observable::new(items);

        let tracker = Rc::new_cyclic(|this| ChangeTracker {
            items: items.clone(),
            changes: Subscribable::new(),
            state: RefCell::new(TrackerState {
                tracking: false,
                disposed: false,
                previous: Vec::new(),
                cached_diff: None,
                pending_changes: 0,
                options: CompareOptions::sparse(),
                subscriptions: Vec::new(),
            }),
            this: this.clone(),
        });

        let hooks = Rc::downgrade(&tracker) as Weak<dyn SubscriptionHooks>;
        tracker.changes.set_hooks(hooks);

        Self { items, tracker }
    }

    /// Get the array's unique ID.
    pub fn id(&self) -> CellId {
        self.items.id()
    }

    /// The underlying observable.
    pub fn observable(&self) -> &Observable<Vec<T>> {
        &self.items
    }

    /// Get a copy of the contents, registering a dependency.
    pub fn get(&self) -> Vec<T> {
        self.items.get()
    }

    /// Get a copy of the contents without registering a dependency.
    pub fn peek(&self) -> Vec<T> {
        self.items.peek()
    }

    /// Borrow the contents, registering a dependency.
    pub fn with<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        self.items.with(|items| f(items.as_slice()))
    }

    /// Number of items, registering a dependency.
    pub fn len(&self) -> usize {
        self.with(<[T]>::len)
    }

    /// Whether the array has no items, registering a dependency.
    pub fn is_empty(&self) -> bool {
        self.with(<[T]>::is_empty)
    }

    /// The item at `index`, registering a dependency.
    pub fn item(&self, index: usize) -> Option<T> {
        self.with(|items| items.get(index).cloned())
    }

    /// Position of the first item equal to `item`, registering a dependency.
    pub fn index_of(&self, item: &T) -> Option<usize> {
        self.with(|items| items.iter().position(|candidate| candidate == item))
    }

    /// Replace the whole contents.
    pub fn set(&self, items: Vec<T>) {
        if !self.is_disposed() {
            self.items.set(items);
        }
    }

    /// Append one item. Returns the new length.
    pub fn push(&self, item: T) -> usize {
        self.push_all([item])
    }

    /// Append items in order. Returns the new length.
    pub fn push_all(&self, items: impl IntoIterator<Item = T>) -> usize {
        let items: Vec<T> = items.into_iter().collect();
        if !self.begin(Some(KnownOperation::Push(&items))) {
            return 0;
        }
        self.items.modify(move |contents| {
            contents.extend(items);
            contents.len()
        })
    }

    /// Prepend one item. Returns the new length.
    pub fn unshift(&self, item: T) -> usize {
        self.unshift_all([item])
    }

    /// Prepend items, keeping their order. Returns the new length.
    pub fn unshift_all(&self, items: impl IntoIterator<Item = T>) -> usize {
        let items: Vec<T> = items.into_iter().collect();
        if !self.begin(Some(KnownOperation::Unshift(&items))) {
            return 0;
        }
        self.items.modify(move |contents| {
            contents.splice(0..0, items);
            contents.len()
        })
    }

    /// Remove and return the last item.
    pub fn pop(&self) -> Option<T> {
        if !self.begin(Some(KnownOperation::Pop)) {
            return None;
        }
        self.items.modify(|contents| contents.pop())
    }

    /// Remove and return the first item.
    pub fn shift(&self) -> Option<T> {
        if !self.begin(Some(KnownOperation::Shift)) {
            return None;
        }
        self.items.modify(|contents| {
            if contents.is_empty() {
                None
            } else {
                Some(contents.remove(0))
            }
        })
    }

    /// Remove `delete_count` items at `start` and insert `items` there.
    ///
    /// A negative `start` counts from the end. `None` deletes through the
    /// end. Both are clamped to the contents. Returns the removed items.
    pub fn splice(&self, start: isize, delete_count: Option<usize>, items: Vec<T>) -> Vec<T> {
        let (start, end) = self.items.with_untracked(|contents| splice_range(contents.len(), start, delete_count));
        if !self.begin(Some(KnownOperation::Splice {
            start,
            end,
            items: &items,
        })) {
            return Vec::new();
        }
        self.items
            .modify(move |contents| contents.splice(start..end, items).collect())
    }

    /// Remove and return the item at `index`.
    pub fn remove_at(&self, index: usize) -> Option<T> {
        if index >= self.items.with_untracked(Vec::len) {
            return None;
        }
        let start = isize::try_from(index).ok()?;
        self.splice(start, Some(1), Vec::new()).into_iter().next()
    }

    /// Remove every item equal to `item`. Returns the removed items.
    pub fn remove(&self, item: &T) -> Vec<T> {
        self.remove_where(|candidate| candidate == item)
    }

    /// Remove every item matching `predicate`. Returns the removed items.
    ///
    /// Notifies only if something was removed.
    pub fn remove_where(&self, mut predicate: impl FnMut(&T) -> bool) -> Vec<T> {
        if self.is_disposed() {
            return Vec::new();
        }

        let matches = self.items.with_untracked(|contents| contents.iter().any(&mut predicate));
        if !matches {
            return Vec::new();
        }

        self.items.modify(|contents| {
            let mut removed = Vec::new();
            contents.retain(|candidate| {
                if predicate(candidate) {
                    removed.push(candidate.clone());
                    false
                } else {
                    true
                }
            });
            removed
        })
    }

    /// Remove every item equal to one of `values`.
    pub fn remove_all_of(&self, values: &[T]) -> Vec<T> {
        self.remove_where(|candidate| values.contains(candidate))
    }

    /// Remove every item. Always notifies.
    pub fn remove_all(&self) -> Vec<T> {
        if self.is_disposed() {
            return Vec::new();
        }
        self.items.modify(std::mem::take)
    }

    /// Replace the first item equal to `old` with `new`. Returns whether
    /// anything was replaced.
    pub fn replace(&self, old: &T, new: T) -> bool {
        if self.is_disposed() {
            return false;
        }

        let Some(index) = self.items.with_untracked(|contents| contents.iter().position(|item| item == old)) else {
            return false;
        };
        self.items.modify(|contents| contents[index] = new);
        true
    }

    /// Reverse the contents in place.
    pub fn reverse(&self) {
        if self.begin(None) {
            self.items.modify(|contents| contents.reverse());
        }
    }

    /// Sort the contents in place.
    pub fn sort(&self)
    where
        T: Ord,
    {
        if self.begin(None) {
            self.items.modify(|contents| contents.sort());
        }
    }

    /// Sort the contents in place with a comparator.
    pub fn sort_by(&self, compare: impl FnMut(&T, &T) -> std::cmp::Ordering) {
        if self.begin(None) {
            self.items.modify(|contents| contents.sort_by(compare));
        }
    }

    /// A sorted copy of the contents, registering a dependency.
    pub fn sorted(&self) -> Vec<T>
    where
        T: Ord,
    {
        let mut copy = self.get();
        copy.sort();
        copy
    }

    /// A reversed copy of the contents, registering a dependency.
    pub fn reversed(&self) -> Vec<T> {
        let mut copy = self.get();
        copy.reverse();
        copy
    }

    /// Subscribe to the default channel (whole contents).
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Vec<T>) + 'static,
    {
        self.items.subscribe(callback)
    }

    /// Subscribe to a channel of the underlying observable.
    pub fn subscribe_to<F>(&self, channel: Channel, callback: F) -> Subscription
    where
        F: Fn(&Vec<T>) + 'static,
    {
        self.items.subscribe_to(channel, callback)
    }

    /// Subscribe to edit scripts. The first subscriber turns tracking on.
    pub fn subscribe_changes<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Vec<ArrayChange<T>>) + 'static,
    {
        if self.is_disposed() {
            return Subscription::detached(array_change());
        }
        self.tracker.changes.subscribe(array_change(), callback)
    }

    /// Whether edit scripts are being computed.
    pub fn is_tracking_changes(&self) -> bool {
        self.tracker.state.borrow().tracking
    }

    /// Options for the diff used when no cached script applies.
    pub fn set_compare_options(&self, options: CompareOptions) {
        self.tracker.state.borrow_mut().options = options;
    }

    /// Count live subscriptions of the underlying observable.
    pub fn subscription_count(&self, channel: Option<&Channel>) -> usize {
        self.items.subscription_count(channel)
    }

    /// The underlying observable's registry version.
    pub fn version(&self) -> u64 {
        self.items.version()
    }

    /// Apply an extender to the underlying observable.
    pub fn extend(&self, extender: Extender) -> Result<()> {
        self.items.extend(extender)
    }

    /// Gate default-channel notifications behind `policy`.
    pub fn limit(&self, policy: Rc<dyn NotificationPolicy>) {
        self.items.limit(policy);
    }

    /// Stop tracking and turn every mutator into a no-op.
    ///
    /// The contents stay readable. Idempotent.
    pub fn dispose(&self) {
        if self.tracker.state.borrow().disposed {
            return;
        }
        self.tracker.stop();
        self.tracker.state.borrow_mut().disposed = true;
        self.tracker.changes.dispose_all();
        tracing::debug!(cell = %self.id(), "observable array disposed");
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.tracker.state.borrow().disposed
    }

    /// Prepare a mutation. Returns `false` if the array is disposed.
    fn begin(&self, operation: Option<KnownOperation<'_, T>>) -> bool {
        if self.is_disposed() {
            tracing::trace!(cell = %self.id(), "mutation on a disposed array ignored");
            return false;
        }
        if let Some(operation) = operation {
            self.items
                .with_untracked(|contents| self.tracker.cache_known_operation(contents, operation));
        }
        true
    }
}

impl<T: Clone + PartialEq + 'static> ChangeTracker<T> {
    fn start(&self) {
        {
            let state = self.state.borrow();
            if state.tracking || state.disposed {
                return;
            }
        }

        let counter = self.this.clone();
        let spectate = self.items.subscribe_to(Channel::Spectate, move |_| {
            if let Some(tracker) = counter.upgrade() {
                tracker.state.borrow_mut().pending_changes += 1;
            }
        });

        let listener = self.this.clone();
        let change = self.items.subscribe(move |current| {
            if let Some(tracker) = listener.upgrade() {
                tracker.deliver(current);
            }
        });

        let mut state = self.state.borrow_mut();
        state.tracking = true;
        state.previous = self.items.peek();
        state.cached_diff = None;
        state.pending_changes = 0;
        state.subscriptions = vec![spectate, change];

        tracing::trace!(cell = %self.items.id(), "array change tracking started");
    }

    fn stop(&self) {
        let subscriptions = {
            let mut state = self.state.borrow_mut();
            if !state.tracking {
                return;
            }
            state.tracking = false;
            state.previous = Vec::new();
            state.cached_diff = None;
            state.pending_changes = 0;
            std::mem::take(&mut state.subscriptions)
        };

        for subscription in subscriptions {
            subscription.dispose();
        }

        tracing::trace!(cell = %self.items.id(), "array change tracking stopped");
    }

    fn cache_known_operation(&self, contents: &[T], operation: KnownOperation<'_, T>) {
        let mut state = self.state.borrow_mut();
        if !state.tracking || state.pending_changes > 0 {
            return;
        }
        state.cached_diff = Some(known_operation_diff(contents, operation));
    }

    fn deliver(&self, current: &Vec<T>) {
        let changes = {
            let mut state = self.state.borrow_mut();
            let wanted = state.pending_changes > 0 && self.changes.has_subscriptions(&array_change());

            let changes = match state.cached_diff.take() {
                Some(diff) if wanted && state.pending_changes == 1 => Some(diff),
                _ if wanted => Some(compare_arrays(&state.previous, current, state.options)),
                _ => None,
            };

            state.previous = current.clone();
            state.pending_changes = 0;
            changes
        };

        if let Some(changes) = changes.filter(|changes| !changes.is_empty()) {
            tracing::trace!(cell = %self.items.id(), changes = changes.len(), "array changes delivered");
            self.changes.notify(&changes, &array_change());
        }
    }
}

impl<T: Clone + PartialEq + 'static> SubscriptionHooks for ChangeTracker<T> {
    fn before_subscription_add(&self, channel: &Channel) {
        if channel.name() == ARRAY_CHANGE {
            self.start();
        }
    }

    fn after_subscription_remove(&self, channel: &Channel) {
        if channel.name() == ARRAY_CHANGE && !self.changes.has_subscriptions(channel) {
            self.stop();
        }
    }
}

/// Clamp a splice request to `len`, returning the deleted range.
fn splice_range(len: usize, start: isize, delete_count: Option<usize>) -> (usize, usize) {
    let start = if start < 0 {
        len.saturating_sub(start.unsigned_abs())
    } else {
        start.unsigned_abs().min(len)
    };
    let end = match delete_count {
        Some(count) => start.saturating_add(count).min(len),
        None => len,
    };
    (start, end)
}

fn known_operation_diff<T: Clone + PartialEq>(contents: &[T], operation: KnownOperation<'_, T>) -> Vec<ArrayChange<T>> {
    let len = contents.len();
    match operation {
        KnownOperation::Push(items) => items
            .iter()
            .enumerate()
            .map(|(offset, item)| ArrayChange::added(item.clone(), len + offset))
            .collect(),
        KnownOperation::Unshift(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| ArrayChange::added(item.clone(), index))
            .collect(),
        KnownOperation::Pop => contents
            .last()
            .map(|item| vec![ArrayChange::deleted(item.clone(), len - 1)])
            .unwrap_or_default(),
        KnownOperation::Shift => contents
            .first()
            .map(|item| vec![ArrayChange::deleted(item.clone(), 0)])
            .unwrap_or_default(),
        KnownOperation::Splice { start, end, items } => {
            let end_add = start + items.len();
            let mut diff = Vec::new();
            let mut deletions = Vec::new();
            let mut additions = Vec::new();

            // Deletions and additions interleave by position.
            for index in start..end.max(end_add) {
                if index < end {
                    deletions.push(diff.len());
                    diff.push(ArrayChange::deleted(contents[index].clone(), index));
                }
                if index < end_add {
                    additions.push(diff.len());
                    diff.push(ArrayChange::added(items[index - start].clone(), index));
                }
            }

            find_moves(&mut diff, &deletions, &additions, None);
            diff
        }
    }
}

impl<T: Clone + PartialEq + 'static> Readable<Vec<T>> for ObservableArray<T> {
    fn read(&self) -> Result<Vec<T>> {
        Ok(self.get())
    }

    fn read_untracked(&self) -> Result<Vec<T>> {
        Ok(self.peek())
    }
}

impl<T: Clone + PartialEq + 'static> From<ObservableArray<T>> for Value<Vec<T>> {
    fn from(array: ObservableArray<T>) -> Self {
        Value::cell(array)
    }
}

impl<T: 'static> Clone for ObservableArray<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            tracker: Rc::clone(&self.tracker),
        }
    }
}

impl<T: Clone + PartialEq + Default + 'static> Default for ObservableArray<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for ObservableArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableArray")
            .field("items", &self.items)
            .field("tracking", &self.tracker.state.borrow().tracking)
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

    type Log<T> = Rc<RefCell<Vec<Vec<ArrayChange<T>>>>>;

    fn track<T: Clone + PartialEq + 'static>(array: &ObservableArray<T>) -> (Log<T>, Subscription) {
        let log: Log<T> = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let sub = array.subscribe_changes(move |changes| sink.borrow_mut().push(changes.clone()));
        (log, sub)
    }

    #[test]
    fn push_and_pop_report_known_changes() {
        let array = ObservableArray::new(vec!['a', 'b']);
        let (log, _sub) = track(&array);

        assert_eq!(array.push('c'), 3);
        assert_eq!(array.pop(), Some('c'));
        assert_eq!(array.shift(), Some('a'));
        assert_eq!(array.unshift_all(['x', 'y']), 3);

        assert_eq!(
            *log.borrow(),
            vec![
                vec![ArrayChange::added('c', 2)],
                vec![ArrayChange::deleted('c', 2)],
                vec![ArrayChange::deleted('a', 0)],
                vec![ArrayChange::added('x', 0), ArrayChange::added('y', 1)],
            ]
        );
        assert_eq!(array.peek(), vec!['x', 'y', 'b']);
    }

    #[test]
    fn splice_interleaves_deletions_and_additions() {
        let array = ObservableArray::new(vec![1, 2, 3, 4]);
        let (log, _sub) = track(&array);

        let removed = array.splice(1, Some(2), vec![7, 8, 9]);
        assert_eq!(removed, vec![2, 3]);
        assert_eq!(array.peek(), vec![1, 7, 8, 9, 4]);

        assert_eq!(
            log.borrow()[0],
            vec![
                ArrayChange::deleted(2, 1),
                ArrayChange::added(7, 1),
                ArrayChange::deleted(3, 2),
                ArrayChange::added(8, 2),
                ArrayChange::added(9, 3),
            ]
        );
    }

    #[test]
    fn splice_clamps_its_range() {
        assert_eq!(splice_range(5, -2, None), (3, 5));
        assert_eq!(splice_range(5, -10, Some(1)), (0, 1));
        assert_eq!(splice_range(5, 9, Some(3)), (5, 5));
        assert_eq!(splice_range(5, 1, Some(usize::MAX)), (1, 5));
    }

    #[test]
    fn unknown_operations_are_diffed() {
        let array = ObservableArray::new(vec![3, 1, 2]);
        let (log, _sub) = track(&array);

        array.sort();
        assert_eq!(array.peek(), vec![1, 2, 3]);
        assert_eq!(
            log.borrow()[0],
            vec![ArrayChange::deleted(3, 0).with_move(2), ArrayChange::added(3, 2).with_move(0)]
        );
    }

    #[test]
    fn remove_notifies_only_when_something_matched() {
        let array = ObservableArray::new(vec![1, 2, 1, 3]);
        let notifications = Rc::new(Cell::new(0));
        let n = notifications.clone();
        let _sub = array.subscribe(move |_| n.set(n.get() + 1));

        assert!(array.remove(&9).is_empty());
        assert_eq!(notifications.get(), 0);

        assert_eq!(array.remove(&1), vec![1, 1]);
        assert_eq!(array.peek(), vec![2, 3]);
        assert_eq!(notifications.get(), 1);
    }

    #[test]
    fn replace_and_remove_at() {
        let array = ObservableArray::new(vec!["a", "b", "c"]);
        assert!(array.replace(&"b", "B"));
        assert!(!array.replace(&"z", "Z"));
        assert_eq!(array.remove_at(0), Some("a"));
        assert_eq!(array.remove_at(10), None);
        assert_eq!(array.peek(), vec!["B", "c"]);
        assert_eq!(array.index_of(&"c"), Some(1));
    }

    #[test]
    fn tracking_follows_change_subscribers() {
        let array = ObservableArray::new(vec![1]);
        assert!(!array.is_tracking_changes());
        assert_eq!(array.subscription_count(None), 0);

        let (_log, sub) = track(&array);
        assert!(array.is_tracking_changes());
        assert_eq!(array.subscription_count(None), 2);

        sub.dispose();
        assert!(!array.is_tracking_changes());
        assert_eq!(array.subscription_count(None), 0);
    }

    #[test]
    fn deferred_writes_are_diffed_once() {
        let array = ObservableArray::new(vec![1, 2, 3]);
        array.extend(Extender::deferred()).unwrap();
        let (log, _sub) = track(&array);

        array.push(4);
        array.push(5);
        assert!(log.borrow().is_empty());

        tasks::run_early();
        assert_eq!(
            *log.borrow(),
            vec![vec![ArrayChange::added(4, 3), ArrayChange::added(5, 4)]]
        );
    }

    #[test]
    fn disposed_array_ignores_mutations() {
        let array = ObservableArray::new(vec![1, 2]);
        let (log, _sub) = track(&array);

        array.dispose();
        array.dispose();

        assert_eq!(array.push(3), 0);
        assert_eq!(array.pop(), None);
        assert!(array.remove_all().is_empty());
        array.reverse();

        assert_eq!(array.peek(), vec![1, 2]);
        assert!(log.borrow().is_empty());
        assert!(array.subscribe_changes(|_| {}).is_disposed());
    }

    #[test]
    fn array_reads_are_tracked() {
        let array = ObservableArray::new(vec![1, 2, 3]);
        let total = {
            let array = array.clone();
            crate::reactive::Computed::new(move || array.with(|items| items.iter().sum::<i32>()))
        };

        array.push(4);
        assert_eq!(total.get(), 10);
    }
}
