//! Computed Implementation
//!
//! A Computed is a cached derived value. Its evaluator reads other cells;
//! every cell read during an evaluation becomes a dependency, and the
//! computed re-evaluates when one of them changes.
//!
//! # How Computeds Work
//!
//! 1. Evaluation pushes a capture frame, runs the evaluator, pops the frame
//!    and swaps the captured set in as the new dependency set. Cells that
//!    were read again keep their subscription; cells that were not read are
//!    unsubscribed.
//!
//! 2. When a dependency announces a change, the computed is marked
//!    "maybe dirty". Unless it is deferred and nobody listens to it, it
//!    re-evaluates straight away.
//!
//! 3. Every read first brings the value up to date. A "maybe dirty" or
//!    possibly stale computed compares the recorded version of each
//!    dependency against its current version, and only re-evaluates if one
//!    of them moved.
//!
//! 4. A new value is stored and announced only if the comparer considers it
//!    different from the old one.
//!
//! # Glitch Freedom
//!
//! Step 3 is what keeps diamonds consistent. When `d` depends on `b` and
//! `c`, which both depend on `a`, a write to `a` may reach `d` through `b`
//! before `c` has heard about it. When `d` then reads `c`, `c` notices that
//! `a` moved since it last evaluated and re-evaluates first, so `d` never
//! sees a mix of old and new values.
//!
//! A thread-wide write epoch makes the common case cheap: a computed that
//! verified its dependencies during the current epoch skips the check.
//!
//! # Pure Computeds
//!
//! A pure computed holds no subscriptions while nobody subscribes to it.
//! It sleeps, re-checks its dependency versions on read, and wakes up
//! (subscribing to its dependencies) when it gains its first default-channel
//! subscriber. Losing the last one puts it back to sleep.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::error::{ReactiveError, Result};
use crate::extend::{Extender, NotificationPolicy};

use super::cascade;
use super::context::{Captured, ReactiveContext};
use super::dependency::{write_epoch, CellId, Dependency};
use super::notifier::{eq_comparer, Comparer, Notifier};
use super::subscribable::{Channel, Subscription, SubscriptionHooks};

type Evaluator<T> = Box<dyn Fn() -> Result<T>>;
type Writer<T> = Box<dyn Fn(T)>;

/// Construction options for a computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComputedOptions {
    /// Skip the initial evaluation and stay lazy while nobody subscribes.
    pub defer_evaluation: bool,
    /// Sleep (hold no subscriptions) while nobody subscribes. Implies
    /// `defer_evaluation`.
    pub pure: bool,
}

impl ComputedOptions {
    /// Options for a lazily evaluated computed.
    pub fn deferred() -> Self {
        Self {
            defer_evaluation: true,
            pure: false,
        }
    }

    /// Options for a pure computed.
    pub fn pure() -> Self {
        Self {
            defer_evaluation: true,
            pure: true,
        }
    }

    fn is_lazy(&self) -> bool {
        self.defer_evaluation || self.pure
    }
}

/// Observable lifecycle state of a computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    /// The cached value is up to date as of the last check.
    Clean,
    /// A dependency announced a change; needs a version check.
    MaybeDirty,
    /// Never evaluated, or the last evaluation failed.
    Dirty,
    /// The evaluator is running.
    Evaluating,
    /// Disposed; the value is frozen.
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    Clean,
    MaybeDirty,
    Dirty,
}

struct DependencyLink {
    source: Rc<dyn Dependency>,
    /// Version observed when the dependency was last read.
    version: u64,
    /// `None` while sleeping.
    subscription: Option<Subscription>,
}

struct Tracking {
    freshness: Freshness,
    evaluating: bool,
    disposed: bool,
    sleeping: bool,
    /// Write epoch at which the dependency versions were last verified.
    verified_epoch: Option<u64>,
    dependencies: IndexMap<CellId, DependencyLink>,
}

/// A cached derived value that re-evaluates when its dependencies change.
///
/// # Example
///
/// ```rust,ignore
/// let first = Observable::new("Ada".to_string());
/// let last = Observable::new("Lovelace".to_string());
///
/// let full = {
///     let (first, last) = (first.clone(), last.clone());
///     Computed::new(move || format!("{} {}", first.get(), last.get()))
/// };
///
/// assert_eq!(full.get(), "Ada Lovelace");
/// ```
pub struct Computed<T: 'static> {
    inner: Rc<ComputedInner<T>>,
}

struct ComputedInner<T> {
    id: CellId,
    evaluator: Evaluator<T>,
    writer: Option<Writer<T>>,
    options: ComputedOptions,
    /// `None` until the first successful evaluation.
    value: RefCell<Option<T>>,
    notifier: Notifier<T>,
    tracking: RefCell<Tracking>,
    this: Weak<ComputedInner<T>>,
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    /// Create a computed from an infallible evaluator and evaluate it now.
    pub fn new<F>(evaluator: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::infallible(ComputedOptions::default(), evaluator)
    }

    /// Create a computed from a fallible evaluator and evaluate it now.
    ///
    /// Fails with the evaluator's error if the first evaluation fails.
    pub fn try_new<F>(evaluator: F) -> Result<Self>
    where
        F: Fn() -> Result<T> + 'static,
    {
        Self::with_options(ComputedOptions::default(), evaluator)
    }

    /// Create a pure computed.
    pub fn pure<F>(evaluator: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::infallible(ComputedOptions::pure(), evaluator)
    }

    /// Create a computed with explicit options.
    ///
    /// Unless `options` defers evaluation, the evaluator runs now and its
    /// error, if any, is returned.
    pub fn with_options<F>(options: ComputedOptions, evaluator: F) -> Result<Self>
    where
        F: Fn() -> Result<T> + 'static,
    {
        Self::build(options, Box::new(evaluator), None, Some(eq_comparer())).start()
    }

    /// Create a computed that forwards writes to `write`.
    pub fn writable<R, W>(options: ComputedOptions, read: R, write: W) -> Result<Self>
    where
        R: Fn() -> Result<T> + 'static,
        W: Fn(T) + 'static,
    {
        Self::build(options, Box::new(read), Some(Box::new(write)), Some(eq_comparer())).start()
    }

    fn infallible<F>(options: ComputedOptions, evaluator: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        match Self::with_options(options, move || Ok(evaluator())) {
            Ok(computed) => computed,
            Err(err) => panic!("{err}"),
        }
    }
}

impl<T: Clone + 'static> Computed<T> {
    fn build(
        options: ComputedOptions,
        evaluator: Evaluator<T>,
        writer: Option<Writer<T>>,
        comparer: Option<Comparer<T>>,
    ) -> Self {
        let inner = Rc::new_cyclic(|this| ComputedInner {
            id: CellId::new(),
            evaluator,
            writer,
            options,
            value: RefCell::new(None),
            notifier: Notifier::new(comparer),
            tracking: RefCell::new(Tracking {
                freshness: Freshness::Dirty,
                evaluating: false,
                disposed: false,
                sleeping: options.pure,
                verified_epoch: None,
                dependencies: IndexMap::new(),
            }),
            this: this.clone(),
        });

        let hooks = Rc::downgrade(&inner) as Weak<dyn SubscriptionHooks>;
        inner.notifier.subscribers().set_hooks(hooks);

        tracing::trace!(cell = %inner.id, pure = options.pure, lazy = options.is_lazy(), "computed created");

        Self { inner }
    }

    /// Run the first evaluation unless the computed is lazy.
    fn start(self) -> Result<Self> {
        if !self.inner.options.is_lazy() {
            self.inner.refresh()?;
        }
        Ok(self)
    }

    /// Get the computed's unique ID.
    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// Get the current value, registering a dependency.
    ///
    /// # Panics
    ///
    /// Panics if the evaluation fails. Use [`try_get`](Self::try_get) to
    /// handle evaluation errors.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Get the current value without registering a dependency.
    ///
    /// # Panics
    ///
    /// Panics if the evaluation fails.
    pub fn peek(&self) -> T {
        match self.try_peek() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Get the current value, registering a dependency.
    pub fn try_get(&self) -> Result<T> {
        self.inner.read(true)
    }

    /// Get the current value without registering a dependency.
    pub fn try_peek(&self) -> Result<T> {
        self.inner.read(false)
    }

    /// Write through the write function.
    ///
    /// Returns the first evaluation error raised by a computed that
    /// re-evaluated because of the write.
    pub fn set(&self, value: T) -> Result<()> {
        let Some(write) = &self.inner.writer else {
            return Err(ReactiveError::ReadOnly { id: self.inner.id });
        };
        let ((), error) = cascade::collect(|| write(value));
        error.map_or(Ok(()), Err)
    }

    /// Whether writes are forwarded to a write function.
    pub fn has_write_function(&self) -> bool {
        self.inner.writer.is_some()
    }

    /// Release every dependency subscription and freeze the value.
    ///
    /// Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.inner.tracking.borrow().disposed
    }

    /// Whether this computed was created pure.
    pub fn is_pure(&self) -> bool {
        self.inner.options.pure
    }

    /// Whether a pure computed currently holds no dependency subscriptions.
    pub fn is_sleeping(&self) -> bool {
        self.inner.tracking.borrow().sleeping
    }

    /// Whether the computed will keep reacting: it was never evaluated yet
    /// or it still has dependencies.
    pub fn is_active(&self) -> bool {
        let tracking = self.inner.tracking.borrow();
        !tracking.disposed && (self.inner.value.borrow().is_none() || !tracking.dependencies.is_empty())
    }

    /// Whether an evaluation has ever succeeded.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ComputedState {
        let tracking = self.inner.tracking.borrow();
        if tracking.disposed {
            ComputedState::Disposed
        } else if tracking.evaluating {
            ComputedState::Evaluating
        } else {
            match tracking.freshness {
                Freshness::Clean => ComputedState::Clean,
                Freshness::MaybeDirty => ComputedState::MaybeDirty,
                Freshness::Dirty => ComputedState::Dirty,
            }
        }
    }

    /// IDs of the current dependencies, in first-read order.
    pub fn dependencies(&self) -> Vec<CellId> {
        self.inner.tracking.borrow().dependencies.keys().copied().collect()
    }

    /// Number of cells read during the last evaluation.
    pub fn dependency_count(&self) -> usize {
        self.inner.tracking.borrow().dependencies.len()
    }

    /// Subscribe to the default channel.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + 'static,
    {
        self.subscribe_to(Channel::Change, callback)
    }

    /// Subscribe to a specific channel. Disposed computeds hand back an
    /// already-disposed subscription.
    pub fn subscribe_to<F>(&self, channel: Channel, callback: F) -> Subscription
    where
        F: Fn(&T) + 'static,
    {
        self.inner.subscribe_to(channel, callback)
    }

    /// Count live subscriptions on `channel`, or on every channel.
    pub fn subscription_count(&self, channel: Option<&Channel>) -> usize {
        self.inner.notifier.subscribers().subscription_count(channel)
    }

    /// The registry version. It increments on every delivered change.
    pub fn version(&self) -> u64 {
        self.inner.notifier.subscribers().version()
    }

    /// Whether a change was delivered since `version` was read.
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

    /// Replace the equality comparer. `None` announces every evaluation.
    pub fn set_equality_comparer(&self, comparer: Option<Comparer<T>>) {
        self.inner.notifier.set_comparer(comparer);
    }

    /// Whether a limited change is waiting for its flush.
    pub fn has_pending_notification(&self) -> bool {
        self.inner.notifier.has_pending_notification()
    }
}

impl<T: Clone + 'static> ComputedInner<T> {
    fn read(&self, track: bool) -> Result<T> {
        let refreshed = if !track && self.kept_after_failure() {
            Ok(())
        } else {
            self.refresh()
        };

        if track && ReactiveContext::is_tracking() && !self.tracking.borrow().evaluating {
            if let Some(this) = self.this.upgrade() {
                ReactiveContext::track(this);
            }
        }

        refreshed?;
        self.value
            .borrow()
            .clone()
            .ok_or(ReactiveError::Disposed { id: self.id })
    }

    /// Whether an untracked read should see the last good value instead of
    /// re-running an evaluator that just failed.
    ///
    /// Holds while no dependency has moved since the failed evaluation.
    fn kept_after_failure(&self) -> bool {
        {
            let tracking = self.tracking.borrow();
            if tracking.disposed
                || tracking.evaluating
                || tracking.freshness != Freshness::Dirty
                || tracking.dependencies.is_empty()
            {
                return false;
            }
        }
        self.value.borrow().is_some() && !self.dependencies_changed()
    }

    /// Bring the value up to date.
    fn refresh(&self) -> Result<()> {
        let freshness = {
            let tracking = self.tracking.borrow();
            if tracking.disposed {
                if self.value.borrow().is_some() {
                    return Ok(());
                }
                return Err(ReactiveError::Disposed { id: self.id });
            }
            if tracking.evaluating {
                return Err(ReactiveError::CircularDependency { id: self.id });
            }
            if tracking.freshness == Freshness::Clean && tracking.verified_epoch == Some(write_epoch()) {
                return Ok(());
            }
            tracking.freshness
        };

        let stale = match freshness {
            Freshness::Dirty => true,
            Freshness::MaybeDirty | Freshness::Clean => self.dependencies_changed(),
        };

        if stale {
            self.evaluate()
        } else {
            self.mark_clean();
            Ok(())
        }
    }

    fn mark_clean(&self) {
        let mut tracking = self.tracking.borrow_mut();
        tracking.freshness = Freshness::Clean;
        tracking.verified_epoch = Some(write_epoch());
    }

    fn dependencies_changed(&self) -> bool {
        let links: SmallVec<[(Rc<dyn Dependency>, u64); 4]> = self
            .tracking
            .borrow()
            .dependencies
            .values()
            .map(|link| (Rc::clone(&link.source), link.version))
            .collect();

        links
            .iter()
            .any(|(source, version)| source.has_changed_since(*version))
    }

    fn evaluate(&self) -> Result<()> {
        let initial = self.value.borrow().is_none();
        {
            let mut tracking = self.tracking.borrow_mut();
            tracking.evaluating = true;
            tracking.freshness = Freshness::Dirty;
        }

        let guard = EvaluatingGuard(&self.tracking);
        let ctx = ReactiveContext::enter(self.id, initial);
        let result = (self.evaluator)();
        let captured = ctx.finish();
        drop(guard);

        tracing::debug!(
            cell = %self.id,
            dependencies = captured.len(),
            ok = result.is_ok(),
            "computed evaluated"
        );

        self.swap_dependencies(captured);

        let value = result?;
        self.mark_clean();
        self.store(value);
        Ok(())
    }

    /// Replace the dependency set with `captured`, reusing subscriptions to
    /// cells that were read again.
    fn swap_dependencies(&self, captured: IndexMap<CellId, Captured>) {
        let (mut previous, subscribe) = {
            let mut tracking = self.tracking.borrow_mut();
            let subscribe = !tracking.sleeping && !tracking.disposed;
            (std::mem::take(&mut tracking.dependencies), subscribe)
        };

        let mut next = IndexMap::with_capacity(captured.len());
        for (id, Captured { source, version }) in captured {
            let existing = previous.swap_remove(&id).and_then(|link| link.subscription);
            let subscription = match existing {
                Some(subscription) if subscribe => Some(subscription),
                Some(subscription) => {
                    subscription.dispose();
                    None
                }
                None if subscribe => Some(self.subscribe_to_dependency(&source)),
                None => None,
            };
            next.insert(
                id,
                DependencyLink {
                    source,
                    version,
                    subscription,
                },
            );
        }

        for stale in previous.into_values() {
            if let Some(subscription) = stale.subscription {
                subscription.dispose();
            }
        }

        let mut tracking = self.tracking.borrow_mut();
        if tracking.disposed {
            drop(tracking);
            for link in next.into_values() {
                if let Some(subscription) = link.subscription {
                    subscription.dispose();
                }
            }
        } else {
            tracking.dependencies = next;
        }
    }

    fn subscribe_to_dependency(&self, source: &Rc<dyn Dependency>) -> Subscription {
        let this = self.this.clone();
        source.subscribe_change(Rc::new(move || {
            if let Some(this) = this.upgrade() {
                this.on_dependency_change();
            }
        }))
    }

    /// Subscribe to every recorded dependency that has no subscription.
    fn resubscribe(&self) {
        let missing: Vec<(CellId, Rc<dyn Dependency>)> = self
            .tracking
            .borrow()
            .dependencies
            .iter()
            .filter(|(_, link)| link.subscription.is_none())
            .map(|(id, link)| (*id, Rc::clone(&link.source)))
            .collect();

        for (id, source) in missing {
            let subscription = self.subscribe_to_dependency(&source);
            let orphan = {
                let mut tracking = self.tracking.borrow_mut();
                let awake = !tracking.sleeping && !tracking.disposed;
                match tracking.dependencies.get_mut(&id) {
                    Some(link) if awake && link.subscription.is_none() => {
                        link.subscription = Some(subscription);
                        None
                    }
                    _ => Some(subscription),
                }
            };
            if let Some(orphan) = orphan {
                orphan.dispose();
            }
        }
    }

    fn store(&self, value: T) {
        let old = {
            let current = self.value.borrow();
            if let Some(old) = current.as_ref() {
                if !self.notifier.is_different(old, &value) {
                    return;
                }
            }
            match current.as_ref() {
                Some(old) if self.notifier.is_observed(&Channel::BeforeChange) => Some(old.clone()),
                _ => None,
            }
        };

        if let Some(old) = old {
            self.notifier.notify(&old, &Channel::BeforeChange);
        }

        *self.value.borrow_mut() = Some(value.clone());
        self.notifier.notify(&value, &Channel::Spectate);
        self.notifier.notify(&value, &Channel::Change);
    }

    fn on_dependency_change(&self) {
        {
            let mut tracking = self.tracking.borrow_mut();
            if tracking.disposed || tracking.evaluating {
                return;
            }
            if tracking.freshness == Freshness::Clean {
                tracking.freshness = Freshness::MaybeDirty;
            }
        }

        let eager = !self.options.is_lazy() || self.notifier.subscribers().has_subscriptions(&Channel::Change);
        if eager {
            if let Err(err) = self.refresh() {
                if let Some(err) = cascade::report(err) {
                    tracing::warn!(cell = %self.id, error = %err, "re-evaluation failed, keeping the last value");
                }
            }
        }
    }

    fn subscribe_to<F>(&self, channel: Channel, callback: F) -> Subscription
    where
        F: Fn(&T) + 'static,
    {
        if self.tracking.borrow().disposed {
            return Subscription::detached(channel);
        }
        self.notifier.subscribers().subscribe(channel, callback)
    }

    fn dispose(&self) {
        let links = {
            let mut tracking = self.tracking.borrow_mut();
            if tracking.disposed {
                return;
            }
            tracking.disposed = true;
            std::mem::take(&mut tracking.dependencies)
        };

        for link in links.into_values() {
            if let Some(subscription) = link.subscription {
                subscription.dispose();
            }
        }

        tracing::debug!(cell = %self.id, "computed disposed");
    }
}

impl<T: Clone + 'static> Dependency for ComputedInner<T> {
    fn id(&self) -> CellId {
        self.id
    }

    fn version(&self) -> u64 {
        self.notifier.subscribers().version()
    }

    fn has_changed_since(&self, version: u64) -> bool {
        // Failing to refresh counts as a change, so the dependent
        // re-evaluates and sees the error itself.
        self.refresh().is_err() || self.notifier.subscribers().has_changed(version)
    }

    fn subscribe_change(&self, callback: Rc<dyn Fn()>) -> Subscription {
        self.subscribe_to(Channel::Change, move |_: &T| callback())
    }
}

impl<T: Clone + 'static> SubscriptionHooks for ComputedInner<T> {
    fn before_subscription_add(&self, channel: &Channel) {
        if *channel != Channel::Change || !self.options.pure {
            return;
        }

        let freshness = {
            let mut tracking = self.tracking.borrow_mut();
            if !tracking.sleeping || tracking.disposed {
                return;
            }
            tracking.sleeping = false;
            tracking.freshness
        };

        tracing::trace!(cell = %self.id, "pure computed waking up");

        // Re-evaluating subscribes to the fresh dependency set; otherwise
        // the recorded set is still accurate.
        let stale = freshness == Freshness::Dirty || self.dependencies_changed();
        if stale {
            if let Err(err) = self.evaluate() {
                if let Some(err) = cascade::report(err) {
                    tracing::warn!(cell = %self.id, error = %err, "evaluation on wake-up failed");
                }
            }
        } else {
            self.resubscribe();
            self.mark_clean();
        }
    }

    fn after_subscription_remove(&self, channel: &Channel) {
        if *channel != Channel::Change || !self.options.pure {
            return;
        }
        if self.notifier.subscribers().has_subscriptions(&Channel::Change) {
            return;
        }

        let released: Vec<Subscription> = {
            let mut tracking = self.tracking.borrow_mut();
            if tracking.sleeping || tracking.disposed {
                return;
            }
            tracking.sleeping = true;
            tracking
                .dependencies
                .values_mut()
                .filter_map(|link| link.subscription.take())
                .collect()
        };

        for subscription in released {
            subscription.dispose();
        }

        tracing::trace!(cell = %self.id, "pure computed going to sleep");
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        for link in self.tracking.get_mut().dependencies.values() {
            if let Some(subscription) = &link.subscription {
                subscription.dispose();
            }
        }
    }
}

/// Clears the evaluating flag, even if the evaluator panics.
struct EvaluatingGuard<'a>(&'a RefCell<Tracking>);

impl Drop for EvaluatingGuard<'_> {
    fn drop(&mut self) {
        self.0.borrow_mut().evaluating = false;
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracking = self.inner.tracking.borrow();
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("freshness", &tracking.freshness)
            .field("dependencies", &tracking.dependencies.len())
            .field("sleeping", &tracking.sleeping)
            .field("disposed", &tracking.disposed)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
