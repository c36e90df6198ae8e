//! Subscriber Registry
//!
//! A [`Subscribable`] holds named event channels, each an ordered list of
//! callbacks, plus a monotonic version counter. It is the primitive every
//! reactive cell is built on.
//!
//! # Notification Rules
//!
//! - Callbacks on a channel run in subscription order.
//! - Dispatch iterates a snapshot of the channel taken when `notify` starts,
//!   so subscribing or unsubscribing from inside a callback never changes the
//!   current cycle. A subscription disposed mid-cycle is skipped.
//! - Notifying the default [`Channel::Change`] bumps the version *before*
//!   dispatch.
//! - Callbacks run with dependency detection suspended, so reads performed
//!   by a callback are never attributed to whichever computed is evaluating.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::context::ReactiveContext;
use super::dependency::advance_write_epoch;

/// A named notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Channel {
    /// The default channel. Carries the new value after a change.
    #[default]
    Change,

    /// Carries the old value, right before a change is stored.
    BeforeChange,

    /// Carries the new value synchronously, even when `Change` is delayed by
    /// a notification policy.
    Spectate,

    /// Any other user-defined channel.
    Custom(Cow<'static, str>),
}

impl Channel {
    /// Create a user-defined channel.
    pub fn custom(name: impl Into<Cow<'static, str>>) -> Self {
        Self::from_name(name.into())
    }

    /// The channel's wire name.
    pub fn name(&self) -> &str {
        match self {
            Self::Change => "change",
            Self::BeforeChange => "beforeChange",
            Self::Spectate => "spectate",
            Self::Custom(name) => name,
        }
    }

    fn from_name(name: Cow<'static, str>) -> Self {
        match name.as_ref() {
            "change" => Self::Change,
            "beforeChange" => Self::BeforeChange,
            "spectate" => Self::Spectate,
            _ => Self::Custom(name),
        }
    }
}

impl From<&'static str> for Channel {
    fn from(name: &'static str) -> Self {
        Self::from_name(Cow::Borrowed(name))
    }
}

impl From<String> for Channel {
    fn from(name: String) -> Self {
        Self::from_name(Cow::Owned(name))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifies one subscription within its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Lifecycle callbacks a registry's owner can install.
///
/// Pure computeds use these to wake up when they gain their first `Change`
/// subscriber and to go back to sleep when they lose the last one.
pub trait SubscriptionHooks {
    /// Runs before a subscription is added to `channel`.
    fn before_subscription_add(&self, channel: &Channel);

    /// Runs after a subscription was removed from `channel`.
    fn after_subscription_remove(&self, channel: &Channel);
}

trait Unsubscribe {
    fn unsubscribe(&self, id: SubscriptionId, channel: &Channel);
}

struct Slot<T> {
    id: SubscriptionId,
    callback: Box<dyn Fn(&T)>,
    disposed: Rc<Cell<bool>>,
}

/// A live (callback, channel, registry) link.
///
/// Dropping a `Subscription` does not dispose it; call [`dispose`].
///
/// [`dispose`]: Subscription::dispose
pub struct Subscription {
    id: SubscriptionId,
    channel: Channel,
    disposed: Rc<Cell<bool>>,
    registry: Option<Weak<dyn Unsubscribe>>,
}

impl Subscription {
    /// A subscription that is already disposed and attached to nothing.
    ///
    /// Returned when subscribing to a disposed cell.
    pub(crate) fn detached(channel: Channel) -> Self {
        Self {
            id: SubscriptionId(u64::MAX),
            channel,
            disposed: Rc::new(Cell::new(true)),
            registry: None,
        }
    }

    /// The subscription's id within its registry.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The channel this subscription listens on.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Remove the callback from its registry. Idempotent.
    ///
    /// Takes effect immediately, even inside a notification cycle that
    /// already snapshotted this subscription.
    pub fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }

        tracing::trace!(subscription = self.id.0, channel = %self.channel, "disposed");

        if let Some(registry) = self.registry.as_ref().and_then(Weak::upgrade) {
            registry.unsubscribe(self.id, &self.channel);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id.0)
            .field("channel", &self.channel)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A registry of channel subscribers carrying payloads of type `T`.
///
/// Clones share the same registry.
pub struct Subscribable<T> {
    inner: Rc<SubscribableInner<T>>,
}

struct SubscribableInner<T> {
    channels: RefCell<IndexMap<Channel, Vec<Rc<Slot<T>>>>>,
    version: Cell<u64>,
    next_id: Cell<u64>,
    hooks: RefCell<Option<Weak<dyn SubscriptionHooks>>>,
}

impl<T: 'static> Subscribable<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(SubscribableInner {
                channels: RefCell::new(IndexMap::new()),
                version: Cell::new(0),
                next_id: Cell::new(0),
                hooks: RefCell::new(None),
            }),
        }
    }

    /// Install lifecycle hooks, replacing any previous ones.
    pub fn set_hooks(&self, hooks: Weak<dyn SubscriptionHooks>) {
        *self.inner.hooks.borrow_mut() = Some(hooks);
    }

    /// Register `callback` on `channel`.
    pub fn subscribe<F>(&self, channel: Channel, callback: F) -> Subscription
    where
        F: Fn(&T) + 'static,
    {
        if let Some(hooks) = self.inner.hooks() {
            hooks.before_subscription_add(&channel);
        }

        let id = SubscriptionId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);

        let disposed = Rc::new(Cell::new(false));
        let slot = Rc::new(Slot {
            id,
            callback: Box::new(callback),
            disposed: Rc::clone(&disposed),
        });

        self.inner
            .channels
            .borrow_mut()
            .entry(channel.clone())
            .or_default()
            .push(slot);

        tracing::trace!(subscription = id.0, channel = %channel, "subscribed");

        let registry = Rc::downgrade(&self.inner) as Weak<dyn Unsubscribe>;
        Subscription {
            id,
            channel,
            disposed,
            registry: Some(registry),
        }
    }

    /// Deliver `value` to every live subscriber of `channel`.
    pub fn notify(&self, value: &T, channel: &Channel) {
        if *channel == Channel::Change {
            self.inner.version.set(self.inner.version.get() + 1);
            advance_write_epoch();
        }

        let snapshot: SmallVec<[Rc<Slot<T>>; 4]> = match self.inner.channels.borrow().get(channel) {
            Some(slots) => slots.iter().cloned().collect(),
            None => return,
        };

        ReactiveContext::ignore(|| {
            for slot in snapshot {
                if !slot.disposed.get() {
                    (slot.callback)(value);
                }
            }
        });
    }

    /// Count subscriptions on `channel`, or on every channel if `None`.
    pub fn subscription_count(&self, channel: Option<&Channel>) -> usize {
        let channels = self.inner.channels.borrow();
        match channel {
            Some(channel) => channels.get(channel).map_or(0, Vec::len),
            None => channels.values().map(Vec::len).sum(),
        }
    }

    /// Whether `channel` has at least one live subscriber.
    pub fn has_subscriptions(&self, channel: &Channel) -> bool {
        self.subscription_count(Some(channel)) > 0
    }

    /// The number of default-channel notifications so far.
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// Whether a default-channel notification happened since `version`.
    pub fn has_changed(&self, version: u64) -> bool {
        self.version() != version
    }

    /// Dispose every subscription on every channel, without running hooks.
    pub(crate) fn dispose_all(&self) {
        let channels = std::mem::take(&mut *self.inner.channels.borrow_mut());
        for slot in channels.into_values().flatten() {
            slot.disposed.set(true);
        }
    }
}

impl<T> SubscribableInner<T> {
    fn hooks(&self) -> Option<Rc<dyn SubscriptionHooks>> {
        self.hooks.borrow().as_ref().and_then(Weak::upgrade)
    }
}

impl<T> Unsubscribe for SubscribableInner<T> {
    fn unsubscribe(&self, id: SubscriptionId, channel: &Channel) {
        let removed = match self.channels.borrow_mut().get_mut(channel) {
            Some(slots) => {
                let before = slots.len();
                slots.retain(|slot| slot.id != id);
                slots.len() != before
            }
            None => false,
        };

        if removed {
            if let Some(hooks) = self.hooks() {
                hooks.after_subscription_remove(channel);
            }
        }
    }
}

impl<T> Clone for Subscribable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Default for Subscribable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> fmt::Debug for Subscribable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribable")
            .field("version", &self.version())
            .field("subscription_count", &self.subscription_count(None))
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
