//! Outward notification for a single reactive cell.
//!
//! A [`Notifier`] bundles the cell's subscriber registry, its equality
//! comparer and the optional limit gate installed by an extender. Cells
//! never talk to their registry directly when announcing a change; they go
//! through the notifier so that a notification policy can intercept the
//! default channel.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::config;
use crate::error::{ReactiveError, Result};
use crate::extend::limit::Limit;
use crate::extend::policy::{Debounce, Deferred, FixedRate, NotificationPolicy};
use crate::extend::{Extender, NotifyMode, RateLimit, RateLimitMethod};

use super::dependency::CellId;
use super::subscribable::{Channel, Subscribable};

/// Decides whether two values are equal. Equal writes are not announced.
pub type Comparer<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// The `==` comparer used by cells over `PartialEq` types.
pub(crate) fn eq_comparer<T: PartialEq + 'static>() -> Comparer<T> {
    Rc::new(|a: &T, b: &T| a == b)
}

pub(crate) struct Notifier<T> {
    inner: Rc<NotifierInner<T>>,
}

pub(crate) struct NotifierInner<T> {
    subscribers: Subscribable<T>,
    /// `None` means every write counts as a change.
    comparer: RefCell<Option<Comparer<T>>>,
    /// Restored by `NotifyMode::Changed`.
    default_comparer: Option<Comparer<T>>,
    limit: RefCell<Option<Rc<Limit<T>>>>,
    deferred: Cell<bool>,
}

impl<T: Clone + 'static> Notifier<T> {
    /// Create a notifier. Applies the thread's global deferral option.
    pub(crate) fn new(comparer: Option<Comparer<T>>) -> Self {
        let notifier = Self {
            inner: Rc::new(NotifierInner {
                subscribers: Subscribable::new(),
                comparer: RefCell::new(comparer.clone()),
                default_comparer: comparer,
                limit: RefCell::new(None),
                deferred: Cell::new(false),
            }),
        };

        if config::options().defer_updates {
            notifier.enable_deferred();
        }

        notifier
    }

    pub(crate) fn subscribers(&self) -> &Subscribable<T> {
        &self.inner.subscribers
    }

    /// Announce `value` on `channel`, through the limit gate if one is
    /// installed.
    pub(crate) fn notify(&self, value: &T, channel: &Channel) {
        let limit = self.inner.limit.borrow().clone();
        match limit {
            Some(limit) => limit.notify(value, channel),
            None => self.inner.subscribers.notify(value, channel),
        }
    }

    /// Whether a notification on `channel` would reach anyone.
    ///
    /// Used to skip cloning payloads nobody will see. A limit gate always
    /// observes `beforeChange`, since it records the pre-change value.
    pub(crate) fn is_observed(&self, channel: &Channel) -> bool {
        self.inner.limit.borrow().is_some() || self.inner.subscribers.has_subscriptions(channel)
    }

    pub(crate) fn is_different(&self, a: &T, b: &T) -> bool {
        self.inner.is_different(a, b)
    }

    pub(crate) fn set_comparer(&self, comparer: Option<Comparer<T>>) {
        *self.inner.comparer.borrow_mut() = comparer;
    }

    /// Install `policy`, or swap it into the existing gate.
    ///
    /// Flushes that were already scheduled keep firing under the policy that
    /// scheduled them.
    pub(crate) fn limit(&self, policy: Rc<dyn NotificationPolicy>) {
        tracing::debug!(policy = policy.name(), "notification policy installed");

        let existing = self.inner.limit.borrow().clone();
        match existing {
            Some(limit) => limit.set_policy(policy),
            None => {
                let limit = Limit::new(Rc::downgrade(&self.inner), policy);
                *self.inner.limit.borrow_mut() = Some(limit);
            }
        }
    }

    pub(crate) fn policy_name(&self) -> Option<&'static str> {
        self.inner.limit.borrow().as_ref().map(|limit| limit.policy_name())
    }

    pub(crate) fn has_pending_notification(&self) -> bool {
        self.inner
            .limit
            .borrow()
            .as_ref()
            .is_some_and(|limit| limit.is_pending())
    }

    pub(crate) fn is_deferred(&self) -> bool {
        self.inner.deferred.get()
    }

    fn enable_deferred(&self) {
        if !self.inner.deferred.replace(true) {
            self.limit(Rc::new(Deferred::new()));
        }
    }

    /// Apply one extender on behalf of the cell `owner`.
    pub(crate) fn extend(&self, owner: CellId, extender: &Extender) -> Result<()> {
        match extender {
            Extender::Throttle(delay) => self.limit(Rc::new(Debounce::new(*delay))),
            Extender::RateLimit(RateLimit { timeout, method }) => match method {
                RateLimitMethod::NotifyAtFixedRate => self.limit(Rc::new(FixedRate::new(*timeout))),
                RateLimitMethod::NotifyWhenChangesStop => self.limit(Rc::new(Debounce::new(*timeout))),
            },
            Extender::Deferred(true) => self.enable_deferred(),
            Extender::Deferred(false) => {
                if self.is_deferred() {
                    return Err(ReactiveError::DeferredIrrevocable { id: owner });
                }
            }
            Extender::Notify(NotifyMode::Always) => self.set_comparer(None),
            Extender::Notify(NotifyMode::Changed) => {
                self.set_comparer(self.inner.default_comparer.clone());
            }
        }
        Ok(())
    }
}

impl<T> NotifierInner<T> {
    pub(crate) fn subscribers(&self) -> &Subscribable<T> {
        &self.subscribers
    }

    pub(crate) fn is_different(&self, a: &T, b: &T) -> bool {
        match self.comparer.borrow().as_ref() {
            Some(equal) => !equal(a, b),
            None => true,
        }
    }
}

impl<T: 'static> fmt::Debug for Notifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.inner.subscribers)
            .field("limited", &self.inner.limit.borrow().is_some())
            .field("deferred", &self.inner.deferred.get())
            .finish()
    }
}
