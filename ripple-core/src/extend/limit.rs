//! The limit gate.
//!
//! Once a cell is limited, its default-channel notifications stop going
//! straight to subscribers. The gate buffers the latest value and asks its
//! policy to schedule a flush. On flush, subscribers hear about the change
//! only if the buffered value differs from the value they last saw, so a
//! burst that ends where it started is silent.
//!
//! The `beforeChange` channel is gated too: only the first one of a burst
//! goes out, and its value becomes the baseline for the flush comparison.
//! Every other channel passes through untouched.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::reactive::notifier::NotifierInner;
use crate::reactive::Channel;

use super::policy::NotificationPolicy;

pub(crate) struct Limit<T> {
    target: Weak<NotifierInner<T>>,
    policy: RefCell<Rc<dyn NotificationPolicy>>,
    state: RefCell<LimitState<T>>,
    this: Weak<Limit<T>>,
}

struct LimitState<T> {
    /// Latest value announced during the current burst.
    pending: Option<T>,
    /// Value subscribers last saw.
    previous: Option<T>,
    did_update: bool,
    ignore_before_change: bool,
    notification_pending: bool,
}

impl<T: Clone + 'static> Limit<T> {
    pub(crate) fn new(target: Weak<NotifierInner<T>>, policy: Rc<dyn NotificationPolicy>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            target,
            policy: RefCell::new(policy),
            state: RefCell::new(LimitState {
                pending: None,
                previous: None,
                did_update: false,
                ignore_before_change: false,
                notification_pending: false,
            }),
            this: this.clone(),
        })
    }

    pub(crate) fn set_policy(&self, policy: Rc<dyn NotificationPolicy>) {
        *self.policy.borrow_mut() = policy;
    }

    pub(crate) fn policy_name(&self) -> &'static str {
        self.policy.borrow().name()
    }

    /// Whether a buffered change is waiting for its flush.
    pub(crate) fn is_pending(&self) -> bool {
        self.state.borrow().notification_pending
    }

    pub(crate) fn notify(&self, value: &T, channel: &Channel) {
        match channel {
            Channel::Change => self.buffer_change(value),
            Channel::BeforeChange => self.before_change(value),
            other => {
                if let Some(target) = self.target.upgrade() {
                    target.subscribers().notify(value, other);
                }
            }
        }
    }

    fn buffer_change(&self, value: &T) {
        {
            let mut state = self.state.borrow_mut();
            state.did_update = true;
            state.pending = Some(value.clone());
            state.notification_pending = true;
            state.ignore_before_change = true;
        }

        let this = self.this.clone();
        let flush: Rc<dyn Fn()> = Rc::new(move || {
            if let Some(limit) = this.upgrade() {
                limit.flush();
            }
        });

        let policy = Rc::clone(&*self.policy.borrow());
        policy.schedule(flush);
    }

    fn before_change(&self, value: &T) {
        let deliver = {
            let mut state = self.state.borrow_mut();
            if state.ignore_before_change {
                false
            } else {
                state.previous = Some(value.clone());
                true
            }
        };

        if deliver {
            if let Some(target) = self.target.upgrade() {
                target.subscribers().notify(value, &Channel::BeforeChange);
            }
        }
    }

    fn flush(&self) {
        let Some(target) = self.target.upgrade() else {
            return;
        };

        let outgoing = {
            let mut state = self.state.borrow_mut();
            let pending = state.pending.take();
            let changed = state.did_update
                && match (&state.previous, &pending) {
                    (Some(previous), Some(next)) => target.is_different(previous, next),
                    (None, Some(_)) => true,
                    (_, None) => false,
                };

            state.did_update = false;
            state.ignore_before_change = false;
            state.notification_pending = false;

            if changed {
                state.previous = pending.clone();
                pending
            } else {
                None
            }
        };

        match outgoing {
            Some(value) => {
                tracing::trace!(policy = self.policy_name(), "limited notification flushed");
                target.subscribers().notify(&value, &Channel::Change);
            }
            None => tracing::trace!(policy = self.policy_name(), "burst ended unchanged"),
        }
    }
}
