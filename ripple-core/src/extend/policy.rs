//! Notification policies.
//!
//! A policy decides *when* a limited cell flushes its buffered change. The
//! gate calls [`NotificationPolicy::schedule`] on every buffered change and
//! the policy arranges for the flush callback to run through the task
//! scheduler.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::tasks::{self, TaskHandle};

/// Strategy for coalescing default-channel notifications.
pub trait NotificationPolicy {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// A change was buffered; arrange for `flush` to run.
    fn schedule(&self, flush: Rc<dyn Fn()>);
}

/// The task a policy has queued and not yet run.
#[derive(Default)]
struct PendingTask(Rc<Cell<Option<TaskHandle>>>);

impl PendingTask {
    fn is_pending(&self) -> bool {
        self.0.get().is_some()
    }

    fn cancel(&self) {
        if let Some(handle) = self.0.take() {
            tasks::cancel(handle);
        }
    }

    /// Queue `flush` after `delay`, clearing the slot when it runs.
    fn queue(&self, delay: Duration, flush: Rc<dyn Fn()>) {
        let slot = Rc::clone(&self.0);
        let handle = tasks::schedule_after(delay, move || {
            slot.set(None);
            flush();
        });
        self.0.set(Some(handle));
    }
}

/// Flush once no change has arrived for `delay`.
///
/// Backs `throttle` and `rateLimit` with `notifyWhenChangesStop`.
pub struct Debounce {
    delay: Duration,
    pending: PendingTask,
}

impl Debounce {
    /// A policy that flushes once writes pause for `delay`.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: PendingTask::default(),
        }
    }
}

impl NotificationPolicy for Debounce {
    fn name(&self) -> &'static str {
        "debounce"
    }

    fn schedule(&self, flush: Rc<dyn Fn()>) {
        self.pending.cancel();
        self.pending.queue(self.delay, flush);
    }
}

/// Flush `timeout` after the first change of a window; later changes in
/// the window ride along.
pub struct FixedRate {
    timeout: Duration,
    pending: PendingTask,
}

impl FixedRate {
    /// A policy that flushes `timeout` after the first change.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: PendingTask::default(),
        }
    }
}

impl NotificationPolicy for FixedRate {
    fn name(&self) -> &'static str {
        "fixed-rate"
    }

    fn schedule(&self, flush: Rc<dyn Fn()>) {
        if !self.pending.is_pending() {
            self.pending.queue(self.timeout, flush);
        }
    }
}

/// Flush on the next task drain.
#[derive(Default)]
pub struct Deferred {
    pending: PendingTask,
}

impl Deferred {
    /// A policy that flushes on the next task drain.
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationPolicy for Deferred {
    fn name(&self) -> &'static str {
        "deferred"
    }

    fn schedule(&self, flush: Rc<dyn Fn()>) {
        self.pending.cancel();
        self.pending.queue(Duration::ZERO, flush);
    }
}

macro_rules! impl_debug {
    ($($policy:ty),*) => {
        $(impl fmt::Debug for $policy {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($policy))
                    .field("pending", &self.pending.is_pending())
                    .finish()
            }
        })*
    };
}

impl_debug!(Debounce, FixedRate, Deferred);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{set_scheduler, EventLoop};

    fn counter() -> (Rc<Cell<u32>>, Rc<dyn Fn()>) {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        (count, Rc::new(move || c.set(c.get() + 1)))
    }

    #[test]
    fn debounce_restarts_on_every_change() {
        let previous = set_scheduler(Rc::new(EventLoop::new()));
        let policy = Debounce::new(Duration::from_millis(100));
        let (flushes, flush) = counter();

        policy.schedule(flush.clone());
        tasks::advance(Duration::from_millis(60));
        policy.schedule(flush.clone());
        tasks::advance(Duration::from_millis(60));
        assert_eq!(flushes.get(), 0);

        tasks::advance(Duration::from_millis(40));
        assert_eq!(flushes.get(), 1);
        assert_eq!(tasks::pending(), 0);

        set_scheduler(previous);
    }

    #[test]
    fn fixed_rate_flushes_once_per_window() {
        let previous = set_scheduler(Rc::new(EventLoop::new()));
        let policy = FixedRate::new(Duration::from_millis(100));
        let (flushes, flush) = counter();

        policy.schedule(flush.clone());
        tasks::advance(Duration::from_millis(60));
        policy.schedule(flush.clone());
        tasks::advance(Duration::from_millis(40));
        assert_eq!(flushes.get(), 1);

        policy.schedule(flush.clone());
        tasks::advance(Duration::from_millis(100));
        assert_eq!(flushes.get(), 2);

        set_scheduler(previous);
    }

    #[test]
    fn deferred_coalesces_until_the_next_drain() {
        let previous = set_scheduler(Rc::new(EventLoop::new()));
        let policy = Deferred::new();
        let (flushes, flush) = counter();

        policy.schedule(flush.clone());
        policy.schedule(flush.clone());
        policy.schedule(flush);
        assert_eq!(tasks::pending(), 1);

        tasks::run_early();
        assert_eq!(flushes.get(), 1);

        set_scheduler(previous);
    }
}
