//! Task Scheduling
//!
//! Notification policies never fire on their own: they hand a flush task to
//! the thread's [`Scheduler`] and the host decides when tasks run. The
//! default scheduler is an [`EventLoop`] driven by a virtual clock, so the
//! host (or a test) advances time explicitly with [`advance`] and drains
//! zero-delay work with [`run_early`].
//!
//! # Ordering
//!
//! Tasks run in order of their due time; tasks due at the same instant run
//! in the order they were scheduled. A task scheduled while the queue is
//! draining runs in the same drain if it is already due.

mod event_loop;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

pub use event_loop::EventLoop;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Handle to a scheduled task, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

impl TaskHandle {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw handle value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Something that can run tasks later.
pub trait Scheduler {
    /// Queue `task` to run once `delay` has elapsed.
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle;

    /// Drop a queued task. Returns `false` if it already ran or was
    /// cancelled.
    fn cancel(&self, handle: TaskHandle) -> bool;

    /// Run every task that is due now. Returns how many ran.
    fn run_due(&self) -> usize;

    /// Move the clock forward by `by`, running tasks as they come due.
    /// Returns how many ran.
    fn advance(&self, by: Duration) -> usize;

    /// Number of queued tasks.
    fn pending(&self) -> usize;
}

thread_local! {
    static SCHEDULER: RefCell<Rc<dyn Scheduler>> = RefCell::new(Rc::new(EventLoop::new()));
}

/// The scheduler installed on this thread.
pub fn current() -> Rc<dyn Scheduler> {
    SCHEDULER.with(|scheduler| Rc::clone(&scheduler.borrow()))
}

/// Install `scheduler` on this thread and return the previous one.
///
/// Tasks queued on the previous scheduler stay there.
pub fn set_scheduler(scheduler: Rc<dyn Scheduler>) -> Rc<dyn Scheduler> {
    SCHEDULER.with(|current| std::mem::replace(&mut *current.borrow_mut(), scheduler))
}

/// Queue `task` to run on the next drain.
pub fn schedule(task: impl FnOnce() + 'static) -> TaskHandle {
    current().schedule(Duration::ZERO, Box::new(task))
}

/// Queue `task` to run once `delay` has elapsed.
pub fn schedule_after(delay: Duration, task: impl FnOnce() + 'static) -> TaskHandle {
    current().schedule(delay, Box::new(task))
}

/// Cancel a queued task.
pub fn cancel(handle: TaskHandle) -> bool {
    current().cancel(handle)
}

/// Run every task that is due now, without waiting for the host.
pub fn run_early() -> usize {
    current().run_due()
}

/// Advance the clock of the current scheduler.
pub fn advance(by: Duration) -> usize {
    current().advance(by)
}

/// Number of tasks queued on the current scheduler.
pub fn pending() -> usize {
    current().pending()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn free_functions_use_the_installed_scheduler() {
        let previous = set_scheduler(Rc::new(EventLoop::new()));
        let ran = Rc::new(Cell::new(0));

        let r = ran.clone();
        schedule(move || r.set(r.get() + 1));
        assert_eq!(pending(), 1);
        assert_eq!(ran.get(), 0);

        assert_eq!(run_early(), 1);
        assert_eq!(ran.get(), 1);
        assert_eq!(pending(), 0);

        set_scheduler(previous);
    }

    #[test]
    fn cancelled_task_never_runs() {
        let previous = set_scheduler(Rc::new(EventLoop::new()));
        let ran = Rc::new(Cell::new(false));

        let r = ran.clone();
        let handle = schedule_after(Duration::from_millis(10), move || r.set(true));
        assert!(cancel(handle));
        assert!(!cancel(handle));

        advance(Duration::from_millis(50));
        assert!(!ran.get());

        set_scheduler(previous);
    }
}
