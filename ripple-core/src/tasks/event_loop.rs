//! Virtual-clock task queue.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use super::{Scheduler, Task, TaskHandle};

/// A single-threaded task queue with a virtual clock.
///
/// Time only moves when [`Scheduler::advance`] is called. Nothing here
/// sleeps, which keeps timing-dependent behavior deterministic.
pub struct EventLoop {
    state: RefCell<LoopState>,
}

struct LoopState {
    now: Duration,
    next_id: u64,
    /// Keyed by (due time, sequence) so equal deadlines keep FIFO order.
    queue: BTreeMap<(Duration, u64), Task>,
    /// Due time of every queued handle, for cancellation.
    due: HashMap<u64, Duration>,
}

impl EventLoop {
    /// Create an empty loop with its clock at zero.
    pub fn new() -> Self {
        Self {
            state: RefCell::new(LoopState {
                now: Duration::ZERO,
                next_id: 0,
                queue: BTreeMap::new(),
                due: HashMap::new(),
            }),
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.state.borrow().now
    }

    /// Take the earliest task due at or before `deadline`.
    ///
    /// The borrow is released before the task runs, so tasks are free to
    /// schedule or cancel other tasks.
    fn pop_due(&self, deadline: Duration) -> Option<(TaskHandle, Task)> {
        let mut state = self.state.borrow_mut();

        let key = *state.queue.keys().next()?;
        if key.0 > deadline {
            return None;
        }

        let task = state.queue.remove(&key)?;
        state.due.remove(&key.1);
        if key.0 > state.now {
            state.now = key.0;
        }

        Some((TaskHandle::new(key.1), task))
    }

    fn drain_until(&self, deadline: Duration) -> usize {
        let mut ran = 0;
        while let Some((handle, task)) = self.pop_due(deadline) {
            tracing::trace!(task = handle.raw(), "running task");
            task();
            ran += 1;
        }
        ran
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for EventLoop {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let mut state = self.state.borrow_mut();
        let id = state.next_id;
        state.next_id += 1;

        let due = state.now + delay;
        state.queue.insert((due, id), task);
        state.due.insert(id, due);

        tracing::trace!(task = id, delay_ms = delay.as_millis() as u64, "task scheduled");
        TaskHandle::new(id)
    }

    fn cancel(&self, handle: TaskHandle) -> bool {
        let mut state = self.state.borrow_mut();
        match state.due.remove(&handle.raw()) {
            Some(due) => state.queue.remove(&(due, handle.raw())).is_some(),
            None => false,
        }
    }

    fn run_due(&self) -> usize {
        let now = self.now();
        self.drain_until(now)
    }

    fn advance(&self, by: Duration) -> usize {
        let deadline = self.now() + by;
        let ran = self.drain_until(deadline);

        let mut state = self.state.borrow_mut();
        if deadline > state.now {
            state.now = deadline;
        }
        ran
    }

    fn pending(&self) -> usize {
        self.state.borrow().queue.len()
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("EventLoop")
            .field("now", &state.now)
            .field("pending", &state.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc;

    fn recorder() -> (Rc<StdRefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Task) {
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let sink = log.clone();
        let make = move |name: &'static str| -> Task {
            let sink = sink.clone();
            Box::new(move || sink.borrow_mut().push(name))
        };
        (log, make)
    }

    #[test]
    fn tasks_run_in_due_order() {
        let event_loop = EventLoop::new();
        let (log, task) = recorder();

        event_loop.schedule(Duration::from_millis(20), task("late"));
        event_loop.schedule(Duration::from_millis(5), task("early"));
        event_loop.schedule(Duration::ZERO, task("now"));

        assert_eq!(event_loop.run_due(), 1);
        assert_eq!(*log.borrow(), vec!["now"]);

        assert_eq!(event_loop.advance(Duration::from_millis(10)), 1);
        assert_eq!(event_loop.now(), Duration::from_millis(10));

        event_loop.advance(Duration::from_millis(10));
        assert_eq!(*log.borrow(), vec!["now", "early", "late"]);
        assert_eq!(event_loop.pending(), 0);
    }

    #[test]
    fn equal_deadlines_keep_schedule_order() {
        let event_loop = EventLoop::new();
        let (log, task) = recorder();

        event_loop.schedule(Duration::ZERO, task("a"));
        event_loop.schedule(Duration::ZERO, task("b"));
        event_loop.schedule(Duration::ZERO, task("c"));
        event_loop.run_due();

        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn tasks_scheduled_while_draining_run_in_the_same_drain() {
        let event_loop = Rc::new(EventLoop::new());
        let (log, task) = recorder();

        let inner = event_loop.clone();
        let follow_up = StdRefCell::new(Some(task("second")));
        let sink = log.clone();
        event_loop.schedule(
            Duration::ZERO,
            Box::new(move || {
                sink.borrow_mut().push("first");
                if let Some(next) = follow_up.borrow_mut().take() {
                    inner.schedule(Duration::ZERO, next);
                }
            }),
        );

        assert_eq!(event_loop.run_due(), 2);
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn cancel_removes_a_queued_task() {
        let event_loop = EventLoop::new();
        let (log, task) = recorder();

        let handle = event_loop.schedule(Duration::from_millis(1), task("cancelled"));
        assert!(event_loop.cancel(handle));
        assert!(!event_loop.cancel(handle));

        event_loop.advance(Duration::from_millis(5));
        assert!(log.borrow().is_empty());
    }
}
