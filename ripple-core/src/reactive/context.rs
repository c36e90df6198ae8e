//! Reactive Context
//!
//! The reactive context tracks which computed is currently evaluating, so
//! that every cell read during the evaluation reports itself as a
//! dependency without any explicit wiring.
//!
//! # Implementation
//!
//! We use a thread-local stack of capture frames. Entering a context pushes
//! a frame and returns a [`ReactiveContext`] guard; the frame is popped when
//! the guard is finished or dropped, including during unwinding. Only the
//! top frame receives reports, so nesting (a computed that reads another
//! computed) works naturally.
//!
//! A frame is either *tracking* (it collects dependencies for one computed)
//! or *ignored* (it swallows reads). Ignored frames implement
//! [`ReactiveContext::ignore`] and are pushed around every subscriber
//! dispatch.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use super::dependency::{CellId, Dependency};

/// The reactive context stack.
///
/// Each thread has its own stack; reactive cells are single-threaded.
thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// A dependency reported to a tracking frame, with the version it had when
/// it was read.
pub(crate) struct Captured {
    pub(crate) source: Rc<dyn Dependency>,
    pub(crate) version: u64,
}

/// An entry in the reactive context stack.
enum Frame {
    Tracking {
        /// The computed that is evaluating.
        owner: CellId,
        /// Whether this is the owner's first evaluation.
        initial: bool,
        /// Dependencies read so far, in first-read order.
        dependencies: IndexMap<CellId, Captured>,
    },
    Ignored,
}

/// Guard that pops its frame when finished or dropped.
pub struct ReactiveContext {
    owner: Option<CellId>,
    popped: bool,
}

impl ReactiveContext {
    /// Enter a tracking frame for the computed `owner`.
    ///
    /// While the returned guard is alive, every cell read on this thread is
    /// recorded as a dependency of `owner`.
    pub fn enter(owner: CellId, initial: bool) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(Frame::Tracking {
                owner,
                initial,
                dependencies: IndexMap::new(),
            });
        });

        tracing::trace!(cell = %owner, initial, "capture frame entered");

        Self {
            owner: Some(owner),
            popped: false,
        }
    }

    /// Enter an empty frame that suppresses dependency tracking.
    pub fn suppress() -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(Frame::Ignored));

        Self {
            owner: None,
            popped: false,
        }
    }

    /// Run `f` with dependency tracking suppressed.
    ///
    /// The enclosing frame is restored afterwards, even if `f` panics.
    pub fn ignore<R>(f: impl FnOnce() -> R) -> R {
        let _ctx = Self::suppress();
        f()
    }

    /// Pop this frame and return the dependencies it collected.
    pub(crate) fn finish(mut self) -> IndexMap<CellId, Captured> {
        self.popped = true;
        match self.pop() {
            Some(Frame::Tracking { dependencies, .. }) => dependencies,
            _ => IndexMap::new(),
        }
    }

    fn pop(&self) -> Option<Frame> {
        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());

        // Verify we're popping the right frame.
        if let Some(frame) = &popped {
            let owner = match frame {
                Frame::Tracking { owner, .. } => Some(*owner),
                Frame::Ignored => None,
            };
            debug_assert_eq!(
                owner, self.owner,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.owner, owner
            );
        }

        popped
    }

    /// Check if there is any frame on the stack, tracking or not.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Check if the top frame is collecting dependencies.
    pub fn is_tracking() -> bool {
        CONTEXT_STACK.with(|stack| matches!(stack.borrow().last(), Some(Frame::Tracking { .. })))
    }

    /// The computed currently collecting dependencies, if any.
    pub fn current_owner() -> Option<CellId> {
        CONTEXT_STACK.with(|stack| match stack.borrow().last() {
            Some(Frame::Tracking { owner, .. }) => Some(*owner),
            _ => None,
        })
    }

    /// Whether the evaluating computed is running for the first time.
    ///
    /// Returns `false` outside a tracking frame.
    pub fn is_initial() -> bool {
        CONTEXT_STACK.with(|stack| {
            matches!(stack.borrow().last(), Some(Frame::Tracking { initial: true, .. }))
        })
    }

    /// How many distinct dependencies the evaluating computed has read so far.
    pub fn dependency_count() -> usize {
        CONTEXT_STACK.with(|stack| match stack.borrow().last() {
            Some(Frame::Tracking { dependencies, .. }) => dependencies.len(),
            _ => 0,
        })
    }

    /// Report a read of `source` to the top frame.
    ///
    /// No-op without a tracking frame. A cell read twice is recorded once,
    /// with the version it had on the first read.
    pub fn track(source: Rc<dyn Dependency>) {
        let id = source.id();
        let version = source.version();

        CONTEXT_STACK.with(|stack| {
            if let Some(Frame::Tracking { dependencies, .. }) = stack.borrow_mut().last_mut() {
                dependencies
                    .entry(id)
                    .or_insert(Captured { source, version });
            }
        });
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if !self.popped {
            self.popped = true;
            self.pop();
        }
    }
}
