//! Error collection for write cascades.
//!
//! A single write can make computeds several levels down re-evaluate before
//! the write returns. [`collect`] opens a slot that keeps the first
//! evaluation error raised while its closure runs, so the writer can get it
//! back. Slots nest; an error goes to the innermost one. Errors raised with
//! no slot open (a plain `set`, or a flush run by the scheduler) are handed
//! back to the caller of [`report`] to log.

use std::cell::RefCell;

use crate::error::ReactiveError;

thread_local! {
    static SLOTS: RefCell<Vec<Option<ReactiveError>>> = const { RefCell::new(Vec::new()) };
}

/// Run `f` with a slot open and return the first error reported into it.
pub(crate) fn collect<R>(f: impl FnOnce() -> R) -> (R, Option<ReactiveError>) {
    SLOTS.with(|slots| slots.borrow_mut().push(None));
    let guard = SlotGuard;

    let result = f();

    let error = SLOTS.with(|slots| slots.borrow_mut().last_mut().and_then(Option::take));
    drop(guard);
    (result, error)
}

/// Hand `error` to the innermost open slot.
///
/// Returns the error back when no slot is open. A slot keeps only the first
/// error it receives; later ones are logged and dropped.
pub(crate) fn report(error: ReactiveError) -> Option<ReactiveError> {
    SLOTS.with(|slots| {
        let mut slots = slots.borrow_mut();
        match slots.last_mut() {
            Some(slot @ None) => {
                *slot = Some(error);
                None
            }
            Some(Some(_)) => {
                tracing::debug!(error = %error, "further cascade error dropped");
                None
            }
            None => Some(error),
        }
    })
}

/// Closes the slot, even if the closure panics.
struct SlotGuard;

impl Drop for SlotGuard {
    fn drop(&mut self) {
        SLOTS.with(|slots| {
            slots.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_without_a_slot_hands_the_error_back() {
        let error = report(ReactiveError::evaluation("boom"));
        assert!(error.is_some());
    }

    #[test]
    fn slot_keeps_the_first_error() {
        let ((), error) = collect(|| {
            assert!(report(ReactiveError::evaluation("first")).is_none());
            assert!(report(ReactiveError::evaluation("second")).is_none());
        });
        assert_eq!(error.map(|e| e.to_string()), Some("evaluation failed: first".to_string()));
    }

    #[test]
    fn nested_slots_are_independent() {
        let (inner, outer) = collect(|| {
            let ((), inner) = collect(|| {
                report(ReactiveError::evaluation("inner"));
            });
            inner
        });
        assert!(inner.is_some());
        assert!(outer.is_none());
    }

    #[test]
    fn slot_closes_when_the_closure_panics() {
        let outcome = std::panic::catch_unwind(|| collect(|| panic!("boom")));
        assert!(outcome.is_err());
        assert!(report(ReactiveError::evaluation("after")).is_some());
    }
}
