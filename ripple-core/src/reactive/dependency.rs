//! Dependency identity for the reactive system.
//!
//! Every reactive cell (observable, computed, observable array) gets a
//! unique [`CellId`] when created and implements the type-erased
//! [`Dependency`] trait, which is all a computed needs to know about the
//! cells it reads: how to identify them, how to ask "did you change since
//! version N", and how to subscribe to their default change channel.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::subscribable::Subscription;

/// Unique identifier for a reactive cell.
///
/// Ids come from a simple arena counter. They key a computed's dependency
/// set so that reading the same cell twice in one evaluation subscribes
/// only once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u64);

impl CellId {
    /// Generate a new unique cell ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for CellId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A reactive cell as seen by the computeds that depend on it.
pub trait Dependency {
    /// The cell's unique ID.
    fn id(&self) -> CellId;

    /// The cell's registry version. It increments on every default-channel
    /// notification.
    fn version(&self) -> u64;

    /// Whether the cell changed since `version` was recorded.
    ///
    /// Cells that are not kept up to date on their own (sleeping pure
    /// computeds) bring themselves up to date before answering.
    fn has_changed_since(&self, version: u64) -> bool;

    /// Subscribe to the cell's default change channel, ignoring the payload.
    fn subscribe_change(&self, callback: Rc<dyn Fn()>) -> Subscription;
}

thread_local! {
    /// Advances whenever any registry on this thread bumps its version.
    static WRITE_EPOCH: Cell<u64> = const { Cell::new(0) };
}

/// The current write epoch of this thread.
pub(crate) fn write_epoch() -> u64 {
    WRITE_EPOCH.with(|epoch| epoch.get())
}

/// Record that some cell on this thread changed.
pub(crate) fn advance_write_epoch() {
    WRITE_EPOCH.with(|epoch| epoch.set(epoch.get().wrapping_add(1)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_ids_are_unique() {
        let id1 = CellId::new();
        let id2 = CellId::new();
        let id3 = CellId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn cell_id_display() {
        let id = CellId::new();
        assert_eq!(id.to_string(), format!("#{}", id.raw()));
    }

    #[test]
    fn write_epoch_advances() {
        let before = write_epoch();
        advance_write_epoch();
        advance_write_epoch();
        assert_eq!(write_epoch(), before + 2);
    }
}
