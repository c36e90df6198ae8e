//! Error Types
//!
//! Every failure the engine can report is a variant of [`ReactiveError`].
//! Errors are returned synchronously from the call that caused them; the
//! engine never retries and never swallows an error except where a disposed
//! target is involved (those operations are silent no-ops).

use std::error::Error as StdError;

use thiserror::Error;

use crate::reactive::CellId;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReactiveError>;

/// Errors reported by reactive cells.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A computed's evaluator read its own cell while it was evaluating.
    ///
    /// The cell keeps the value it had before the evaluation started.
    #[error("computed {id} read itself while it was being evaluated")]
    CircularDependency { id: CellId },

    /// A computed's evaluator failed for a domain reason.
    #[error("evaluation failed: {0}")]
    Evaluation(#[source] Box<dyn StdError + Send + Sync + 'static>),

    /// A value was written to a computed that has no write function.
    #[error("cannot write to computed {id}: it has no write function")]
    ReadOnly { id: CellId },

    /// Someone tried to turn deferred notifications off again.
    #[error("deferred notifications cannot be turned off once enabled (cell {id})")]
    DeferredIrrevocable { id: CellId },

    /// A computed was disposed before it ever produced a value.
    #[error("computed {id} was disposed before producing a value")]
    Disposed { id: CellId },
}

impl ReactiveError {
    /// Wrap a domain error raised inside an evaluator.
    pub fn evaluation<E>(error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self::Evaluation(error.into())
    }

    /// Whether this error was caused by a re-entrant read.
    pub fn is_circular(&self) -> bool {
        matches!(self, Self::CircularDependency { .. })
    }
}
