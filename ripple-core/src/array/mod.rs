//! Observable arrays and edit scripts.
//!
//! [`ObservableArray`] wraps an observable `Vec` with sequence mutators.
//! Subscribers of its `arrayChange` channel receive an edit script
//! ([`ArrayChange`] entries) for every delivered change, computed by
//! [`compare_arrays`] or derived directly from the mutation.

mod compare;
mod observable_array;

pub use compare::{compare_arrays, ArrayChange, ChangeStatus, CompareOptions};
pub use observable_array::{ObservableArray, ARRAY_CHANGE};
