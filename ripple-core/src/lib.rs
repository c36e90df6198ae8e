//! Ripple Core
//!
//! This crate provides the core runtime for the Ripple fine-grained
//! reactive engine. It implements:
//!
//! - Reactive cells (observables and computeds) with automatic dependency
//!   detection
//! - Notification policies (throttle, rate limit, deferred) driven by an
//!   injectable task scheduler
//! - Observable arrays that report minimal edit scripts
//!
//! Everything is single-threaded: cells are `Rc`-based and the dependency
//! tracking stack, the task scheduler and the engine options live in
//! thread-locals.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Subscriber registries, dependency detection, observables
//!   and computeds
//! - `extend`: Extenders and the notification policies behind them
//! - `tasks`: The task scheduler that deferred notifications run on
//! - `array`: Observable arrays and the edit-script diff
//! - `config`: Engine-wide options
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::{computed, observable};
//!
//! // Create an observable
//! let count = observable(0);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     computed(move || count.get() * 2)
//! };
//!
//! // Watch it
//! let _sub = doubled.subscribe(|value| println!("doubled: {value}"));
//!
//! // Update the observable
//! count.set(5);
//! // prints: "doubled: 10"
//! ```

pub mod array;
pub mod config;
pub mod error;
pub mod extend;
pub mod reactive;
pub mod tasks;

pub use array::{compare_arrays, ArrayChange, ChangeStatus, CompareOptions, ObservableArray};
pub use config::Options;
pub use error::{ReactiveError, Result};
pub use extend::{Extender, NotifyMode, RateLimit, RateLimitMethod};
pub use reactive::{
    peek, unwrap, CellId, Channel, Computed, ComputedOptions, ComputedState, Observable, ReactiveContext,
    Subscription, Value,
};

/// Create an observable.
pub fn observable<T: Clone + PartialEq + 'static>(value: T) -> Observable<T> {
    Observable::new(value)
}

/// Create an observable array.
pub fn observable_array<T: Clone + PartialEq + 'static>(items: Vec<T>) -> ObservableArray<T> {
    ObservableArray::new(items)
}

/// Create an eagerly evaluated computed.
pub fn computed<T, F>(evaluator: F) -> Computed<T>
where
    T: Clone + PartialEq + 'static,
    F: Fn() -> T + 'static,
{
    Computed::new(evaluator)
}

/// Create a pure computed.
pub fn pure_computed<T, F>(evaluator: F) -> Computed<T>
where
    T: Clone + PartialEq + 'static,
    F: Fn() -> T + 'static,
{
    Computed::pure(evaluator)
}

/// Run `f` without registering any of its reads as dependencies.
pub fn ignore_dependencies<R>(f: impl FnOnce() -> R) -> R {
    ReactiveContext::ignore(f)
}
