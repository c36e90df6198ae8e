//! Reactive Primitives
//!
//! This module implements the core reactive system: observables, computeds
//! and the subscription machinery underneath them.
//!
//! # Concepts
//!
//! ## Subscribables
//!
//! Every cell owns a [`Subscribable`] registry. Subscribers attach a
//! callback to a named [`Channel`] and get a [`Subscription`] back, which
//! they dispose to detach. The default channel is `change`; cells also
//! announce `beforeChange` (with the old value) and `spectate` (with the new
//! value, never rate limited).
//!
//! ## Observables
//!
//! An [`Observable`] is a container for mutable state. Reading it while a
//! computed is evaluating registers it as a dependency of that computed.
//!
//! ## Computeds
//!
//! A [`Computed`] is a derived value that caches its result and
//! re-evaluates when one of the cells it read changes. Computeds can be
//! lazy (deferred) or pure (holding no subscriptions while unobserved).
//!
//! # Implementation Notes
//!
//! Dependency detection uses a thread-local stack of capture frames, see
//! [`ReactiveContext`]. Cells are `Rc`-based and bound to the thread that
//! created them.

mod cascade;
mod computed;
mod context;
mod dependency;
pub(crate) mod notifier;
mod observable;
mod subscribable;
mod value;

pub use computed::{Computed, ComputedOptions, ComputedState};
pub use context::ReactiveContext;
pub use dependency::{CellId, Dependency};
pub use notifier::Comparer;
pub use observable::Observable;
pub use subscribable::{Channel, Subscribable, Subscription, SubscriptionHooks, SubscriptionId};
pub use value::{peek, unwrap, Readable, Value};
