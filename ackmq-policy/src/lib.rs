//! Acknowledge/recover decisions for manually acknowledged deliveries.
//!
//! A [`RedeliveryController`] wraps a [`MessageListener`] and turns every
//! delivery into a [`Decision`] using an immutable [`RedeliveryPolicy`]. The
//! per-message retry count travels with the [`DeliveryAttempt`], so the
//! controller itself holds no mutable state and can be shared freely across
//! listener workers.

mod attempt;
mod controller;
mod errors;
mod policy;

pub use attempt::{DeliveryAttempt, DeliveryState};
pub use controller::{Decision, DeliveryHandler, MessageListener, RedeliveryController};
pub use errors::{HandlerFailure, PolicyError, TransitionError};
pub use policy::{MaximumDelay, RedeliveryPolicy};
