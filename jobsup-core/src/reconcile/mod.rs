//! Scheduling of catalog queries and delivery of their results.

pub mod handler;
pub mod inflight;
pub mod scheduler;

pub use handler::{Delivery, TransitionHandler};
pub use inflight::{InflightPermit, InflightRegistry};
pub use scheduler::{ReconcileScheduler, TickOutcome};

#[cfg(test)]
pub use handler::MockTransitionHandler;
