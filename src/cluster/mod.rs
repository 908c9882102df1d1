//! Cluster coordination: master election, health check lifecycle and the
//! heartbeat sync handler built on top of them.

pub mod context;
pub mod election;
pub mod handler;
pub mod health;
pub mod poll;

pub use election::ElectionEngine;
pub use handler::AutoscaleHandler;
pub use health::HealthCheckPolicy;
pub use poll::{wait_for, ExecutionDeadline};
