//! Core Autoscale Types
//!
//! Records shared by the election engine, the health check lifecycle and
//! the heartbeat sync handler:
//! - Instance snapshots from the instance directory
//! - Master election records and resolved master state
//! - Per-instance health check records
//! - Callback request and response payloads

pub mod election;
pub mod health;
pub mod instance;
pub mod request;

pub use election::{MasterRecord, MasterState, VoteState};
pub use health::{HealthCheckRecord, SyncState};
pub use instance::Instance;
pub use request::{HeartbeatPayload, HeartbeatResponse, RequestInfo};
