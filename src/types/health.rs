use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    InSync,
    OutOfSync,
}

/// Liveness and sync bookkeeping for one monitored instance.
///
/// `healthy` is recomputed on every read from heartbeat timing; `in_sync`
/// mirrors `sync_state` and only ever goes from true to false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckRecord {
    pub instance_id: String,
    pub ip: String,
    pub healthy: bool,
    pub in_sync: bool,
    pub heart_beat_loss_count: u32,
    /// Seconds between heartbeats
    pub heart_beat_interval: u64,
    pub next_heart_beat_time: DateTime<Utc>,
    pub sync_state: SyncState,
    pub master_ip: Option<String>,
}
