//! Master election records
//!
//! A `MasterRecord` is the single election ticket in the record store.
//! It moves `pending -> done` when the winning candidate finalizes, and is
//! deleted when purged or reset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::health::HealthCheckRecord;
use super::instance::Instance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteState {
    Pending,
    Done,
}

impl fmt::Display for VoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteState::Pending => write!(f, "pending"),
            VoteState::Done => write!(f, "done"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterRecord {
    pub instance_id: String,
    pub ip: String,
    pub scaling_group_name: String,
    pub vote_state: VoteState,
    /// A pending vote still open after this time is stale
    pub vote_end_time: DateTime<Utc>,
}

impl MasterRecord {
    pub fn pending(candidate: &Instance, vote_end_time: DateTime<Utc>) -> Self {
        Self {
            instance_id: candidate.instance_id.clone(),
            ip: candidate.primary_private_ip_address.clone(),
            scaling_group_name: candidate.scaling_group_name.clone(),
            vote_state: VoteState::Pending,
            vote_end_time,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.vote_state == VoteState::Pending
    }

    pub fn is_done(&self) -> bool {
        self.vote_state == VoteState::Done
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.vote_end_time
    }

    /// Whether `instance` is the candidate this record was written for
    pub fn held_by(&self, instance: &Instance) -> bool {
        self.instance_id == instance.instance_id
            && self.scaling_group_name == instance.scaling_group_name
    }
}

/// Master record, resolved master instance and its health check, read
/// together so one decision never mixes snapshots from different reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MasterState {
    pub record: Option<MasterRecord>,
    pub info: Option<Instance>,
    pub health_check: Option<HealthCheckRecord>,
}

impl MasterState {
    pub fn vote_state(&self) -> Option<VoteState> {
        self.record.as_ref().map(|r| r.vote_state)
    }

    pub fn master_id(&self) -> Option<&str> {
        self.record.as_ref().map(|r| r.instance_id.as_str())
    }

    pub fn master_ip(&self) -> Option<&str> {
        self.info
            .as_ref()
            .map(|info| info.primary_private_ip_address.as_str())
    }

    pub fn has_pending_vote(&self) -> bool {
        self.record.as_ref().is_some_and(MasterRecord::is_pending)
    }

    pub fn has_healthy_master(&self) -> bool {
        self.info.is_some() && self.health_check.as_ref().is_some_and(|hc| hc.healthy)
    }

    /// `instance` is the resolved master and belongs to the master group
    pub fn is_master(&self, instance: &Instance, master_group: &str) -> bool {
        self.info
            .as_ref()
            .is_some_and(|info| info.instance_id == instance.instance_id)
            && instance.in_group(master_group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_pending_record_expiry() {
        let candidate = Instance::new("i-1", "master", "10.0.0.1");
        let now = Utc::now();
        let record = MasterRecord::pending(&candidate, now + Duration::seconds(30));
        assert!(record.is_pending());
        assert!(!record.is_expired(now));
        assert!(record.is_expired(now + Duration::seconds(31)));
        assert!(record.held_by(&candidate));
        assert!(!record.held_by(&Instance::new("i-1", "payg", "10.0.0.1")));
    }

    #[test]
    fn test_vote_state_serialization() {
        assert_eq!(serde_json::to_string(&VoteState::Pending).unwrap(), "\"pending\"");
        assert_eq!(serde_json::to_string(&VoteState::Done).unwrap(), "\"done\"");
    }

    #[test]
    fn test_is_master_requires_master_group() {
        let master = Instance::new("i-1", "master", "10.0.0.1");
        let state = MasterState {
            record: None,
            info: Some(master.clone()),
            health_check: None,
        };
        assert!(state.is_master(&master, "master"));
        assert!(!state.is_master(&master, "other"));
        assert!(!state.has_healthy_master());
    }
}
