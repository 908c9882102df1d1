use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Per-callback request data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RequestInfo {
    /// Calling instance id
    #[serde(rename = "instance")]
    pub instance_id: String,
    /// Heartbeat interval in seconds
    #[serde(default)]
    pub interval: Option<u64>,
    /// Present on status messages only
    #[serde(default)]
    pub status: Option<String>,
}

impl RequestInfo {
    pub fn heartbeat(instance_id: impl Into<String>, interval: u64) -> Self {
        Self {
            instance_id: instance_id.into(),
            interval: Some(interval),
            status: None,
        }
    }

    pub fn is_status_message(&self) -> bool {
        self.status.is_some()
    }
}

/// Answer to a heartbeat sync callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "HeartbeatPayload", from = "HeartbeatPayload")]
pub enum HeartbeatResponse {
    /// Keep going as-is
    Empty,
    /// Adopt or refresh the master at this address
    MasterIp(String),
    /// Terminate self
    Shutdown,
}

/// Wire form of [`HeartbeatResponse`]: `{}`, `{"master-ip": ..}` or
/// `{"action": "shutdown"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HeartbeatPayload {
    #[serde(rename = "master-ip", default, skip_serializing_if = "Option::is_none")]
    pub master_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

const SHUTDOWN_ACTION: &str = "shutdown";

impl From<HeartbeatResponse> for HeartbeatPayload {
    fn from(response: HeartbeatResponse) -> Self {
        match response {
            HeartbeatResponse::Empty => HeartbeatPayload::default(),
            HeartbeatResponse::MasterIp(ip) => HeartbeatPayload {
                master_ip: Some(ip),
                action: None,
            },
            HeartbeatResponse::Shutdown => HeartbeatPayload {
                master_ip: None,
                action: Some(SHUTDOWN_ACTION.to_string()),
            },
        }
    }
}

impl From<HeartbeatPayload> for HeartbeatResponse {
    fn from(payload: HeartbeatPayload) -> Self {
        if payload.action.as_deref() == Some(SHUTDOWN_ACTION) {
            HeartbeatResponse::Shutdown
        } else if let Some(ip) = payload.master_ip {
            HeartbeatResponse::MasterIp(ip)
        } else {
            HeartbeatResponse::Empty
        }
    }
}
