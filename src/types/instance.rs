use serde::{Deserialize, Serialize};

/// Snapshot of a cluster member as reported by the instance directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: String,
    pub scaling_group_name: String,
    pub primary_private_ip_address: String,
}

impl Instance {
    pub fn new(
        instance_id: impl Into<String>,
        scaling_group_name: impl Into<String>,
        primary_private_ip_address: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            scaling_group_name: scaling_group_name.into(),
            primary_private_ip_address: primary_private_ip_address.into(),
        }
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.scaling_group_name == group
    }
}
