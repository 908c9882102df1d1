//! Cloud platform seam
//!
//! Everything the coordinator needs from the outside world: the record
//! store (master record, health checks, settings), the instance directory
//! and the cloud control actions. The in-memory backend in [`memory`] backs
//! the API server and the tests.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::settings::SettingItem;
use crate::types::{HealthCheckRecord, Instance, MasterRecord};

pub use memory::MemoryPlatform;

#[async_trait]
pub trait CloudPlatform: Send + Sync {
    /// Look up an instance in the directory. `None` when it is not part of
    /// any scaling group.
    async fn describe_instance(&self, instance_id: &str) -> Result<Option<Instance>>;

    /// Ask the cloud to terminate `instance`.
    async fn terminate_instance(&self, instance: &Instance) -> Result<bool>;

    /// Move the HA role tag onto `instance_id`.
    async fn update_ha_role_tag(&self, instance_id: &str) -> Result<()>;

    /// Complete the launch lifecycle hook of `instance_id`; `proceed = false`
    /// abandons the launch.
    async fn complete_lifecycle_action(&self, instance_id: &str, proceed: bool) -> Result<bool>;

    /// Read and evaluate the health check of `instance_id` at the current
    /// time. `interval` overrides the stored heartbeat interval for this
    /// read only.
    async fn get_instance_health_check(
        &self,
        instance_id: &str,
        interval: Option<u64>,
    ) -> Result<Option<HealthCheckRecord>>;

    async fn create_instance_health_check(
        &self,
        instance: &Instance,
        interval: u64,
        master_ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Write back an evaluated record, moving its next heartbeat deadline
    /// forward. Returns false when the record no longer exists.
    async fn update_instance_health_check(
        &self,
        record: &HealthCheckRecord,
        interval: Option<u64>,
        master_ip: Option<&str>,
        now: DateTime<Utc>,
        force_out_of_sync: bool,
    ) -> Result<bool>;

    async fn delete_instance_health_check(&self, instance_id: &str) -> Result<bool>;

    async fn get_master_record(&self) -> Result<Option<MasterRecord>>;

    /// Create-if-absent. Exactly one concurrent caller gets `true`.
    async fn put_master_record(&self, record: MasterRecord) -> Result<bool>;

    async fn remove_master_record(&self) -> Result<bool>;

    /// Delete the master record only while it still equals `expected`.
    /// False when the record is gone or was replaced.
    async fn remove_master_record_if(&self, expected: &MasterRecord) -> Result<bool>;

    /// Move the pending master record to `done`. False when there is no
    /// pending record to finalize.
    async fn finalize_master_election(&self) -> Result<bool>;

    async fn set_setting_item(&self, item: SettingItem) -> Result<()>;

    async fn get_setting_item(&self, key: &str) -> Result<Option<SettingItem>>;
}
