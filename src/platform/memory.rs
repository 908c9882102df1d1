use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use super::CloudPlatform;
use crate::cluster::health::HealthCheckPolicy;
use crate::config::Config;
use crate::error::{AutoscaleError, Result};
use crate::settings::SettingItem;
use crate::types::{HealthCheckRecord, Instance, MasterRecord, VoteState};

/// Single-process platform: the instance directory, record store and cloud
/// actions all live in memory.
#[derive(Debug)]
pub struct MemoryPlatform {
    instances: DashMap<String, Instance>,
    terminated: DashMap<String, Instance>,
    health_checks: DashMap<String, HealthCheckRecord>,
    settings: DashMap<String, SettingItem>,
    lifecycle_actions: DashMap<String, bool>,
    master_record: Mutex<Option<MasterRecord>>,
    ha_role_holder: RwLock<Option<String>>,
    fail_finalization: AtomicBool,
    policy: HealthCheckPolicy,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new(HealthCheckPolicy::default())
    }
}

impl MemoryPlatform {
    pub fn new(policy: HealthCheckPolicy) -> Self {
        Self {
            instances: DashMap::new(),
            terminated: DashMap::new(),
            health_checks: DashMap::new(),
            settings: DashMap::new(),
            lifecycle_actions: DashMap::new(),
            master_record: Mutex::new(None),
            ha_role_holder: RwLock::new(None),
            fail_finalization: AtomicBool::new(false),
            policy,
        }
    }

    /// Platform seeded with the configured inventory.
    pub fn from_config(config: &Config) -> Self {
        let platform = Self::new(HealthCheckPolicy::from_settings(&config.autoscale));
        for instance in &config.inventory.instances {
            platform.add_instance(instance.clone());
        }
        info!(
            "Memory platform ready with {} instances",
            config.inventory.instances.len()
        );
        platform
    }

    pub fn add_instance(&self, instance: Instance) {
        self.instances.insert(instance.instance_id.clone(), instance);
    }

    pub fn is_terminated(&self, instance_id: &str) -> bool {
        self.terminated.contains_key(instance_id)
    }

    /// Health check as stored, without evaluating heartbeat timing.
    pub fn stored_health_check(&self, instance_id: &str) -> Option<HealthCheckRecord> {
        self.health_checks.get(instance_id).map(|r| r.clone())
    }

    /// Overwrite a stored health check.
    pub fn put_health_check(&self, record: HealthCheckRecord) {
        self.health_checks.insert(record.instance_id.clone(), record);
    }

    pub fn master_record(&self) -> Option<MasterRecord> {
        self.master_record.lock().clone()
    }

    /// Overwrite the master record regardless of what is stored.
    pub fn set_master_record(&self, record: Option<MasterRecord>) {
        *self.master_record.lock() = record;
    }

    pub fn ha_role_holder(&self) -> Option<String> {
        self.ha_role_holder.read().clone()
    }

    /// Outcome of the lifecycle action completed for `instance_id`.
    pub fn lifecycle_action(&self, instance_id: &str) -> Option<bool> {
        self.lifecycle_actions.get(instance_id).map(|r| *r)
    }

    /// Make every following election finalization fail.
    pub fn fail_finalization(&self, fail: bool) {
        self.fail_finalization.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CloudPlatform for MemoryPlatform {
    async fn describe_instance(&self, instance_id: &str) -> Result<Option<Instance>> {
        Ok(self.instances.get(instance_id).map(|r| r.clone()))
    }

    async fn terminate_instance(&self, instance: &Instance) -> Result<bool> {
        match self.instances.remove(&instance.instance_id) {
            Some((id, removed)) => {
                info!("Terminating instance {}", id);
                self.terminated.insert(id, removed);
                Ok(true)
            }
            None => {
                debug!("Instance {} already gone", instance.instance_id);
                Ok(false)
            }
        }
    }

    async fn update_ha_role_tag(&self, instance_id: &str) -> Result<()> {
        if !self.instances.contains_key(instance_id) {
            return Err(AutoscaleError::platform(format!(
                "cannot tag unknown instance {}",
                instance_id
            )));
        }
        *self.ha_role_holder.write() = Some(instance_id.to_string());
        Ok(())
    }

    async fn complete_lifecycle_action(&self, instance_id: &str, proceed: bool) -> Result<bool> {
        self.lifecycle_actions.insert(instance_id.to_string(), proceed);
        Ok(true)
    }

    async fn get_instance_health_check(
        &self,
        instance_id: &str,
        interval: Option<u64>,
    ) -> Result<Option<HealthCheckRecord>> {
        let now = Utc::now();
        Ok(self
            .health_checks
            .get(instance_id)
            .map(|stored| self.policy.evaluate(&stored, interval, now)))
    }

    async fn create_instance_health_check(
        &self,
        instance: &Instance,
        interval: u64,
        master_ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let record = self.policy.new_record(instance, interval, master_ip, now)?;
        self.health_checks.insert(record.instance_id.clone(), record);
        Ok(true)
    }

    async fn update_instance_health_check(
        &self,
        record: &HealthCheckRecord,
        interval: Option<u64>,
        master_ip: Option<&str>,
        now: DateTime<Utc>,
        force_out_of_sync: bool,
    ) -> Result<bool> {
        match self.health_checks.get_mut(&record.instance_id) {
            Some(mut stored) => {
                let updated = self.policy.apply_update(
                    &stored,
                    record,
                    interval,
                    master_ip,
                    now,
                    force_out_of_sync,
                )?;
                *stored = updated;
                Ok(true)
            }
            None => {
                warn!("No health check to update for {}", record.instance_id);
                Ok(false)
            }
        }
    }

    async fn delete_instance_health_check(&self, instance_id: &str) -> Result<bool> {
        Ok(self.health_checks.remove(instance_id).is_some())
    }

    async fn get_master_record(&self) -> Result<Option<MasterRecord>> {
        Ok(self.master_record.lock().clone())
    }

    async fn put_master_record(&self, record: MasterRecord) -> Result<bool> {
        let mut slot = self.master_record.lock();
        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(record);
        Ok(true)
    }

    async fn remove_master_record(&self) -> Result<bool> {
        Ok(self.master_record.lock().take().is_some())
    }

    async fn remove_master_record_if(&self, expected: &MasterRecord) -> Result<bool> {
        let mut slot = self.master_record.lock();
        if slot.as_ref() != Some(expected) {
            debug!("Master record changed since it was read, keeping it");
            return Ok(false);
        }
        *slot = None;
        Ok(true)
    }

    async fn finalize_master_election(&self) -> Result<bool> {
        if self.fail_finalization.load(Ordering::SeqCst) {
            return Err(AutoscaleError::platform("master election finalization rejected"));
        }
        let mut slot = self.master_record.lock();
        match slot.as_mut() {
            Some(record) if record.is_pending() => {
                record.vote_state = VoteState::Done;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_setting_item(&self, item: SettingItem) -> Result<()> {
        self.settings.insert(item.key.clone(), item);
        Ok(())
    }

    async fn get_setting_item(&self, key: &str) -> Result<Option<SettingItem>> {
        Ok(self.settings.get(key).map(|r| r.clone()))
    }
}
