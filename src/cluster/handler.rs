//! Heartbeat Sync Handler
//!
//! Entry point for every instance callback. One invocation of
//! [`AutoscaleHandler::handle_sync_callback`]:
//! 1. authenticates the caller against the instance directory
//! 2. freezes out-of-sync callers
//! 3. runs or waits for a master election when there is no healthy master
//! 4. finalizes the election when the caller holds the pending vote
//! 5. registers, refreshes or retires the caller's health check

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::{AutoscaleSettings, MAX_HEARTBEAT_INTERVAL_SECS};
use crate::error::{AutoscaleError, Result};
use crate::platform::CloudPlatform;
use crate::settings::{self, SettingItem, DEFAULT_PASSWORD, DEPLOYMENT_SETTINGS_SAVED};
use crate::types::{
    HealthCheckRecord, HeartbeatResponse, Instance, MasterState, RequestInfo, VoteState,
};

use super::context::InvocationContext;
use super::election::ElectionEngine;
use super::poll::{self, ExecutionDeadline};

#[derive(Clone)]
pub struct AutoscaleHandler {
    platform: Arc<dyn CloudPlatform>,
    settings: Arc<AutoscaleSettings>,
    election: ElectionEngine,
}

impl AutoscaleHandler {
    pub fn new(platform: Arc<dyn CloudPlatform>, settings: AutoscaleSettings) -> Self {
        let settings = Arc::new(settings);
        let election = ElectionEngine::new(platform.clone(), settings.clone());
        Self {
            platform,
            settings,
            election,
        }
    }

    pub fn settings(&self) -> &AutoscaleSettings {
        &self.settings
    }

    pub fn election(&self) -> &ElectionEngine {
        &self.election
    }

    /// Fails unless the deployment settings were saved.
    pub async fn init(&self) -> Result<()> {
        let saved = self
            .platform
            .get_setting_item(DEPLOYMENT_SETTINGS_SAVED)
            .await?
            .is_some_and(|item| item.value == "true");
        if !saved {
            return Err(AutoscaleError::Settings(
                "Deployment settings not saved.".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn save_settings(&self, deployment: &HashMap<String, String>) -> bool {
        settings::save_settings(self.platform.as_ref(), deployment).await
    }

    /// Route a callback: status messages are only logged, everything else is
    /// a heartbeat sync.
    pub async fn handle(
        &self,
        request: &RequestInfo,
        deadline: ExecutionDeadline,
    ) -> Result<HeartbeatResponse> {
        let span = tracing::info_span!(
            "callback",
            request_id = %Uuid::new_v4(),
            instance = %request.instance_id
        );
        async {
            if request.is_status_message() {
                Ok(self.handle_status_message(request))
            } else {
                self.handle_sync_callback(request, deadline).await
            }
        }
        .instrument(span)
        .await
    }

    pub fn handle_status_message(&self, request: &RequestInfo) -> HeartbeatResponse {
        info!(
            "Status message from {}: {}",
            request.instance_id,
            request.status.as_deref().unwrap_or_default()
        );
        HeartbeatResponse::Empty
    }

    pub async fn handle_sync_callback(
        &self,
        request: &RequestInfo,
        deadline: ExecutionDeadline,
    ) -> Result<HeartbeatResponse> {
        let instance_id = request.instance_id.as_str();
        let interval = request.interval.unwrap_or(self.settings.heartbeat_interval_secs);
        if interval > MAX_HEARTBEAT_INTERVAL_SECS {
            warn!("Rejecting heartbeat from {} with interval {}s", instance_id, interval);
            return Err(AutoscaleError::invalid_interval(interval));
        }
        let master_group = self.settings.master_scaling_group_name.as_str();

        let self_instance = self
            .platform
            .describe_instance(instance_id)
            .await?
            .ok_or_else(|| {
                AutoscaleError::unauthorized(format!(
                    "Unauthorized calling instance (id: {}). Instance not found in scale set.",
                    instance_id
                ))
            })?;

        let mut ctx = InvocationContext::new(self_instance);
        ctx.self_health_check = self
            .platform
            .get_instance_health_check(instance_id, Some(interval))
            .await?;

        if ctx.self_health_check.as_ref().is_some_and(|hc| !hc.in_sync) {
            info!("Instance {} is out of sync, no further action", instance_id);
            return Ok(HeartbeatResponse::Empty);
        }

        let (prior_master_id, prior_vote) = {
            let master = ctx.retrieve_master(&self.election, false).await?;
            (master.master_id().map(str::to_string), master.vote_state())
        };
        let mut is_master = false;
        let mut abandon_launch = false;

        if ctx.is_master(master_group) {
            is_master = true;
            ctx.self_health_check = ctx.master().health_check.clone();
        } else if ctx.self_health_check.as_ref().is_some_and(|hc| !hc.healthy) {
            debug!("Unhealthy instance {} does not take part in the election", instance_id);
        } else if !ctx.master().has_healthy_master() {
            match self.await_master_election(&ctx.self_instance, deadline).await {
                Ok(state) => {
                    is_master =
                        state.master_ip() == Some(ctx.self_instance.primary_private_ip_address.as_str());
                    ctx.retrieve_master(&self.election, true).await?;
                }
                Err(e) => {
                    error!("Master election did not settle: {}", e);
                    return Err(self.abort_bootstrap(&ctx.self_instance, deadline, e).await);
                }
            }
        }

        if ctx.self_health_check.is_none() {
            ctx.self_health_check = self
                .platform
                .get_instance_health_check(instance_id, Some(interval))
                .await?;
        }

        if ctx.is_master(master_group) && ctx.master().has_pending_vote() {
            is_master = true;
            let self_healthy = ctx.self_health_check.as_ref().map_or(true, |hc| hc.healthy);
            if self_healthy {
                if self.finalize_master_election().await {
                    ctx.retrieve_master(&self.election, true).await?;
                } else {
                    warn!("Could not finalize the election, abandoning the pending vote");
                    if let Some(pending) = ctx.master().record.clone() {
                        if let Err(e) = self.platform.remove_master_record_if(&pending).await {
                            error!("Failed to remove the pending master record: {}", e);
                        }
                    }
                    ctx.clear_master();
                    is_master = false;
                    abandon_launch = true;
                }
            }
        }

        let changed = {
            let master = ctx.master();
            master_changed(
                prior_vote,
                prior_master_id.as_deref(),
                master.vote_state(),
                master.master_id(),
            )
        };
        info!(
            "Current master: {:?}, vote state: {:?}, master changed: {}",
            ctx.master().master_id(),
            ctx.master().vote_state(),
            changed
        );
        if changed && is_master {
            self.platform.update_ha_role_tag(instance_id).await?;
        }

        match ctx.self_health_check.clone() {
            None => {
                self.register_new_instance(&ctx, interval, is_master, abandon_launch)
                    .await
            }
            Some(hc) if hc.healthy => self.refresh_health_check(&ctx, &hc, interval).await,
            Some(hc) => self.retire_unhealthy_instance(&ctx, &hc, interval).await,
        }
    }

    /// Poll the election until a master settles or the deadline nears.
    async fn await_master_election(
        &self,
        candidate: &Instance,
        deadline: ExecutionDeadline,
    ) -> Result<MasterState> {
        let no_wait = self.settings.master_election_no_wait;
        let in_master_group = candidate.in_group(&self.settings.master_scaling_group_name);
        let self_ip = candidate.primary_private_ip_address.as_str();
        let election = &self.election;

        poll::wait_for(
            || election.check_master_election(candidate),
            |state: &MasterState| election_settled(state, self_ip, in_master_group, no_wait),
            self.settings.election_poll_interval(),
            || deadline.is_expired(),
        )
        .await
    }

    async fn finalize_master_election(&self) -> bool {
        match self.platform.finalize_master_election().await {
            Ok(done) => done,
            Err(e) => {
                error!("Failed to finalize the master election: {}", e);
                false
            }
        }
    }

    /// Clean up after an election that did not settle in time and build the
    /// error reported to the caller.
    async fn abort_bootstrap(
        &self,
        instance: &Instance,
        deadline: ExecutionDeadline,
        cause: AutoscaleError,
    ) -> AutoscaleError {
        match self.election.load_master_state().await {
            Ok(state) => {
                if let Some(record) = state.record.as_ref().filter(|r| r.held_by(instance)) {
                    if let Err(e) = self.platform.remove_master_record_if(record).await {
                        warn!("Failed to remove the master record held by {}: {}", instance.instance_id, e);
                    }
                }
            }
            Err(e) => warn!("Failed to read the master record during cleanup: {}", e),
        }

        if let Err(e) = self.remove_instance(instance).await {
            warn!("Failed to remove instance {}: {}", instance.instance_id, e);
        }

        AutoscaleError::Bootstrap(format!(
            "Failed to determine the master instance before {}. Instance {} is unable to bootstrap. ({})",
            deadline.expires_at(),
            instance.instance_id,
            cause
        ))
    }

    async fn register_new_instance(
        &self,
        ctx: &InvocationContext,
        interval: u64,
        is_master: bool,
        abandon_launch: bool,
    ) -> Result<HeartbeatResponse> {
        let instance = &ctx.self_instance;
        let master = ctx.master();

        self.platform
            .complete_lifecycle_action(&instance.instance_id, !abandon_launch)
            .await?;

        let master_ip = if !is_master
            && master.has_pending_vote()
            && self.settings.master_election_no_wait
        {
            None
        } else {
            master.master_ip().map(str::to_string)
        };

        self.add_instance_to_monitor(instance, interval, master_ip.as_deref())
            .await?;
        info!(
            "Instance {} added to monitor, master ip: {:?}",
            instance.instance_id, master_ip
        );

        if ctx.is_master(&self.settings.master_scaling_group_name) {
            self.platform
                .set_setting_item(SettingItem::new(
                    DEFAULT_PASSWORD,
                    instance.instance_id.clone(),
                    "default password comes from the new elected master.",
                ))
                .await?;
        }

        Ok(master_ip.map_or(HeartbeatResponse::Empty, HeartbeatResponse::MasterIp))
    }

    async fn refresh_health_check(
        &self,
        ctx: &InvocationContext,
        hc: &HealthCheckRecord,
        interval: u64,
    ) -> Result<HeartbeatResponse> {
        let master = ctx.master();
        let master_ip = if master.has_healthy_master() {
            master.master_ip().map(str::to_string)
        } else {
            hc.master_ip.clone()
        };

        self.platform
            .update_instance_health_check(hc, Some(interval), master_ip.as_deref(), Utc::now(), false)
            .await?;
        info!(
            "Heartbeat from {} recorded, next in {}s",
            hc.instance_id, interval
        );

        Ok(match master_ip {
            Some(ip) if hc.master_ip.as_deref() != Some(ip.as_str()) => HeartbeatResponse::MasterIp(ip),
            _ => HeartbeatResponse::Empty,
        })
    }

    async fn retire_unhealthy_instance(
        &self,
        ctx: &InvocationContext,
        hc: &HealthCheckRecord,
        interval: u64,
    ) -> Result<HeartbeatResponse> {
        info!("Instance {} is unhealthy and will be removed", hc.instance_id);
        if hc.in_sync {
            self.platform
                .update_instance_health_check(hc, Some(interval), hc.master_ip.as_deref(), Utc::now(), true)
                .await?;
            self.remove_instance(&ctx.self_instance).await?;
        }
        Ok(HeartbeatResponse::Shutdown)
    }

    pub async fn add_instance_to_monitor(
        &self,
        instance: &Instance,
        interval: u64,
        master_ip: Option<&str>,
    ) -> Result<bool> {
        self.platform
            .create_instance_health_check(instance, interval, master_ip, Utc::now())
            .await
    }

    pub async fn remove_instance_from_monitor(&self, instance_id: &str) -> Result<bool> {
        info!("Removing {} from monitor", instance_id);
        self.platform.delete_instance_health_check(instance_id).await
    }

    pub async fn remove_instance(&self, instance: &Instance) -> Result<bool> {
        self.platform.terminate_instance(instance).await
    }

    pub async fn reset_master_election(&self) -> bool {
        self.election.reset_master_election().await
    }
}

/// Whether the poll can stop on this master state.
pub fn election_settled(
    state: &MasterState,
    self_ip: &str,
    in_master_group: bool,
    no_wait: bool,
) -> bool {
    if state.master_ip() == Some(self_ip) {
        return true;
    }
    match state.vote_state() {
        Some(VoteState::Done) => true,
        Some(VoteState::Pending) => no_wait,
        // nothing to wait for outside the master group
        None => !in_master_group,
    }
}

/// A master change worth re-tagging for: a vote finished during this
/// invocation, or one finalized master replaced another.
pub fn master_changed(
    prior_vote: Option<VoteState>,
    prior_id: Option<&str>,
    current_vote: Option<VoteState>,
    current_id: Option<&str>,
) -> bool {
    let was_done = prior_vote == Some(VoteState::Done);
    let is_done = current_vote == Some(VoteState::Done);
    (!was_done && is_done) || (was_done && is_done && prior_id != current_id)
}
