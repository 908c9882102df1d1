//! Master Election
//!
//! Decides whether a new election is needed, casts the single create-if-
//! absent vote and purges a stale or dead master. The record store is the
//! only arbiter: whoever creates the master record wins.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::AutoscaleSettings;
use crate::error::Result;
use crate::platform::CloudPlatform;
use crate::types::{Instance, MasterRecord, MasterState};

#[derive(Clone)]
pub struct ElectionEngine {
    platform: Arc<dyn CloudPlatform>,
    settings: Arc<AutoscaleSettings>,
}

impl ElectionEngine {
    pub fn new(platform: Arc<dyn CloudPlatform>, settings: Arc<AutoscaleSettings>) -> Self {
        Self { platform, settings }
    }

    /// Read the master record, resolve its instance and health check.
    ///
    /// Failures resolving the record or the instance are logged and read as
    /// "no master". Health check read failures are returned, so a store
    /// hiccup never looks like a dead master.
    pub async fn load_master_state(&self) -> Result<MasterState> {
        let record = match self.platform.get_master_record().await {
            Ok(record) => record,
            Err(e) => {
                error!("Failed to read the master record: {}", e);
                None
            }
        };

        let info = match &record {
            Some(record) => match self.platform.describe_instance(&record.instance_id).await {
                Ok(info) => info,
                Err(e) => {
                    error!("Failed to describe master instance {}: {}", record.instance_id, e);
                    None
                }
            },
            None => None,
        };

        let health_check = match &info {
            Some(info) => {
                self.platform
                    .get_instance_health_check(&info.instance_id, None)
                    .await?
            }
            None => None,
        };

        Ok(MasterState {
            record,
            info,
            health_check,
        })
    }

    /// Run an election round on behalf of `candidate` when the current master
    /// is missing, dead or stuck in an expired vote. Always returns a freshly
    /// read master state.
    pub async fn check_master_election(&self, candidate: &Instance) -> Result<MasterState> {
        let state = self.load_master_state().await?;
        let (needs_election, purge) = election_needed(&state, Utc::now());

        if !needs_election {
            return Ok(state);
        }

        if !candidate.in_group(&self.settings.master_scaling_group_name) {
            info!(
                "{} is not in the master group {}, not starting an election",
                candidate.instance_id, self.settings.master_scaling_group_name
            );
            return Ok(state);
        }

        let stale = purge.then_some(&state);
        if self.put_master_election_vote(candidate, stale).await {
            info!("{} won the vote, running an election", candidate.instance_id);
            let complete = self.elect_master().await;
            info!("Election completed: {}", complete);
        } else {
            debug!("{} lost the vote", candidate.instance_id);
        }

        self.load_master_state().await
    }

    /// Cast a pending vote for `candidate`. When `stale` is given, that
    /// master is purged first.
    pub async fn put_master_election_vote(
        &self,
        candidate: &Instance,
        stale: Option<&MasterState>,
    ) -> bool {
        match stale {
            Some(state) => {
                if self.purge_master(state).await {
                    info!("Purged master {:?}", state.master_id());
                } else {
                    warn!("Failed to purge master {:?}", state.master_id());
                }
            }
            None => debug!("No master purge"),
        }

        let Some(vote_end_time) = Utc::now().checked_add_signed(self.settings.master_election_timeout())
        else {
            error!(
                "Master election timeout of {}s is out of range, not voting",
                self.settings.master_election_timeout_secs
            );
            return false;
        };
        let record = MasterRecord::pending(candidate, vote_end_time);
        match self.platform.put_master_record(record).await {
            Ok(won) => won,
            Err(e) => {
                warn!("Failed to put master election vote: {}", e);
                false
            }
        }
    }

    /// Whether a master record exists after the vote.
    pub async fn elect_master(&self) -> bool {
        match self.platform.get_master_record().await {
            Ok(record) => record.is_some(),
            Err(e) => {
                error!("Failed to read the master record after the vote: {}", e);
                false
            }
        }
    }

    /// Force the master's health check out of sync, delete the master record
    /// and terminate the master instance, concurrently. The record is only
    /// deleted while it still matches the one in `state`.
    pub async fn purge_master(&self, state: &MasterState) -> bool {
        let force_out_of_sync = async {
            match (&state.info, &state.health_check) {
                (Some(info), Some(hc)) => self
                    .platform
                    .update_instance_health_check(
                        hc,
                        None,
                        Some(info.primary_private_ip_address.as_str()),
                        Utc::now(),
                        true,
                    )
                    .await
                    .map(|_| ()),
                _ => Ok(()),
            }
        };
        let remove_record = async {
            match &state.record {
                Some(record) => {
                    let removed = self.platform.remove_master_record_if(record).await;
                    if let Ok(false) = removed {
                        info!("Master record was replaced before the purge, keeping it");
                    }
                    removed
                }
                None => Ok(false),
            }
        };
        let terminate = async {
            match &state.info {
                Some(info) => self.platform.terminate_instance(info).await.map(|_| ()),
                None => Ok(()),
            }
        };

        match futures::join!(force_out_of_sync, remove_record, terminate) {
            (Ok(()), Ok(_), Ok(())) => true,
            (sync, record, terminate) => {
                error!(
                    "purge_master failed: health check: {:?}, record: {:?}, terminate: {:?}",
                    sync.err(),
                    record.err(),
                    terminate.err()
                );
                false
            }
        }
    }

    /// Delete the master record so the next heartbeat starts a new election.
    pub async fn reset_master_election(&self) -> bool {
        info!("Resetting master election");
        match self.platform.remove_master_record().await {
            Ok(_) => true,
            Err(e) => {
                error!("Failed to reset master election: {}", e);
                false
            }
        }
    }
}

/// `(needs_election, purge_first)` for a master state read at `now`.
pub fn election_needed(state: &MasterState, now: chrono::DateTime<Utc>) -> (bool, bool) {
    match &state.record {
        None => (true, false),
        Some(record) if record.is_done() => {
            let dead = state
                .health_check
                .as_ref()
                .map_or(true, |hc| !hc.healthy || !hc.in_sync);
            (dead, dead)
        }
        Some(record) => {
            let expired = record.is_expired(now);
            (expired, expired)
        }
    }
}
