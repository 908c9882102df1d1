//! Health Check Lifecycle
//!
//! Pure bookkeeping over [`HealthCheckRecord`]s. Stores call into this
//! module so every backend derives `healthy` and `sync_state` the same way:
//! - a record is created healthy and in-sync on the first callback
//! - every read evaluates heartbeat lateness against the stored deadline
//! - every update moves the deadline forward by one interval
//! - `in_sync` only ever goes from true to false

use chrono::{DateTime, Duration, Utc};

use crate::config::AutoscaleSettings;
use crate::error::{AutoscaleError, Result};
use crate::types::{HealthCheckRecord, Instance, SyncState};

#[derive(Debug, Clone)]
pub struct HealthCheckPolicy {
    /// Consecutive late heartbeats after which an instance is unhealthy
    pub loss_count_threshold: u32,
    /// Lateness tolerated before a heartbeat counts as lost
    pub delay_allowance: Duration,
}

impl Default for HealthCheckPolicy {
    fn default() -> Self {
        Self::from_settings(&AutoscaleSettings::default())
    }
}

impl HealthCheckPolicy {
    pub fn from_settings(settings: &AutoscaleSettings) -> Self {
        Self {
            loss_count_threshold: settings.heartbeat_loss_count,
            delay_allowance: settings.heartbeat_delay_allowance(),
        }
    }

    pub fn new_record(
        &self,
        instance: &Instance,
        interval: u64,
        master_ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<HealthCheckRecord> {
        Ok(HealthCheckRecord {
            instance_id: instance.instance_id.clone(),
            ip: instance.primary_private_ip_address.clone(),
            healthy: true,
            in_sync: true,
            heart_beat_loss_count: 0,
            heart_beat_interval: interval,
            next_heart_beat_time: next_heart_beat_time(now, interval)?,
            sync_state: SyncState::InSync,
            master_ip: master_ip.map(str::to_string),
        })
    }

    /// Judge a stored record at `now`. Nothing is persisted here; the loss
    /// count computed by this read is written back by the next update.
    pub fn evaluate(
        &self,
        stored: &HealthCheckRecord,
        interval: Option<u64>,
        now: DateTime<Utc>,
    ) -> HealthCheckRecord {
        let mut record = stored.clone();
        record.heart_beat_interval = interval.unwrap_or(stored.heart_beat_interval);
        record.in_sync = stored.sync_state == SyncState::InSync;

        if !record.in_sync {
            record.healthy = false;
            return record;
        }

        let delay = now - stored.next_heart_beat_time;
        if delay < self.delay_allowance {
            record.healthy = true;
            record.heart_beat_loss_count = 0;
        } else {
            record.heart_beat_loss_count = stored.heart_beat_loss_count.saturating_add(1);
            record.healthy = record.heart_beat_loss_count < self.loss_count_threshold;
        }
        record
    }

    /// Merge an evaluated record back into its stored form.
    pub fn apply_update(
        &self,
        stored: &HealthCheckRecord,
        observed: &HealthCheckRecord,
        interval: Option<u64>,
        master_ip: Option<&str>,
        now: DateTime<Utc>,
        force_out_of_sync: bool,
    ) -> Result<HealthCheckRecord> {
        let interval = interval.unwrap_or(observed.heart_beat_interval);
        let sync_state = if stored.sync_state == SyncState::InSync
            && observed.healthy
            && !force_out_of_sync
        {
            SyncState::InSync
        } else {
            SyncState::OutOfSync
        };
        let in_sync = sync_state == SyncState::InSync;

        Ok(HealthCheckRecord {
            instance_id: stored.instance_id.clone(),
            ip: stored.ip.clone(),
            healthy: observed.healthy && in_sync,
            in_sync,
            heart_beat_loss_count: observed.heart_beat_loss_count,
            heart_beat_interval: interval,
            next_heart_beat_time: next_heart_beat_time(now, interval)?,
            sync_state,
            master_ip: master_ip.map(str::to_string),
        })
    }
}

fn next_heart_beat_time(now: DateTime<Utc>, interval: u64) -> Result<DateTime<Utc>> {
    i64::try_from(interval)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|step| now.checked_add_signed(step))
        .ok_or_else(|| AutoscaleError::invalid_interval(interval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> HealthCheckPolicy {
        HealthCheckPolicy {
            loss_count_threshold: 3,
            delay_allowance: Duration::seconds(2),
        }
    }

    fn record_at(now: DateTime<Utc>) -> HealthCheckRecord {
        let instance = Instance::new("i-1", "master", "10.0.0.1");
        policy().new_record(&instance, 30, Some("10.0.0.9"), now).unwrap()
    }

    #[test]
    fn test_on_time_heartbeat_resets_loss_count() {
        let now = Utc::now();
        let mut stored = record_at(now);
        stored.heart_beat_loss_count = 2;

        let evaluated = policy().evaluate(&stored, Some(30), now + Duration::seconds(31));
        assert!(evaluated.healthy);
        assert!(evaluated.in_sync);
        assert_eq!(evaluated.heart_beat_loss_count, 0);
    }

    #[test]
    fn test_late_heartbeats_become_unhealthy_at_threshold() {
        let now = Utc::now();
        let mut stored = record_at(now);
        let late = now + Duration::seconds(60);

        let first = policy().evaluate(&stored, None, late);
        assert!(first.healthy);
        assert_eq!(first.heart_beat_loss_count, 1);

        stored.heart_beat_loss_count = 2;
        let third = policy().evaluate(&stored, None, late);
        assert!(!third.healthy);
        assert_eq!(third.heart_beat_loss_count, 3);
    }

    #[test]
    fn test_update_moves_deadline_and_keeps_master_ip() {
        let now = Utc::now();
        let stored = record_at(now);
        let observed = policy().evaluate(&stored, Some(10), now);
        let updated = policy().apply_update(&stored, &observed, Some(10), Some("10.0.0.7"), now, false).unwrap();

        assert_eq!(updated.next_heart_beat_time, now + Duration::seconds(10));
        assert_eq!(updated.heart_beat_interval, 10);
        assert_eq!(updated.master_ip.as_deref(), Some("10.0.0.7"));
        assert_eq!(updated.sync_state, SyncState::InSync);
    }

    #[test]
    fn test_forced_out_of_sync_is_terminal() {
        let now = Utc::now();
        let stored = record_at(now);
        let observed = policy().evaluate(&stored, None, now);
        let forced = policy().apply_update(&stored, &observed, None, None, now, true).unwrap();
        assert!(!forced.in_sync);
        assert_eq!(forced.sync_state, SyncState::OutOfSync);

        let later = policy().evaluate(&forced, None, now);
        assert!(!later.healthy);
        assert!(!later.in_sync);

        let refreshed = policy().apply_update(&forced, &later, None, None, now, false).unwrap();
        assert!(!refreshed.in_sync);
    }

    #[test]
    fn test_out_of_range_interval_is_rejected() {
        let now = Utc::now();
        let instance = Instance::new("i-1", "master", "10.0.0.1");
        let err = policy()
            .new_record(&instance, 10_000_000_000_000, None, now)
            .unwrap_err();
        assert!(matches!(err, AutoscaleError::InvalidRequest(_)));

        let stored = record_at(now);
        let observed = policy().evaluate(&stored, Some(u64::MAX), now);
        assert!(policy()
            .apply_update(&stored, &observed, Some(u64::MAX), None, now, false)
            .is_err());
    }

    #[derive(Debug, Clone)]
    enum Step {
        Read { offset_secs: i64 },
        Update { offset_secs: i64, force: bool },
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (-60i64..600).prop_map(|offset_secs| Step::Read { offset_secs }),
            ((-60i64..600), any::<bool>())
                .prop_map(|(offset_secs, force)| Step::Update { offset_secs, force }),
        ]
    }

    proptest! {
        #[test]
        fn in_sync_never_returns(steps in proptest::collection::vec(step(), 1..40)) {
            let policy = policy();
            let start = Utc::now();
            let mut stored = record_at(start);
            let mut seen_out_of_sync = false;

            for step in steps {
                match step {
                    Step::Read { offset_secs } => {
                        let evaluated = policy.evaluate(&stored, None, start + Duration::seconds(offset_secs));
                        if seen_out_of_sync {
                            prop_assert!(!evaluated.in_sync);
                        }
                    }
                    Step::Update { offset_secs, force } => {
                        let now = start + Duration::seconds(offset_secs);
                        let observed = policy.evaluate(&stored, None, now);
                        stored = policy.apply_update(&stored, &observed, None, None, now, force).unwrap();
                    }
                }
                if seen_out_of_sync {
                    prop_assert!(!stored.in_sync);
                }
                seen_out_of_sync |= !stored.in_sync;
            }
        }
    }
}
