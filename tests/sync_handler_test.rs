use autoscale_core::cluster::HealthCheckPolicy;
use autoscale_core::config::AutoscaleSettings;
use autoscale_core::platform::{CloudPlatform, MemoryPlatform};
use autoscale_core::settings::DEFAULT_PASSWORD;
use autoscale_core::types::{
    HeartbeatResponse, Instance, MasterRecord, RequestInfo, SyncState, VoteState,
};
use autoscale_core::{AutoscaleError, AutoscaleHandler, ExecutionDeadline};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const MASTER_GROUP: &str = "fgt-master-asg";

fn fast_settings() -> AutoscaleSettings {
    AutoscaleSettings {
        election_poll_interval_ms: 20,
        ..AutoscaleSettings::default()
    }
}

fn setup(instances: &[&Instance], settings: AutoscaleSettings) -> (Arc<MemoryPlatform>, AutoscaleHandler) {
    let platform = Arc::new(MemoryPlatform::new(HealthCheckPolicy::from_settings(&settings)));
    for instance in instances {
        platform.add_instance((*instance).clone());
    }
    let handler = AutoscaleHandler::new(platform.clone(), settings);
    (platform, handler)
}

fn deadline() -> ExecutionDeadline {
    ExecutionDeadline::from_budget(Duration::from_secs(30), Duration::from_secs(1)).unwrap()
}

fn master_candidate(id: &str, ip: &str) -> Instance {
    Instance::new(id, MASTER_GROUP, ip)
}

async fn heartbeat(handler: &AutoscaleHandler, instance: &Instance) -> Result<HeartbeatResponse, AutoscaleError> {
    handler
        .handle_sync_callback(&RequestInfo::heartbeat(&instance.instance_id, 30), deadline())
        .await
}

fn done_record(instance: &Instance) -> MasterRecord {
    MasterRecord {
        vote_state: VoteState::Done,
        ..MasterRecord::pending(instance, Utc::now())
    }
}

#[test_log::test(tokio::test)]
async fn test_first_caller_becomes_master() {
    let a = master_candidate("i-a", "10.0.1.10");
    let (platform, handler) = setup(&[&a], fast_settings());

    let response = assert_ok!(heartbeat(&handler, &a).await);
    assert_eq!(response, HeartbeatResponse::MasterIp("10.0.1.10".into()));

    let record = platform.master_record().unwrap();
    assert_eq!(record.instance_id, "i-a");
    assert!(record.is_done());
    assert_eq!(platform.ha_role_holder().as_deref(), Some("i-a"));
    assert_eq!(platform.lifecycle_action("i-a"), Some(true));

    let password = platform.get_setting_item(DEFAULT_PASSWORD).await.unwrap().unwrap();
    assert_eq!(password.value, "i-a");

    // next heartbeat: already master, nothing new to report
    assert_eq!(heartbeat(&handler, &a).await.unwrap(), HeartbeatResponse::Empty);
}

#[tokio::test]
async fn test_slave_waits_for_pending_master() {
    let a = master_candidate("i-a", "10.0.1.10");
    let b = master_candidate("i-b", "10.0.1.11");
    let (platform, handler) = setup(&[&a, &b], fast_settings());
    platform.set_master_record(Some(MasterRecord::pending(
        &a,
        Utc::now() + chrono::Duration::seconds(300),
    )));

    let finalizer = {
        let platform = platform.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            platform.finalize_master_election().await
        })
    };

    let started = std::time::Instant::now();
    let response = heartbeat(&handler, &b).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(finalizer.await.unwrap().unwrap());

    assert_eq!(response, HeartbeatResponse::MasterIp("10.0.1.10".into()));
    assert_eq!(platform.master_record().unwrap().instance_id, "i-a");
    assert_eq!(platform.ha_role_holder(), None);
    assert_eq!(
        platform.stored_health_check("i-b").unwrap().master_ip.as_deref(),
        Some("10.0.1.10")
    );
}

#[tokio::test]
async fn test_no_wait_slave_comes_up_headless() {
    let a = master_candidate("i-a", "10.0.1.10");
    let c = Instance::new("i-c", "fgt-payg-asg", "10.0.2.20");
    let settings = AutoscaleSettings {
        master_election_no_wait: true,
        ..fast_settings()
    };
    let (platform, handler) = setup(&[&a, &c], settings);
    platform.set_master_record(Some(MasterRecord::pending(
        &a,
        Utc::now() + chrono::Duration::seconds(300),
    )));

    let response = heartbeat(&handler, &c).await.unwrap();
    assert_eq!(response, HeartbeatResponse::Empty);
    assert_eq!(platform.stored_health_check("i-c").unwrap().master_ip, None);
    assert!(platform.master_record().unwrap().is_pending());
}

#[tokio::test]
async fn test_unhealthy_master_is_purged_and_replaced() {
    let m = master_candidate("i-m", "10.0.1.5");
    let b = master_candidate("i-b", "10.0.1.11");
    let (platform, handler) = setup(&[&m, &b], fast_settings());
    platform.set_master_record(Some(done_record(&m)));

    let mut stale = HealthCheckPolicy::default().new_record(&m, 30, Some("10.0.1.5"), Utc::now()).unwrap();
    stale.next_heart_beat_time = Utc::now() - chrono::Duration::seconds(600);
    stale.heart_beat_loss_count = 5;
    platform.put_health_check(stale);

    let response = heartbeat(&handler, &b).await.unwrap();
    assert_eq!(response, HeartbeatResponse::MasterIp("10.0.1.11".into()));

    assert!(platform.is_terminated("i-m"));
    assert_eq!(
        platform.stored_health_check("i-m").unwrap().sync_state,
        SyncState::OutOfSync
    );
    let record = platform.master_record().unwrap();
    assert_eq!(record.instance_id, "i-b");
    assert!(record.is_done());
    assert_eq!(platform.ha_role_holder().as_deref(), Some("i-b"));
}

#[tokio::test]
async fn test_out_of_sync_instance_is_frozen() {
    let x = master_candidate("i-x", "10.0.1.30");
    let (platform, handler) = setup(&[&x], fast_settings());

    let mut record = HealthCheckPolicy::default().new_record(&x, 30, None, Utc::now()).unwrap();
    record.sync_state = SyncState::OutOfSync;
    record.in_sync = false;
    platform.put_health_check(record);

    let expired = MasterRecord::pending(&x, Utc::now() - chrono::Duration::seconds(10));
    platform.set_master_record(Some(expired.clone()));

    assert_eq!(heartbeat(&handler, &x).await.unwrap(), HeartbeatResponse::Empty);
    // the election engine was never consulted
    assert_eq!(platform.master_record(), Some(expired));
    assert!(!platform.is_terminated("i-x"));
}

#[tokio::test]
async fn test_repeated_heartbeats_are_idempotent() {
    let a = master_candidate("i-a", "10.0.1.10");
    let c = Instance::new("i-c", "fgt-payg-asg", "10.0.2.20");
    let (platform, handler) = setup(&[&a, &c], fast_settings());

    heartbeat(&handler, &a).await.unwrap();
    assert_eq!(
        heartbeat(&handler, &c).await.unwrap(),
        HeartbeatResponse::MasterIp("10.0.1.10".into())
    );

    for _ in 0..2 {
        assert_eq!(heartbeat(&handler, &c).await.unwrap(), HeartbeatResponse::Empty);
        assert_eq!(heartbeat(&handler, &a).await.unwrap(), HeartbeatResponse::Empty);
    }
    let hc = platform.stored_health_check("i-c").unwrap();
    assert!(hc.in_sync);
    assert_eq!(hc.heart_beat_loss_count, 0);
}

#[tokio::test]
async fn test_unknown_instance_is_unauthorized() {
    let (platform, handler) = setup(&[], fast_settings());
    let ghost = master_candidate("i-ghost", "10.0.9.9");

    let err = assert_err!(heartbeat(&handler, &ghost).await);
    assert!(matches!(err, AutoscaleError::Unauthorized(_)));
    assert!(platform.master_record().is_none());
    assert!(platform.stored_health_check("i-ghost").is_none());
}

#[tokio::test]
async fn test_election_timeout_removes_caller() {
    let x = master_candidate("i-x", "10.0.1.30");
    let b = master_candidate("i-b", "10.0.1.11");
    let (platform, handler) = setup(&[&x, &b], fast_settings());
    let pending = MasterRecord::pending(&x, Utc::now() + chrono::Duration::seconds(300));
    platform.set_master_record(Some(pending.clone()));

    let deadline = ExecutionDeadline::from_budget(Duration::from_millis(200), Duration::ZERO).unwrap();
    let result = handler
        .handle_sync_callback(&RequestInfo::heartbeat("i-b", 30), deadline)
        .await;

    assert!(matches!(result, Err(AutoscaleError::Bootstrap(_))));
    assert!(platform.is_terminated("i-b"));
    // another candidate's vote is left alone
    assert_eq!(platform.master_record(), Some(pending));
}

#[tokio::test]
async fn test_finalization_failure_abandons_launch() {
    let a = master_candidate("i-a", "10.0.1.10");
    let (platform, handler) = setup(&[&a], fast_settings());
    platform.fail_finalization(true);

    let response = heartbeat(&handler, &a).await.unwrap();
    assert_eq!(response, HeartbeatResponse::Empty);
    assert!(platform.master_record().is_none());
    assert_eq!(platform.lifecycle_action("i-a"), Some(false));
    assert_eq!(platform.ha_role_holder(), None);
    assert!(platform.get_setting_item(DEFAULT_PASSWORD).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unhealthy_instance_is_shut_down() {
    let a = master_candidate("i-a", "10.0.1.10");
    let c = Instance::new("i-c", "fgt-payg-asg", "10.0.2.20");
    let (platform, handler) = setup(&[&a, &c], fast_settings());
    heartbeat(&handler, &a).await.unwrap();
    heartbeat(&handler, &c).await.unwrap();

    let mut late = platform.stored_health_check("i-c").unwrap();
    late.next_heart_beat_time = Utc::now() - chrono::Duration::seconds(600);
    late.heart_beat_loss_count = 5;
    platform.put_health_check(late);

    assert_eq!(heartbeat(&handler, &c).await.unwrap(), HeartbeatResponse::Shutdown);
    assert!(!platform.stored_health_check("i-c").unwrap().in_sync);
    assert!(platform.is_terminated("i-c"));
    // the master is untouched
    assert_eq!(platform.master_record().unwrap().instance_id, "i-a");
}

#[tokio::test]
async fn test_master_change_is_pushed_to_slave() {
    let a = master_candidate("i-a", "10.0.1.10");
    let d = master_candidate("i-d", "10.0.1.40");
    let c = Instance::new("i-c", "fgt-payg-asg", "10.0.2.20");
    let (platform, handler) = setup(&[&a, &c, &d], fast_settings());
    heartbeat(&handler, &a).await.unwrap();
    heartbeat(&handler, &c).await.unwrap();

    handler.add_instance_to_monitor(&d, 30, Some("10.0.1.40")).await.unwrap();
    platform.set_master_record(Some(done_record(&d)));

    assert_eq!(
        heartbeat(&handler, &c).await.unwrap(),
        HeartbeatResponse::MasterIp("10.0.1.40".into())
    );
    assert_eq!(heartbeat(&handler, &c).await.unwrap(), HeartbeatResponse::Empty);
}

#[tokio::test]
async fn test_status_message_is_only_logged() {
    let a = master_candidate("i-a", "10.0.1.10");
    let (platform, handler) = setup(&[&a], fast_settings());
    let request = RequestInfo {
        instance_id: "i-a".into(),
        interval: None,
        status: Some("success".into()),
    };

    assert_eq!(handler.handle(&request, deadline()).await.unwrap(), HeartbeatResponse::Empty);
    assert!(platform.master_record().is_none());
}

#[tokio::test]
async fn test_init_requires_saved_settings() {
    let (_, handler) = setup(&[], fast_settings());
    assert!(matches!(handler.init().await, Err(AutoscaleError::Settings(_))));

    let deployment = autoscale_core::settings::deployment_settings(handler.settings());
    assert!(handler.save_settings(&deployment).await);
    assert_ok!(handler.init().await);
}

#[tokio::test]
async fn test_oversized_interval_is_rejected_before_election() {
    let a = master_candidate("i-a", "10.0.1.10");
    let (platform, handler) = setup(&[&a], fast_settings());

    let result = handler
        .handle_sync_callback(&RequestInfo::heartbeat("i-a", 10_000_000_000_000), deadline())
        .await;
    assert!(matches!(result, Err(AutoscaleError::InvalidRequest(_))));
    assert!(platform.master_record().is_none());
    assert!(platform.stored_health_check("i-a").is_none());
    assert_eq!(platform.lifecycle_action("i-a"), None);

    assert_eq!(
        heartbeat(&handler, &a).await.unwrap(),
        HeartbeatResponse::MasterIp("10.0.1.10".into())
    );
    let record = platform.master_record().unwrap();
    assert_eq!(record.vote_state, VoteState::Done);
    assert!(platform.stored_health_check("i-a").is_some());
}

#[tokio::test]
async fn test_oversized_interval_leaves_master_monitored() {
    let a = master_candidate("i-a", "10.0.1.10");
    let (platform, handler) = setup(&[&a], fast_settings());
    heartbeat(&handler, &a).await.unwrap();

    let result = handler
        .handle_sync_callback(&RequestInfo::heartbeat("i-a", u64::MAX), deadline())
        .await;
    assert_err!(result);

    let hc = platform.stored_health_check("i-a").unwrap();
    assert_eq!(hc.heart_beat_interval, 30);
    assert_eq!(hc.sync_state, SyncState::InSync);
    assert!(!platform.is_terminated("i-a"));
}
