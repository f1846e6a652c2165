//! End-to-end session behavior against the in-memory registry.
//!
//! Every test runs on a paused clock, so debounce windows, backoff and
//! timeouts elapse instantly while keeping their relative timing.
//!
//! Run with: `cargo test --test session_lifecycle`

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};

use registry_sync::client::RegistryCall;
use registry_sync::{
    InMemoryRegistry, Registration, RegistryOp, RegistrySnapshot, RemoteMasterDescriptor, SessionState,
    SyncConfig, SyncSession,
};

const LOCAL: &str = "http://local:11311/";
const REMOTE: &str = "http://robot1:11311/";
const STATUS: &str = "http://robot1:11611/";

// =============================================================================
// Fixtures
// =============================================================================

fn config() -> Arc<SyncConfig> {
    Arc::new(SyncConfig {
        local_master_uri: LOCAL.into(),
        ..Default::default()
    })
}

fn descriptor(timestamp: f64) -> RemoteMasterDescriptor {
    RemoteMasterDescriptor::new("robot1", REMOTE, "/master_discovery", STATUS, timestamp)
}

/// A robot publishing `/scan`, subscribing `/cmd_vel` and serving
/// `/lidar/set_parameters`.
fn robot(with_service: bool) -> RegistrySnapshot {
    let mut s = RegistrySnapshot::new(REMOTE, None);
    s.add_publisher("/scan", "/lidar");
    s.set_topic_type("/scan", "sensor/Scan");
    s.add_subscriber("/cmd_vel", "/base");
    s.set_topic_type("/cmd_vel", "geo/Twist");
    s.set_node("/lidar", Some("http://robot1:40001/"), REMOTE, Some(101));
    s.set_node("/base", Some("http://robot1:40002/"), REMOTE, Some(102));
    if with_service {
        s.add_service_provider("/lidar/set_parameters", "/lidar");
        s.set_service("/lidar/set_parameters", Some("rosrpc://robot1:40003"), REMOTE, Some("Reconfigure"));
    }
    s
}

fn scan() -> Registration {
    Registration::publication("/scan", "sensor/Scan", "/lidar", "http://robot1:40001/")
}

fn cmd_vel() -> Registration {
    Registration::subscription("/cmd_vel", "geo/Twist", "/base", "http://robot1:40002/")
}

fn set_parameters() -> Registration {
    Registration::service("/lidar/set_parameters", "rosrpc://robot1:40003", "/lidar", "http://robot1:40001/")
}

fn apply_batches(registry: &InMemoryRegistry) -> Vec<Vec<RegistryOp>> {
    registry
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            RegistryCall::Apply { ops, .. } => Some(ops),
            _ => None,
        })
        .collect()
}

async fn start(registry: &Arc<InMemoryRegistry>) -> SyncSession {
    SyncSession::spawn(descriptor(1.0), config(), registry.clone(), None)
        .await
        .expect("session should start")
}

/// Long enough for any debounce window and pass to finish.
async fn settle() {
    sleep(Duration::from_secs(15)).await;
}

// =============================================================================
// Reconciliation scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_remote_publication_is_registered_once() {
    let registry = Arc::new(InMemoryRegistry::new(LOCAL));
    let mut remote = RegistrySnapshot::new(REMOTE, None);
    remote.add_publisher("/scan", "/lidar");
    remote.set_topic_type("/scan", "sensor/Scan");
    remote.set_node("/lidar", Some("http://robot1:40001/"), REMOTE, None);
    registry.set_remote(STATUS, remote);

    let session = start(&registry).await;
    settle().await;

    assert_eq!(registry.applied_ops(), vec![RegistryOp::Register(scan())]);
    assert_eq!(registry.ops_named("registerPublisher").len(), 1);
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_vanished_service_is_unregistered_once() {
    let registry = Arc::new(InMemoryRegistry::new(LOCAL));
    registry.set_remote(STATUS, robot(true));
    let session = start(&registry).await;
    settle().await;
    assert!(registry.registered().contains(&set_parameters()));

    registry.set_remote(STATUS, robot(false));
    session.request_update(descriptor(2.0));
    settle().await;

    assert_eq!(
        registry.ops_named("unregisterService"),
        vec![RegistryOp::Unregister(set_parameters())]
    );
    assert!(!registry.registered().contains(&set_parameters()));
    assert_eq!(apply_batches(&registry).last().map(Vec::len), Some(1));
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_remote_issues_no_mutations() {
    let registry = Arc::new(InMemoryRegistry::new(LOCAL));
    let mut remote = robot(true);
    remote.timestamp = 7.0;
    registry.set_remote(STATUS, remote);
    let session = start(&registry).await;
    settle().await;
    assert_eq!(apply_batches(&registry).len(), 1);

    // new stamp, same content
    session.request_update(descriptor(2.0));
    settle().await;

    assert_eq!(registry.fetch_times().len(), 2);
    assert_eq!(apply_batches(&registry).len(), 1);
    assert_eq!(session.info().last_synced_timestamp, 7.0);
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_uri_change_resyncs_endpoint() {
    let registry = Arc::new(InMemoryRegistry::new(LOCAL));
    registry.set_remote(STATUS, robot(false));
    let session = start(&registry).await;
    settle().await;

    // /lidar restarted on a new port
    let mut restarted = robot(false);
    restarted.set_node("/lidar", Some("http://robot1:40901/"), REMOTE, Some(201));
    registry.set_remote(STATUS, restarted);
    session.request_update(descriptor(2.0));
    settle().await;

    let last = apply_batches(&registry).pop().unwrap();
    assert_eq!(
        last,
        vec![
            RegistryOp::Unregister(scan()),
            RegistryOp::Register(Registration::publication(
                "/scan",
                "sensor/Scan",
                "/lidar",
                "http://robot1:40901/"
            )),
        ]
    );
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_self_mirroring() {
    let registry = Arc::new(InMemoryRegistry::new(LOCAL));
    // something we mirrored into robot1 earlier
    let mut remote = RegistrySnapshot::new(REMOTE, None);
    remote.add_publisher("/chatter", "/talker");
    remote.set_topic_type("/chatter", "std/String");
    remote.set_node("/talker", Some("http://local:40000/"), LOCAL, None);
    registry.set_remote(STATUS, remote);

    // and a descriptor pointing back at ourselves
    let mut own = RegistrySnapshot::new(LOCAL, None);
    own.add_publisher("/chatter", "/talker");
    own.set_topic_type("/chatter", "std/String");
    own.set_node("/talker", Some("http://local:40000/"), LOCAL, None);
    registry.set_remote("http://local:11611/", own);

    let session = start(&registry).await;
    let loopback = SyncSession::spawn(
        RemoteMasterDescriptor::new("local", LOCAL, "/master_discovery", "http://local:11611/", 1.0),
        config(),
        registry.clone(),
        None,
    )
    .await
    .unwrap();
    settle().await;

    assert!(apply_batches(&registry).is_empty());
    assert!(registry.registered().is_empty());
    session.stop().await;
    loopback.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_subscription_primes_publisher_update() {
    let registry = Arc::new(InMemoryRegistry::new(LOCAL));
    registry.insert_local(Registration::publication("/cmd_vel", "geo/Twist", "/teleop", "http://local:40000/"));
    registry.set_remote(STATUS, robot(false));

    let session = start(&registry).await;
    settle().await;

    assert!(registry.registered().contains(&cmd_vel()));
    assert_eq!(registry.primed_topics(), vec!["/cmd_vel".to_string()]);
    // the throwaway publication is never recorded as mirrored
    assert_eq!(session.info().publishers.len(), 1);
    assert_eq!(session.info().subscribers.len(), 1);
    session.stop().await;
}

// =============================================================================
// Debounce
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_burst_is_debounced_within_bounds() {
    let registry = Arc::new(InMemoryRegistry::new(LOCAL));
    registry.set_remote(STATUS, robot(true));
    let session = start(&registry).await;
    settle().await;

    let first = Instant::now();
    for i in 0..5 {
        session.request_update(descriptor(2.0 + f64::from(i)));
        sleep(Duration::from_millis(40)).await;
    }
    let last = first + Duration::from_millis(160);
    settle().await;

    let fetches = registry.fetch_times();
    assert_eq!(fetches.len(), 2, "the burst collapses into one pass");
    assert!(fetches[1] >= last + Duration::from_millis(1100));
    assert!(fetches[1] <= first + Duration::from_secs(5));
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_trickle_cannot_postpone_past_ceiling() {
    let registry = Arc::new(InMemoryRegistry::new(LOCAL));
    registry.set_remote(STATUS, robot(true));
    let session = start(&registry).await;
    settle().await;

    let first = Instant::now();
    for i in 0..20 {
        session.request_update(descriptor(2.0 + f64::from(i)));
        sleep(Duration::from_millis(500)).await;
    }
    settle().await;

    let fetches = registry.fetch_times();
    assert!(fetches.len() >= 3);
    assert!(fetches[1] <= first + Duration::from_secs(5));
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_update_during_pass_runs_another_pass() {
    let registry = Arc::new(InMemoryRegistry::new(LOCAL));
    registry.set_remote(STATUS, robot(true));
    registry.set_fetch_delay(Some(Duration::from_secs(2)));
    let session = start(&registry).await;

    sleep(Duration::from_millis(500)).await;
    assert_eq!(session.state(), SessionState::Syncing);
    session.request_update(descriptor(2.0));
    settle().await;

    let fetches = registry.fetch_times();
    assert_eq!(fetches.len(), 2);
    assert!(fetches[1] >= fetches[0] + Duration::from_secs(2));
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_burst_during_pass_is_timed_from_its_first_notification() {
    let registry = Arc::new(InMemoryRegistry::new(LOCAL));
    registry.set_remote(STATUS, robot(true));
    registry.set_fetch_delay(Some(Duration::from_secs(4)));
    let start_at = Instant::now();
    let session = start(&registry).await;

    sleep(Duration::from_millis(500)).await;
    let first = Instant::now();
    for i in 0..16 {
        session.request_update(descriptor(2.0 + f64::from(i)));
        sleep(Duration::from_millis(500)).await;
    }
    settle().await;

    let fetches = registry.fetch_times();
    assert!(fetches.len() >= 2);
    assert!(fetches[1] >= start_at + Duration::from_secs(4), "never interrupts the running pass");
    assert!(fetches[1] <= first + Duration::from_secs(5));
    session.stop().await;
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_rejected_item_is_retried_next_pass() {
    let registry = Arc::new(InMemoryRegistry::new(LOCAL));
    registry.set_remote(STATUS, robot(false));
    registry.reject(scan(), 0, "publisher rejected");
    let session = start(&registry).await;
    settle().await;

    // the rest of the batch went through
    assert_eq!(session.state(), SessionState::Idle);
    assert!(registry.registered().contains(&cmd_vel()));
    assert!(!registry.registered().contains(&scan()));
    assert_eq!(session.info().publishers.len(), 0);

    registry.clear_rejections();
    session.request_update(descriptor(2.0));
    settle().await;

    assert_eq!(apply_batches(&registry).pop().unwrap(), vec![RegistryOp::Register(scan())]);
    assert!(registry.registered().contains(&scan()));
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_batch_failure_backs_off_and_recovers() {
    let registry = Arc::new(InMemoryRegistry::new(LOCAL));
    registry.set_remote(STATUS, robot(false));
    registry.fail_batches(1);
    let session = start(&registry).await;

    let mut state = session.state_receiver();
    state.wait_for(|s| *s == SessionState::BackoffWait).await.unwrap();
    assert!(session.info().is_empty());

    settle().await;
    let batches = apply_batches(&registry);
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0], batches[1]);
    assert_eq!(session.info().len(), 2);
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_notifications_during_backoff_get_their_quiet_period() {
    let registry = Arc::new(InMemoryRegistry::new(LOCAL));
    registry.set_remote(STATUS, robot(false));
    registry.fail_fetches(STATUS, 1);
    let t0 = Instant::now();
    let session = start(&registry).await;

    let mut state = session.state_receiver();
    state.wait_for(|s| *s == SessionState::BackoffWait).await.unwrap();
    sleep_until(t0 + Duration::from_millis(2500)).await;
    session.request_update(descriptor(2.0));
    let notified = Instant::now();
    settle().await;

    let fetches = registry.fetch_times();
    assert_eq!(fetches.len(), 2);
    assert!(fetches[1] >= notified + Duration::from_millis(1100));
    assert!(fetches[1] <= notified + Duration::from_secs(5));
    assert_eq!(session.info().len(), 2);
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_remote_keeps_retrying() {
    let registry = Arc::new(InMemoryRegistry::new(LOCAL));
    registry.set_remote(STATUS, robot(false));
    registry.fail_fetches(STATUS, 3);
    let session = start(&registry).await;
    settle().await;

    let fetches = registry.fetch_times();
    assert_eq!(fetches.len(), 4);
    for pair in fetches.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(3));
    }
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.info().len(), 2);
    session.stop().await;
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_unregisters_everything_mirrored() {
    let registry = Arc::new(InMemoryRegistry::new(LOCAL));
    registry.set_remote(STATUS, robot(true));
    let session = start(&registry).await;
    settle().await;
    assert_eq!(registry.registered().len(), 3);

    session.stop().await;

    let last = apply_batches(&registry).pop().unwrap();
    assert_eq!(last.len(), 3);
    assert!(last.iter().all(|op| !op.is_register()));
    assert!(registry.registered().is_empty());
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_retries_failed_batch() {
    let registry = Arc::new(InMemoryRegistry::new(LOCAL));
    registry.set_remote(STATUS, robot(true));
    let session = start(&registry).await;
    settle().await;

    registry.fail_batches(1);
    session.stop().await;

    assert!(registry.registered().is_empty());
    assert_eq!(apply_batches(&registry).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_pass_lets_it_finish() {
    let registry = Arc::new(InMemoryRegistry::new(LOCAL));
    registry.set_remote(STATUS, robot(false));
    registry.set_fetch_delay(Some(Duration::from_secs(10)));
    let session = start(&registry).await;
    let started = Instant::now();

    sleep(Duration::from_secs(1)).await;
    session.stop().await;

    assert!(Instant::now() >= started + Duration::from_secs(10));
    let batches = apply_batches(&registry);
    assert_eq!(batches.len(), 2);
    assert!(batches[0].iter().all(RegistryOp::is_register));
    assert!(batches[1].iter().all(|op| !op.is_register()));
    assert!(registry.registered().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_handle_still_tears_down() {
    let registry = Arc::new(InMemoryRegistry::new(LOCAL));
    registry.set_remote(STATUS, robot(false));
    let session = start(&registry).await;
    settle().await;
    assert_eq!(registry.registered().len(), 2);

    drop(session);
    settle().await;
    assert!(registry.registered().is_empty());
}
