//! Node runtime tests: configuration checks, status tracking and hooks.


use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use lease_elector::config::ElectorConfig;
use lease_elector::election::{Clock, ElectionConfig, LockRecord, MonotonicClock};
use lease_elector::error::{ElectorError, Result};
use lease_elector::hooks::{HookEvent, LeadershipHook};
use lease_elector::node::Node;
use lease_elector::store::MemoryLockStore;
use test_harness::wait_for;

#[derive(Default, Clone)]
struct RecordingHook {
    calls: Arc<Mutex<Vec<(HookEvent, String)>>>,
}

impl RecordingHook {
    fn calls(&self) -> Vec<(HookEvent, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LeadershipHook for RecordingHook {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn on_event(&self, event: HookEvent, identity: &str) -> Result<()> {
        self.calls.lock().unwrap().push((event, identity.to_string()));
        Ok(())
    }
}

struct FailingHook;

#[async_trait]
impl LeadershipHook for FailingHook {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn on_event(&self, _event: HookEvent, _identity: &str) -> Result<()> {
        Err(ElectorError::Hook("always fails".to_string()))
    }
}

fn node_config(id: &str) -> ElectorConfig {
    ElectorConfig::new("example").with_id(id).with_ttl(Duration::from_secs(3))
}

#[tokio::test]
async fn missing_election_name_fails_before_any_store_call() {
    let store = MemoryLockStore::new();
    let config = ElectorConfig::default().with_id("n1");

    let err = Node::new(config, Arc::new(store.clone())).err().unwrap();

    assert!(matches!(err, ElectorError::Config(_)));
    assert!(err.to_string().contains("election name"));
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn invalid_ttl_is_rejected() {
    let store = MemoryLockStore::new();
    let config = node_config("n1").with_ttl(Duration::from_millis(10));
    assert!(Node::new(config, Arc::new(store.clone())).is_err());
    assert_eq!(store.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn sole_node_becomes_leader_and_steps_down_on_cancel() {
    let store = MemoryLockStore::new();
    let hook = RecordingHook::default();
    let node = Node::new(node_config("n1"), Arc::new(store.clone()))
        .unwrap()
        .with_clock(Arc::new(MonotonicClock::new()))
        .with_hook(Arc::new(FailingHook))
        .with_hook(Arc::new(hook.clone()));
    let status = node.status_handle();
    assert_eq!(status.snapshot().await.leader, "");

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(node.run(cancel.clone()));

    assert!(wait_for(|| async { status.is_leader().await }, Duration::from_secs(2)).await);
    let snapshot = status.snapshot().await;
    assert_eq!(snapshot.node, "n1");
    assert_eq!(snapshot.leader, "n1");

    cancel.cancel();
    handle.await.unwrap().unwrap();

    assert!(!status.is_leader().await);
    assert_eq!(
        hook.calls(),
        vec![
            (HookEvent::StartedLeading, "n1".to_string()),
            (HookEvent::StoppedLeading, "n1".to_string()),
        ]
    );
    assert!(store.record().await.unwrap().is_unclaimed());
}

#[tokio::test(start_paused = true)]
async fn follower_node_reports_current_leader() {
    let clock = MonotonicClock::new();
    let store = MemoryLockStore::new();
    store
        .seed(LockRecord::claimed("n2", Duration::from_secs(60), clock.now()))
        .await;

    let hook = RecordingHook::default();
    let node = Node::new(node_config("n1"), Arc::new(store.clone()))
        .unwrap()
        .with_clock(Arc::new(clock))
        .with_hook(Arc::new(hook.clone()));
    let status = node.status_handle();

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(node.run(cancel.clone()));

    assert!(
        wait_for(
            || async { status.snapshot().await.leader == "n2" },
            Duration::from_secs(2)
        )
        .await
    );
    tokio::time::sleep(Duration::from_secs(10)).await;

    let snapshot = status.snapshot().await;
    assert_eq!(snapshot.leader, "n2");
    assert!(!snapshot.is_leader);
    assert_eq!(hook.calls(), vec![(HookEvent::NewLeader, "n2".to_string())]);

    cancel.cancel();
    handle.await.unwrap().unwrap();

    // A follower never touches the record on the way out.
    let record = store.record().await.unwrap();
    assert_eq!(record.holder_identity, "n2");
    assert_eq!(hook.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn node_restarts_election_after_malformed_record() {
    let store = MemoryLockStore::new();
    store.corrupt("garbage").await;

    let node = Node::new(node_config("n1"), Arc::new(store.clone()))
        .unwrap()
        .with_clock(Arc::new(MonotonicClock::new()))
        .with_settle_delay(Duration::from_millis(200));
    let status = node.status_handle();

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(node.run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!status.is_leader().await);
    assert!(store.calls() >= 3);

    store.repair().await;
    assert!(wait_for(|| async { status.is_leader().await }, Duration::from_secs(1)).await);

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn explicit_election_timings_replace_ttl_derived_ones() {
    let store = MemoryLockStore::new();
    let election = ElectionConfig::new(
        "n1",
        Duration::from_secs(20),
        Duration::from_secs(10),
        Duration::from_secs(4),
    )
    .unwrap();
    let node = Node::new(node_config("n1"), Arc::new(store.clone()))
        .unwrap()
        .with_election(election)
        .unwrap()
        .with_clock(Arc::new(MonotonicClock::new()));
    let status = node.status_handle();

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(node.run(cancel.clone()));
    assert!(wait_for(|| async { status.is_leader().await }, Duration::from_secs(1)).await);
    assert_eq!(store.record().await.unwrap().lease_duration_seconds, 20);

    // Create at t=0, then one renewal every 4s.
    let calls_after_claim = store.calls();
    tokio::time::sleep(Duration::from_millis(8500)).await;
    assert_eq!(store.calls(), calls_after_claim + 2);

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn invalid_explicit_election_timings_are_rejected() {
    let store = MemoryLockStore::new();
    let node = Node::new(node_config("n1"), Arc::new(store.clone())).unwrap();
    let election = ElectionConfig {
        identity: "n1".to_string(),
        lease_duration: Duration::from_secs(5),
        renew_deadline: Duration::from_secs(6),
        retry_period: Duration::from_secs(1),
        release_on_cancel: true,
    };
    assert!(node.with_election(election).is_err());
    assert_eq!(store.calls(), 0);
}
