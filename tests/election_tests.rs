//! Election tests: contention between participants, leader reporting, and
//! stepping down on shutdown.


use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use lease_elector::election::{Clock, LeadershipEvent, LockRecord, ResourceVersion};
use lease_elector::error::StoreError;
use lease_elector::store::{LockStore, MemoryLockStore};
use test_harness::{leading_after, test_election_config, Participant, TestCluster};

/// Holds every fetched record back for a moment, so contenders that fetch
/// together all write against the same version.
struct SlowFetchStore {
    inner: MemoryLockStore,
    conflicts: Arc<AtomicUsize>,
}

impl SlowFetchStore {
    fn wrap(inner: MemoryLockStore, conflicts: Arc<AtomicUsize>) -> Arc<dyn LockStore> {
        Arc::new(Self { inner, conflicts })
    }

    fn counted<T>(&self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        if matches!(result, Err(StoreError::Conflict)) {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
        }
        result
    }
}

#[async_trait]
impl LockStore for SlowFetchStore {
    async fn fetch(&self) -> Result<Option<LockRecord>, StoreError> {
        let record = self.inner.fetch().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        record
    }

    async fn create(&self, record: &LockRecord) -> Result<ResourceVersion, StoreError> {
        let result = self.inner.create(record).await;
        self.counted(result)
    }

    async fn update(
        &self,
        record: &LockRecord,
        expected: &ResourceVersion,
    ) -> Result<ResourceVersion, StoreError> {
        let result = self.inner.update(record, expected).await;
        self.counted(result)
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

/// Joins two participants that race on every fetch, each with its own conflict counter.
fn join_racing_pair(cluster: &TestCluster) -> [(Participant, Arc<AtomicUsize>); 2] {
    ["a", "b"].map(|id| {
        let conflicts = Arc::new(AtomicUsize::new(0));
        let counter = conflicts.clone();
        let participant = cluster.join_with(
            test_election_config(id),
            Duration::from_secs(1),
            move |store| SlowFetchStore::wrap(store, counter),
        );
        (participant, conflicts)
    })
}

#[tokio::test(start_paused = true)]
async fn contenders_agree_on_a_single_leader() {
    let cluster = TestCluster::new();
    let a = cluster.join(test_election_config("a"));
    let b = cluster.join(test_election_config("b"));
    let c = cluster.join(test_election_config("c"));

    cluster.advance_to(Duration::from_secs(10)).await;

    let leaders: Vec<&str> = [&a, &b, &c]
        .into_iter()
        .filter(|p| p.is_leader())
        .map(|p| p.identity.as_str())
        .collect();
    assert_eq!(leaders.len(), 1, "expected exactly one leader, got {:?}", leaders);

    let record = cluster.backend.record().await.unwrap();
    assert_eq!(record.holder_identity, leaders[0]);
    assert_eq!(record.leader_transitions, 0);

    for p in [&a, &b, &c] {
        assert_eq!(p.reported_leaders(), vec![leaders[0].to_string()]);
    }

    for p in [a, b, c] {
        p.stop().await;
    }
}

#[tokio::test(start_paused = true)]
async fn follower_reports_leader_once() {
    let cluster = TestCluster::new();
    let a = cluster.join(test_election_config("a"));
    cluster.advance_to(Duration::from_millis(100)).await;
    assert!(a.is_leader());

    let b = cluster.join(test_election_config("b"));
    // Dozens of polls, all seeing the same holder.
    cluster.advance_to(Duration::from_secs(30)).await;

    assert!(!b.is_leader());
    assert_eq!(b.reported_leaders(), vec!["a".to_string()]);
    let new_leader = b
        .events()
        .into_iter()
        .find_map(|(_, event)| match event {
            LeadershipEvent::NewLeader(t) => Some(t),
            _ => None,
        })
        .unwrap();
    assert_eq!(new_leader.previous, "");
    assert!(!new_leader.self_is_leader);

    b.stop().await;
    a.stop().await;
}

#[tokio::test(start_paused = true)]
async fn leader_renews_without_changing_acquire_time() {
    let cluster = TestCluster::new();
    let a = cluster.join(test_election_config("a"));
    cluster.advance_to(Duration::from_millis(100)).await;
    let first = cluster.backend.record().await.unwrap();

    cluster.advance_to(Duration::from_secs(5)).await;
    let later = cluster.backend.record().await.unwrap();

    assert_eq!(later.holder_identity, "a");
    assert_eq!(later.acquire_time, first.acquire_time);
    assert_eq!(later.leader_transitions, first.leader_transitions);
    assert!(later.renew_time > first.renew_time);
    assert_ne!(later.version, first.version);

    // Renewals never re-announce leadership.
    let started = a
        .events()
        .into_iter()
        .filter(|(_, e)| *e == LeadershipEvent::StartedLeading)
        .count();
    assert_eq!(started, 1);

    a.stop().await;
}

#[tokio::test(start_paused = true)]
async fn cancelled_leader_releases_lock_for_fast_takeover() {
    let cluster = TestCluster::new();
    let a = cluster.join(test_election_config("a"));
    cluster.advance_to(Duration::from_millis(100)).await;
    let b = cluster.join(test_election_config("b"));
    cluster.advance_to(Duration::from_secs(2)).await;
    assert!(!b.is_leader());

    let stopped = a.stop().await;
    let released_at = cluster.elapsed();
    assert!(!leading_after(&stopped.events));
    assert_eq!(
        stopped.events.last().map(|(_, e)| e.clone()),
        Some(LeadershipEvent::StoppedLeading)
    );

    let record = cluster.backend.record().await.unwrap();
    assert_eq!(record.holder_identity, "");
    assert_eq!(record.lease_duration_seconds, 1);
    assert_eq!(record.leader_transitions, 1);

    // The next poll claims the vacated lock, well before the 3s lease would lapse.
    cluster.advance_to(released_at + Duration::from_secs(1)).await;
    assert!(b.is_leader());
    let record = cluster.backend.record().await.unwrap();
    assert_eq!(record.holder_identity, "b");
    assert_eq!(record.leader_transitions, 2);
    assert_eq!(b.reported_leaders(), vec!["a".to_string(), "".to_string(), "b".to_string()]);

    b.stop().await;
}

#[tokio::test(start_paused = true)]
async fn leader_keeps_lock_when_release_disabled() {
    let cluster = TestCluster::new();
    let a = cluster.join(test_election_config("a").with_release_on_cancel(false));
    cluster.advance_to(Duration::from_millis(100)).await;
    assert!(a.is_leader());

    let stopped = a.stop().await;
    assert!(!leading_after(&stopped.events));

    let record = cluster.backend.record().await.unwrap();
    assert_eq!(record.holder_identity, "a");
    assert_eq!(record.lease_duration_seconds, 3);
}

#[tokio::test(start_paused = true)]
async fn follower_never_writes_a_live_lock() {
    let cluster = TestCluster::new();
    let a = cluster.join(test_election_config("a"));
    cluster.advance_to(Duration::from_millis(100)).await;
    let version = cluster.backend.record().await.unwrap().version;

    let b = cluster.join(test_election_config("b"));
    cluster.advance_to(Duration::from_secs(10)).await;

    let record = cluster.backend.record().await.unwrap();
    assert_eq!(record.holder_identity, "a");
    assert_ne!(record.version, version);
    assert!(b.store.calls() > 1);

    b.stop().await;
    a.stop().await;
}

#[tokio::test(start_paused = true)]
async fn racing_claims_on_an_expired_lease_elect_one_leader() {
    let cluster = TestCluster::new();
    let mut stale = LockRecord::claimed("old", Duration::from_secs(3), cluster.clock.now());
    stale.leader_transitions = 3;
    cluster.backend.seed(stale).await;
    cluster.advance_to(Duration::from_secs(4)).await;

    let [(a, a_conflicts), (b, b_conflicts)] = join_racing_pair(&cluster);
    cluster.advance_to(Duration::from_secs(6)).await;

    let (winner, loser, loser_conflicts) = if a.is_leader() {
        (&a, &b, &b_conflicts)
    } else {
        (&b, &a, &a_conflicts)
    };
    assert!(winner.is_leader());
    assert!(!loser.is_leader());
    assert_eq!(a_conflicts.load(Ordering::SeqCst) + b_conflicts.load(Ordering::SeqCst), 1);
    assert_eq!(loser_conflicts.load(Ordering::SeqCst), 1);

    let started = |p: &Participant| {
        p.events()
            .iter()
            .filter(|(_, e)| matches!(e, LeadershipEvent::StartedLeading))
            .count()
    };
    assert_eq!(started(winner), 1);
    assert_eq!(started(loser), 0);
    assert_eq!(
        loser.reported_leaders(),
        vec!["old".to_string(), winner.identity.clone()]
    );

    let record = cluster.backend.record().await.unwrap();
    assert_eq!(record.holder_identity, winner.identity);
    assert_eq!(record.leader_transitions, 4);

    a.stop().await;
    b.stop().await;
}

#[tokio::test(start_paused = true)]
async fn racing_creates_elect_one_leader() {
    let cluster = TestCluster::new();
    let [(a, a_conflicts), (b, b_conflicts)] = join_racing_pair(&cluster);
    cluster.advance_to(Duration::from_secs(2)).await;

    assert_eq!(a_conflicts.load(Ordering::SeqCst) + b_conflicts.load(Ordering::SeqCst), 1);
    assert!(a.is_leader() ^ b.is_leader());

    let record = cluster.backend.record().await.unwrap();
    let loser = if a.is_leader() { &b } else { &a };
    assert_eq!(loser.reported_leaders(), vec![record.holder_identity.clone()]);
    assert_eq!(record.leader_transitions, 0);

    a.stop().await;
    b.stop().await;
}
