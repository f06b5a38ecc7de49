use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::ElectorConfig;
use crate::election::supervisor::DEFAULT_SETTLE_DELAY;
use crate::election::{
    Clock, Coordinator, ElectionConfig, EventSink, LeadershipEvent, Supervisor, SystemClock,
};
use crate::error::Result;
use crate::hooks::{HookEvent, LeadershipHook};
use crate::status::run_status_server;
use crate::store::LockStore;

/// What this node currently knows about the election.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub node: String,
    /// Most recently observed leader, empty if none has been seen.
    pub leader: String,
    pub is_leader: bool,
    pub observed_at: DateTime<Utc>,
}

impl NodeStatus {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            leader: String::new(),
            is_leader: false,
            observed_at: Utc::now(),
        }
    }

    /// The status after applying one leadership event.
    pub fn apply(&self, event: &LeadershipEvent, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        match event {
            LeadershipEvent::StartedLeading => next.is_leader = true,
            LeadershipEvent::StoppedLeading => next.is_leader = false,
            LeadershipEvent::NewLeader(t) => {
                next.leader = t.leader.clone();
                next.is_leader = t.self_is_leader;
            }
        }
        next.observed_at = at;
        next
    }
}

/// Shared NodeStatus snapshot.
///
/// Writers swap in a whole new snapshot, so readers never see a partially
/// applied update.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    inner: Arc<RwLock<Arc<NodeStatus>>>,
}

impl StatusHandle {
    pub fn new(node: impl Into<String>) -> Self {
        Self::from_status(NodeStatus::new(node))
    }

    pub fn from_status(status: NodeStatus) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(status))),
        }
    }

    pub async fn snapshot(&self) -> Arc<NodeStatus> {
        self.inner.read().await.clone()
    }

    pub async fn replace(&self, status: NodeStatus) {
        *self.inner.write().await = Arc::new(status);
    }

    pub async fn apply(&self, event: &LeadershipEvent) {
        let mut guard = self.inner.write().await;
        let next = guard.apply(event, Utc::now());
        *guard = Arc::new(next);
    }

    pub async fn is_leader(&self) -> bool {
        self.snapshot().await.is_leader
    }
}

/// An elector node: one election participant plus its status surface and hooks.
pub struct Node {
    config: ElectorConfig,
    election: ElectionConfig,
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    hooks: Vec<Arc<dyn LeadershipHook>>,
    status: StatusHandle,
    settle_delay: Duration,
}

impl Node {
    /// Validates `config` and prepares the node. No store call is made here.
    pub fn new(mut config: ElectorConfig, store: Arc<dyn LockStore>) -> Result<Self> {
        config.check()?;
        let election = config.election_config()?;
        let status = StatusHandle::new(config.id.clone());

        Ok(Self {
            config,
            election,
            store,
            clock: Arc::new(SystemClock),
            hooks: Vec::new(),
            status,
            settle_delay: DEFAULT_SETTLE_DELAY,
        })
    }

    /// Replaces the TTL-derived timings.
    pub fn with_election(mut self, election: ElectionConfig) -> Result<Self> {
        election.validate()?;
        self.election = election;
        Ok(self)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn LeadershipHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn config(&self) -> &ElectorConfig {
        &self.config
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    pub async fn status(&self) -> Arc<NodeStatus> {
        self.status.snapshot().await
    }

    pub async fn is_leader(&self) -> bool {
        self.status.is_leader().await
    }

    /// Run the node until `cancel` fires.
    ///
    /// Starts the status server (when an address is configured) and the event
    /// pump, then drives the election supervisor in the foreground. Returns once
    /// the supervisor has stopped, any held lock was released, and every
    /// leadership event has been applied.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let identity = self.config.id.clone();
        tracing::info!(
            identity = %identity,
            lock = %self.store.describe(),
            lease_ms = self.election.lease_duration.as_millis() as u64,
            renew_deadline_ms = self.election.renew_deadline.as_millis() as u64,
            retry_period_ms = self.election.retry_period.as_millis() as u64,
            "Joining election"
        );

        let status_server = match self.config.address {
            Some(addr) => {
                let status = self.status.clone();
                let token = cancel.clone();
                Some(tokio::spawn(async move {
                    run_status_server(addr, status, token).await;
                }))
            }
            None => {
                tracing::info!("Status server will not be started: no address given");
                None
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(apply_events(
            rx,
            self.status.clone(),
            self.hooks.clone(),
            identity.clone(),
        ));

        let coordinator =
            Coordinator::new(self.election.clone(), self.store.clone(), EventSink::new(tx))
                .with_clock(self.clock.clone());
        let mut supervisor = Supervisor::new(coordinator).with_settle_delay(self.settle_delay);
        supervisor.run(cancel.clone()).await;
        drop(supervisor);

        if let Err(e) = pump.await {
            tracing::error!(error = %e, "Leadership event pump failed");
        }
        if let Some(server) = status_server {
            if let Err(e) = server.await {
                tracing::error!(error = %e, "Status server task failed");
            }
        }

        tracing::info!(identity = %identity, "Done");
        Ok(())
    }
}

/// Applies leadership events in order: status first, then hooks.
async fn apply_events(
    mut rx: mpsc::UnboundedReceiver<LeadershipEvent>,
    status: StatusHandle,
    hooks: Vec<Arc<dyn LeadershipHook>>,
    identity: String,
) {
    while let Some(event) = rx.recv().await {
        status.apply(&event).await;

        let Some((kind, subject)) = HookEvent::from_leadership(&event, &identity) else {
            continue;
        };
        for hook in &hooks {
            if let Err(e) = hook.on_event(kind, &subject).await {
                tracing::warn!(hook = hook.name(), event = %kind, error = %e, "Leadership hook failed");
            }
        }
    }
}
