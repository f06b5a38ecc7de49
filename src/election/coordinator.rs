use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::election::clock::{Clock, SystemClock};
use crate::election::record::{ElectionState, LeaderTransition, LeadershipEvent, LockRecord};
use crate::election::timer::{jittered, JITTER_FACTOR};
use crate::election::ElectionConfig;
use crate::error::{ElectorError, Result, StoreError};
use crate::store::LockStore;

/// Delivers leadership events to the node runtime.
///
/// Remembers the last reported leader so a `NewLeader` event is emitted exactly
/// once per distinct holder, across sessions.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<LeadershipEvent>,
    reported: Arc<Mutex<String>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<LeadershipEvent>) -> Self {
        Self {
            tx,
            reported: Arc::new(Mutex::new(String::new())),
        }
    }

    /// The leader most recently reported, empty if none.
    pub fn reported_leader(&self) -> String {
        self.reported
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Reports `holder` if it differs from the last reported leader.
    pub fn observe_leader(&self, identity: &str, holder: &str) {
        let previous = {
            let mut reported = self
                .reported
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if reported.as_str() == holder {
                return;
            }
            std::mem::replace(&mut *reported, holder.to_string())
        };

        if holder.is_empty() {
            tracing::info!(previous = %previous, "Leadership is vacant");
        } else if holder != identity {
            tracing::info!(leader = %holder, previous = %previous, "New leader elected");
        }

        self.emit(LeadershipEvent::NewLeader(LeaderTransition {
            previous,
            leader: holder.to_string(),
            self_is_leader: holder == identity,
        }));
    }

    pub fn emit(&self, event: LeadershipEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Leadership event receiver dropped");
        }
    }
}

/// Shared, immutable parts of the election: configuration, store, clock and
/// event sink. Each run of the election loop gets its own [`ElectionSession`].
#[derive(Clone)]
pub struct Coordinator {
    config: Arc<ElectionConfig>,
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    events: EventSink,
}

impl Coordinator {
    pub fn new(config: ElectionConfig, store: Arc<dyn LockStore>, events: EventSink) -> Self {
        Self {
            config: Arc::new(config),
            store,
            clock: Arc::new(SystemClock),
            events,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// Starts a fresh session in the `Idle` state.
    pub fn session(&self) -> ElectionSession {
        ElectionSession {
            coordinator: self.clone(),
            state: ElectionState::Idle,
            observed: None,
            last_renew: Instant::now(),
        }
    }
}

/// Why a session stopped stepping.
#[derive(Debug)]
enum Halt {
    Cancelled,
    Fatal(ElectorError),
}

type Step = std::result::Result<ElectionState, Halt>;

/// One continuous run of the election loop.
///
/// Owns the per-session state: the current [`ElectionState`], the last record
/// seen or written (with its version), and when the lease was last renewed.
pub struct ElectionSession {
    coordinator: Coordinator,
    state: ElectionState,
    observed: Option<LockRecord>,
    last_renew: Instant,
}

impl ElectionSession {
    /// Runs the election until `cancel` fires or a fatal error occurs.
    ///
    /// Cancellation returns `Ok(())`; a leader first attempts to release the
    /// lock if configured to. Losing leadership never ends the session.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        tracing::debug!(
            identity = %self.coordinator.config.identity,
            lock = %self.coordinator.store.describe(),
            "Election session started"
        );

        let halt = self.drive(&cancel).await;
        let was_leading = self.state.is_leading();

        let release = self.coordinator.config.release_on_cancel;
        if was_leading && release && matches!(halt, Halt::Cancelled) {
            self.release().await;
        }
        if was_leading {
            self.coordinator.events.emit(LeadershipEvent::StoppedLeading);
        }
        self.state = ElectionState::Idle;

        match halt {
            Halt::Cancelled => Ok(()),
            Halt::Fatal(e) => Err(e),
        }
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Halt {
        loop {
            if cancel.is_cancelled() {
                return Halt::Cancelled;
            }

            let step = match self.state {
                ElectionState::Idle | ElectionState::Acquiring => self.try_acquire(cancel).await,
                ElectionState::Leading => {
                    let wake = Instant::now() + self.coordinator.config.retry_period;
                    self.pause_until(cancel, wake)
                        .await
                        .map(|()| ElectionState::Renewing)
                }
                ElectionState::Renewing => self.try_renew(cancel).await,
                ElectionState::Observing => {
                    let wait = jittered(self.coordinator.config.retry_period, JITTER_FACTOR);
                    self.pause_until(cancel, Instant::now() + wait)
                        .await
                        .map(|()| ElectionState::Idle)
                }
                ElectionState::Released => Ok(ElectionState::Idle),
            };

            match step {
                Ok(next) => self.transition(next),
                Err(halt) => return halt,
            }
        }
    }

    fn transition(&mut self, next: ElectionState) {
        let previous = self.state;
        if previous == next {
            return;
        }
        tracing::trace!(from = %previous, to = %next, "Election state changed");

        if next == ElectionState::Leading && !previous.is_leading() {
            tracing::info!(identity = %self.coordinator.config.identity, "Started leading");
            self.coordinator.events.emit(LeadershipEvent::StartedLeading);
        }
        if next == ElectionState::Released {
            tracing::info!(identity = %self.coordinator.config.identity, "Stepping down as leader");
            self.coordinator.events.emit(LeadershipEvent::StoppedLeading);
        }
        self.state = next;
    }

    /// One acquisition cycle: fetch the record and claim it if it is free,
    /// expired, or already ours.
    async fn try_acquire(&mut self, cancel: &CancellationToken) -> Step {
        self.transition(ElectionState::Acquiring);
        let config = self.coordinator.config.clone();
        let store = self.coordinator.store.clone();
        let call_deadline = Instant::now() + config.renew_deadline;

        let fetched = match self.guarded(cancel, call_deadline, store.fetch()).await? {
            Ok(fetched) => fetched,
            Err(e) => return self.contention_outcome("fetch", e),
        };

        let now = self.coordinator.clock.now();
        let Some(current) = fetched else {
            let record = LockRecord::claimed(&config.identity, config.lease_duration, now);
            return match self.guarded(cancel, call_deadline, store.create(&record)).await? {
                Ok(version) => {
                    self.won(record.with_version(version));
                    Ok(ElectionState::Leading)
                }
                Err(e) => self.contention_outcome("create", e),
            };
        };

        current
            .validate()
            .map_err(|reason| Halt::Fatal(ElectorError::MalformedRecord(reason)))?;
        self.coordinator
            .events
            .observe_leader(&config.identity, &current.holder_identity);

        if current.is_held_by_other(&config.identity, now) {
            tracing::trace!(leader = %current.holder_identity, "Lease is held by another participant");
            self.observed = Some(current);
            return Ok(ElectionState::Observing);
        }

        let record = current.claim(&config.identity, config.lease_duration, now);
        match self
            .guarded(cancel, call_deadline, store.update(&record, &current.version))
            .await?
        {
            Ok(version) => {
                self.won(record.with_version(version));
                Ok(ElectionState::Leading)
            }
            Err(e) => {
                self.observed = Some(current);
                self.contention_outcome("update", e)
            }
        }
    }

    /// One renewal attempt, bounded by the renew deadline.
    async fn try_renew(&mut self, cancel: &CancellationToken) -> Step {
        let config = self.coordinator.config.clone();
        let deadline = self.last_renew + config.renew_deadline;

        let Some(observed) = self.observed.clone() else {
            return Ok(ElectionState::Released);
        };
        if Instant::now() >= deadline {
            tracing::warn!(
                identity = %config.identity,
                renew_deadline_ms = config.renew_deadline.as_millis() as u64,
                "Failed to renew lease within the renew deadline"
            );
            return Ok(ElectionState::Released);
        }

        let store = self.coordinator.store.clone();
        let record = observed.renewed(self.coordinator.clock.now());
        match self
            .guarded(cancel, deadline, store.update(&record, &observed.version))
            .await?
        {
            Ok(version) => {
                self.observed = Some(record.with_version(version));
                self.last_renew = Instant::now();
                Ok(ElectionState::Leading)
            }
            Err(StoreError::Conflict) | Err(StoreError::NotFound) => {
                tracing::info!(identity = %config.identity, "Lease was taken over by another participant");
                Ok(ElectionState::Released)
            }
            Err(StoreError::Malformed(reason)) => {
                Err(Halt::Fatal(ElectorError::MalformedRecord(reason)))
            }
            Err(StoreError::Unavailable(reason)) => {
                tracing::warn!(error = %reason, "Lease renewal failed, retrying");
                let wake = (Instant::now() + config.retry_period).min(deadline);
                self.pause_until(cancel, wake).await?;
                Ok(ElectionState::Renewing)
            }
        }
    }

    /// Best-effort write clearing the holder, issued once on cancellation.
    async fn release(&mut self) {
        let config = self.coordinator.config.clone();
        let Some(observed) = self.observed.take() else {
            return;
        };
        if !observed.is_held_by(&config.identity) {
            return;
        }

        let record = observed.released(self.coordinator.clock.now());
        let attempt = tokio::time::timeout(
            config.renew_deadline,
            self.coordinator.store.update(&record, &observed.version),
        )
        .await;
        match attempt {
            Ok(Ok(_)) => tracing::info!(identity = %config.identity, "Released leadership lock"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to release leadership lock"),
            Err(_) => tracing::warn!("Timed out releasing leadership lock"),
        }
    }

    fn won(&mut self, record: LockRecord) {
        let identity = self.coordinator.config.identity.clone();
        self.coordinator.events.observe_leader(&identity, &identity);
        self.observed = Some(record);
        self.last_renew = Instant::now();
    }

    /// Non-fatal store outcomes during acquisition all lead to observing.
    fn contention_outcome(&self, op: &'static str, err: StoreError) -> Step {
        match err {
            StoreError::Conflict | StoreError::NotFound => {
                tracing::debug!(op, "Lost the race for the lock");
                Ok(ElectionState::Observing)
            }
            StoreError::Unavailable(reason) => {
                tracing::warn!(op, error = %reason, "Lock store unavailable");
                Ok(ElectionState::Observing)
            }
            StoreError::Malformed(reason) => {
                Err(Halt::Fatal(ElectorError::MalformedRecord(reason)))
            }
        }
    }

    /// Runs a store call unless cancelled first; a call still pending at
    /// `deadline` counts as the store being unavailable.
    async fn guarded<T>(
        &self,
        cancel: &CancellationToken,
        deadline: Instant,
        call: impl Future<Output = std::result::Result<T, StoreError>>,
    ) -> std::result::Result<std::result::Result<T, StoreError>, Halt> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Halt::Cancelled),
            result = tokio::time::timeout_at(deadline, call) => Ok(result.unwrap_or_else(|_| {
                Err(StoreError::unavailable("lock store call timed out"))
            })),
        }
    }

    async fn pause_until(
        &self,
        cancel: &CancellationToken,
        wake: Instant,
    ) -> std::result::Result<(), Halt> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Halt::Cancelled),
            _ = tokio::time::sleep_until(wake) => Ok(()),
        }
    }
}
