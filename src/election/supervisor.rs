use std::fmt;

use tokio::sync::watch;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::election::coordinator::Coordinator;

/// Pause between a session ending and the next one starting.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Lifecycle of the supervisor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Created, [`Supervisor::run`] not called yet.
    Idle,
    /// Sessions are being started and restarted.
    Running,
    /// Cancellation observed; waiting for the in-flight session to exit.
    Cancelling,
    /// No session is running and none will be started.
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Idle => write!(f, "idle"),
            SupervisorState::Running => write!(f, "running"),
            SupervisorState::Cancelling => write!(f, "cancelling"),
            SupervisorState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Keeps a node participating in the election until cancelled.
///
/// Each session runs in its own task. A session that ends with an error (or
/// panics) is logged and replaced after the settle delay; cancellation is
/// checked before and during that delay so no session starts once shutdown
/// has begun.
pub struct Supervisor {
    coordinator: Coordinator,
    settle_delay: Duration,
    state: watch::Sender<SupervisorState>,
    sessions_started: u64,
}

impl Supervisor {
    pub fn new(coordinator: Coordinator) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        Self {
            coordinator,
            settle_delay: DEFAULT_SETTLE_DELAY,
            state,
            sessions_started: 0,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Watch the supervisor's lifecycle state.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Number of sessions started by [`run`](Self::run) so far.
    pub fn sessions_started(&self) -> u64 {
        self.sessions_started
    }

    fn publish(&self, state: SupervisorState) {
        tracing::debug!(state = %state, "Supervisor state changed");
        self.state.send_replace(state);
    }

    /// Runs sessions until `cancel` fires, then waits for the in-flight session
    /// to finish its shutdown before returning.
    pub async fn run(&mut self, cancel: CancellationToken) {
        let identity = self.coordinator.config().identity.clone();
        self.publish(SupervisorState::Running);

        while !cancel.is_cancelled() {
            self.sessions_started += 1;
            let session_number = self.sessions_started;
            tracing::debug!(identity = %identity, session = session_number, "Starting election session");

            let session = self.coordinator.session();
            let mut handle = tokio::spawn(session.run(cancel.clone()));

            let joined = tokio::select! {
                joined = &mut handle => joined,
                _ = cancel.cancelled() => {
                    self.publish(SupervisorState::Cancelling);
                    handle.await
                }
            };

            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(
                        identity = %identity,
                        session = session_number,
                        error = %e,
                        "Election session ended, restarting"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        identity = %identity,
                        session = session_number,
                        error = %e,
                        "Election session aborted, restarting"
                    );
                }
            }

            if cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settle_delay) => {}
            }
        }

        if self.state() != SupervisorState::Cancelling {
            self.publish(SupervisorState::Cancelling);
        }
        // Watchers must get to observe `Cancelling` before `Stopped`.
        tokio::task::yield_now().await;
        self.publish(SupervisorState::Stopped);
        tracing::info!(identity = %identity, sessions = self.sessions_started, "Election stopped");
    }
}
