pub mod clock;
pub mod coordinator;
pub mod record;
pub mod supervisor;
pub mod timer;

use std::time::Duration;

use crate::error::{ElectorError, Result};

pub use clock::{Clock, MonotonicClock, SystemClock};
pub use coordinator::{Coordinator, ElectionSession, EventSink};
pub use record::{
    ElectionState, LeaderTransition, LeadershipEvent, LockRecord, ResourceVersion,
};
pub use supervisor::{Supervisor, SupervisorState};

/// Timings and identity for one election participant.
///
/// The three durations trade failover speed against store load:
/// `retry_period < renew_deadline < lease_duration`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionConfig {
    pub identity: String,
    /// How long a claim stays valid without renewal.
    pub lease_duration: Duration,
    /// How long a leader may go without a successful renewal before stepping down.
    pub renew_deadline: Duration,
    /// Cadence of renewals and acquisition attempts.
    pub retry_period: Duration,
    /// Clear the holder on shutdown so another participant can take over immediately.
    pub release_on_cancel: bool,
}

impl ElectionConfig {
    pub fn new(
        identity: impl Into<String>,
        lease_duration: Duration,
        renew_deadline: Duration,
        retry_period: Duration,
    ) -> Result<Self> {
        let config = Self {
            identity: identity.into(),
            lease_duration,
            renew_deadline,
            retry_period,
            release_on_cancel: true,
        };
        config.validate()?;
        Ok(config)
    }

    /// Derives the renew deadline and retry period from a single TTL as
    /// `(ttl, ttl / 3, ttl / 6)`.
    pub fn from_ttl(identity: impl Into<String>, ttl: Duration) -> Result<Self> {
        Self::new(identity, ttl, ttl / 3, ttl / 6)
    }

    pub fn with_release_on_cancel(mut self, release: bool) -> Self {
        self.release_on_cancel = release;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.identity.is_empty() {
            return Err(ElectorError::config("participant identity must not be empty"));
        }
        if self.lease_duration < Duration::from_secs(1) {
            return Err(ElectorError::config(format!(
                "lease duration must be at least 1s, got {:?}",
                self.lease_duration
            )));
        }
        if self.retry_period.is_zero() {
            return Err(ElectorError::config("retry period must be greater than zero"));
        }
        if self.renew_deadline >= self.lease_duration {
            return Err(ElectorError::config(format!(
                "renew deadline ({:?}) must be shorter than the lease duration ({:?})",
                self.renew_deadline, self.lease_duration
            )));
        }
        if self.retry_period >= self.renew_deadline {
            return Err(ElectorError::config(format!(
                "retry period ({:?}) must be shorter than the renew deadline ({:?})",
                self.retry_period, self.renew_deadline
            )));
        }
        Ok(())
    }
}
