use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Opaque optimistic-concurrency token handed out by the lock store.
///
/// A write carrying a version only succeeds if the stored record still has that
/// exact version. An empty version means the record was never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResourceVersion(String);

impl ResourceVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The shared leadership record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    /// Current or most recent leader. Empty means unclaimed.
    pub holder_identity: String,
    pub lease_duration_seconds: u32,
    pub acquire_time: DateTime<Utc>,
    pub renew_time: DateTime<Utc>,
    /// Incremented every time `holder_identity` changes.
    pub leader_transitions: u32,
    pub version: ResourceVersion,
}

impl LockRecord {
    /// A fresh record claimed by `identity`, as written when no record exists yet.
    pub fn claimed(identity: &str, lease_duration: Duration, now: DateTime<Utc>) -> Self {
        Self {
            holder_identity: identity.to_string(),
            lease_duration_seconds: lease_seconds(lease_duration),
            acquire_time: now,
            renew_time: now,
            leader_transitions: 0,
            version: ResourceVersion::default(),
        }
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.lease_duration_seconds))
    }

    pub fn is_unclaimed(&self) -> bool {
        self.holder_identity.is_empty()
    }

    pub fn is_held_by(&self, identity: &str) -> bool {
        !self.is_unclaimed() && self.holder_identity == identity
    }

    /// A lease is expired once `now - renew_time >= lease_duration`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let lease = chrono::Duration::seconds(i64::from(self.lease_duration_seconds));
        now.signed_duration_since(self.renew_time) >= lease
    }

    /// Whether another participant holds a live lease on this record.
    pub fn is_held_by_other(&self, identity: &str, now: DateTime<Utc>) -> bool {
        !self.is_unclaimed() && !self.is_held_by(identity) && !self.is_expired(now)
    }

    /// The record `identity` writes to take (or keep) the lease.
    ///
    /// When the holder changes the acquire time resets and the transition
    /// counter advances; a participant re-claiming its own record keeps both.
    pub fn claim(&self, identity: &str, lease_duration: Duration, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        if !self.is_held_by(identity) {
            next.holder_identity = identity.to_string();
            next.acquire_time = now;
            next.leader_transitions = self.leader_transitions.saturating_add(1);
        }
        next.lease_duration_seconds = lease_seconds(lease_duration);
        next.renew_time = now;
        next
    }

    /// The record a holder writes to extend its lease.
    pub fn renewed(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.renew_time = now;
        next
    }

    /// The record a holder writes when giving up the lease on shutdown.
    pub fn released(&self, now: DateTime<Utc>) -> Self {
        Self {
            holder_identity: String::new(),
            lease_duration_seconds: 1,
            acquire_time: now,
            renew_time: now,
            leader_transitions: self.leader_transitions.saturating_add(1),
            version: self.version.clone(),
        }
    }

    pub fn with_version(mut self, version: ResourceVersion) -> Self {
        self.version = version;
        self
    }

    /// Checks the invariants the coordinator relies on.
    pub fn validate(&self) -> Result<(), String> {
        if !self.is_unclaimed() && self.lease_duration_seconds == 0 {
            return Err(format!(
                "holder {} has a zero lease duration",
                self.holder_identity
            ));
        }
        if self.renew_time < self.acquire_time {
            return Err(format!(
                "renew time {} precedes acquire time {}",
                self.renew_time, self.acquire_time
            ));
        }
        Ok(())
    }
}

/// Whole seconds covering `lease`, never less than one.
pub fn lease_seconds(lease: Duration) -> u32 {
    let millis = lease.as_millis().max(1);
    let secs = millis.div_ceil(1000);
    u32::try_from(secs).unwrap_or(u32::MAX)
}

/// Election state of one participant within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    Idle,
    Acquiring,
    Leading,
    Renewing,
    Released,
    Observing,
}

impl ElectionState {
    /// Leading or in the middle of a renewal; the participant acts as leader.
    pub fn is_leading(&self) -> bool {
        matches!(self, ElectionState::Leading | ElectionState::Renewing)
    }
}

impl fmt::Display for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElectionState::Idle => write!(f, "idle"),
            ElectionState::Acquiring => write!(f, "acquiring"),
            ElectionState::Leading => write!(f, "leading"),
            ElectionState::Renewing => write!(f, "renewing"),
            ElectionState::Released => write!(f, "released"),
            ElectionState::Observing => write!(f, "observing"),
        }
    }
}

/// An observed change of the recorded leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderTransition {
    pub previous: String,
    pub leader: String,
    pub self_is_leader: bool,
}

/// Leadership events emitted by the coordinator, in observation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadershipEvent {
    StartedLeading,
    StoppedLeading,
    NewLeader(LeaderTransition),
}
