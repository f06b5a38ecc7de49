use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::election::ElectionConfig;
use crate::error::{ElectorError, Result};

/// Kind of object used as the election lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockType {
    /// Kubernetes `coordination.k8s.io/v1` Lease.
    #[default]
    Leases,
    /// Kubernetes ConfigMap with the record in an annotation.
    ConfigMaps,
    /// Process-local store; only useful for experiments and tests.
    Memory,
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockType::Leases => write!(f, "leases"),
            LockType::ConfigMaps => write!(f, "configmaps"),
            LockType::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for LockType {
    type Err = ElectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "leases" | "lease" => Ok(LockType::Leases),
            "configmaps" | "configmap" => Ok(LockType::ConfigMaps),
            "memory" => Ok(LockType::Memory),
            "endpoints" => Err(ElectorError::config(
                "endpoints locks are not supported, use leases or configmaps",
            )),
            other => Err(ElectorError::config(format!(
                "unknown lock type '{}' (expected leases, configmaps or memory)",
                other
            ))),
        }
    }
}

/// Labels the elector's own pod with its current role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodLabelConfig {
    pub pod_name: String,
    pub namespace: String,
    pub label_key: String,
}

/// Configuration for one elector node.
#[derive(Debug, Clone)]
pub struct ElectorConfig {
    /// Identity of this participant. Defaults to the hostname when empty.
    pub id: String,
    /// Name of the election, used as the lock object name. Required.
    pub name: String,
    pub namespace: String,
    pub lock_type: LockType,
    /// Kubeconfig file; in-cluster configuration is used when unset.
    pub kubeconfig: Option<PathBuf>,
    /// Address of the status endpoint; disabled when unset.
    pub address: Option<SocketAddr>,
    /// Lease duration. Renew deadline and retry period are derived from it.
    pub ttl: Duration,
    pub release_on_cancel: bool,
    pub pod_label: Option<PodLabelConfig>,
}

impl Default for ElectorConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            namespace: "default".to_string(),
            lock_type: LockType::default(),
            kubeconfig: None,
            address: None,
            ttl: Duration::from_secs(10),
            release_on_cancel: true,
            pod_label: None,
        }
    }
}

impl ElectorConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_address(mut self, address: SocketAddr) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_lock_type(mut self, lock_type: LockType) -> Self {
        self.lock_type = lock_type;
        self
    }

    /// Validates the configuration and fills in defaults.
    ///
    /// Must run before any store or network activity: a missing election name
    /// is fatal, and an empty id is replaced by the hostname.
    pub fn check(&mut self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ElectorError::config(
                "missing required value: election name was not specified (see '--help' for usage)",
            ));
        }
        if self.namespace.trim().is_empty() {
            return Err(ElectorError::config("namespace must not be empty"));
        }
        if self.id.trim().is_empty() {
            let hostname = hostname()?;
            tracing::info!(hostname = %hostname, "No ID specified for elector node, using hostname");
            self.id = hostname;
        }
        self.election_config().map(|_| ())
    }

    /// Election timings derived from the TTL as `(ttl, ttl / 3, ttl / 6)`.
    pub fn election_config(&self) -> Result<ElectionConfig> {
        Ok(ElectionConfig::from_ttl(self.id.clone(), self.ttl)?
            .with_release_on_cancel(self.release_on_cancel))
    }

    /// Logs the effective configuration.
    pub fn log(&self) {
        tracing::info!(
            id = %self.id,
            name = %self.name,
            namespace = %self.namespace,
            lock_type = %self.lock_type,
            kubeconfig = ?self.kubeconfig,
            address = ?self.address,
            ttl_ms = self.ttl.as_millis() as u64,
            release_on_cancel = self.release_on_cancel,
            "Parsed elector configuration"
        );
    }
}

/// The host's name as reported by the environment or the kernel.
pub fn hostname() -> Result<String> {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return Ok(name.trim().to_string());
        }
    }
    let name = std::fs::read_to_string("/proc/sys/kernel/hostname")?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ElectorError::config(
            "no ID specified and the hostname could not be determined",
        ));
    }
    Ok(name.to_string())
}

/// Parses durations such as `10s`, `500ms`, `1.5s`, `2m` or `1h`.
/// A bare number is taken as seconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    let split = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(input.len());
    let (value, unit) = input.split_at(split);

    let value: f64 = value
        .parse()
        .map_err(|_| ElectorError::config(format!("invalid duration '{}'", input)))?;
    let secs = match unit.trim() {
        "ms" => value / 1000.0,
        "" | "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => {
            return Err(ElectorError::config(format!(
                "invalid duration unit '{}' in '{}'",
                other, input
            )))
        }
    };

    Duration::try_from_secs_f64(secs)
        .map_err(|_| ElectorError::config(format!("invalid duration '{}'", input)))
}
