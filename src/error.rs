use thiserror::Error;

#[derive(Error, Debug)]
pub enum ElectorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed lock record: {0}")]
    MalformedRecord(String),

    #[error("Leadership hook error: {0}")]
    Hook(String),

    #[error("Kubernetes client error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ElectorError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Outcome of a lock store call that did not produce a record or version.
///
/// `Conflict` and `NotFound` are the expected results of contention and drive
/// election state; only `Unavailable` and `Malformed` indicate a fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("lock record was written by another participant")]
    Conflict,

    #[error("lock record does not exist")]
    NotFound,

    #[error("lock store unavailable: {0}")]
    Unavailable(String),

    #[error("lock record cannot be decoded: {0}")]
    Malformed(String),
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Whether the call may simply be retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, ElectorError>;
