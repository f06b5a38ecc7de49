use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::election::{LockRecord, ResourceVersion};
use crate::error::StoreError;
use crate::store::LockStore;

#[derive(Debug, Default)]
struct Backend {
    record: Option<LockRecord>,
    revision: u64,
    corruption: Option<String>,
}

impl Backend {
    fn next_version(&mut self) -> ResourceVersion {
        self.revision += 1;
        ResourceVersion::new(self.revision.to_string())
    }
}

/// Per-handle fault switches, so each participant can lose the store independently.
#[derive(Debug, Default)]
struct Faults {
    unavailable: AtomicBool,
    calls: AtomicUsize,
}

/// In-process lock store with the same CAS semantics as a remote backend.
///
/// Clones share both the record and the fault switches. [`MemoryLockStore::client`]
/// returns a handle on the same record with its own switches, which is how tests
/// give every participant its own view of store availability.
#[derive(Debug, Clone, Default)]
pub struct MemoryLockStore {
    backend: Arc<Mutex<Backend>>,
    faults: Arc<Faults>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new handle on the same record with independent fault switches.
    pub fn client(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            faults: Arc::new(Faults::default()),
        }
    }

    /// Makes every call through this handle fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of store calls issued through this handle.
    pub fn calls(&self) -> usize {
        self.faults.calls.load(Ordering::SeqCst)
    }

    /// The stored record, bypassing faults.
    pub async fn record(&self) -> Option<LockRecord> {
        self.backend.lock().await.record.clone()
    }

    /// Stores `record` unconditionally and returns its new version.
    pub async fn seed(&self, record: LockRecord) -> ResourceVersion {
        let mut backend = self.backend.lock().await;
        let version = backend.next_version();
        backend.record = Some(record.with_version(version.clone()));
        version
    }

    /// Makes `fetch` report the record as undecodable until [`repair`](Self::repair).
    pub async fn corrupt(&self, reason: impl Into<String>) {
        self.backend.lock().await.corruption = Some(reason.into());
    }

    pub async fn repair(&self) {
        self.backend.lock().await.corruption = None;
    }

    fn admit(&self) -> Result<(), StoreError> {
        self.faults.calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("memory store marked unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn fetch(&self) -> Result<Option<LockRecord>, StoreError> {
        self.admit()?;
        let backend = self.backend.lock().await;
        if let Some(reason) = &backend.corruption {
            return Err(StoreError::Malformed(reason.clone()));
        }
        Ok(backend.record.clone())
    }

    async fn create(&self, record: &LockRecord) -> Result<ResourceVersion, StoreError> {
        self.admit()?;
        let mut backend = self.backend.lock().await;
        if backend.record.is_some() {
            return Err(StoreError::Conflict);
        }
        let version = backend.next_version();
        backend.record = Some(record.clone().with_version(version.clone()));
        Ok(version)
    }

    async fn update(
        &self,
        record: &LockRecord,
        expected: &ResourceVersion,
    ) -> Result<ResourceVersion, StoreError> {
        self.admit()?;
        let mut backend = self.backend.lock().await;
        match &backend.record {
            None => return Err(StoreError::NotFound),
            Some(current) if &current.version != expected => return Err(StoreError::Conflict),
            Some(_) => {}
        }
        let version = backend.next_version();
        backend.record = Some(record.clone().with_version(version.clone()));
        Ok(version)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
