pub mod kubernetes;
pub mod memory;

use async_trait::async_trait;

use crate::election::{LockRecord, ResourceVersion};
use crate::error::StoreError;

pub use kubernetes::KubeLockStore;
pub use memory::MemoryLockStore;

/// Access to the single shared leadership record.
///
/// Implementations hold no election logic. Every write is conditional: `create`
/// only succeeds if no record exists and `update` only if the stored version
/// still equals `expected`. Any call may fail with [`StoreError::Unavailable`],
/// which callers retry.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Current record, or `None` if it has never been created.
    async fn fetch(&self) -> Result<Option<LockRecord>, StoreError>;

    /// Creates the record. Fails with `Conflict` if one already exists.
    async fn create(&self, record: &LockRecord) -> Result<ResourceVersion, StoreError>;

    /// Replaces the record if its version is still `expected`.
    async fn update(
        &self,
        record: &LockRecord,
        expected: &ResourceVersion,
    ) -> Result<ResourceVersion, StoreError>;

    /// Where the record lives, for logs.
    fn describe(&self) -> String;
}
