//! Lifecycle listeners.
//!
//! Listeners run synchronously around the wire call of every mutation: the
//! pre hook before the request is sent, the post hook only after a
//! successful response. A failing pre hook aborts the operation.

use async_trait::async_trait;

use ldq_core::error::DirectoryResult;
use ldq_core::tracking::ModificationOp;
use ldq_core::value::RawValue;

/// Hooks invoked around directory mutations. All hooks default to no-ops.
#[async_trait]
pub trait DirectoryEventListener: Send + Sync {
    /// Before an entry is added.
    async fn before_add(
        &self,
        _dn: &str,
        _attributes: &[(String, Vec<RawValue>)],
    ) -> DirectoryResult<()> {
        Ok(())
    }

    /// After an entry was added.
    async fn after_add(&self, _dn: &str) -> DirectoryResult<()> {
        Ok(())
    }

    /// Before an entry is modified.
    async fn before_update(&self, _dn: &str, _operations: &[ModificationOp]) -> DirectoryResult<()> {
        Ok(())
    }

    /// After an entry was modified.
    async fn after_update(&self, _dn: &str) -> DirectoryResult<()> {
        Ok(())
    }

    /// Before an entry is deleted.
    async fn before_delete(&self, _dn: &str) -> DirectoryResult<()> {
        Ok(())
    }

    /// After an entry was deleted.
    async fn after_delete(&self, _dn: &str) -> DirectoryResult<()> {
        Ok(())
    }
}
