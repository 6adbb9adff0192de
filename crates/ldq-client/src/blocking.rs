//! Blocking wrapper over the async context.
//!
//! The async API is the real implementation; this wrapper owns a
//! current-thread runtime and blocks on it. Do not use it from inside an
//! async runtime.

use ldq_core::attributes::DirectoryAttributes;
use ldq_core::error::{DirectoryError, DirectoryResult};
use ldq_core::registry::DirectoryEntity;
use ldq_core::tracking::Tracked;
use ldq_query::options::DirectoryControl;

use crate::config::DirectoryConfig;
use crate::context;
use crate::range::RangeValue;

/// A blocking directory context.
pub struct DirectoryContext {
    inner: context::DirectoryContext,
    runtime: tokio::runtime::Runtime,
}

impl DirectoryContext {
    /// A blocking context connecting with the given configuration.
    pub fn new(config: DirectoryConfig) -> DirectoryResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DirectoryError::connection_with_source("failed to start runtime", e))?;
        Ok(Self {
            inner: context::DirectoryContext::new(config),
            runtime,
        })
    }

    /// The wrapped async context, for query building.
    pub fn as_async(&self) -> &context::DirectoryContext {
        &self.inner
    }

    /// Block on any future against the wrapped context.
    ///
    /// Queries are built on [`as_async`](Self::as_async) and finished here:
    ///
    /// ```ignore
    /// let users = ctx.block_on(ctx.as_async().query::<User>().to_vec())?;
    /// ```
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Blocking [`get_by_dn`](context::DirectoryContext::get_by_dn).
    pub fn get_by_dn<T: DirectoryEntity>(&self, dn: &str) -> DirectoryResult<Tracked<T>> {
        self.runtime.block_on(self.inner.get_by_dn(dn))
    }

    /// Blocking [`add`](context::DirectoryContext::add).
    pub fn add<T: DirectoryEntity>(&self, entity: &T) -> DirectoryResult<()> {
        self.runtime.block_on(self.inner.add(entity))
    }

    /// Blocking [`update`](context::DirectoryContext::update).
    pub fn update<T: DirectoryEntity>(&self, entry: &mut Tracked<T>) -> DirectoryResult<()> {
        self.runtime.block_on(self.inner.update(entry))
    }

    /// Blocking [`delete`](context::DirectoryContext::delete).
    pub fn delete(&self, dn: &str, controls: Vec<DirectoryControl>) -> DirectoryResult<()> {
        self.runtime.block_on(self.inner.delete(dn, controls))
    }

    /// Blocking [`get_attributes_by_dn`](context::DirectoryContext::get_attributes_by_dn).
    pub fn get_attributes_by_dn(
        &self,
        dn: &str,
        attributes: &[&str],
    ) -> DirectoryResult<DirectoryAttributes> {
        self.runtime
            .block_on(self.inner.get_attributes_by_dn(dn, attributes))
    }

    /// Blocking [`retrieve_ranges`](context::DirectoryContext::retrieve_ranges).
    pub fn retrieve_ranges<V: RangeValue>(
        &self,
        dn: &str,
        attribute: &str,
        start: u32,
    ) -> DirectoryResult<Vec<V>> {
        self.runtime
            .block_on(self.inner.retrieve_ranges(dn, attribute, start))
    }

    /// Blocking [`dispose`](context::DirectoryContext::dispose).
    pub fn dispose(self) -> DirectoryResult<()> {
        let Self { inner, runtime } = self;
        runtime.block_on(inner.dispose())
    }
}
