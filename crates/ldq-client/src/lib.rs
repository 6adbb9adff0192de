//! # Directory client
//!
//! The execution half of the directory-query engine: connections, commands
//! and the [`DirectoryContext`](context::DirectoryContext) public API.
//!
//! ## Example
//!
//! ```ignore
//! use ldq_client::prelude::*;
//! use ldq_query::ast::prop;
//!
//! let config: DirectoryConfig = serde_json::from_str(config_json)?;
//! let ctx = DirectoryContext::new(config);
//!
//! // Typed query: filter, sort and page server-side, materialise tracked
//! // entities.
//! let users = ctx
//!     .query::<User>()
//!     .filter(prop("Account").starts_with("al").and(prop("Mail").is_present()))
//!     .order_by("Account")
//!     .take(50)
//!     .to_vec()
//!     .await?;
//!
//! // Change tracking: mutate and write back the minimal modification list.
//! let mut user = ctx.get_by_dn::<User>("cn=ada,ou=users,dc=example,dc=com").await?;
//! user.mail = Some("ada@example.com".into());
//! ctx.update(&mut user).await?;
//! ```
//!
//! ## Crate organisation
//!
//! - [`config`] - serde configuration
//! - [`connection`] - the transport seam and its ldap3 implementation
//! - [`controls`] - control OIDs and BER values
//! - [`commands`] - the closed command set
//! - [`paging`] - the paged-results driver
//! - [`range`] - `attr;range=N-M` retrieval
//! - [`query`] - typed, projected and dynamic query builders
//! - [`dirsync`] - incremental change polling
//! - [`listener`] - mutation lifecycle hooks
//! - [`context`] - the public API surface
//! - [`blocking`] - blocking wrapper deriving from the async API

pub mod blocking;
pub mod commands;
pub mod config;
pub mod connection;
pub mod context;
pub mod controls;
pub mod dirsync;
pub mod listener;
mod paging;
pub mod query;
pub mod range;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::commands::{Command, CommandOutcome, ExecutionEnv};
    pub use crate::config::{ConnectionConfig, DirectoryConfig};
    pub use crate::connection::{
        AddRequest, ConnectionFactory, DeleteRequest, DirectoryConnection, DirectoryRequest,
        DirectoryResponse, ModifyDnRequest, ModifyRequest, OperationResult, SearchRequest,
        SearchResponse,
    };
    pub use crate::context::DirectoryContext;
    pub use crate::dirsync::{DirSyncOptions, DirSyncPage, DirSyncToken};
    pub use crate::listener::DirectoryEventListener;
    pub use crate::query::{DirectoryQuery, DynamicQuery, ProjectedQuery};
    pub use crate::range::RangeValue;

    pub use ldq_core::prelude::*;
    pub use ldq_query::prelude::*;
}
