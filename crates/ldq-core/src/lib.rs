//! # Directory object mapping
//!
//! Core of the directory-query engine: how host types bind to LDAP schema
//! and how values cross the wire boundary.
//!
//! - [`value`] - raw wire values and typed host values
//! - [`convert`] - attribute syntaxes and bidirectional conversion
//! - [`attributes`] - the untyped [`DirectoryAttributes`] entry bag
//! - [`map`] - [`ClassMap`] / [`PropertyMap`] and the builder
//! - [`registry`] - type-keyed mappers with atomic replacement
//! - [`tracking`] - original-value snapshots and minimal modification lists
//! - [`error`] - the engine-wide error enum
//!
//! A type joins the engine by implementing [`DirectoryEntity`]:
//!
//! ```
//! use ldq_core::prelude::*;
//!
//! #[derive(Debug, Default)]
//! struct User {
//!     dn: Option<String>,
//!     account: Option<String>,
//! }
//!
//! impl DirectoryEntity for User {
//!     fn class_map() -> DirectoryResult<ClassMap<Self>> {
//!         ClassMap::builder("User", User::default)
//!             .naming_context("ou=users,dc=example,dc=com")
//!             .object_class("user")
//!             .property(
//!                 PropertyMap::new(
//!                     "Dn",
//!                     "distinguishedName",
//!                     AttributeSyntax::Dn,
//!                     |u: &User| AttributeValue::from(u.dn.clone()),
//!                     |u, v| {
//!                         u.dn = v.as_str().map(str::to_owned);
//!                         Ok(())
//!                     },
//!                 )
//!                 .distinguished_name(),
//!             )
//!             .property(PropertyMap::new(
//!                 "Account",
//!                 "sAMAccountName",
//!                 AttributeSyntax::Text,
//!                 |u: &User| AttributeValue::from(u.account.clone()),
//!                 |u, v| {
//!                     u.account = v.as_str().map(str::to_owned);
//!                     Ok(())
//!                 },
//!             ))
//!             .build()
//!     }
//! }
//! ```

pub mod attributes;
pub mod convert;
pub mod error;
pub mod map;
pub mod registry;
pub mod tracking;
pub mod value;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::attributes::DirectoryAttributes;
    pub use crate::convert::AttributeSyntax;
    pub use crate::error::{DirectoryError, DirectoryResult};
    pub use crate::map::{
        AttributeResolver, ClassDescriptor, ClassMap, ClassMapBuilder, DynamicResolver,
        PropertyDescriptor, PropertyMap, ReadOnly, ResolvedAttribute, WritePhase,
    };
    pub use crate::registry::{DirectoryEntity, DirectoryMapper, MapperRegistry, DEFAULT_MAPPER};
    pub use crate::tracking::{ModificationOp, Tracked};
    pub use crate::value::{AttributeValue, RawValue, Sid};
}
