//! Translated query options.
//!
//! [`QueryCommandOptions`] is the record the translator produces and the
//! command layer consumes: the filter string, the attribute load list, and
//! every result-shaping instruction extracted from the pipeline.

use serde::{Deserialize, Serialize};

use crate::projection::Projection;

/// Search scope of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    /// The base entry itself.
    Base,
    /// Immediate children of the base.
    OneLevel,
    /// The base and all descendants.
    #[default]
    Subtree,
}

/// One server-side sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    /// Attribute to sort by.
    pub attribute: String,
    /// Whether the order is reversed.
    pub reverse: bool,
}

/// Paging instructions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageOptions {
    /// Caller-requested page size; the server maximum applies when unset.
    pub page_size: Option<u32>,
    /// Cookie from a previous page, empty on the first request.
    pub cookie: Vec<u8>,
    /// Leading entries to discard.
    pub skip: Option<usize>,
    /// Maximum entries to return.
    pub take: Option<usize>,
}

impl PageOptions {
    /// Whether any instruction is set.
    pub fn is_empty(&self) -> bool {
        self.page_size.is_none()
            && self.cookie.is_empty()
            && self.skip.is_none()
            && self.take.is_none()
    }
}

/// Virtual-list-view instructions (offset targeting).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualListViewOptions {
    /// Entries to return before the target.
    pub before_count: u32,
    /// Entries to return after the target.
    pub after_count: u32,
    /// One-based target position.
    pub offset: u32,
    /// Caller's estimate of the content count; 0 when unknown.
    pub content_count: u32,
}

impl VirtualListViewOptions {
    /// A window of `count` entries starting at one-based `offset`.
    pub fn window(offset: u32, count: u32) -> Self {
        Self {
            before_count: 0,
            after_count: count.saturating_sub(1),
            offset,
            content_count: 0,
        }
    }
}

/// An opaque request control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryControl {
    /// Control OID.
    pub oid: String,
    /// Criticality flag.
    pub critical: bool,
    /// BER-encoded control value, if the control carries one.
    pub value: Option<Vec<u8>>,
}

impl DirectoryControl {
    /// A control without a value.
    pub fn new(oid: impl Into<String>, critical: bool) -> Self {
        Self {
            oid: oid.into(),
            critical,
            value: None,
        }
    }

    /// A control with a BER-encoded value.
    pub fn with_value(oid: impl Into<String>, critical: bool, value: Vec<u8>) -> Self {
        Self {
            oid: oid.into(),
            critical,
            value: Some(value),
        }
    }
}

/// How the raw result set folds into the caller's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultTransformer {
    /// All entries, in server order.
    #[default]
    List,
    /// The first entry; error when none.
    First,
    /// The first entry or nothing.
    FirstOrDefault,
    /// Exactly one entry; error when none or many.
    Single,
    /// At most one entry; error when many.
    SingleOrDefault,
    /// The last entry of the full result.
    Last,
    /// The number of entries across all pages.
    Count,
    /// Whether any entry matched.
    Any,
    /// Whether no entry matched the negated predicate.
    All,
}

/// Behaviour when the server cuts the result short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeLimitMode {
    /// Propagate the size-limit error.
    #[default]
    Strict,
    /// Return the entries accumulated so far.
    Partial,
}

/// Everything the command layer needs to execute a translated query.
#[derive(Debug, Clone, Default)]
pub struct QueryCommandOptions {
    /// The complete RFC 4515 filter, object-class gate included.
    pub filter: String,
    /// Property → attribute load list, in expression order.
    pub attributes_to_load: Vec<(String, String)>,
    /// Server-side sort keys; at most one sort control is emitted.
    pub sorting: Vec<SortKey>,
    /// Paging instructions, when any of page/skip/take appeared.
    pub paging: Option<PageOptions>,
    /// Virtual-list-view instructions; mutually exclusive with paging.
    pub vlv: Option<VirtualListViewOptions>,
    /// Caller-supplied controls, passed through opaquely.
    pub controls: Vec<DirectoryControl>,
    /// Result-shape instructions, absent for the identity shape.
    pub projection: Option<Projection>,
    /// The predicate is provably false; answer without a server call.
    pub yield_no_results: bool,
    /// Terminal fold.
    pub transformer: ResultTransformer,
    /// Suppress the implicit paged-results control.
    pub without_paging: bool,
    /// Size-limit handling.
    pub size_limit_mode: SizeLimitMode,
    /// Explicit search base overriding the mapping default.
    pub naming_context: Option<String>,
    /// Explicit scope overriding the configured default.
    pub scope: Option<SearchScope>,
    /// Whether materialised entries keep an original-value snapshot.
    pub tracking: bool,
    /// Load `objectClass` for sub-type discrimination.
    pub inject_object_class: bool,
    /// Return raw attribute bags instead of materialised entities.
    pub dynamic: bool,
}

impl QueryCommandOptions {
    /// The attribute names to request from the server, in order.
    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes_to_load
            .iter()
            .map(|(_, attribute)| attribute.clone())
            .collect()
    }
}
