//! The transport seam.
//!
//! Commands talk to a [`DirectoryConnection`]; the production implementation
//! wraps an [`ldap3::Ldap`] handle, and tests script their own. Connections
//! come from a [`ConnectionFactory`] scoped to the context: the production
//! factory connects and binds once, lazily, and hands every command a clone
//! of the cached handle; the bound connection lives until the context is
//! disposed or dropped.
//!
//! Cancellation follows the async model: dropping an in-flight future
//! abandons the request (the wire library sends the abandon operation on a
//! best-effort basis), and a connection timeout surfaces as a cancelled
//! error. Partial results of an abandoned paged search are discarded with
//! the future.

use async_trait::async_trait;
use ldap3::controls::RawControl;
use ldap3::{Ldap, LdapConnAsync, Scope, SearchEntry};
use std::collections::HashSet;
use tracing::{debug, warn};

use ldq_core::attributes::DirectoryAttributes;
use ldq_core::error::{DirectoryError, DirectoryResult};
use ldq_core::tracking::ModificationOp;
use ldq_core::value::RawValue;
use ldq_query::options::{DirectoryControl, SearchScope};

use crate::config::DirectoryConfig;

/// A search request as the engine sees it.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Search base DN.
    pub base_dn: String,
    /// Search scope.
    pub scope: SearchScope,
    /// RFC 4515 filter.
    pub filter: String,
    /// Attributes to return; empty means all user attributes.
    pub attributes: Vec<String>,
    /// Request controls.
    pub controls: Vec<DirectoryControl>,
}

/// An add request.
#[derive(Debug, Clone)]
pub struct AddRequest {
    /// DN of the entry to create.
    pub dn: String,
    /// Attribute values of the new entry.
    pub attributes: Vec<(String, Vec<RawValue>)>,
    /// Request controls.
    pub controls: Vec<DirectoryControl>,
}

/// A modify request.
#[derive(Debug, Clone)]
pub struct ModifyRequest {
    /// DN of the entry to modify.
    pub dn: String,
    /// Modifications, in order.
    pub operations: Vec<ModificationOp>,
    /// Request controls.
    pub controls: Vec<DirectoryControl>,
}

/// A modify-DN (move/rename) request.
#[derive(Debug, Clone)]
pub struct ModifyDnRequest {
    /// DN of the entry to move or rename.
    pub dn: String,
    /// New RDN (`cn=new-name`).
    pub new_rdn: String,
    /// Whether the old RDN attribute value is removed.
    pub delete_old_rdn: bool,
    /// New parent DN for moves.
    pub new_parent: Option<String>,
    /// Request controls.
    pub controls: Vec<DirectoryControl>,
}

/// A delete request.
#[derive(Debug, Clone)]
pub struct DeleteRequest {
    /// DN of the entry to delete.
    pub dn: String,
    /// Request controls (tree delete goes here).
    pub controls: Vec<DirectoryControl>,
}

/// Any request the engine can send.
#[derive(Debug, Clone)]
pub enum DirectoryRequest {
    Search(SearchRequest),
    Add(AddRequest),
    Modify(ModifyRequest),
    ModifyDn(ModifyDnRequest),
    Delete(DeleteRequest),
}

impl DirectoryRequest {
    /// The DN the request targets.
    pub fn target_dn(&self) -> &str {
        match self {
            Self::Search(r) => &r.base_dn,
            Self::Add(r) => &r.dn,
            Self::Modify(r) => &r.dn,
            Self::ModifyDn(r) => &r.dn,
            Self::Delete(r) => &r.dn,
        }
    }
}

/// Summary of a server response.
#[derive(Debug, Clone)]
pub struct OperationResult {
    /// LDAP result code; 0 is success.
    pub code: u32,
    /// Matched DN reported by the server.
    pub matched_dn: String,
    /// Diagnostic message reported by the server.
    pub message: String,
}

impl OperationResult {
    /// Fail with a directory-operation error unless the code is 0.
    pub fn success(&self) -> DirectoryResult<()> {
        if self.code == 0 {
            Ok(())
        } else {
            Err(DirectoryError::Operation {
                code: self.code,
                matched_dn: self.matched_dn.clone(),
                message: self.message.clone(),
            })
        }
    }
}

/// LDAP result code for a tripped size limit.
pub const SIZE_LIMIT_EXCEEDED: u32 = 4;

/// A search response: entries in server order plus response controls.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    /// Returned entries, in server order, tracking enabled.
    pub entries: Vec<DirectoryAttributes>,
    /// Response controls.
    pub controls: Vec<DirectoryControl>,
    /// Result summary.
    pub result: OperationResult,
}

/// Any response the engine can receive.
#[derive(Debug, Clone)]
pub enum DirectoryResponse {
    Search(SearchResponse),
    Operation(OperationResult),
}

/// The wire collaborator commands execute against.
#[async_trait]
pub trait DirectoryConnection: Send {
    /// Send one request and await its response.
    async fn send(&mut self, request: DirectoryRequest) -> DirectoryResult<DirectoryResponse>;

    /// Release protocol resources; best effort.
    async fn close(&mut self) -> DirectoryResult<()> {
        Ok(())
    }

    /// Send a search and unwrap the search response.
    async fn search(&mut self, request: SearchRequest) -> DirectoryResult<SearchResponse> {
        match self.send(DirectoryRequest::Search(request)).await? {
            DirectoryResponse::Search(response) => Ok(response),
            DirectoryResponse::Operation(result) => Err(DirectoryError::connection(format!(
                "search produced a non-search response (code {})",
                result.code
            ))),
        }
    }

    /// Send a mutating request and unwrap the operation result.
    async fn operation(&mut self, request: DirectoryRequest) -> DirectoryResult<OperationResult> {
        match self.send(request).await? {
            DirectoryResponse::Operation(result) => Ok(result),
            DirectoryResponse::Search(response) => Ok(response.result),
        }
    }
}

/// Hands out connections scoped to a context.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open (or lease) a connection.
    async fn open(&self) -> DirectoryResult<Box<dyn DirectoryConnection>>;

    /// Return a connection once the caller is done with it.
    async fn release(&self, connection: Box<dyn DirectoryConnection>);

    /// Tear down any cached protocol state. Called once, when the owning
    /// context is disposed.
    async fn shutdown(&self) {}
}

/// Production connection over [`ldap3`].
pub struct LdapConnection {
    ldap: Ldap,
}

impl LdapConnection {
    /// Connect, spawn the connection driver, and bind. The returned handle
    /// is cheap to clone; clones multiplex over the one bound connection.
    pub async fn establish(config: &DirectoryConfig) -> DirectoryResult<Ldap> {
        let settings = config.connection.to_settings();
        debug!(url = %config.url, "connecting to directory");
        let (conn, mut ldap) = LdapConnAsync::from_url_with_settings(settings, &config.url)
            .await
            .map_err(|e| {
                DirectoryError::connection_with_source(
                    format!("failed to connect to {}", config.url),
                    e,
                )
            })?;
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "directory connection driver error");
            }
        });
        if let Some(bind_dn) = &config.bind_dn {
            let password = config.bind_password.as_deref().unwrap_or("");
            ldap.simple_bind(bind_dn, password)
                .await
                .map_err(|e| DirectoryError::connection_with_source("bind failed", e))?
                .success()
                .map_err(|e| DirectoryError::connection_with_source("bind rejected", e))?;
        }
        Ok(ldap)
    }

    /// Open a standalone connection, bypassing any factory caching.
    pub async fn connect(config: &DirectoryConfig) -> DirectoryResult<Self> {
        Ok(Self {
            ldap: Self::establish(config).await?,
        })
    }

    fn attach_controls(&mut self, controls: &[DirectoryControl]) {
        if controls.is_empty() {
            return;
        }
        let raw: Vec<RawControl> = controls.iter().map(to_raw_control).collect();
        self.ldap.with_controls(raw);
    }
}

fn to_raw_control(control: &DirectoryControl) -> RawControl {
    RawControl {
        ctype: control.oid.clone(),
        crit: control.critical,
        val: control.value.clone(),
    }
}

fn to_scope(scope: SearchScope) -> Scope {
    match scope {
        SearchScope::Base => Scope::Base,
        SearchScope::OneLevel => Scope::OneLevel,
        SearchScope::Subtree => Scope::Subtree,
    }
}

fn from_ldap_result(result: &ldap3::LdapResult) -> OperationResult {
    OperationResult {
        code: result.rc,
        matched_dn: result.matched.clone(),
        message: result.text.clone(),
    }
}

fn response_controls(result: &ldap3::LdapResult) -> Vec<DirectoryControl> {
    result
        .ctrls
        .iter()
        .map(|control| {
            let raw = &control.1;
            DirectoryControl {
                oid: raw.ctype.clone(),
                critical: raw.crit,
                value: raw.val.clone(),
            }
        })
        .collect()
}

/// Convert a wire entry into the engine's attribute bag, tracking enabled.
///
/// An attribute with both UTF-8 and binary values arrives split across the
/// wire library's two maps; the values are merged back under one name.
pub fn entry_to_attributes(entry: SearchEntry) -> DirectoryAttributes {
    let mut attrs = DirectoryAttributes::new(entry.dn);
    for (name, values) in entry.attrs {
        attrs.set(name, values.into_iter().map(RawValue::Text).collect());
    }
    for (name, values) in entry.bin_attrs {
        let mut merged: Vec<RawValue> = attrs.get(&name).map(<[_]>::to_vec).unwrap_or_default();
        merged.extend(values.into_iter().map(RawValue::Binary));
        attrs.set(name, merged);
    }
    attrs.enable_tracking();
    attrs
}

fn value_set(values: Vec<RawValue>) -> HashSet<Vec<u8>> {
    values.into_iter().map(RawValue::into_bytes).collect()
}

fn transport(e: ldap3::LdapError) -> DirectoryError {
    match e {
        ldap3::LdapError::Timeout { .. } => DirectoryError::Cancelled,
        other => DirectoryError::connection_with_source("directory request failed", other),
    }
}

#[async_trait]
impl DirectoryConnection for LdapConnection {
    async fn send(&mut self, request: DirectoryRequest) -> DirectoryResult<DirectoryResponse> {
        match request {
            DirectoryRequest::Search(request) => {
                self.attach_controls(&request.controls);
                let attributes = if request.attributes.is_empty() {
                    vec!["*".to_owned()]
                } else {
                    request.attributes
                };
                let result = self
                    .ldap
                    .search(
                        &request.base_dn,
                        to_scope(request.scope),
                        &request.filter,
                        attributes,
                    )
                    .await
                    .map_err(transport)?;
                let ldap3::SearchResult(entries, ldap_result) = result;
                let response = SearchResponse {
                    entries: entries
                        .into_iter()
                        .map(SearchEntry::construct)
                        .map(entry_to_attributes)
                        .collect(),
                    controls: response_controls(&ldap_result),
                    result: from_ldap_result(&ldap_result),
                };
                Ok(DirectoryResponse::Search(response))
            }
            DirectoryRequest::Add(request) => {
                self.attach_controls(&request.controls);
                let attributes: Vec<(Vec<u8>, HashSet<Vec<u8>>)> = request
                    .attributes
                    .into_iter()
                    .filter(|(_, values)| !values.is_empty())
                    .map(|(name, values)| (name.into_bytes(), value_set(values)))
                    .collect();
                let result = self
                    .ldap
                    .add(&request.dn, attributes)
                    .await
                    .map_err(transport)?;
                Ok(DirectoryResponse::Operation(from_ldap_result(&result)))
            }
            DirectoryRequest::Modify(request) => {
                self.attach_controls(&request.controls);
                let mods: Vec<ldap3::Mod<Vec<u8>>> = request
                    .operations
                    .into_iter()
                    .map(|op| match op {
                        ModificationOp::Add { attribute, values } => {
                            ldap3::Mod::Add(attribute.into_bytes(), value_set(values))
                        }
                        ModificationOp::Delete { attribute, values } => {
                            ldap3::Mod::Delete(attribute.into_bytes(), value_set(values))
                        }
                        ModificationOp::Replace { attribute, values } => {
                            ldap3::Mod::Replace(attribute.into_bytes(), value_set(values))
                        }
                    })
                    .collect();
                let result = self
                    .ldap
                    .modify(&request.dn, mods)
                    .await
                    .map_err(transport)?;
                Ok(DirectoryResponse::Operation(from_ldap_result(&result)))
            }
            DirectoryRequest::ModifyDn(request) => {
                self.attach_controls(&request.controls);
                let result = self
                    .ldap
                    .modifydn(
                        &request.dn,
                        &request.new_rdn,
                        request.delete_old_rdn,
                        request.new_parent.as_deref(),
                    )
                    .await
                    .map_err(transport)?;
                Ok(DirectoryResponse::Operation(from_ldap_result(&result)))
            }
            DirectoryRequest::Delete(request) => {
                self.attach_controls(&request.controls);
                let result = self
                    .ldap
                    .delete(&request.dn)
                    .await
                    .map_err(transport)?;
                Ok(DirectoryResponse::Operation(from_ldap_result(&result)))
            }
        }
    }

    async fn close(&mut self) -> DirectoryResult<()> {
        self.ldap.unbind().await.map_err(transport)
    }
}

/// Connects and binds once, lazily, then leases clones of the cached
/// handle. The bound connection is held for the factory's (and so the
/// owning context's) lifetime and released on shutdown or drop.
pub struct LdapConnectionFactory {
    config: DirectoryConfig,
    cached: tokio::sync::Mutex<Option<Ldap>>,
}

impl LdapConnectionFactory {
    /// A factory connecting with the given configuration.
    pub fn new(config: DirectoryConfig) -> Self {
        Self {
            config,
            cached: tokio::sync::Mutex::new(None),
        }
    }

    /// The cached handle, establishing the connection on first use.
    async fn handle(&self) -> DirectoryResult<Ldap> {
        let mut cached = self.cached.lock().await;
        if let Some(ldap) = cached.as_ref() {
            return Ok(ldap.clone());
        }
        let ldap = LdapConnection::establish(&self.config).await?;
        *cached = Some(ldap.clone());
        Ok(ldap)
    }
}

#[async_trait]
impl ConnectionFactory for LdapConnectionFactory {
    async fn open(&self) -> DirectoryResult<Box<dyn DirectoryConnection>> {
        Ok(Box::new(LdapConnection {
            ldap: self.handle().await?,
        }))
    }

    // The lease was a clone of the cached handle; dropping it leaves the
    // bound connection in place.
    async fn release(&self, _connection: Box<dyn DirectoryConnection>) {}

    async fn shutdown(&self) {
        if let Some(mut ldap) = self.cached.lock().await.take() {
            if let Err(e) = ldap.unbind().await {
                debug!(error = %e, "closing directory connection failed");
            }
        }
    }
}

impl Drop for LdapConnectionFactory {
    fn drop(&mut self) {
        // Best-effort release when the owning context is dropped without an
        // explicit dispose; needs a live runtime to send the unbind.
        if let Some(mut ldap) = self.cached.get_mut().take() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    let _ = ldap.unbind().await;
                });
            }
        }
    }
}
