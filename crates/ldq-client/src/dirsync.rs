//! DirSync change retrieval.
//!
//! Drives the DirSync control's cookie protocol for incremental change
//! polling: each call returns the changed entries plus the cookie to echo
//! on the next poll. Cookies are opaque server state; the token helpers
//! wrap them for storage between process runs.

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use ldq_core::attributes::DirectoryAttributes;
use ldq_core::error::{DirectoryError, DirectoryResult};
use ldq_query::options::SearchScope;

use crate::commands::push_control;
use crate::connection::{DirectoryRequest, DirectoryResponse, SearchRequest};
use crate::context::DirectoryContext;
use crate::controls;

/// Options for one DirSync poll.
#[derive(Debug, Clone)]
pub struct DirSyncOptions {
    /// DirSync behaviour flags.
    pub flags: i64,
    /// Maximum response size in bytes the server may return.
    pub max_bytes: i64,
    /// Cookie from the previous poll; empty for the initial full pass.
    pub cookie: Vec<u8>,
}

impl Default for DirSyncOptions {
    fn default() -> Self {
        Self {
            flags: controls::DIRSYNC_INCREMENTAL_VALUES,
            max_bytes: 0x0010_0000,
            cookie: Vec::new(),
        }
    }
}

/// One DirSync page: the changed entries and the continuation state.
#[derive(Debug)]
pub struct DirSyncPage {
    /// Changed entries, in server order.
    pub entries: Vec<DirectoryAttributes>,
    /// Cookie to echo on the next poll.
    pub cookie: Vec<u8>,
    /// Whether more changes are immediately available.
    pub more: bool,
}

/// Durable form of a DirSync cookie.
///
/// The cookie is only valid against the domain controller that issued it,
/// so the token records the host it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirSyncToken {
    /// Base64 of the server cookie.
    pub cookie: String,
    /// Host the cookie was issued by.
    pub host: String,
}

impl DirSyncToken {
    /// Wrap a cookie for storage.
    pub fn new(cookie: &[u8], host: impl Into<String>) -> Self {
        Self {
            cookie: base64::engine::general_purpose::STANDARD.encode(cookie),
            host: host.into(),
        }
    }

    /// Serialize to a storable string.
    pub fn to_token(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse a stored token; `None` when malformed.
    pub fn from_token(token: &str) -> Option<Self> {
        serde_json::from_str(token).ok()
    }

    /// Decode the wrapped cookie.
    pub fn cookie_bytes(&self) -> DirectoryResult<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.cookie)
            .map_err(|_| DirectoryError::invalid_argument("malformed DirSync token"))
    }
}

impl DirectoryContext {
    /// Run one DirSync poll under `naming_context`.
    pub async fn dirsync_search(
        &self,
        naming_context: &str,
        filter: &str,
        attributes: &[&str],
        options: &DirSyncOptions,
    ) -> DirectoryResult<DirSyncPage> {
        if naming_context.trim().is_empty() {
            return Err(DirectoryError::invalid_argument("blank naming context"));
        }
        let mut request_controls = Vec::new();
        push_control(
            &mut request_controls,
            controls::dir_sync(options.flags, options.max_bytes, &options.cookie)?,
        )?;
        let request = SearchRequest {
            base_dn: naming_context.to_owned(),
            scope: SearchScope::Subtree,
            filter: filter.to_owned(),
            attributes: attributes.iter().map(|a| (*a).to_owned()).collect(),
            controls: request_controls,
        };
        let response = match self.send_request(DirectoryRequest::Search(request)).await? {
            DirectoryResponse::Search(response) => response,
            DirectoryResponse::Operation(result) => {
                return Err(DirectoryError::connection(format!(
                    "dirsync produced a non-search response (code {})",
                    result.code
                )))
            }
        };
        response.result.success()?;

        let state = controls::parse_dir_sync_response(&response.controls)?.ok_or_else(|| {
            DirectoryError::connection("server response carried no dirsync control")
        })?;
        debug!(
            entries = response.entries.len(),
            more = state.more_results,
            "dirsync page retrieved"
        );
        Ok(DirSyncPage {
            entries: response.entries,
            cookie: state.cookie,
            more: state.more_results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let token = DirSyncToken::new(b"\x01\x02cookie", "dc01.example.com");
        let stored = token.to_token();
        let parsed = DirSyncToken::from_token(&stored).unwrap();
        assert_eq!(parsed.host, "dc01.example.com");
        assert_eq!(parsed.cookie_bytes().unwrap(), b"\x01\x02cookie");
    }

    #[test]
    fn test_malformed_token_is_none() {
        assert!(DirSyncToken::from_token("not json").is_none());
    }
}
