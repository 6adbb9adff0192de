//! Client configuration.

use std::fmt;
use std::time::Duration;

use ldap3::LdapConnSettings;
use ldq_query::options::SearchScope;
use serde::{Deserialize, Serialize};
use url::Url;

/// Configuration for a [`DirectoryContext`](crate::context::DirectoryContext).
#[derive(Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Server URL; ldap, ldaps and ldapi schemes are supported.
    pub url: Url,

    /// Bind DN; anonymous bind when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_dn: Option<String>,

    /// Bind password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<String>,

    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Default naming context searches are rooted under when neither the
    /// query nor the mapping names one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub naming_context: Option<String>,

    /// Default search scope.
    #[serde(default)]
    pub scope: SearchScope,

    /// The server-enforced maximum page size.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,

    /// Whether searches attach a paged-results control by default.
    #[serde(default = "default_true")]
    pub paging_enabled: bool,
}

/// How to establish the connection. Unset values use the defaults of
/// [`LdapConnSettings`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Timeout to establish a connection, in seconds. Infinite if unset.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Use the StartTLS extended operation instead of TLS on a dedicated
    /// port. False if unset.
    #[serde(default)]
    pub starttls: Option<bool>,

    /// Disable verification of TLS certificates. False if unset.
    #[serde(default)]
    pub no_tls_verify: Option<bool>,
}

fn default_max_page_size() -> u32 {
    500
}

fn default_true() -> bool {
    true
}

impl DirectoryConfig {
    /// A configuration with defaults for everything but the URL.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            bind_dn: None,
            bind_password: None,
            connection: ConnectionConfig::default(),
            naming_context: None,
            scope: SearchScope::default(),
            max_page_size: default_max_page_size(),
            paging_enabled: default_true(),
        }
    }
}

impl ConnectionConfig {
    /// Build the wire library's settings from this configuration.
    pub(crate) fn to_settings(&self) -> LdapConnSettings {
        let mut settings = LdapConnSettings::new();
        if let Some(timeout) = self.timeout {
            settings = settings.set_conn_timeout(Duration::from_secs(timeout));
        }
        if let Some(starttls) = self.starttls {
            settings = settings.set_starttls(starttls);
        }
        if let Some(no_tls_verify) = self.no_tls_verify {
            settings = settings.set_no_tls_verify(no_tls_verify);
        }
        settings
    }
}

impl fmt::Debug for DirectoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryConfig")
            .field("url", &self.url.as_str())
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &self.bind_password.as_ref().map(|_| "***"))
            .field("connection", &self.connection)
            .field("naming_context", &self.naming_context)
            .field("scope", &self.scope)
            .field("max_page_size", &self.max_page_size)
            .field("paging_enabled", &self.paging_enabled)
            .finish()
    }
}
