//! Directory engine error types
//!
//! One error enum for the whole engine, with variants grouped by where they
//! arise: mapping and translation problems fail before any network call,
//! operation errors carry the server's result code and diagnostic.

use thiserror::Error;

/// Error that can occur while mapping, translating or executing a directory
/// operation.
#[derive(Debug, Error)]
pub enum DirectoryError {
    // Mapping errors (fail before any network call)
    /// A type or property has no usable mapping, or a mapping is malformed.
    #[error("mapping error: {message}")]
    Mapping { message: String },

    /// A type was registered twice with the same mapper.
    #[error("type '{type_name}' is already mapped")]
    AlreadyMapped { type_name: String },

    // Translation errors (fail before any network call)
    /// The query expression could not be lowered to an LDAP request.
    #[error("translation error: {message}")]
    Translation { message: String },

    /// A caller-supplied argument was null, blank or malformed.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    // Execution errors
    /// The server returned a non-zero LDAP result code.
    #[error("directory operation failed with code {code}: {message}")]
    Operation {
        code: u32,
        matched_dn: String,
        message: String,
    },

    /// A query requiring a result produced none.
    #[error("no result was found for filter '{filter}'")]
    NoResult { filter: String },

    /// A single-result query matched more than one entry.
    #[error("more than one result was found for filter '{filter}'")]
    MultipleResults { filter: String },

    /// The server-side size limit cut the result set short.
    #[error("size limit exceeded after {retrieved} entries")]
    SizeLimitExceeded { retrieved: usize },

    /// An update was requested for an entry without an original-value
    /// snapshot.
    #[error("entry '{dn}' is not change-tracked")]
    UntrackedUpdate { dn: String },

    /// The context was torn down while a request was still in flight.
    #[error("context disposed while a request was in flight")]
    DisposedInUse,

    /// The transport collaborator failed.
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The in-flight request was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl DirectoryError {
    /// Create a mapping error.
    pub fn mapping(message: impl Into<String>) -> Self {
        Self::Mapping {
            message: message.into(),
        }
    }

    /// Create a translation error.
    pub fn translation(message: impl Into<String>) -> Self {
        Self::Translation {
            message: message.into(),
        }
    }

    /// Create a translation error for an expression node the translator
    /// cannot lower, naming the node kind and the member path it hangs off.
    pub fn unsupported(node_kind: &str, member_path: &str) -> Self {
        Self::Translation {
            message: format!("unsupported predicate: {node_kind} at '{member_path}'"),
        }
    }

    /// Create an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a connection error without an underlying source.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error wrapping a transport failure.
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether the error was produced before any request reached the server.
    pub fn is_pre_flight(&self) -> bool {
        matches!(
            self,
            Self::Mapping { .. }
                | Self::AlreadyMapped { .. }
                | Self::Translation { .. }
                | Self::InvalidArgument { .. }
        )
    }
}

/// Result alias used throughout the engine.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_names_node_and_path() {
        let err = DirectoryError::unsupported("conditional", "t.Manager");
        assert_eq!(
            err.to_string(),
            "translation error: unsupported predicate: conditional at 't.Manager'"
        );
    }

    #[test]
    fn test_pre_flight_classification() {
        assert!(DirectoryError::mapping("x").is_pre_flight());
        assert!(DirectoryError::translation("x").is_pre_flight());
        assert!(!DirectoryError::connection("x").is_pre_flight());
        assert!(!DirectoryError::Operation {
            code: 32,
            matched_dn: String::new(),
            message: "noSuchObject".into(),
        }
        .is_pre_flight());
    }
}
