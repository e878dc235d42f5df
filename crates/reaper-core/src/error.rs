// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for Reaper operations
#[derive(Error, Debug, Diagnostic)]
pub enum ReaperError {
    /// Resource not found
    #[error("Resource not found: {resource_key}")]
    #[diagnostic(
        code(reaper::resource_not_found),
        help("Verify the resource name, namespace, and API version are correct")
    )]
    ResourceNotFound {
        #[allow(unused)]
        resource_key: String,
    },

    /// Resource already exists
    #[error("Resource already exists: {resource_key}")]
    #[diagnostic(
        code(reaper::resource_already_exists),
        help("Update the existing resource instead, or delete it first")
    )]
    ResourceAlreadyExists {
        #[allow(unused)]
        resource_key: String,
    },

    /// Invalid resource
    #[error("Invalid resource: {reason}")]
    #[diagnostic(code(reaper::invalid_resource), help("{suggestion}"))]
    InvalidResource {
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Conflict detected (stale resourceVersion or failed precondition)
    #[error("Conflict detected for resource {resource_key}: expected version {expected}, found {actual}")]
    #[diagnostic(
        code(reaper::conflict),
        help("This resource was modified concurrently. Re-read it and retry with the latest resourceVersion")
    )]
    Conflict {
        #[allow(unused)]
        resource_key: String,
        #[allow(unused)]
        expected: String,
        #[allow(unused)]
        actual: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(reaper::serialization_error),
        help("Ensure the resource format is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Unknown kind in a manifest or request
    #[error("Unknown resource kind: {api_version}/{kind}")]
    #[diagnostic(
        code(reaper::invalid_kind),
        help("Supported kinds: provisioning Cluster, management Cluster, cluster-api Cluster, Machine")
    )]
    InvalidKind {
        #[allow(unused)]
        api_version: String,
        #[allow(unused)]
        kind: String,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(reaper::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for Reaper operations
pub type Result<T> = std::result::Result<T, ReaperError>;

impl ReaperError {
    /// Create a ResourceNotFound error
    pub fn resource_not_found(resource_key: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            resource_key: resource_key.into(),
        }
    }

    /// Create a ResourceAlreadyExists error
    pub fn resource_already_exists(resource_key: impl Into<String>) -> Self {
        Self::ResourceAlreadyExists {
            resource_key: resource_key.into(),
        }
    }

    /// Create an InvalidResource error
    pub fn invalid_resource(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidResource {
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a Conflict error
    pub fn conflict(
        resource_key: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            resource_key: resource_key.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    /// Create an InvalidKind error
    pub fn invalid_kind(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::InvalidKind {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// True when the error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound { .. })
    }

    /// True when the error is an optimistic-concurrency failure
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
