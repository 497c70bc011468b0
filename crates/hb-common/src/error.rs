//! Error types for the helm broker
//!
//! Errors are structured with fields to aid debugging in production. The
//! orchestration core never matches on collaborator-specific error types:
//! every collaborator reports failures through this enum and the core tests
//! the category via [`Error::kind`] or the [`Error::is_not_found`] predicate.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Category of an error, checked by value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The requested record or object does not exist
    NotFound,
    /// The request collides with existing state
    Conflict,
    /// The request itself is malformed or refers to unknown catalog entries
    Invalid,
    /// A failure that may succeed when repeated
    Transient,
    /// A failure that will not go away on its own
    Fatal,
}

/// Main error type for broker operations
#[derive(Debug, Error)]
pub enum Error {
    /// A record or Kubernetes object was not found
    #[error("{resource} {id} not found")]
    NotFound {
        /// Kind of the missing thing (e.g. "instance", "operation", "secret")
        resource: String,
        /// Identifier that was looked up
        id: String,
    },

    /// Request conflicts with already stored state
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict
        message: String,
    },

    /// Validation error for an inbound request
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field (e.g. "context.namespace")
        field: Option<String>,
    },

    /// The caller did not accept an asynchronous operation
    #[error("asynchronous operation mode required: {message}")]
    AsyncRequired {
        /// Why the operation cannot complete synchronously
        message: String,
    },

    /// Storage backend error
    #[error("storage error: {message}")]
    Storage {
        /// Description of what failed
        message: String,
        /// Whether this error is retryable
        retryable: bool,
    },

    /// Chart install or delete failure
    #[error("chart error [{release}]: {message}")]
    Chart {
        /// Release the operation targeted
        release: String,
        /// Description of what failed
        message: String,
    },

    /// Bind template rendering failure
    #[error("template error: {message}")]
    Template {
        /// Description of what failed
        message: String,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document kind being processed (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "dispatcher", "helm")
        context: String,
    },

    /// An error wrapped with a description of what was being done
    #[error("{context}: {source}")]
    Context {
        /// What was being done, e.g. "while installing helm release"
        context: String,
        /// The underlying error
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a not-found error
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict {
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with a field path
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an error for a caller that did not set `accepts_incomplete`
    pub fn async_required(msg: impl Into<String>) -> Self {
        Self::AsyncRequired {
            message: msg.into(),
        }
    }

    /// Create a retryable storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage {
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable storage error (e.g. corrupted record)
    pub fn storage_permanent(msg: impl Into<String>) -> Self {
        Self::Storage {
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a chart error for a release
    pub fn chart(release: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Chart {
            release: release.into(),
            message: msg.into(),
        }
    }

    /// Create a template error
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template {
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with document kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Wrap this error with a description of what was being done.
    ///
    /// The category of the wrapped error is preserved.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::Validation { .. } | Error::AsyncRequired { .. } => ErrorKind::Invalid,
            Error::Storage { retryable, .. } => {
                if *retryable {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Fatal
                }
            }
            Error::Chart { .. } => ErrorKind::Fatal,
            Error::Template { .. } => ErrorKind::Invalid,
            Error::Kube { source } => match source {
                kube::Error::Api(ae) if ae.code == 404 => ErrorKind::NotFound,
                kube::Error::Api(ae) if ae.code == 409 => ErrorKind::Conflict,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) => ErrorKind::Fatal,
                _ => ErrorKind::Transient,
            },
            Error::Serialization { .. } => ErrorKind::Invalid,
            Error::Internal { .. } => ErrorKind::Transient,
            Error::Context { source, .. } => source.kind(),
        }
    }

    /// Check if this error means "the thing does not exist"
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Check if this error is a conflict with stored state
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Check if this error rejects a synchronous request, however deeply
    /// it is wrapped
    pub fn is_async_required(&self) -> bool {
        match self {
            Error::AsyncRequired { .. } => true,
            Error::Context { source, .. } => source.is_async_required(),
            _ => false,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization_for_kind("json", e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::serialization_for_kind("yaml", e.to_string())
    }
}
