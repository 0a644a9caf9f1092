//! Error types for the dormant-user workflow.
//!
//! [`DormancyError`] covers conditions that abort a lifecycle phase. The two
//! port error types, [`ProviderError`] and [`StoreError`], are what
//! infrastructure adapters return through the traits in [`crate::ports`];
//! adapters convert their own error types into these.
//!
//! ## Taxonomy
//!
//! | Class | Representation | Outcome |
//! |-------|----------------|---------|
//! | Configuration | [`DormancyError::Configuration`] | Fatal before any network call |
//! | Rate limit | [`ProviderError::RateLimited`] | Retried once by the GitHub client, then fatal |
//! | Data quality | not an error | Operator alert, processing continues |
//! | State consistency | [`DormancyError::StateMissing`], [`DormancyError::StateConflict`] | Fatal |
//! | Partial batch | any error mid-loop | Phase aborts, no rollback |

use thiserror::Error;

// ---------------------------------------------------------------------------
// Port errors
// ---------------------------------------------------------------------------

/// Error returned by a remote provider adapter (GitHub, Auth0, Notify, Slack).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider's quota is exhausted, even after any local retry.
    #[error("{provider} rate limit exceeded ({resource})")]
    RateLimited {
        /// Provider name, for example `"github"`.
        provider: &'static str,
        /// The quota bucket that was exhausted, for example `"graphql"`.
        resource: String,
    },

    /// The request could not be sent or the provider returned an error status.
    #[error("{provider} request failed: {message}")]
    Request {
        /// Provider name.
        provider: &'static str,
        /// Description of the failure, including the status when available.
        message: String,
    },

    /// The provider answered, but the payload did not have the expected shape.
    #[error("{provider} returned an unexpected response: {message}")]
    InvalidResponse {
        /// Provider name.
        provider: &'static str,
        /// Description of the decoding problem.
        message: String,
    },
}

// ---------------------------------------------------------------------------

/// Classification of a [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorCode {
    /// The requested object does not exist.
    NotFound,
    /// A conditional write or delete found a different version.
    Conflict,
    /// Transport-level failure talking to the store.
    Network,
    /// Local filesystem failure.
    Io,
    /// The store rejected the request (authentication, bad request).
    Rejected,
}

/// Error returned by an [`crate::ports::ObjectStore`].
#[derive(Debug, Error)]
#[error("{code:?} for object '{key}': {message}")]
pub struct StoreError {
    /// What went wrong.
    pub code: StoreErrorCode,
    /// The object key involved.
    pub key: String,
    /// Human-readable detail.
    pub message: String,
}

impl StoreError {
    /// Creates a new store error.
    pub fn new(code: StoreErrorCode, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            key: key.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a [`StoreErrorCode::NotFound`] error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::NotFound, key, "object does not exist")
    }

    /// Shorthand for a [`StoreErrorCode::Conflict`] error.
    pub fn conflict(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::Conflict, key, message)
    }
}

// ---------------------------------------------------------------------------
// Workflow errors
// ---------------------------------------------------------------------------

/// Errors that abort a lifecycle phase.
#[derive(Debug, Error)]
pub enum DormancyError {
    /// The configuration is incomplete or names an unsupported organization.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// A signal source or mutation call failed. Fatal: there is no
    /// best-effort classification.
    #[error("{operation} failed")]
    Provider {
        /// What the workflow was doing, for example `"fetch org members"`.
        operation: &'static str,
        /// The underlying adapter error.
        #[source]
        source: ProviderError,
    },

    /// An object the workflow expects (the in-flight list or one of the
    /// exports) is absent.
    ///
    /// For the in-flight list this indicates a broken phase-1 run; it is never
    /// treated as "no dormant users".
    #[error("Expected object '{key}' is missing from the store")]
    StateMissing {
        /// The object key that was expected.
        key: String,
    },

    /// Another run changed the persisted state since this run observed it.
    #[error("State object '{key}' was modified concurrently: {message}")]
    StateConflict {
        /// The object key involved.
        key: String,
        /// Detail from the store.
        message: String,
    },

    /// Any other object store failure.
    #[error("Object store failure")]
    Store(#[source] StoreError),

    /// An external export or the persisted state could not be parsed.
    #[error("Malformed {document}: {message}")]
    MalformedDocument {
        /// Which document, for example `"dormant user export"`.
        document: String,
        /// Parser detail.
        message: String,
    },
}

impl DormancyError {
    /// Wraps a provider error with the operation that produced it.
    pub fn provider(operation: &'static str) -> impl FnOnce(ProviderError) -> Self {
        move |source| Self::Provider { operation, source }
    }

    /// Builds a [`DormancyError::MalformedDocument`].
    pub fn malformed(document: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::MalformedDocument {
            document: document.into(),
            message: message.to_string(),
        }
    }
}

impl From<StoreError> for DormancyError {
    fn from(err: StoreError) -> Self {
        match err.code {
            StoreErrorCode::NotFound => Self::StateMissing { key: err.key },
            StoreErrorCode::Conflict => Self::StateConflict {
                key: err.key,
                message: err.message,
            },
            _ => Self::Store(err),
        }
    }
}
