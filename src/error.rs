//! Typed error hierarchy for the dep-client crate.
//!
//! `DepError` is the single error type returned by every public operation.
//! Each variant maps to one failure boundary of the client:
//!
//! - `ConfigNotFound` / `Store`: the credential store could not produce
//!   usable material for a configuration name.
//! - `Auth`: the session handshake was rejected, or an operation was still
//!   rejected as expired after one re-authentication.
//! - `Transport`: the request never produced an HTTP status (DNS, TCP, TLS,
//!   timeout).
//! - `Protocol`: a 2xx response whose body did not match the expected shape.
//! - `Validation` / `NotFound`: domain-level 4xx responses.
//! - `Server`: 5xx responses.
//! - `Unknown`: any other status the API should never return.
//!
//! Errors are `Clone`: inner sources live behind `Arc` so a single failed
//! handshake can be handed to every caller that was waiting on it.

use std::sync::Arc;

use reqwest::StatusCode;

/// Coarse classification of a [`DepError`], for callers that branch on the
/// failure category rather than on individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No configuration or credentials exist for the requested name.
    Config,
    /// The credential store backend failed.
    Store,
    /// Credentials or the session token were rejected.
    Auth,
    /// Network-level failure with no HTTP status.
    Transport,
    /// A request body could not be encoded, or a 2xx body could not be
    /// decoded.
    Protocol,
    /// The server rejected the request payload (4xx other than 404).
    Validation,
    /// The server reported that the addressed resource does not exist.
    NotFound,
    /// The server failed (5xx).
    Server,
    /// A status outside the ranges the API documents.
    Unknown,
}

/// Unified error type for all dep-client operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DepError {
    /// The credential store has no entry for this configuration name.
    /// Also returned for an empty name, which can never be configured.
    #[error("no DEP configuration found for name {name:?}")]
    ConfigNotFound {
        /// The configuration name that was looked up.
        name: String,
    },

    /// The credential store backend failed to read or write.
    #[error("credential store error: {message}")]
    Store {
        /// What the store was doing when it failed.
        message: String,
        /// The underlying I/O or parse error, if any.
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },

    /// Authentication failed.
    ///
    /// Covers a rejected session handshake (bad or revoked OAuth tokens), an
    /// unusable handshake payload, and an operation that still reported an
    /// expired session after the single re-authentication attempt.
    #[error("authentication failed for {name:?}: {message}")]
    Auth {
        /// The configuration name whose session was rejected.
        name: String,
        /// The HTTP status of the rejecting response, when there was one.
        status: Option<StatusCode>,
        /// The server's response body or a description of the failure.
        message: String,
    },

    /// A network-level failure occurred before any HTTP status was received.
    #[error("network error: {0}")]
    Transport(#[source] Arc<reqwest::Error>),

    /// A request payload could not be serialized to JSON. Nothing was sent.
    #[error("failed to encode request body: {0}")]
    Encode(#[source] Arc<serde_json::Error>),

    /// The server answered with a success status but the body did not match
    /// the shape the operation expects.
    #[error("failed to parse {status} response: {source}")]
    Protocol {
        /// The (successful) status code the server sent.
        status: StatusCode,
        /// The raw body that failed to decode.
        body: String,
        /// The deserialization error.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// The server rejected the request (4xx other than 404 and the session
    /// expiry signal). Apple reports codes such as `INVALID_PROFILE` or
    /// `MALFORMED_REQUEST_BODY` here.
    #[error("request rejected ({status}): {body}")]
    Validation {
        /// The HTTP status code.
        status: StatusCode,
        /// Error code extracted from the body, when one was recognizable.
        code: Option<String>,
        /// The raw response body.
        body: String,
    },

    /// The server reported 404 for the addressed resource.
    #[error("not found ({status}): {body}")]
    NotFound {
        /// The HTTP status code.
        status: StatusCode,
        /// Error code extracted from the body, when one was recognizable.
        code: Option<String>,
        /// The raw response body.
        body: String,
    },

    /// The server failed with a 5xx status. Never retried by the client.
    #[error("server error ({status}): {body}")]
    Server {
        /// The HTTP status code.
        status: StatusCode,
        /// The raw response body.
        body: String,
    },

    /// The server answered with a status outside 2xx/4xx/5xx.
    #[error("unexpected status {status}: {body}")]
    Unknown {
        /// The HTTP status code.
        status: StatusCode,
        /// The raw response body.
        body: String,
    },
}

impl DepError {
    /// Returns the failure category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DepError::ConfigNotFound { .. } => ErrorKind::Config,
            DepError::Store { .. } => ErrorKind::Store,
            DepError::Auth { .. } => ErrorKind::Auth,
            DepError::Transport(_) => ErrorKind::Transport,
            DepError::Encode(_) | DepError::Protocol { .. } => ErrorKind::Protocol,
            DepError::Validation { .. } => ErrorKind::Validation,
            DepError::NotFound { .. } => ErrorKind::NotFound,
            DepError::Server { .. } => ErrorKind::Server,
            DepError::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// The HTTP status code attached to this error, if the failure came from
    /// an HTTP response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DepError::Auth { status, .. } => *status,
            DepError::Protocol { status, .. }
            | DepError::Validation { status, .. }
            | DepError::NotFound { status, .. }
            | DepError::Server { status, .. }
            | DepError::Unknown { status, .. } => Some(*status),
            DepError::ConfigNotFound { .. }
            | DepError::Store { .. }
            | DepError::Transport(_)
            | DepError::Encode(_) => None,
        }
    }

    /// The raw response body attached to this error, if any.
    pub fn body(&self) -> Option<&str> {
        match self {
            DepError::Protocol { body, .. }
            | DepError::Validation { body, .. }
            | DepError::NotFound { body, .. }
            | DepError::Server { body, .. }
            | DepError::Unknown { body, .. } => Some(body),
            DepError::Auth { message, status: Some(_), .. } => Some(message),
            _ => None,
        }
    }

    /// The API error code (e.g. `INVALID_PROFILE`) for domain-level 4xx
    /// errors.
    pub fn code(&self) -> Option<&str> {
        match self {
            DepError::Validation { code, .. } | DepError::NotFound { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Builds a `Store` error from any backend error.
    pub fn store<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DepError::Store {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }
}

impl From<reqwest::Error> for DepError {
    fn from(err: reqwest::Error) -> Self {
        DepError::Transport(Arc::new(err))
    }
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, DepError>;
