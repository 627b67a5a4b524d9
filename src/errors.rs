//! Closed error taxonomy for the transport core.
//!
//! Every failure a caller can observe maps to exactly one of these kinds;
//! the retry loop in [`crate::transport`] dispatches on the variant rather
//! than on messages or downcasts.

use thiserror::Error;

use crate::transport::{HttpResponse, RequestMeta};

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors that can occur in transport operations
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Invalid setup; fails fast at construction or at a string boundary,
    /// never retried
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The underlying connection failed (reset, refused, broken socket)
    #[error("connection error: {message}")]
    Connection {
        /// Human-readable failure description
        message: String,
        /// Request metadata captured at the point of failure
        meta: Option<Box<RequestMeta>>,
    },

    /// The request exceeded its time budget
    #[error("request timed out: {message}")]
    Timeout {
        /// Human-readable failure description
        message: String,
        /// Request metadata captured at the point of failure
        meta: Option<Box<RequestMeta>>,
    },

    /// The pool has no connection to offer
    #[error("no living connections: the pool is empty")]
    NoLivingConnections {
        /// Request metadata captured at the point of failure
        meta: Option<Box<RequestMeta>>,
    },

    /// The request body could not be serialized
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The response body could not be deserialized
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The caller cancelled the request
    #[error("request aborted")]
    RequestAborted {
        /// Request metadata captured at the point of cancellation
        meta: Option<Box<RequestMeta>>,
    },

    /// The server answered with a non-2xx status the caller did not ignore
    #[error("response error: status code {}", .0.status)]
    Response(Box<HttpResponse>),

    /// Produced by a validation layer above this core; carried through
    /// unchanged
    #[error("the server is not a supported product: {0}")]
    ProductNotSupported(String),
}

impl TransportError {
    /// Whether the retry loop may re-attempt the request after this error.
    ///
    /// Only connection-level and timeout failures are retryable; everything
    /// else is terminal because a retry would repeat the same outcome.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Attach request metadata to the variants that carry it.
    ///
    /// Connector implementations report bare errors; the transport attaches
    /// the per-call metadata before surfacing them so callers always see
    /// attempts and the last connection used.
    pub fn with_meta(self, meta: RequestMeta) -> Self {
        let meta = Some(Box::new(meta));
        match self {
            Self::Connection { message, .. } => Self::Connection { message, meta },
            Self::Timeout { message, .. } => Self::Timeout { message, meta },
            Self::NoLivingConnections { .. } => Self::NoLivingConnections { meta },
            Self::RequestAborted { .. } => Self::RequestAborted { meta },
            other => other,
        }
    }

    /// Request metadata attached to this error, if any
    pub fn meta(&self) -> Option<&RequestMeta> {
        match self {
            Self::Connection { meta, .. }
            | Self::Timeout { meta, .. }
            | Self::NoLivingConnections { meta }
            | Self::RequestAborted { meta } => meta.as_deref(),
            Self::Response(response) => Some(&response.meta),
            _ => None,
        }
    }

    /// Shorthand for a connection-level error without metadata
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            meta: None,
        }
    }

    /// Shorthand for a timeout error without metadata
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
            meta: None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::timeout(err.to_string()),
            _ => Self::connection(err.to_string()),
        }
    }
}
