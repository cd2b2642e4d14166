//! Error types for sink configuration and sink writes

use thiserror::Error;

/// Errors raised while parsing descriptors or bringing sinks up.
///
/// These are cloneable so the one-shot initialization outcome can be handed to every
/// caller of [`crate::SinkManager::initialize`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required key is absent or blank
    #[error("sink {target}: missing required field `{field}`")]
    MissingField {
        /// Sink target, or `sink` when unknown
        target: String,
        /// The missing key
        field: String,
    },

    /// A key is present but its value is unusable
    #[error("sink {target}: invalid `{field}`: {reason}")]
    InvalidField {
        /// Sink target, or `sink` when unknown
        target: String,
        /// The offending key
        field: String,
        /// What was wrong
        reason: String,
    },

    /// A config has a blank `id`
    #[error("sink config {index} has an empty id")]
    BlankId {
        /// Position of the config in the list handed to initialize
        index: usize,
    },

    /// Two configs share an `id`
    #[error("sink id `{id}` is used more than once")]
    DuplicateId {
        /// The repeated id
        id: String,
    },

    /// No constructor registered for the target
    #[error("{target} not implemented yet")]
    NotImplemented {
        /// The unresolvable target
        target: String,
    },

    /// A descriptor's scheme or a tracing transport scheme is unusable
    #[error("invalid scheme `{scheme}`")]
    InvalidScheme {
        /// The scheme that was given
        scheme: String,
    },

    /// The combined protocol and host do not form a usable address
    #[error("invalid addr `{addr}`")]
    InvalidAddr {
        /// The combined address
        addr: String,
    },

    /// Category tags and descriptor arguments must pair up one to one
    #[error("{tags} category tags but {args} descriptor arguments")]
    DescriptorCountMismatch {
        /// Number of category tags
        tags: usize,
        /// Number of descriptor arguments
        args: usize,
    },

    /// A descriptor is not a parseable url
    #[error("invalid descriptor `{descriptor}`: {reason}")]
    InvalidDescriptor {
        /// The raw descriptor
        descriptor: String,
        /// Parser message
        reason: String,
    },

    /// A client or exporter could not be constructed
    #[error("sink {target}: failed to build exporter: {reason}")]
    Exporter {
        /// Sink target
        target: String,
        /// Construction failure
        reason: String,
    },
}

impl ConfigError {
    /// Create a MissingField error
    #[inline]
    pub fn missing(target: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            target: target.into(),
            field: field.into(),
        }
    }

    /// Create an InvalidField error
    #[inline]
    pub fn invalid(
        target: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            target: target.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an Exporter error
    #[inline]
    pub fn exporter(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::Exporter {
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors raised while writing points to sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Write was called before a successful initialize
    #[error("not inited")]
    NotInitialized,

    /// The category string is not one this crate knows
    #[error("unsupported category `{0}`")]
    UnsupportedCategory(String),

    /// The request could not be built or sent
    #[error("http request failed: {0}")]
    Http(String),

    /// The server answered outside the accepted status band
    #[error("unexpected status {code}: {body}")]
    Status {
        /// HTTP status code
        code: u16,
        /// Response body, empty when it could not be read
        body: String,
    },

    /// Socket failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The sink's own deadline elapsed
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Points could not be encoded for the wire
    #[error("encode failed: {0}")]
    Encode(String),

    /// A gRPC export failed
    #[error("grpc export failed: {0}")]
    Grpc(#[from] tonic::Status),

    /// Plain text mode needs a string `message` field on every point
    #[error("point `{point}` has no string `message` field")]
    MissingMessage {
        /// Name of the offending point
        point: String,
    },
}

impl From<hyper_util::client::legacy::Error> for SinkError {
    fn from(e: hyper_util::client::legacy::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<http::Error> for SinkError {
    fn from(e: http::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<hyper::Error> for SinkError {
    fn from(e: hyper::Error) -> Self {
        Self::Http(e.to_string())
    }
}
