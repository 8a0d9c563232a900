//! Engine error types
//!
//! - [`StreamError`]: anything a single producer or consumer operation can
//!   fail with. None of these stop a running read loop.
//! - [`EngineStartupError`]: the two fatal startup failures. Returned to the
//!   caller, which decides the exit policy.

use thiserror::Error;

/// Stream operation errors
#[derive(Error, Debug)]
pub enum StreamError {
    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Payload handed to the producer is not a JSON object
    #[error("Invalid payload kind: expected a JSON object, got {kind}")]
    InvalidPayloadKind { kind: &'static str },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error raised by an envelope handler
    #[error("Handler error: {0}")]
    Handler(String),
}

impl StreamError {
    /// Create a handler error from any displayable value
    pub fn handler(message: impl std::fmt::Display) -> Self {
        StreamError::Handler(message.to_string())
    }

    /// The consumer group (or the stream) does not exist
    pub fn is_nogroup(&self) -> bool {
        matches!(self, StreamError::Redis(e) if is_nogroup(e))
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Serialization(err.to_string())
    }
}

/// Fatal errors while bringing an engine up
#[derive(Error, Debug)]
pub enum EngineStartupError {
    /// Could not open the Redis connection
    #[error("Failed to connect to Redis: {0}")]
    Connect(#[source] redis::RedisError),

    /// Group creation failed for a reason other than "already exists"
    #[error("Failed to create consumer group '{group}' on stream '{stream}': {source}")]
    EnsureGroup {
        stream: String,
        group: String,
        #[source]
        source: StreamError,
    },
}

/// `NOGROUP` is reported when either the key or the group is missing
pub(crate) fn is_nogroup(err: &redis::RedisError) -> bool {
    mentions_code(&err.to_string(), "NOGROUP")
}

/// `BUSYGROUP` is reported by `XGROUP CREATE` for an existing group
pub(crate) fn is_busygroup(err: &redis::RedisError) -> bool {
    mentions_code(&err.to_string(), "BUSYGROUP")
}

fn mentions_code(message: &str, code: &str) -> bool {
    message.contains(code)
}
