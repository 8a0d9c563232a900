//! Stream producer
//!
//! Appends one JSON object per entry. Only objects are accepted: anything
//! else fails before a command is sent.
//!
//! # Example
//!
//! ```rust,ignore
//! use stream_engine::StreamProducer;
//!
//! let producer = StreamProducer::new(redis);
//! let id = producer
//!     .publish("completions", &json!({"conversationId": "c-1", "messageId": "m-9"}))
//!     .await?;
//! ```

use crate::codec;
use crate::error::StreamError;
use crate::registry::StreamDef;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Publishes envelopes to any stream
#[derive(Clone)]
pub struct StreamProducer {
    redis: ConnectionManager,
    max_length: Option<usize>,
}

impl StreamProducer {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            max_length: None,
        }
    }

    /// Trim streams to roughly `max_length` entries on every append
    /// (`MAXLEN ~`). Trimming can drop entries that are still pending.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Append `payload` to `stream`.
    ///
    /// Returns the entry ID assigned by Redis.
    pub async fn publish(&self, stream: &str, payload: &Value) -> Result<String, StreamError> {
        let fields = codec::encode_value(payload)?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream);
        if let Some(max_length) = self.max_length {
            cmd.arg("MAXLEN").arg("~").arg(max_length);
        }
        cmd.arg("*");
        for (field, value) in &fields {
            cmd.arg(field).arg(value);
        }

        let mut conn = self.redis.clone();
        let entry_id: String = cmd.query_async(&mut conn).await?;

        debug!(
            stream = %stream,
            entry_id = %entry_id,
            fields = fields.len(),
            "Published entry"
        );

        Ok(entry_id)
    }

    /// Serialize `payload` and publish it. The serialized form must be an
    /// object.
    pub async fn publish_json<T: Serialize>(
        &self,
        stream: &str,
        payload: &T,
    ) -> Result<String, StreamError> {
        let value = serde_json::to_value(payload)?;
        self.publish(stream, &value).await
    }

    /// Publish to the stream named by a [`StreamDef`]
    pub async fn publish_to<S: StreamDef, T: Serialize>(
        &self,
        payload: &T,
    ) -> Result<String, StreamError> {
        self.publish_json(S::STREAM_NAME, payload).await
    }

    /// Current number of entries in `stream`
    pub async fn stream_length(&self, stream: &str) -> Result<usize, StreamError> {
        let mut conn = self.redis.clone();
        let length: usize = conn.xlen(stream).await?;
        Ok(length)
    }
}
