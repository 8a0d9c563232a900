//! Stream consumer for Redis operations
//!
//! Thin wrappers around the group commands the engine needs:
//! `XGROUP CREATE`, `XREADGROUP`, `XAUTOCLAIM`, `XACKDEL` and `XPENDING`.
//!
//! `XREADGROUP ... BLOCK` parks its whole connection on the server, so it
//! runs on a connection of its own. Everything else shares the command
//! connection.

use crate::config::EngineConfig;
use crate::envelope::{RawEntry, StreamEntry};
use crate::error::{self, StreamError};
use redis::aio::ConnectionManager;
use redis::streams::StreamPendingReply;
use redis::{AsyncCommands, RedisResult};
use serde::Serialize;
use strum::{AsRefStr, Display, EnumString};
use tracing::{debug, info, warn};

/// Deletion mode of `XACKDEL`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum AckDeletePolicy {
    /// Delete, keeping references in other groups' pending lists
    KeepRef,
    /// Delete and drop references from every group's pending list
    DelRef,
    /// Delete only once every group has acknowledged the entry
    #[default]
    Acked,
}

/// `XREADGROUP` reply: `[[stream, [entry, ...]], ...]`, nil when the block
/// expired
type ReadReply = Option<Vec<(String, Vec<RawEntry>)>>;

/// `XAUTOCLAIM` reply: next cursor, claimed entries, deleted IDs
type AutoClaimReply = (String, Vec<RawEntry>, Vec<String>);

/// Consumer bound to one stream, one group and one consumer name
#[derive(Clone)]
pub struct StreamConsumer {
    redis: ConnectionManager,
    reader: ConnectionManager,
    config: EngineConfig,
    stream_name: String,
    group_name: String,
}

impl StreamConsumer {
    /// `redis` carries commands; `reader` is reserved for blocking reads
    /// and must not be shared with anything else.
    pub fn new(
        redis: ConnectionManager,
        reader: ConnectionManager,
        config: EngineConfig,
        stream_name: impl Into<String>,
        group_name: impl Into<String>,
    ) -> Self {
        Self {
            redis,
            reader,
            config,
            stream_name: stream_name.into(),
            group_name: group_name.into(),
        }
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    pub fn consumer_name(&self) -> &str {
        &self.config.consumer_name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create the consumer group if it doesn't exist.
    ///
    /// The group starts at `$` (only entries appended from now on) and the
    /// stream is created when missing. Returns `true` when the group was
    /// created, `false` when it already existed.
    pub async fn ensure_group(&self) -> Result<bool, StreamError> {
        let mut conn = self.redis.clone();

        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_name)
            .arg(&self.group_name)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                info!(
                    stream = %self.stream_name,
                    group = %self.group_name,
                    "Created consumer group"
                );
                Ok(true)
            }
            Err(e) if error::is_busygroup(&e) => {
                debug!(
                    stream = %self.stream_name,
                    group = %self.group_name,
                    "Consumer group already exists"
                );
                Ok(false)
            }
            Err(e) => Err(StreamError::Redis(e)),
        }
    }

    /// Block for up to `read_block_ms` waiting for new entries.
    ///
    /// An empty vector means the block expired with nothing to read. Any
    /// error, a client-side timeout included, is returned: the server may
    /// already have handed entries to this consumer.
    pub async fn read_batch(&self) -> Result<Vec<StreamEntry>, StreamError> {
        let mut conn = self.reader.clone();

        let reply: ReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group_name)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(self.config.batch_size)
            .arg("BLOCK")
            .arg(self.config.read_block_ms)
            .arg("STREAMS")
            .arg(&self.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let Some(streams) = reply else {
            return Ok(vec![]);
        };

        let mut entries = Vec::new();
        for (stream, raw_entries) in streams {
            debug!(
                stream = %stream,
                consumer = %self.config.consumer_name,
                count = raw_entries.len(),
                "Received entries"
            );
            entries.extend(raw_entries.into_iter().filter_map(StreamEntry::from_raw));
        }
        Ok(entries)
    }

    /// Take ownership of entries idle for at least `claim_min_idle_ms`.
    ///
    /// Scans the group's pending list from `0-0`, up to `batch_size` entries.
    /// Entries deleted while pending are dropped by the broker and skipped.
    pub async fn auto_claim(&self) -> Result<Vec<StreamEntry>, StreamError> {
        let mut conn = self.redis.clone();

        let (_cursor, claimed, deleted): AutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.stream_name)
            .arg(&self.group_name)
            .arg(&self.config.consumer_name)
            .arg(self.config.claim_min_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(self.config.batch_size)
            .query_async(&mut conn)
            .await?;

        if !deleted.is_empty() {
            debug!(
                stream = %self.stream_name,
                count = deleted.len(),
                "Dropped pending references to deleted entries"
            );
        }

        let entries: Vec<StreamEntry> = claimed
            .into_iter()
            .filter_map(StreamEntry::from_raw)
            .collect();

        if !entries.is_empty() {
            warn!(
                stream = %self.stream_name,
                consumer = %self.config.consumer_name,
                count = entries.len(),
                "Claimed abandoned entries"
            );
        }

        Ok(entries)
    }

    /// Acknowledge and delete one entry in a single `XACKDEL` call.
    pub async fn ack_delete(&self, entry_id: &str) -> Result<(), StreamError> {
        let mut conn = self.redis.clone();

        let codes: Vec<i64> = redis::cmd("XACKDEL")
            .arg(&self.stream_name)
            .arg(&self.group_name)
            .arg(self.config.ack_delete_policy.to_string())
            .arg("IDS")
            .arg(1)
            .arg(entry_id)
            .query_async(&mut conn)
            .await?;

        debug!(
            entry_id = %entry_id,
            result = ?codes.first(),
            "Acknowledged and deleted entry"
        );
        Ok(())
    }

    /// Number of entries delivered to the group but not yet acknowledged
    pub async fn pending_count(&self) -> Result<usize, StreamError> {
        let mut conn = self.redis.clone();

        let result: RedisResult<StreamPendingReply> =
            conn.xpending(&self.stream_name, &self.group_name).await;

        match result {
            Ok(reply) => Ok(reply.count()),
            Err(e) if error::is_nogroup(&e) => Ok(0),
            Err(e) => Err(StreamError::Redis(e)),
        }
    }

    /// Round-trip a `PING`
    pub async fn ping(&self) -> Result<String, StreamError> {
        let mut conn = self.redis.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong)
    }

    /// Stream length and pending count for monitoring
    pub async fn stream_info(&self) -> Result<StreamInfo, StreamError> {
        let mut conn = self.redis.clone();

        let length: usize = conn.xlen(&self.stream_name).await?;
        let pending_count = self.pending_count().await?;

        Ok(StreamInfo {
            stream_name: self.stream_name.clone(),
            consumer_group: self.group_name.clone(),
            length,
            pending_count,
        })
    }
}

/// Stream information
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub stream_name: String,
    pub consumer_group: String,
    pub length: usize,
    pub pending_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_delete_policy_wire_names() {
        assert_eq!(AckDeletePolicy::Acked.as_ref(), "ACKED");
        assert_eq!(AckDeletePolicy::KeepRef.as_ref(), "KEEPREF");
        assert_eq!(AckDeletePolicy::DelRef.to_string(), "DELREF");
    }

    #[test]
    fn test_ack_delete_policy_parsing() {
        assert_eq!("acked".parse::<AckDeletePolicy>().unwrap(), AckDeletePolicy::Acked);
        assert_eq!("KeepRef".parse::<AckDeletePolicy>().unwrap(), AckDeletePolicy::KeepRef);
        assert!("purge".parse::<AckDeletePolicy>().is_err());
    }

    #[test]
    fn test_stream_info_serialization() {
        let info = StreamInfo {
            stream_name: "completions".to_string(),
            consumer_group: "completion_workers".to_string(),
            length: 4,
            pending_count: 1,
        };

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["length"], 4);
        assert_eq!(json["pending_count"], 1);
    }
}
