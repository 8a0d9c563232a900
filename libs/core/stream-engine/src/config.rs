//! Engine configuration
//!
//! `EngineConfig` is built once at process start (from the environment or
//! with the builder methods) and passed by value into the producer, the
//! consumer and the engine. Nothing reads configuration lazily.

use crate::codec::DecodePolicy;
use crate::consumer::AckDeletePolicy;
use core_config::{ConfigError, FromEnv, env_first, env_parse};
use std::time::Duration;
use uuid::Uuid;

/// Configuration for producers and the consumption engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Redis connection URL
    pub redis_url: String,

    /// Consumer name inside the group, unique per process
    pub consumer_name: String,

    /// Handlers running longer than this are logged as slow (never cancelled)
    pub processing_timeout_ms: u64,

    /// Pending entries idle for at least this long are reclaimed
    pub claim_min_idle_ms: u64,

    /// How long a read blocks waiting for new entries
    pub read_block_ms: u64,

    /// Maximum entries per read and per claim sweep
    pub batch_size: usize,

    /// What to do with field values that are not valid JSON
    pub decode_policy: DecodePolicy,

    /// Deletion mode passed to `XACKDEL`
    pub ack_delete_policy: AckDeletePolicy,
}

impl EngineConfig {
    /// Create a config with defaults and a fresh consumer name
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            consumer_name: Self::generate_consumer_name(),
            processing_timeout_ms: 60_000,
            claim_min_idle_ms: 30_000,
            read_block_ms: 5_000,
            batch_size: 10,
            decode_policy: DecodePolicy::default(),
            ack_delete_policy: AckDeletePolicy::default(),
        }
    }

    /// `worker-<uuid>`, unique enough to avoid two processes sharing a name
    pub fn generate_consumer_name() -> String {
        format!("worker-{}", Uuid::new_v4())
    }

    /// Set the consumer name
    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = name.into();
        self
    }

    /// Set the slow-handler warning threshold
    pub fn with_processing_timeout_ms(mut self, timeout: u64) -> Self {
        self.processing_timeout_ms = timeout;
        self
    }

    /// Set the idle threshold for reclaiming pending entries
    pub fn with_claim_min_idle_ms(mut self, idle: u64) -> Self {
        self.claim_min_idle_ms = idle;
        self
    }

    /// Set the blocking read timeout
    pub fn with_read_block_ms(mut self, block: u64) -> Self {
        self.read_block_ms = block;
        self
    }

    /// Set the batch size (at least 1)
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the decode policy
    pub fn with_decode_policy(mut self, policy: DecodePolicy) -> Self {
        self.decode_policy = policy;
        self
    }

    /// Set the `XACKDEL` deletion mode
    pub fn with_ack_delete_policy(mut self, policy: AckDeletePolicy) -> Self {
        self.ack_delete_policy = policy;
        self
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_millis(self.processing_timeout_ms)
    }

    pub fn read_block(&self) -> Duration {
        Duration::from_millis(self.read_block_ms)
    }
}

impl FromEnv for EngineConfig {
    /// Environment variables:
    /// - `REDIS_URL` or `REDIS_HOST` (required)
    /// - `STREAM_CONSUMER_NAME` (default: `worker-<uuid>`)
    /// - `STREAM_PROCESSING_TIMEOUT_MS` (default: 60000)
    /// - `STREAM_CLAIM_MIN_IDLE_MS` (default: 30000)
    /// - `STREAM_READ_BLOCK_MS` (default: 5000)
    /// - `STREAM_BATCH_SIZE` (default: 10)
    /// - `STREAM_DECODE_POLICY`: `strict` | `lenient` (default: strict)
    /// - `STREAM_ACK_DELETE_POLICY`: `acked` | `keepref` | `delref` (default: acked)
    fn from_env() -> Result<Self, ConfigError> {
        let redis_url = env_first(&["REDIS_URL", "REDIS_HOST"])
            .ok_or_else(|| ConfigError::MissingEnvVar("REDIS_URL or REDIS_HOST".to_string()))?;

        let defaults = Self::new(redis_url);
        let consumer_name =
            env_first(&["STREAM_CONSUMER_NAME"]).unwrap_or(defaults.consumer_name.clone());

        Ok(defaults
            .with_consumer_name(consumer_name)
            .with_processing_timeout_ms(env_parse("STREAM_PROCESSING_TIMEOUT_MS", 60_000)?)
            .with_claim_min_idle_ms(env_parse("STREAM_CLAIM_MIN_IDLE_MS", 30_000)?)
            .with_read_block_ms(env_parse("STREAM_READ_BLOCK_MS", 5_000)?)
            .with_batch_size(env_parse("STREAM_BATCH_SIZE", 10)?)
            .with_decode_policy(env_parse("STREAM_DECODE_POLICY", DecodePolicy::Strict)?)
            .with_ack_delete_policy(env_parse(
                "STREAM_ACK_DELETE_POLICY",
                AckDeletePolicy::Acked,
            )?))
    }
}
