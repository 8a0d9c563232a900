//! Consumption lifecycle
//!
//! [`StreamEngine`] owns the command connection and a config. Each call to
//! [`StreamEngine::subscribe`] opens a blocking read connection, binds a
//! handler to one stream and group and yields a [`Subscription`] whose loop
//! is:
//!
//! ```text
//! XREADGROUP (block) -> dispatch each entry in order -> XAUTOCLAIM sweep -> repeat
//! ```
//!
//! The loop stops when the shutdown channel flips to `true` (or its sender
//! is dropped). Shutdown is immediate: a handler in flight is dropped and
//! its entry stays pending until a sweep reclaims it.

use crate::config::EngineConfig;
use crate::connection::{self, RetryConfig, read_error_backoff};
use crate::consumer::StreamConsumer;
use crate::dispatcher::{ConsumerStats, Dispatcher};
use crate::error::EngineStartupError;
use crate::handler::EnvelopeHandler;
use crate::metrics::EngineMetrics;
use crate::producer::StreamProducer;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Command connection plus configuration, shared by every subscription
#[derive(Clone)]
pub struct StreamEngine {
    redis: ConnectionManager,
    config: EngineConfig,
}

impl StreamEngine {
    fn new(redis: ConnectionManager, config: EngineConfig) -> Self {
        Self { redis, config }
    }

    /// Connect to `config.redis_url`, retrying with backoff
    pub async fn connect(config: EngineConfig) -> Result<Self, EngineStartupError> {
        Self::connect_with_retry(config, &RetryConfig::default()).await
    }

    pub async fn connect_with_retry(
        config: EngineConfig,
        retry: &RetryConfig,
    ) -> Result<Self, EngineStartupError> {
        let redis = connection::connect_with_retry(&config.redis_url, retry)
            .await
            .map_err(EngineStartupError::Connect)?;
        Ok(Self::new(redis, config))
    }

    /// A producer sharing this engine's connection
    pub fn producer(&self) -> StreamProducer {
        StreamProducer::new(self.redis.clone())
    }

    /// Bind `handler` to `stream`/`group` without starting anything.
    ///
    /// Opens the subscription's own blocking read connection.
    pub async fn subscribe(
        &self,
        stream: &str,
        group: &str,
        handler: impl EnvelopeHandler + 'static,
    ) -> Result<Subscription, EngineStartupError> {
        let reader =
            connection::connect_blocking(&self.config.redis_url, self.config.read_block())
                .await
                .map_err(EngineStartupError::Connect)?;

        let consumer = StreamConsumer::new(
            self.redis.clone(),
            reader,
            self.config.clone(),
            stream,
            group,
        );
        let dispatcher = Dispatcher::new(Arc::new(handler), &self.config, stream, group);
        Ok(Subscription {
            consumer,
            dispatcher,
        })
    }

    /// Ensure the group exists, then consume until shutdown.
    pub async fn consume(
        &self,
        stream: &str,
        group: &str,
        handler: impl EnvelopeHandler + 'static,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), EngineStartupError> {
        let subscription = self.subscribe(stream, group, handler).await?;
        subscription.ensure_group().await?;
        subscription.run(shutdown).await;
        Ok(())
    }

    /// Connect, ensure the group, consume until shutdown.
    ///
    /// The caller owns signal handling: create the shutdown channel and wire
    /// signals to it before calling this. Returns `Ok(())` after a shutdown
    /// and an error only for the two fatal startup failures.
    pub async fn start(
        config: EngineConfig,
        stream: &str,
        group: &str,
        handler: impl EnvelopeHandler + 'static,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), EngineStartupError> {
        let engine = Self::connect(config).await?;
        engine.consume(stream, group, handler, shutdown).await
    }
}

/// One handler consuming one stream as one group member
pub struct Subscription {
    consumer: StreamConsumer,
    dispatcher: Dispatcher,
}

impl Subscription {
    pub fn consumer(&self) -> &StreamConsumer {
        &self.consumer
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.dispatcher.stats()
    }

    pub fn metrics(&self) -> &EngineMetrics {
        self.dispatcher.metrics()
    }

    /// Create the consumer group, mapping failure to a startup error
    pub async fn ensure_group(&self) -> Result<bool, EngineStartupError> {
        self.consumer
            .ensure_group()
            .await
            .map_err(|source| EngineStartupError::EnsureGroup {
                stream: self.consumer.stream_name().to_string(),
                group: self.consumer.group_name().to_string(),
                source,
            })
    }

    /// Run the read loop until `shutdown` becomes `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let config = self.consumer.config();
        info!(
            stream = %self.consumer.stream_name(),
            group = %self.consumer.group_name(),
            consumer = %self.consumer.consumer_name(),
            handler = %self.dispatcher.handler_name(),
            batch_size = config.batch_size,
            read_block_ms = config.read_block_ms,
            claim_min_idle_ms = config.claim_min_idle_ms,
            "Consumer ready"
        );

        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => {
                info!(
                    stream = %self.consumer.stream_name(),
                    consumer = %self.consumer.consumer_name(),
                    "Received shutdown signal, stopping consumer"
                );
            }
            _ = self.read_loop() => {}
        }
    }

    async fn read_loop(&self) {
        let mut consecutive_errors: u32 = 0;

        loop {
            match self.consumer.read_batch().await {
                Ok(entries) => {
                    if consecutive_errors > 0 {
                        info!(consecutive_errors, "Reads recovered");
                        consecutive_errors = 0;
                    }
                    for entry in &entries {
                        self.dispatcher.process_entry(&self.consumer, entry).await;
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    if e.is_nogroup() && self.recreate_group().await {
                        continue;
                    }
                    let backoff = read_error_backoff(consecutive_errors);
                    warn!(
                        stream = %self.consumer.stream_name(),
                        error = %e,
                        consecutive_errors,
                        backoff_secs = backoff.as_secs(),
                        "Read failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            }

            self.sweep_claims().await;
        }
    }

    async fn recreate_group(&self) -> bool {
        warn!(
            stream = %self.consumer.stream_name(),
            group = %self.consumer.group_name(),
            "Consumer group missing, recreating"
        );
        match self.consumer.ensure_group().await {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "Failed to recreate consumer group");
                false
            }
        }
    }

    /// Reclaim idle pending entries and dispatch them. Returns how many
    /// entries were claimed.
    pub async fn sweep_claims(&self) -> usize {
        let entries = match self.consumer.auto_claim().await {
            Ok(entries) => entries,
            Err(e) if e.is_nogroup() => {
                debug!(error = %e, "Claim sweep skipped, group missing");
                return 0;
            }
            Err(e) => {
                warn!(
                    stream = %self.consumer.stream_name(),
                    error = %e,
                    "Claim sweep failed"
                );
                return 0;
            }
        };

        if !entries.is_empty() {
            self.dispatcher.stats().record_claimed(entries.len());
            self.metrics().entries_claimed(entries.len());
        }
        for entry in &entries {
            self.dispatcher.process_entry(&self.consumer, entry).await;
        }
        entries.len()
    }
}
