//! Stream Engine
//!
//! At-least-once consumption of JSON-object envelopes over Redis Streams
//! consumer groups.
//!
//! ## Delivery model
//!
//! - **Producers** append one object per entry; each top-level key becomes a
//!   field holding that value's JSON encoding.
//! - **Consumers** read with `XREADGROUP`, run the handler once per entry in
//!   delivery order, then remove the entry with a single `XACKDEL`, whether
//!   the handler succeeded or not.
//! - **Crash recovery**: entries left pending by a dead consumer are taken
//!   over by `XAUTOCLAIM` after `claim_min_idle_ms` and dispatched again.
//! - **Malformed entries** (fields that are not valid JSON) never reach the
//!   handler; they are logged, counted and removed.
//!
//! ## Example
//!
//! ```ignore
//! use stream_engine::{EngineConfig, Envelope, StreamEngine, handler_fn};
//! use core_config::FromEnv;
//!
//! let config = EngineConfig::from_env()?;
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!
//! let handler = handler_fn("audit", |envelope: Envelope| async move {
//!     tracing::info!(user = ?envelope.get("userId"), "audit event");
//!     Ok(())
//! });
//!
//! StreamEngine::start(config, "audit:events", "audit_workers", handler, shutdown_rx).await?;
//! ```

pub mod codec;
mod config;
pub mod connection;
mod consumer;
mod dispatcher;
mod engine;
mod envelope;
mod error;
mod handler;
pub mod health;
pub mod metrics;
mod producer;
mod registry;

pub use codec::{DecodePolicy, Decoded};
pub use config::EngineConfig;
pub use connection::RetryConfig;
pub use consumer::{AckDeletePolicy, StreamConsumer, StreamInfo};
pub use dispatcher::{Acknowledge, ConsumerStats, DispatchOutcome, Dispatcher, StatsSnapshot};
pub use engine::{StreamEngine, Subscription};
pub use envelope::{Envelope, StreamEntry};
pub use error::{EngineStartupError, StreamError};
pub use handler::{EnvelopeHandler, FnHandler, handler_fn};
pub use health::{HealthState, health_router};
pub use metrics::{EngineMetrics, init_metrics};
pub use producer::StreamProducer;
pub use registry::StreamDef;
