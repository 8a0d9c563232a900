//! Completion Worker Service
//!
//! Drains the completions stream: each entry asks for one assistant message
//! to be completed in a conversation.
//!
//! ## Architecture
//!
//! ```text
//! enqueue CLI / API
//!   ↓ XADD (one JSON object per entry)
//! Redis Stream (completions)
//!   ↓ (Consumer Group: completion_workers)
//! StreamEngine -> CompletionHandler
//!   ↓ XACKDEL
//! ```

use async_trait::async_trait;
use axum::Router;
use core_config::{ConfigError, Environment, FromEnv, app_info, env_or_default, env_parse};
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use stream_engine::{
    EngineConfig, Envelope, EnvelopeHandler, HealthState, StreamDef, StreamEngine, StreamError,
    health_router, metrics,
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// The completions stream and its worker group
pub struct CompletionStream;

impl StreamDef for CompletionStream {
    const STREAM_NAME: &'static str = "completions";
    const CONSUMER_GROUP: &'static str = "completion_workers";
}

/// One completion job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    pub conversation_id: String,
    pub message_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Handles completion requests
pub struct CompletionHandler;

#[async_trait]
impl EnvelopeHandler for CompletionHandler {
    async fn handle(&self, envelope: Envelope) -> Result<(), StreamError> {
        let request: CompletionRequest = envelope.deserialize()?;

        info!(
            conversation_id = %request.conversation_id,
            message_id = %request.message_id,
            agent_id = ?request.agent_id,
            model = ?request.model,
            "Completion requested"
        );

        Ok(())
    }

    fn name(&self) -> &str {
        "completion"
    }
}

/// Worker process settings
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub stream: String,
    pub group: String,
    pub health_port: u16,
}

impl FromEnv for WorkerSettings {
    /// - `COMPLETION_STREAM` (default: `completions`)
    /// - `COMPLETION_GROUP` (default: `completion_workers`)
    /// - `HEALTH_PORT` (default: 8082)
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            stream: env_or_default("COMPLETION_STREAM", CompletionStream::STREAM_NAME),
            group: env_or_default("COMPLETION_GROUP", CompletionStream::CONSUMER_GROUP),
            health_port: env_parse("HEALTH_PORT", 8082)?,
        })
    }
}

/// Serve health, readiness, stream info and metrics
async fn start_health_server(health_state: HealthState, port: u16) -> Result<()> {
    let app: Router = health_router(health_state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(port = %port, "Health server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Run the completion worker
///
/// 1. Sets up structured logging (JSON in production, pretty in development)
/// 2. Installs the shutdown handler before anything touches Redis
/// 3. Connects, ensures the consumer group and serves health endpoints
/// 4. Consumes until SIGINT/SIGTERM
///
/// # Errors
///
/// Configuration errors, and the engine's startup errors (connection or
/// group creation). A shutdown signal returns `Ok(())`.
pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    metrics::init_metrics().wrap_err("Failed to install Prometheus recorder")?;

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, "Starting completion worker");
    info!("Environment: {:?}", environment);

    let settings = WorkerSettings::from_env().wrap_err("Failed to load worker settings")?;
    let engine_config = EngineConfig::from_env().wrap_err("Failed to load engine configuration")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    info!("Connecting to Redis...");
    let engine = StreamEngine::connect(engine_config).await?;

    let subscription = engine
        .subscribe(&settings.stream, &settings.group, CompletionHandler)
        .await?;
    subscription.ensure_group().await?;

    let health_state = HealthState::new(&subscription, app_info.name, app_info.version);
    let health_port = settings.health_port;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_port).await {
            error!(error = %e, "Health server failed");
        }
    });

    subscription.run(shutdown_rx).await;

    info!("Completion worker stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(value: serde_json::Value) -> Envelope {
        match value {
            serde_json::Value::Object(map) => Envelope::new(map),
            other => panic!("not an object: {other}"),
        }
    }

    #[tokio::test]
    async fn test_handler_accepts_completion_request() {
        let result = CompletionHandler
            .handle(envelope(json!({
                "conversationId": "c-1",
                "messageId": "m-1",
                "model": "small"
            })))
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_handler_rejects_incomplete_request() {
        let err = CompletionHandler
            .handle(envelope(json!({"conversationId": "c-1"})))
            .await
            .unwrap_err();

        assert!(matches!(err, StreamError::Serialization(_)));
    }

    #[test]
    fn test_settings_defaults() {
        temp_env::with_vars(
            [
                ("COMPLETION_STREAM", None::<&str>),
                ("COMPLETION_GROUP", None),
                ("HEALTH_PORT", None),
            ],
            || {
                let settings = WorkerSettings::from_env().unwrap();
                assert_eq!(settings.stream, "completions");
                assert_eq!(settings.group, "completion_workers");
                assert_eq!(settings.health_port, 8082);
            },
        );
    }

    #[test]
    fn test_settings_invalid_port() {
        temp_env::with_var("HEALTH_PORT", Some("eighty"), || {
            assert!(WorkerSettings::from_env().is_err());
        });
    }
}
