//! Health and monitoring endpoints for one subscription
//!
//! | Route | Answer |
//! |---|---|
//! | `/health`, `/healthz` | process identity, `200` while the server runs |
//! | `/ready`, `/readyz` | `200` when the command connection answers, `503` otherwise |
//! | `/stream/info` | [`StreamReport`]: stream length, pending entries, consumer counters |
//! | `/metrics` | Prometheus text, `404` until [`metrics::init_metrics`] ran |
//!
//! Checks use the command connection, never the subscription's blocking read
//! connection, so they answer while a read is parked.

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::consumer::{StreamConsumer, StreamInfo};
use crate::dispatcher::{ConsumerStats, StatsSnapshot};
use crate::engine::Subscription;
use crate::metrics::{self, EngineMetrics};

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4";

/// What the endpoints report on
#[derive(Clone)]
pub struct HealthState {
    consumer: StreamConsumer,
    stats: Arc<ConsumerStats>,
    metrics: EngineMetrics,
    app_name: String,
    app_version: String,
}

impl HealthState {
    pub fn new(
        subscription: &Subscription,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            consumer: subscription.consumer().clone(),
            stats: subscription.stats(),
            metrics: subscription.metrics().clone(),
            app_name: app_name.into(),
            app_version: app_version.into(),
        }
    }
}

/// `/health` body
#[derive(Debug, Serialize, Deserialize)]
pub struct Liveness {
    pub name: String,
    pub version: String,
    pub consumer: String,
}

/// `/ready` body
#[derive(Debug, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: bool,
    pub consumer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `/stream/info` body
#[derive(Debug, Serialize)]
pub struct StreamReport {
    #[serde(flatten)]
    pub info: StreamInfo,
    pub consumer: String,
    pub stats: StatsSnapshot,
}

async fn liveness(State(state): State<HealthState>) -> Json<Liveness> {
    Json(Liveness {
        name: state.app_name,
        version: state.app_version,
        consumer: state.consumer.consumer_name().to_string(),
    })
}

async fn readiness(State(state): State<HealthState>) -> (StatusCode, Json<Readiness>) {
    let error = match state.consumer.ping().await {
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            Some(e.to_string())
        }
    };
    let status = if error.is_none() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(Readiness {
            ready: error.is_none(),
            consumer: state.consumer.consumer_name().to_string(),
            error,
        }),
    )
}

/// Also refreshes the length and pending gauges.
async fn stream_report(
    State(state): State<HealthState>,
) -> Result<Json<StreamReport>, (StatusCode, String)> {
    let info = state
        .consumer
        .stream_info()
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;

    state.metrics.stream_length(info.length);
    state.metrics.pending_count(info.pending_count);

    Ok(Json(StreamReport {
        info,
        consumer: state.consumer.consumer_name().to_string(),
        stats: state.stats.snapshot(),
    }))
}

async fn prometheus() -> Response {
    match metrics::prometheus_handle() {
        Some(handle) => {
            ([(header::CONTENT_TYPE, PROMETHEUS_TEXT)], handle.render()).into_response()
        }
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// Router serving every health endpoint for `state`
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .route("/healthz", get(liveness))
        .route("/ready", get(readiness))
        .route("/readyz", get(readiness))
        .route("/stream/info", get(stream_report))
        .route("/metrics", get(prometheus))
        .with_state(state)
}
