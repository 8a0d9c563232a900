//! Prometheus metrics for stream consumers
//!
//! Counters are labelled with the stream, group and handler name so several
//! engines in one process stay distinguishable.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder.
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() -> Result<(), BuildError> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus metrics initialized");
        Ok::<_, BuildError>(handle)
    })?;
    Ok(())
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Metric recorder for one engine
#[derive(Debug, Clone)]
pub struct EngineMetrics {
    stream_name: String,
    group_name: String,
    handler_name: String,
}

impl EngineMetrics {
    pub fn new(
        stream_name: impl Into<String>,
        group_name: impl Into<String>,
        handler_name: impl Into<String>,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            group_name: group_name.into(),
            handler_name: handler_name.into(),
        }
    }

    /// An entry was delivered, by a read or a claim sweep
    pub fn entry_received(&self) {
        counter!(
            "stream_engine_entries_received_total",
            "stream" => self.stream_name.clone(),
            "group" => self.group_name.clone()
        )
        .increment(1);
    }

    /// The handler returned for this entry
    pub fn entry_handled(&self, success: bool, duration: Duration) {
        counter!(
            "stream_engine_entries_handled_total",
            "stream" => self.stream_name.clone(),
            "group" => self.group_name.clone(),
            "handler" => self.handler_name.clone(),
            "status" => if success { "success" } else { "failed" }
        )
        .increment(1);

        histogram!(
            "stream_engine_handler_duration_seconds",
            "stream" => self.stream_name.clone(),
            "handler" => self.handler_name.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// The entry could not be decoded and never reached the handler
    pub fn entry_rejected(&self) {
        counter!(
            "stream_engine_entries_rejected_total",
            "stream" => self.stream_name.clone(),
            "group" => self.group_name.clone()
        )
        .increment(1);
    }

    /// Entries taken over from idle consumers
    pub fn entries_claimed(&self, count: usize) {
        counter!(
            "stream_engine_entries_claimed_total",
            "stream" => self.stream_name.clone(),
            "group" => self.group_name.clone()
        )
        .increment(count as u64);
    }

    /// The handler ran past the processing timeout
    pub fn slow_handler(&self) {
        counter!(
            "stream_engine_slow_total",
            "stream" => self.stream_name.clone(),
            "handler" => self.handler_name.clone()
        )
        .increment(1);
    }

    /// `XACKDEL` failed; the entry stays pending
    pub fn ack_failed(&self) {
        counter!(
            "stream_engine_ack_errors_total",
            "stream" => self.stream_name.clone(),
            "group" => self.group_name.clone()
        )
        .increment(1);
    }

    pub fn stream_length(&self, length: usize) {
        gauge!(
            "stream_engine_stream_length",
            "stream" => self.stream_name.clone()
        )
        .set(length as f64);
    }

    pub fn pending_count(&self, count: usize) {
        gauge!(
            "stream_engine_pending_count",
            "stream" => self.stream_name.clone(),
            "group" => self.group_name.clone()
        )
        .set(count as f64);
    }
}
