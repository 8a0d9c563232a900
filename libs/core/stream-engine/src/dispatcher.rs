//! Per-entry dispatch
//!
//! Every delivered entry, fresh or reclaimed, takes the same path:
//!
//! 1. decode the fields (an entry with a field that is not JSON text is
//!    rejected and never reaches the handler)
//! 2. run the handler, isolating errors and panics
//! 3. warn if it ran past the processing timeout
//! 4. acknowledge and delete with one `XACKDEL`
//!
//! Step 4 runs whatever happened before it. A failed acknowledgement leaves
//! the entry pending for a later claim sweep.

use crate::codec::{self, DecodePolicy, Decoded};
use crate::config::EngineConfig;
use crate::consumer::StreamConsumer;
use crate::envelope::StreamEntry;
use crate::error::StreamError;
use crate::handler::EnvelopeHandler;
use crate::metrics::EngineMetrics;
use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Removes a processed entry from the group and the stream
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack_delete(&self, entry_id: &str) -> Result<(), StreamError>;
}

#[async_trait]
impl Acknowledge for StreamConsumer {
    async fn ack_delete(&self, entry_id: &str) -> Result<(), StreamError> {
        StreamConsumer::ack_delete(self, entry_id).await
    }
}

/// What happened to one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler returned `Ok`
    Handled,
    /// The handler returned an error or panicked
    HandlerFailed,
    /// The fields could not be decoded; the handler was not called
    Rejected,
}

/// Running counters for one consumer
#[derive(Debug, Default)]
pub struct ConsumerStats {
    received: AtomicU64,
    handled: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    claimed: AtomicU64,
    slow: AtomicU64,
}

/// Point-in-time copy of [`ConsumerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub handled: u64,
    pub failed: u64,
    pub rejected: u64,
    pub claimed: u64,
    pub slow: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            claimed: self.claimed.load(Ordering::Relaxed),
            slow: self.slow.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_claimed(&self, count: usize) {
        self.claimed.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Runs entries through decode, handler and acknowledgement
pub struct Dispatcher {
    handler: Arc<dyn EnvelopeHandler>,
    stream_name: String,
    consumer_name: String,
    decode_policy: DecodePolicy,
    processing_timeout: Duration,
    stats: Arc<ConsumerStats>,
    metrics: EngineMetrics,
}

impl Dispatcher {
    pub fn new(
        handler: Arc<dyn EnvelopeHandler>,
        config: &EngineConfig,
        stream_name: impl Into<String>,
        group_name: impl Into<String>,
    ) -> Self {
        let stream_name = stream_name.into();
        let metrics = EngineMetrics::new(&stream_name, group_name, handler.name());

        Self {
            handler,
            stream_name,
            consumer_name: config.consumer_name.clone(),
            decode_policy: config.decode_policy,
            processing_timeout: config.processing_timeout(),
            stats: Arc::new(ConsumerStats::default()),
            metrics,
        }
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.stats.clone()
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn handler_name(&self) -> &str {
        self.handler.name()
    }

    /// Dispatch one entry. Never fails; the outcome is for callers that
    /// want to count.
    pub async fn process_entry(
        &self,
        acker: &dyn Acknowledge,
        entry: &StreamEntry,
    ) -> DispatchOutcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        self.metrics.entry_received();

        let envelope = match codec::decode_entry(entry, self.decode_policy) {
            Decoded::Envelope(envelope) => envelope,
            Decoded::Rejected { field, reason } => {
                warn!(
                    stream = %self.stream_name,
                    consumer = %self.consumer_name,
                    entry_id = %entry.id,
                    field = %field,
                    reason = %reason,
                    "Rejecting malformed entry"
                );
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                self.metrics.entry_rejected();
                self.acknowledge(acker, &entry.id).await;
                return DispatchOutcome::Rejected;
            }
        };

        debug!(
            entry_id = %entry.id,
            handler = %self.handler.name(),
            age_ms = ?entry.age().map(|age| age.num_milliseconds()),
            "Processing entry"
        );

        let start = Instant::now();
        let result = AssertUnwindSafe(self.handler.handle(envelope))
            .catch_unwind()
            .await;
        let elapsed = start.elapsed();

        let outcome = match result {
            Ok(Ok(())) => {
                debug!(
                    entry_id = %entry.id,
                    duration_ms = %elapsed.as_millis(),
                    "Entry handled"
                );
                self.stats.handled.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Handled
            }
            Ok(Err(e)) => {
                error!(
                    stream = %self.stream_name,
                    consumer = %self.consumer_name,
                    entry_id = %entry.id,
                    error = %e,
                    "Handler failed, entry will not be redelivered"
                );
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::HandlerFailed
            }
            Err(panic) => {
                error!(
                    stream = %self.stream_name,
                    consumer = %self.consumer_name,
                    entry_id = %entry.id,
                    panic = %panic_message(&*panic),
                    "Handler panicked, entry will not be redelivered"
                );
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::HandlerFailed
            }
        };
        self.metrics
            .entry_handled(outcome == DispatchOutcome::Handled, elapsed);

        if elapsed > self.processing_timeout {
            warn!(
                stream = %self.stream_name,
                consumer = %self.consumer_name,
                entry_id = %entry.id,
                elapsed_ms = %elapsed.as_millis(),
                timeout_ms = %self.processing_timeout.as_millis(),
                "Handler exceeded processing timeout"
            );
            self.stats.slow.fetch_add(1, Ordering::Relaxed);
            self.metrics.slow_handler();
        }

        self.acknowledge(acker, &entry.id).await;
        outcome
    }

    async fn acknowledge(&self, acker: &dyn Acknowledge, entry_id: &str) {
        if let Err(e) = acker.ack_delete(entry_id).await {
            error!(
                stream = %self.stream_name,
                consumer = %self.consumer_name,
                entry_id = %entry_id,
                error = %e,
                "Failed to acknowledge entry, it stays pending"
            );
            self.metrics.ack_failed();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use crate::handler::handler_fn;
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Log sink for asserting on emitted events
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn install(&self) -> tracing::subscriber::DefaultGuard {
            let sink = self.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_writer(move || sink.clone())
                .with_ansi(false)
                .with_max_level(tracing::Level::WARN)
                .finish();
            tracing::subscriber::set_default(subscriber)
        }

        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingAcker {
        acked: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingAcker {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn acked(&self) -> Vec<String> {
            self.acked.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Acknowledge for RecordingAcker {
        async fn ack_delete(&self, entry_id: &str) -> Result<(), StreamError> {
            if self.fail {
                return Err(StreamError::handler("connection reset"));
            }
            self.acked.lock().unwrap().push(entry_id.to_string());
            Ok(())
        }
    }

    fn config() -> EngineConfig {
        EngineConfig::new("redis://localhost:6379").with_consumer_name("test-consumer")
    }

    fn entry(id: &str, pairs: &[(&str, &str)]) -> StreamEntry {
        StreamEntry::new(
            id,
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn dispatcher(handler: impl EnvelopeHandler + 'static, config: &EngineConfig) -> Dispatcher {
        Dispatcher::new(Arc::new(handler), config, "completions", "completion_workers")
    }

    #[tokio::test]
    async fn test_successful_entry_is_acked() {
        let seen = Arc::new(Mutex::new(Vec::<Envelope>::new()));
        let sink = seen.clone();
        let dispatcher = dispatcher(
            handler_fn("record", move |envelope| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(envelope);
                    Ok::<(), StreamError>(())
                }
            }),
            &config(),
        );
        let acker = RecordingAcker::default();

        let outcome = dispatcher
            .process_entry(&acker, &entry("1-0", &[("userId", "123"), ("event", "\"login\"")]))
            .await;

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(acker.acked(), vec!["1-0"]);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].get("userId"), Some(&serde_json::json!(123)));
        assert_eq!(seen[0].get("event"), Some(&serde_json::json!("login")));

        let stats = dispatcher.stats().snapshot();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.handled, 1);
    }

    #[tokio::test]
    async fn test_failing_handler_still_acks() {
        let dispatcher = dispatcher(
            handler_fn("fail", |_| async { Err::<(), _>(StreamError::handler("boom")) }),
            &config(),
        );
        let acker = RecordingAcker::default();

        let outcome = dispatcher.process_entry(&acker, &entry("2-0", &[("a", "1")])).await;

        assert_eq!(outcome, DispatchOutcome::HandlerFailed);
        assert_eq!(acker.acked(), vec!["2-0"]);
        assert_eq!(dispatcher.stats().snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let dispatcher = dispatcher(
            handler_fn("panic", |_| async {
                if true {
                    panic!("handler exploded");
                }
                Ok::<(), StreamError>(())
            }),
            &config(),
        );
        let acker = RecordingAcker::default();

        let outcome = dispatcher.process_entry(&acker, &entry("3-0", &[("a", "1")])).await;

        assert_eq!(outcome, DispatchOutcome::HandlerFailed);
        assert_eq!(acker.acked(), vec!["3-0"]);
    }

    #[tokio::test]
    async fn test_malformed_entry_is_rejected_without_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let dispatcher = dispatcher(
            handler_fn("count", move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), StreamError>(())
                }
            }),
            &config(),
        );
        let acker = RecordingAcker::default();
        let logs = CapturedLogs::default();
        let _guard = logs.install();

        let outcome = dispatcher
            .process_entry(&acker, &entry("4-0", &[("data", "{not json")]))
            .await;

        assert_eq!(outcome, DispatchOutcome::Rejected);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(acker.acked(), vec!["4-0"]);
        assert_eq!(dispatcher.stats().snapshot().rejected, 1);

        let logged = logs.contents();
        assert!(logged.contains("WARN"), "no warning in: {logged}");
        assert!(logged.contains("Rejecting malformed entry"));
        assert!(logged.contains("entry_id=4-0"));
        assert!(logged.contains("field=data"));
    }

    #[tokio::test]
    async fn test_unreadable_entry_is_rejected_without_handler() {
        let dispatcher = dispatcher(
            handler_fn("never", |_| async {
                Err::<(), _>(StreamError::handler("handler must not run"))
            }),
            &config().with_decode_policy(DecodePolicy::Lenient),
        );
        let acker = RecordingAcker::default();
        let mut unreadable = entry("8-0", &[("ok", "1")]);
        unreadable.unreadable = Some(("name".to_string(), "value is not valid UTF-8".to_string()));

        let outcome = dispatcher.process_entry(&acker, &unreadable).await;

        assert_eq!(outcome, DispatchOutcome::Rejected);
        assert_eq!(acker.acked(), vec!["8-0"]);
        assert_eq!(dispatcher.stats().snapshot().failed, 0);
    }

    #[tokio::test]
    async fn test_lenient_policy_passes_raw_strings() {
        let config = config().with_decode_policy(DecodePolicy::Lenient);
        let dispatcher = dispatcher(
            handler_fn("lenient", |envelope: Envelope| async move {
                if envelope.get("data") == Some(&serde_json::json!("{not json")) {
                    Ok(())
                } else {
                    Err(StreamError::handler("unexpected envelope"))
                }
            }),
            &config,
        );
        let acker = RecordingAcker::default();

        let outcome = dispatcher
            .process_entry(&acker, &entry("5-0", &[("data", "{not json")]))
            .await;

        assert_eq!(outcome, DispatchOutcome::Handled);
    }

    #[tokio::test]
    async fn test_slow_handler_is_counted_and_acked() {
        let config = config().with_processing_timeout_ms(1);
        let dispatcher = dispatcher(
            handler_fn("slow", |_| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<(), StreamError>(())
            }),
            &config,
        );
        let acker = RecordingAcker::default();

        let outcome = dispatcher.process_entry(&acker, &entry("6-0", &[("a", "1")])).await;

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(dispatcher.stats().snapshot().slow, 1);
        assert_eq!(acker.acked(), vec!["6-0"]);
    }

    #[tokio::test]
    async fn test_ack_failure_does_not_change_outcome() {
        let dispatcher = dispatcher(handler_fn("ok", |_| async { Ok::<(), StreamError>(()) }), &config());
        let acker = RecordingAcker::failing();

        let outcome = dispatcher.process_entry(&acker, &entry("7-0", &[("a", "1")])).await;

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert!(acker.acked().is_empty());
    }

    #[test]
    fn test_panic_message_payloads() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "non-string panic payload");
    }
}
