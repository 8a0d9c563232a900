//! Stream definitions shared by producers and workers.

/// Names a stream and the consumer group that drains it.
///
/// # Example
///
/// ```rust,ignore
/// use stream_engine::StreamDef;
///
/// pub struct CompletionStream;
///
/// impl StreamDef for CompletionStream {
///     const STREAM_NAME: &'static str = "completions";
///     const CONSUMER_GROUP: &'static str = "completion_workers";
/// }
/// ```
pub trait StreamDef: Send + Sync {
    /// The Redis stream key
    const STREAM_NAME: &'static str;

    /// The consumer group for this stream
    const CONSUMER_GROUP: &'static str;

    fn stream_name() -> &'static str {
        Self::STREAM_NAME
    }

    fn consumer_group() -> &'static str {
        Self::CONSUMER_GROUP
    }
}
