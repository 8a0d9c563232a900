//! Envelope handlers
//!
//! A handler receives one decoded envelope at a time. Whatever it returns,
//! including a panic, the entry is acknowledged and deleted afterwards:
//! failures are logged, never redelivered.

use crate::envelope::Envelope;
use crate::error::StreamError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Processes decoded envelopes from a stream.
///
/// # Example
///
/// ```rust,ignore
/// use stream_engine::{Envelope, EnvelopeHandler, StreamError};
///
/// struct CompletionHandler;
///
/// #[async_trait]
/// impl EnvelopeHandler for CompletionHandler {
///     async fn handle(&self, envelope: Envelope) -> Result<(), StreamError> {
///         let request: CompletionRequest = envelope.deserialize()?;
///         complete(request).await
///     }
///
///     fn name(&self) -> &str {
///         "completion"
///     }
/// }
/// ```
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    /// Handle one envelope. An `Err` is logged; the entry is still removed.
    async fn handle(&self, envelope: Envelope) -> Result<(), StreamError>;

    /// Name used in logs and metric labels
    fn name(&self) -> &str {
        "handler"
    }
}

#[async_trait]
impl<H: EnvelopeHandler + ?Sized> EnvelopeHandler for Arc<H> {
    async fn handle(&self, envelope: Envelope) -> Result<(), StreamError> {
        (**self).handle(envelope).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl<H: EnvelopeHandler + ?Sized> EnvelopeHandler for Box<H> {
    async fn handle(&self, envelope: Envelope) -> Result<(), StreamError> {
        (**self).handle(envelope).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Handler backed by an async closure, see [`handler_fn`]
pub struct FnHandler<F> {
    name: String,
    f: F,
}

/// Wrap an async closure as an [`EnvelopeHandler`].
///
/// ```rust,ignore
/// let handler = handler_fn("audit", |envelope: Envelope| async move {
///     tracing::info!(keys = envelope.len(), "audit event");
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> FnHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), StreamError>> + Send,
{
    FnHandler {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> EnvelopeHandler for FnHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), StreamError>> + Send,
{
    async fn handle(&self, envelope: Envelope) -> Result<(), StreamError> {
        (self.f)(envelope).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
