//! Diagnostic hooks around exchanges and credential state
//!
//! Hooks are fire-and-forget: they run inline, must not block, and can
//! never change what the client receives.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use switchyard_config::{CaptureConfig, ProviderType};
use uuid::Uuid;

use crate::convert::ResponseAccumulator;
use crate::exchange::ExchangeContext;
use crate::pool::{CredentialId, CredentialState};
use crate::protocol::NativeRequest;
use crate::types::{CompletionResponse, StreamEvent};

/// Receives notifications about exchanges and credentials
pub trait Observer: Send + Sync {
    /// A canonical request was encoded for a provider
    fn request_converted(&self, context: &ExchangeContext, request: &NativeRequest) {
        let _ = (context, request);
    }

    /// A unary exchange produced its response
    fn unary_response(&self, context: &ExchangeContext, response: &CompletionResponse) {
        let _ = (context, response);
    }

    /// A committed stream produced a canonical chunk
    fn stream_chunk(&self, context: &ExchangeContext, event: &StreamEvent) {
        let _ = (context, event);
    }

    /// A committed stream ended or was dropped
    fn stream_finished(&self, context: &ExchangeContext) {
        let _ = context;
    }

    /// A credential's health changed
    fn credential_state_changed(&self, provider: ProviderType, credential: CredentialId, state: &CredentialState) {
        let _ = (provider, credential, state);
    }
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Chunks of one stream awaiting aggregation
struct CaptureBuffer {
    context: ExchangeContext,
    events: Vec<StreamEvent>,
    flush_scheduled: bool,
}

/// Logs converted requests and aggregated responses
///
/// Stream chunks are buffered per exchange. Once the terminal chunk is
/// seen the buffer is aggregated after a grace period, logged and dropped.
pub struct CaptureObserver {
    buffers: Arc<DashMap<Uuid, CaptureBuffer>>,
    grace: Duration,
}

impl CaptureObserver {
    pub fn new(grace: Duration) -> Self {
        Self {
            buffers: Arc::new(DashMap::new()),
            grace,
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(Duration::from_millis(config.grace_ms))
    }

    /// Exchanges with chunks still buffered
    pub fn pending(&self) -> usize {
        self.buffers.len()
    }

    fn schedule_flush(&self, exchange_id: Uuid) {
        {
            let Some(mut buffer) = self.buffers.get_mut(&exchange_id) else {
                return;
            };
            if buffer.flush_scheduled {
                return;
            }
            buffer.flush_scheduled = true;
        }

        let buffers = Arc::clone(&self.buffers);
        let grace = self.grace;
        let flush = async move {
            tokio::time::sleep(grace).await;
            if let Some((_, buffer)) = buffers.remove(&exchange_id) {
                log_stream_capture(buffer);
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(flush);
            }
            Err(_) => {
                if let Some((_, buffer)) = self.buffers.remove(&exchange_id) {
                    log_stream_capture(buffer);
                }
            }
        }
    }
}

fn log_stream_capture(buffer: CaptureBuffer) {
    let mut accumulator = ResponseAccumulator::default();
    let mut failure = None;
    for event in &buffer.events {
        if let StreamEvent::Error(error) = event {
            failure = Some(error.message.clone());
        }
        accumulator.push(event);
    }

    let response = accumulator.finish(buffer.context.exchange_id.to_string(), buffer.context.model.clone());
    let aggregate = serde_json::to_string(&response).unwrap_or_default();

    tracing::info!(
        exchange_id = %buffer.context.exchange_id,
        source = %buffer.context.source,
        target = %buffer.context.target,
        model = %buffer.context.model,
        chunks = buffer.events.len(),
        failure = failure.as_deref(),
        aggregate = %aggregate,
        "captured stream"
    );
}

impl Observer for CaptureObserver {
    fn request_converted(&self, context: &ExchangeContext, request: &NativeRequest) {
        tracing::info!(
            exchange_id = %context.exchange_id,
            source = %context.source,
            target = %context.target,
            model = %context.model,
            stream = context.streaming,
            request = %request.to_json(),
            "captured converted request"
        );
    }

    fn unary_response(&self, context: &ExchangeContext, response: &CompletionResponse) {
        let body = serde_json::to_string(response).unwrap_or_default();
        tracing::info!(
            exchange_id = %context.exchange_id,
            target = %context.target,
            model = %context.model,
            response = %body,
            "captured unary response"
        );
    }

    fn stream_chunk(&self, context: &ExchangeContext, event: &StreamEvent) {
        self.buffers
            .entry(context.exchange_id)
            .or_insert_with(|| CaptureBuffer {
                context: context.clone(),
                events: Vec::new(),
                flush_scheduled: false,
            })
            .events
            .push(event.clone());

        if event.is_terminal() {
            self.schedule_flush(context.exchange_id);
        }
    }

    fn stream_finished(&self, context: &ExchangeContext) {
        self.schedule_flush(context.exchange_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Protocol;
    use crate::types::StreamDelta;

    fn context() -> ExchangeContext {
        ExchangeContext::new(Protocol::OpenAi, Protocol::Anthropic, "claude-sonnet-4", true)
    }

    #[tokio::test(start_paused = true)]
    async fn buffers_are_dropped_after_grace() {
        let observer = CaptureObserver::new(Duration::from_millis(2000));
        let ctx = context();

        observer.stream_chunk(&ctx, &StreamEvent::Delta(StreamDelta::text("hi")));
        observer.stream_chunk(&ctx, &StreamEvent::Done);
        assert_eq!(observer.pending(), 1);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(observer.pending(), 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(observer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_streams_are_flushed_once() {
        let observer = CaptureObserver::new(Duration::from_millis(10));
        let ctx = context();

        observer.stream_chunk(&ctx, &StreamEvent::Delta(StreamDelta::text("partial")));
        observer.stream_finished(&ctx);
        observer.stream_finished(&ctx);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(observer.pending(), 0);
    }

    #[test]
    fn flushes_inline_without_a_runtime() {
        let observer = CaptureObserver::new(Duration::from_millis(10));
        let ctx = context();

        observer.stream_chunk(&ctx, &StreamEvent::Done);
        assert_eq!(observer.pending(), 0);
    }
}
