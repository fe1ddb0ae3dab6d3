//! One client request from decode to encoded reply

use std::pin::Pin;
use std::time::Instant;

use futures_util::{Stream, StreamExt, stream};
use switchyard_config::ProviderType;
use switchyard_core::RequestContext;
use switchyard_telemetry::{KeyValue, metrics};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::protocol::{NativeChunk, NativeRequest, NativeResponse, Protocol};
use crate::state::GatewayState;

/// Identity of one exchange, passed to observers
#[derive(Debug, Clone)]
pub struct ExchangeContext {
    pub exchange_id: Uuid,
    /// Protocol the client spoke
    pub source: Protocol,
    /// Protocol of the provider currently serving the exchange
    pub target: Protocol,
    pub provider: Option<ProviderType>,
    pub model: String,
    pub streaming: bool,
}

impl ExchangeContext {
    pub fn new(source: Protocol, target: Protocol, model: impl Into<String>, streaming: bool) -> Self {
        Self {
            exchange_id: Uuid::new_v4(),
            source,
            target,
            provider: None,
            model: model.into(),
            streaming,
        }
    }

    /// Point the exchange at another provider in the fallback sequence
    pub fn retarget(&mut self, provider: ProviderType, model: &str) {
        self.provider = Some(provider);
        self.target = Protocol::of_provider(provider);
        model.clone_into(&mut self.model);
    }
}

/// Client-protocol chunks of a committed stream
pub type NativeStream = Pin<Box<dyn Stream<Item = NativeChunk> + Send>>;

/// Reply in the client's protocol
pub enum ExchangeOutput {
    Unary(NativeResponse),
    Stream(NativeStream),
}

impl std::fmt::Debug for ExchangeOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unary(response) => f.debug_tuple("Unary").field(response).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl GatewayState {
    /// Serve one native client request
    ///
    /// `stream` overrides the request's own streaming flag for protocols that
    /// carry it outside the body.
    ///
    /// # Errors
    ///
    /// Any error returned here happened before the first byte was sent to the
    /// client; later failures arrive as the stream's terminal error chunk.
    pub async fn exchange(
        &self,
        request: NativeRequest,
        stream: Option<bool>,
        context: &RequestContext,
    ) -> Result<ExchangeOutput, GatewayError> {
        let start = Instant::now();
        let source = request.protocol();
        let result = self.run_exchange(request, stream, context).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind().as_str(),
        };
        let attributes = [KeyValue::new("source", source.as_str()), KeyValue::new("outcome", outcome)];
        metrics::record_duration(&self.inner.exchange_duration, start, &attributes);
        self.inner.exchange_count.add(1, &attributes);

        if let Err(e) = &result {
            tracing::warn!(source = %source, error = %e, "exchange failed");
        }
        result
    }

    async fn run_exchange(
        &self,
        request: NativeRequest,
        stream: Option<bool>,
        context: &RequestContext,
    ) -> Result<ExchangeOutput, GatewayError> {
        let source = request.protocol();
        let client = self
            .inner
            .registry
            .client(source)
            .cloned()
            .ok_or(GatewayError::UnsupportedRoute { from: source, to: source })?;

        let mut canonical = client.to_canonical_request(request)?;
        if let Some(stream) = stream {
            canonical.stream = stream;
        }
        let requested_model = canonical.model.clone();

        let route = self
            .inner
            .router
            .resolve(&canonical.model, context.provider_hint.as_deref())?;
        canonical.model.clone_from(&route.model);

        let target = Protocol::of_provider(route.provider);
        let (client, _) = self.inner.registry.pair(source, target)?;

        tracing::debug!(
            source = %source,
            provider = %route.provider,
            model = %canonical.model,
            stream = canonical.stream,
            "exchange routed"
        );

        let mut exchange = ExchangeContext::new(source, target, &canonical.model, canonical.stream);

        if !canonical.stream {
            let response = self
                .inner
                .dispatcher
                .dispatch_unary(&canonical, route.provider, &mut exchange)
                .await?;
            let native = client.from_canonical_response(&response).map_err(|e| GatewayError::Protocol {
                provider: exchange.provider.unwrap_or(route.provider),
                message: e.to_string(),
            })?;
            return Ok(ExchangeOutput::Unary(native));
        }

        let events = self
            .inner
            .dispatcher
            .dispatch_stream(&canonical, route.provider, exchange)
            .await?;

        let mut state = client.new_stream_state();
        state.set_model(&requested_model);

        let chunks = events.flat_map(move |event| {
            let chunks = client.from_canonical_chunk(&event, &mut state).unwrap_or_else(|e| {
                tracing::warn!(protocol = %source, error = %e, "dropping chunk the client protocol cannot carry");
                Vec::new()
            });
            stream::iter(chunks)
        });

        Ok(ExchangeOutput::Stream(chunks.boxed()))
    }
}
