//! Credential failover and cross-provider fallback
//!
//! [`FallbackRouter`] walks the primary provider and then its fallback
//! chain. Within each provider it leases untried credentials one at a
//! time, retrying transport failures on the same credential with
//! exponential backoff and switching credential on anything else. A
//! streaming exchange commits once an upstream chunk decodes to its first
//! canonical event; from then on failures surface as a terminal error chunk
//! of the [`CanonicalStream`] instead of a retry.

use std::collections::{HashSet, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use indexmap::IndexMap;
use switchyard_config::{Config, PoolConfig, ProviderType};
use switchyard_telemetry::{Counter, KeyValue, metrics};
use tokio::time::Instant;

use crate::convert::StreamState;
use crate::error::{ErrorKind, GatewayError, ProviderError};
use crate::exchange::ExchangeContext;
use crate::observer::Observer;
use crate::pool::{CredentialLease, PoolManager};
use crate::protocol::{NativeRequest, NativeResponse, Protocol};
use crate::provider::{ClientMap, NativeChunkStream, ProviderResponse, SharedClient};
use crate::registry::{ConverterRegistry, SharedConverter};
use crate::types::{CompletionRequest, CompletionResponse, StreamEvent, StreamFailure, StreamPhase};

/// Retry and switching limits
#[derive(Debug, Clone, Copy)]
pub struct DispatchPolicy {
    pub max_credential_switches: u32,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl From<&PoolConfig> for DispatchPolicy {
    fn from(config: &PoolConfig) -> Self {
        Self {
            max_credential_switches: config.max_credential_switches,
            request_timeout: config.request_timeout(),
            max_retries: config.request_max_retries,
            base_delay: config.request_base_delay(),
        }
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

/// Upstream reply of one successful attempt
enum Reply {
    Unary(NativeResponse),
    /// Committed stream with the events decoded from its first chunk
    Stream {
        upstream: NativeChunkStream,
        state: StreamState,
        pending: Vec<StreamEvent>,
    },
}

/// What a dispatch produced
enum Dispatched {
    Unary(CompletionResponse),
    Stream(CanonicalStream),
}

/// One provider in the fallback sequence, fully resolved
struct Candidate<'a> {
    provider: ProviderType,
    client: &'a SharedClient,
    converter: &'a SharedConverter,
}

/// Where a successful attempt landed
struct Route<'a> {
    provider: ProviderType,
    model: &'a str,
    fallback_attempted: bool,
}

/// Walks credential pools and the fallback chain for one exchange
pub struct FallbackRouter {
    pools: Arc<PoolManager>,
    clients: Arc<ClientMap>,
    registry: ConverterRegistry,
    fallback_chain: IndexMap<ProviderType, Vec<ProviderType>>,
    fallback_models: IndexMap<ProviderType, String>,
    policy: DispatchPolicy,
    observer: Arc<dyn Observer>,
    switches: Counter<u64>,
}

impl FallbackRouter {
    pub fn new(
        pools: Arc<PoolManager>,
        clients: Arc<ClientMap>,
        registry: ConverterRegistry,
        policy: DispatchPolicy,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            pools,
            clients,
            registry,
            fallback_chain: IndexMap::new(),
            fallback_models: IndexMap::new(),
            policy,
            observer,
            switches: metrics::meter().u64_counter(metrics::CREDENTIAL_SWITCH_COUNT).build(),
        }
    }

    /// Fallback chain and per-provider fallback models from config
    #[must_use]
    pub fn with_config(mut self, config: &Config) -> Self {
        self.fallback_chain.clone_from(&config.fallback_chain);
        self.fallback_models = config
            .providers
            .iter()
            .filter_map(|(provider, provider_config)| {
                provider_config
                    .fallback_model
                    .clone()
                    .map(|model| (*provider, model))
            })
            .collect();
        self
    }

    #[must_use]
    pub fn with_fallback_chain(mut self, chain: IndexMap<ProviderType, Vec<ProviderType>>) -> Self {
        self.fallback_chain = chain;
        self
    }

    #[must_use]
    pub fn with_fallback_model(mut self, provider: ProviderType, model: impl Into<String>) -> Self {
        self.fallback_models.insert(provider, model.into());
        self
    }

    pub const fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// `[primary] ++ fallback_chain[primary]` without duplicates or providers lacking a pool
    pub fn provider_sequence(&self, primary: ProviderType) -> Vec<ProviderType> {
        let chain = self.fallback_chain.get(&primary).map(Vec::as_slice).unwrap_or_default();
        let mut sequence = Vec::with_capacity(chain.len() + 1);

        for provider in std::iter::once(primary).chain(chain.iter().copied()) {
            if sequence.contains(&provider) {
                continue;
            }
            if self.pools.get(provider).is_none_or(|pool| pool.is_empty()) {
                tracing::debug!(provider = %provider, "skipping provider without credentials");
                continue;
            }
            sequence.push(provider);
        }

        sequence
    }

    /// Run a unary exchange
    ///
    /// # Errors
    ///
    /// `Exhausted` once every credential of every provider in the sequence
    /// failed, `Protocol` as soon as a provider answers with a shape that
    /// cannot be decoded.
    pub async fn dispatch_unary(
        &self,
        request: &CompletionRequest,
        primary: ProviderType,
        context: &mut ExchangeContext,
    ) -> Result<CompletionResponse, GatewayError> {
        match self.dispatch(request, primary, context, false).await? {
            Dispatched::Unary(response) => {
                self.observer.unary_response(context, &response);
                Ok(response)
            }
            Dispatched::Stream(_) => Err(GatewayError::Protocol {
                provider: primary,
                message: "provider streamed a unary request".to_owned(),
            }),
        }
    }

    /// Run a streaming exchange up to its first upstream chunk
    ///
    /// # Errors
    ///
    /// As [`FallbackRouter::dispatch_unary`]; failures after the first chunk
    /// become the stream's terminal error chunk instead.
    pub async fn dispatch_stream(
        &self,
        request: &CompletionRequest,
        primary: ProviderType,
        mut context: ExchangeContext,
    ) -> Result<CanonicalStream, GatewayError> {
        match self.dispatch(request, primary, &mut context, true).await? {
            Dispatched::Stream(stream) => Ok(stream),
            Dispatched::Unary(_) => Err(GatewayError::Protocol {
                provider: primary,
                message: "provider answered a stream request with a unary response".to_owned(),
            }),
        }
    }

    fn candidate(&self, provider: ProviderType) -> Option<Candidate<'_>> {
        let client = self.clients.get(&provider);
        let converter = self.registry.provider(Protocol::of_provider(provider));

        match (client, converter) {
            (Some(client), Some(converter)) => Some(Candidate {
                provider,
                client,
                converter,
            }),
            _ => {
                tracing::warn!(provider = %provider, "provider has credentials but no client or converter");
                None
            }
        }
    }

    async fn dispatch(
        &self,
        request: &CompletionRequest,
        primary: ProviderType,
        context: &mut ExchangeContext,
        streaming: bool,
    ) -> Result<Dispatched, GatewayError> {
        let mut attempts = 0u32;
        let mut last_error = None;
        let mut fallback_attempted = false;

        for provider in self.provider_sequence(primary) {
            let Some(candidate) = self.candidate(provider) else {
                continue;
            };
            let Some(pool) = self.pools.get(provider) else {
                continue;
            };

            let is_primary = provider == primary;
            if !is_primary {
                fallback_attempted = true;
                tracing::warn!(from = %primary, to = %provider, "falling back to next provider");
            }

            let mut upstream_request = request.clone();
            upstream_request.stream = streaming;
            if !is_primary && let Some(model) = self.fallback_models.get(&provider) {
                upstream_request.model.clone_from(model);
            }

            let native = match candidate.converter.from_canonical_request(&upstream_request) {
                Ok(native) => native,
                Err(e) if is_primary => return Err(GatewayError::InvalidRequest(e)),
                Err(e) => {
                    tracing::warn!(provider = %provider, error = %e, "request not convertible for fallback provider");
                    continue;
                }
            };

            context.retarget(provider, &upstream_request.model);
            self.observer.request_converted(context, &native);

            let mut tried = HashSet::new();
            let mut switches = 0;

            while switches < self.policy.max_credential_switches {
                let lease = match pool.acquire_excluding(&tried) {
                    Ok(lease) => lease,
                    Err(e) => {
                        tracing::debug!(provider = %provider, error = %e, "no credential left to try");
                        break;
                    }
                };
                tried.insert(lease.id());
                if switches > 0 {
                    self.switches.add(1, &[KeyValue::new("provider", provider.as_str())]);
                }
                switches += 1;

                let mut retries = 0;
                loop {
                    attempts += 1;
                    let error = match self.attempt(&candidate, &lease, &native, streaming).await {
                        Ok(reply) => {
                            let route = Route {
                                provider,
                                model: &upstream_request.model,
                                fallback_attempted,
                            };
                            return self.settle(&candidate, lease, reply, context, &route);
                        }
                        Err(error) => error,
                    };

                    tracing::warn!(
                        provider = %provider,
                        credential = %lease.id(),
                        attempt = attempts,
                        error = %error,
                        "provider call failed"
                    );

                    if let ProviderError::Protocol(message) = error {
                        drop(lease);
                        return Err(GatewayError::Protocol { provider, message });
                    }

                    if error.is_transport() && retries < self.policy.max_retries {
                        if !lease.record_failure(&error) {
                            last_error = Some(error);
                            break;
                        }
                        let delay = self.policy.base_delay.saturating_mul(2u32.saturating_pow(retries));
                        retries += 1;
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    lease.fail(&error);
                    last_error = Some(error);
                    break;
                }
            }
        }

        Err(GatewayError::Exhausted {
            provider: primary,
            fallback_attempted,
            attempts,
            last_error,
        })
    }

    /// One provider call under the request timeout
    async fn attempt(
        &self,
        candidate: &Candidate<'_>,
        lease: &CredentialLease,
        native: &NativeRequest,
        streaming: bool,
    ) -> Result<Reply, ProviderError> {
        let timeout = self.policy.request_timeout;
        let deadline = Instant::now() + timeout;

        let response = tokio::time::timeout_at(deadline, candidate.client.send(native, lease.record(), streaming))
            .await
            .map_err(|_| ProviderError::Timeout(timeout))??;

        let mut upstream = match response {
            ProviderResponse::Unary(response) => return Ok(Reply::Unary(response)),
            ProviderResponse::Stream(upstream) => upstream,
        };

        // Commit only once a chunk decodes to at least one canonical event;
        // framing such as `message_start` or `ping` leaves the exchange retryable.
        let mut state = candidate.converter.new_stream_state();
        let mut received = false;
        let pending = loop {
            let next = tokio::time::timeout_at(deadline, upstream.next())
                .await
                .map_err(|_| ProviderError::Timeout(timeout))?;

            match next {
                Some(Ok(chunk)) => {
                    received = true;
                    let events = candidate.converter.next_canonical_chunk(chunk, &mut state);
                    if !events.is_empty() {
                        break events;
                    }
                }
                Some(Err(error)) => return Err(error),
                None if received => {
                    upstream = futures_util::stream::empty().boxed();
                    break candidate.converter.finish_stream(&mut state);
                }
                None => return Err(ProviderError::Transport("stream closed before the first chunk".to_owned())),
            }
        };

        if let Some(StreamEvent::Error(failure)) = pending.iter().find(|event| event.is_terminal()) {
            return Err(provider_error(failure));
        }

        Ok(Reply::Stream {
            upstream,
            state,
            pending,
        })
    }

    fn settle(
        &self,
        candidate: &Candidate<'_>,
        lease: CredentialLease,
        reply: Reply,
        context: &ExchangeContext,
        route: &Route<'_>,
    ) -> Result<Dispatched, GatewayError> {
        match reply {
            Reply::Unary(response) => match candidate.converter.to_canonical_response(response) {
                Ok(response) => {
                    lease.succeed();
                    Ok(Dispatched::Unary(response))
                }
                Err(e) => {
                    drop(lease);
                    Err(GatewayError::Protocol {
                        provider: candidate.provider,
                        message: e.to_string(),
                    })
                }
            },
            Reply::Stream {
                upstream,
                state,
                pending,
            } => {
                tracing::debug!(provider = %route.provider, credential = %lease.id(), "stream committed");
                let mut stream = CanonicalStream {
                    upstream,
                    converter: Arc::clone(candidate.converter),
                    state,
                    pending: VecDeque::new(),
                    lease: Some(lease),
                    phase: StreamPhase::Streaming,
                    context: context.clone(),
                    observer: Arc::clone(&self.observer),
                    provider: route.provider,
                    model: route.model.to_owned(),
                    fallback_attempted: route.fallback_attempted,
                };
                stream.queue(pending);
                Ok(Dispatched::Stream(stream))
            }
        }
    }
}

/// Provider error standing in for an in-band failure chunk
fn provider_error(failure: &StreamFailure) -> ProviderError {
    match failure.kind {
        ErrorKind::Auth => ProviderError::Auth(failure.message.clone()),
        ErrorKind::Protocol => ProviderError::Protocol(failure.message.clone()),
        _ => ProviderError::Transport(failure.message.clone()),
    }
}

/// Committed stream of canonical chunks
///
/// Yields exactly one terminal chunk. Settles its lease when that chunk is
/// queued; dropping it earlier closes the upstream body and releases the
/// lease without penalty.
pub struct CanonicalStream {
    upstream: NativeChunkStream,
    converter: SharedConverter,
    state: StreamState,
    pending: VecDeque<StreamEvent>,
    lease: Option<CredentialLease>,
    phase: StreamPhase,
    context: ExchangeContext,
    observer: Arc<dyn Observer>,
    provider: ProviderType,
    model: String,
    fallback_attempted: bool,
}

impl CanonicalStream {
    pub const fn phase(&self) -> StreamPhase {
        self.phase
    }

    /// Provider that serves the stream
    pub const fn provider(&self) -> ProviderType {
        self.provider
    }

    /// Model the provider was asked for
    pub fn model(&self) -> &str {
        &self.model
    }

    pub const fn context(&self) -> &ExchangeContext {
        &self.context
    }

    /// Whether the serving provider came from the fallback chain
    pub const fn fallback_attempted(&self) -> bool {
        self.fallback_attempted
    }

    /// Queue decoded events, stopping at the first terminal one
    fn queue(&mut self, events: Vec<StreamEvent>) {
        for event in events {
            if self.phase != StreamPhase::Streaming {
                tracing::debug!(provider = %self.provider, "dropping chunk after terminal");
                return;
            }

            let mut event = event;
            match &mut event {
                StreamEvent::Done => {
                    self.phase = StreamPhase::Terminal;
                    if let Some(lease) = self.lease.take() {
                        lease.succeed();
                    }
                }
                StreamEvent::Error(failure) => {
                    failure.fallback_attempted |= self.fallback_attempted;
                    self.phase = StreamPhase::Errored;
                    if let Some(lease) = self.lease.take() {
                        lease.fail(&provider_error(failure));
                    }
                }
                StreamEvent::Delta(_) | StreamEvent::Usage(_) => {}
            }
            self.pending.push_back(event);
        }
    }

    /// Flush partial content and end with the upstream failure
    fn fail(&mut self, error: &ProviderError) {
        tracing::warn!(provider = %self.provider, error = %error, "stream failed after commit");

        let flushed: Vec<StreamEvent> = self
            .converter
            .finish_stream(&mut self.state)
            .into_iter()
            .filter(|event| matches!(event, StreamEvent::Delta(delta) if delta.finish_reason.is_none()))
            .collect();
        self.queue(flushed);

        self.phase = StreamPhase::Errored;
        if let Some(lease) = self.lease.take() {
            lease.fail(error);
        }
        let mut failure = StreamFailure::new(error.kind(), error.to_string());
        failure.fallback_attempted = self.fallback_attempted;
        self.pending.push_back(StreamEvent::Error(failure));
    }

    fn finish(&mut self) {
        let events = self.converter.finish_stream(&mut self.state);
        self.queue(events);
        if self.phase == StreamPhase::Streaming {
            self.queue(vec![StreamEvent::Done]);
        }
    }
}

impl Stream for CanonicalStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = this.pending.pop_front() {
                this.observer.stream_chunk(&this.context, &event);
                return Poll::Ready(Some(event));
            }

            if this.phase != StreamPhase::Streaming {
                return Poll::Ready(None);
            }

            match this.upstream.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => {
                    let events = this.converter.next_canonical_chunk(chunk, &mut this.state);
                    this.queue(events);
                }
                Poll::Ready(Some(Err(error))) => this.fail(&error),
                Poll::Ready(None) => this.finish(),
            }
        }
    }
}

impl Drop for CanonicalStream {
    fn drop(&mut self) {
        if self.phase == StreamPhase::Streaming {
            tracing::debug!(provider = %self.provider, "stream dropped before its terminal chunk");
        }
        self.observer.stream_finished(&self.context);
    }
}

impl std::fmt::Debug for CanonicalStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanonicalStream")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use secrecy::SecretString;
    use serde_json::json;

    use super::*;
    use crate::observer::NoopObserver;
    use crate::pool::{CredentialRecord, CredentialStatus, PoolPolicy, ProviderPool};
    use crate::protocol::openai::OpenAiStreamFrame;
    use crate::protocol::NativeChunk;
    use crate::provider::ProviderClient;
    use crate::types::{Message, Role, StreamDelta};

    enum Step {
        Fail(ProviderError),
        Unary(NativeResponse),
        Stream(Vec<Result<NativeChunk, ProviderError>>),
    }

    /// Replays scripted replies and records which credential each call used
    struct ScriptedClient {
        provider: ProviderType,
        steps: Mutex<VecDeque<Step>>,
        seen: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl ScriptedClient {
        fn new(provider: ProviderType, steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                provider,
                steps: Mutex::new(steps.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn labels(&self) -> Vec<String> {
            self.seen.lock().iter().map(|(label, _)| label.clone()).collect()
        }
    }

    #[async_trait]
    impl ProviderClient for ScriptedClient {
        fn provider(&self) -> ProviderType {
            self.provider
        }

        async fn send(
            &self,
            request: &NativeRequest,
            credential: &CredentialRecord,
            _streaming: bool,
        ) -> Result<ProviderResponse, ProviderError> {
            self.seen.lock().push((credential.label.clone(), request.to_json()));
            let step = self.steps.lock().pop_front();
            match step {
                Some(Step::Fail(error)) => Err(error),
                Some(Step::Unary(response)) => Ok(ProviderResponse::Unary(response)),
                Some(Step::Stream(chunks)) => Ok(ProviderResponse::Stream(futures_util::stream::iter(chunks).boxed())),
                None => Err(ProviderError::Transport("script exhausted".into())),
            }
        }
    }

    fn pool(provider: ProviderType, labels: &[&str]) -> Arc<ProviderPool> {
        let pool = Arc::new(ProviderPool::new(provider, PoolPolicy::default(), Arc::new(NoopObserver)));
        for label in labels {
            pool.insert(CredentialRecord::new(provider, *label, SecretString::from(format!("sk-{label}"))));
        }
        pool
    }

    fn policy(max_retries: u32) -> DispatchPolicy {
        DispatchPolicy {
            max_credential_switches: 5,
            request_timeout: Duration::from_secs(5),
            max_retries,
            base_delay: Duration::from_millis(1),
        }
    }

    fn router(pools: Vec<Arc<ProviderPool>>, clients: Vec<Arc<ScriptedClient>>, policy: DispatchPolicy) -> FallbackRouter {
        let mut manager = PoolManager::new();
        for pool in pools {
            manager.add_pool(pool);
        }
        let clients: ClientMap = clients
            .into_iter()
            .map(|client| (client.provider, client as SharedClient))
            .collect();

        FallbackRouter::new(
            Arc::new(manager),
            Arc::new(clients),
            ConverterRegistry::builtin(),
            policy,
            Arc::new(NoopObserver),
        )
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new("gpt-4o", vec![Message::text(Role::User, "hi")])
    }

    fn context(streaming: bool) -> ExchangeContext {
        ExchangeContext::new(Protocol::OpenAi, Protocol::OpenAi, "gpt-4o", streaming)
    }

    fn openai_reply(text: &str) -> Step {
        Step::Unary(NativeResponse::OpenAi(
            serde_json::from_value(json!({
                "id": "chatcmpl-1",
                "model": "gpt-4o",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": text}, "finish_reason": "stop"}]
            }))
            .unwrap(),
        ))
    }

    fn openai_chunk(text: &str) -> Result<NativeChunk, ProviderError> {
        Ok(NativeChunk::OpenAi(OpenAiStreamFrame::Chunk(
            serde_json::from_value(json!({
                "id": "c1",
                "choices": [{"index": 0, "delta": {"content": text}}]
            }))
            .unwrap(),
        )))
    }

    fn openai_done() -> Result<NativeChunk, ProviderError> {
        Ok(NativeChunk::OpenAi(OpenAiStreamFrame::Done))
    }

    fn content(response: &CompletionResponse) -> Option<&str> {
        response.first()?.message.content.as_deref()
    }

    #[tokio::test]
    async fn auth_failure_switches_credential() {
        let openai = pool(ProviderType::Openai, &["a", "b"]);
        let client = ScriptedClient::new(
            ProviderType::Openai,
            vec![Step::Fail(ProviderError::Auth("revoked".into())), openai_reply("hello")],
        );
        let router = router(vec![Arc::clone(&openai)], vec![Arc::clone(&client)], policy(3));

        let response = router
            .dispatch_unary(&request(), ProviderType::Openai, &mut context(false))
            .await
            .unwrap();

        assert_eq!(content(&response), Some("hello"));
        assert_eq!(client.labels(), ["a", "b"]);

        let states: Vec<_> = openai.records().iter().map(|record| record.state()).collect();
        assert_eq!(states[0].status, CredentialStatus::Disabled);
        assert_eq!(states[1].status, CredentialStatus::Active);
        assert!(states.iter().all(|state| state.in_flight == 0));
    }

    #[tokio::test]
    async fn transport_failure_retries_same_credential() {
        let openai = pool(ProviderType::Openai, &["a", "b"]);
        let client = ScriptedClient::new(
            ProviderType::Openai,
            vec![Step::Fail(ProviderError::Transport("reset".into())), openai_reply("again")],
        );
        let router = router(vec![Arc::clone(&openai)], vec![Arc::clone(&client)], policy(2));

        let response = router
            .dispatch_unary(&request(), ProviderType::Openai, &mut context(false))
            .await
            .unwrap();

        assert_eq!(content(&response), Some("again"));
        assert_eq!(client.labels(), ["a", "a"]);
        assert_eq!(openai.records()[0].state().error_count, 0);
    }

    #[tokio::test]
    async fn exhausted_retries_move_to_next_credential() {
        let openai = pool(ProviderType::Openai, &["a", "b"]);
        let client = ScriptedClient::new(
            ProviderType::Openai,
            vec![
                Step::Fail(ProviderError::Timeout(Duration::from_secs(1))),
                Step::Fail(ProviderError::Timeout(Duration::from_secs(1))),
                openai_reply("b wins"),
            ],
        );
        let router = router(vec![Arc::clone(&openai)], vec![Arc::clone(&client)], policy(1));

        let response = router
            .dispatch_unary(&request(), ProviderType::Openai, &mut context(false))
            .await
            .unwrap();

        assert_eq!(content(&response), Some("b wins"));
        assert_eq!(client.labels(), ["a", "a", "b"]);
        assert_eq!(openai.records()[0].state().error_count, 2);
    }

    #[tokio::test]
    async fn falls_back_with_fallback_model() {
        let openai = pool(ProviderType::Openai, &["a"]);
        let claude = pool(ProviderType::Claude, &["c"]);
        let openai_client = ScriptedClient::new(ProviderType::Openai, vec![Step::Fail(ProviderError::Auth("no".into()))]);
        let claude_client = ScriptedClient::new(
            ProviderType::Claude,
            vec![Step::Unary(NativeResponse::Anthropic(
                serde_json::from_value(json!({
                    "id": "msg_1",
                    "type": "message",
                    "role": "assistant",
                    "content": [{"type": "text", "text": "from claude"}],
                    "model": "claude-sonnet-4",
                    "stop_reason": "end_turn"
                }))
                .unwrap(),
            ))],
        );

        let router = router(
            vec![openai, claude],
            vec![openai_client, Arc::clone(&claude_client)],
            policy(0),
        )
        .with_fallback_chain(IndexMap::from([(ProviderType::Openai, vec![ProviderType::Claude])]))
        .with_fallback_model(ProviderType::Claude, "claude-sonnet-4");

        let mut context = context(false);
        let response = router
            .dispatch_unary(&request(), ProviderType::Openai, &mut context)
            .await
            .unwrap();

        assert_eq!(content(&response), Some("from claude"));
        assert_eq!(claude_client.seen.lock()[0].1["model"], "claude-sonnet-4");
        assert_eq!(context.target, Protocol::Anthropic);
        assert_eq!(context.provider, Some(ProviderType::Claude));
    }

    #[tokio::test]
    async fn exhaustion_reports_attempts_and_fallback() {
        let openai = pool(ProviderType::Openai, &["a"]);
        let claude = pool(ProviderType::Claude, &["c"]);
        let openai_client = ScriptedClient::new(ProviderType::Openai, vec![Step::Fail(ProviderError::Auth("no".into()))]);
        let claude_client = ScriptedClient::new(
            ProviderType::Claude,
            vec![Step::Fail(ProviderError::RateLimited {
                retry_after: None,
                message: "slow down".into(),
            })],
        );

        let router = router(vec![openai, claude], vec![openai_client, claude_client], policy(0))
            .with_fallback_chain(IndexMap::from([(ProviderType::Openai, vec![ProviderType::Claude])]));

        let error = router
            .dispatch_unary(&request(), ProviderType::Openai, &mut context(false))
            .await
            .unwrap_err();

        let GatewayError::Exhausted {
            provider,
            fallback_attempted,
            attempts,
            last_error,
        } = error
        else {
            panic!("expected exhaustion, got {error:?}");
        };
        assert_eq!(provider, ProviderType::Openai);
        assert!(fallback_attempted);
        assert_eq!(attempts, 2);
        assert!(matches!(last_error, Some(ProviderError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn protocol_error_is_not_retried() {
        let openai = pool(ProviderType::Openai, &["a", "b"]);
        let client = ScriptedClient::new(
            ProviderType::Openai,
            vec![Step::Fail(ProviderError::Protocol("unexpected 400".into()))],
        );
        let router = router(vec![Arc::clone(&openai)], vec![Arc::clone(&client)], policy(3));

        let error = router
            .dispatch_unary(&request(), ProviderType::Openai, &mut context(false))
            .await
            .unwrap_err();

        assert!(matches!(error, GatewayError::Protocol { provider: ProviderType::Openai, .. }));
        assert_eq!(client.labels(), ["a"]);
        let state = openai.records()[0].state();
        assert_eq!(state.error_count, 0);
        assert_eq!(state.status, CredentialStatus::Active);
    }

    #[test]
    fn unknown_fallbacks_and_duplicates_are_skipped() {
        let openai = pool(ProviderType::Openai, &["a"]);
        let router = router(vec![openai], Vec::new(), policy(0)).with_fallback_chain(IndexMap::from([(
            ProviderType::Openai,
            vec![ProviderType::Openai, ProviderType::Gemini],
        )]));

        assert_eq!(router.provider_sequence(ProviderType::Openai), [ProviderType::Openai]);
        assert!(router.provider_sequence(ProviderType::Kiro).is_empty());
    }

    #[tokio::test]
    async fn empty_stream_before_commit_switches_credential() {
        let openai = pool(ProviderType::Openai, &["a", "b"]);
        let client = ScriptedClient::new(
            ProviderType::Openai,
            vec![
                Step::Stream(Vec::new()),
                Step::Stream(vec![openai_chunk("hi"), openai_done()]),
            ],
        );
        let router = router(vec![Arc::clone(&openai)], vec![Arc::clone(&client)], policy(0));

        let stream = router
            .dispatch_stream(&request(), ProviderType::Openai, context(true))
            .await
            .unwrap();
        let events: Vec<_> = stream.collect().await;

        assert_eq!(events, [StreamEvent::Delta(StreamDelta::text("hi")), StreamEvent::Done]);
        assert_eq!(client.labels(), ["a", "b"]);
        assert_eq!(openai.records()[0].state().error_count, 1);
        assert_eq!(openai.records()[1].state().in_flight, 0);
    }

    fn claude_event(body: serde_json::Value) -> Result<NativeChunk, ProviderError> {
        Ok(NativeChunk::Anthropic(serde_json::from_value(body).unwrap()))
    }

    fn claude_message_start() -> Result<NativeChunk, ProviderError> {
        claude_event(json!({
            "type": "message_start",
            "message": {"id": "msg_1", "type": "message", "role": "assistant", "model": "claude-sonnet-4", "content": []}
        }))
    }

    #[tokio::test]
    async fn framing_chunks_do_not_commit_the_stream() {
        let claude = pool(ProviderType::Claude, &["a", "b"]);
        let client = ScriptedClient::new(
            ProviderType::Claude,
            vec![
                Step::Stream(vec![
                    claude_message_start(),
                    claude_event(json!({"type": "ping"})),
                    Err(ProviderError::Transport("connection reset".into())),
                ]),
                Step::Stream(vec![
                    claude_message_start(),
                    claude_event(json!({
                        "type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "hi"}
                    })),
                    claude_event(json!({"type": "message_stop"})),
                ]),
            ],
        );
        let router = router(vec![Arc::clone(&claude)], vec![Arc::clone(&client)], policy(0));

        let stream = router
            .dispatch_stream(&request(), ProviderType::Claude, context(true))
            .await
            .unwrap();
        let events: Vec<_> = stream.collect().await;

        assert_eq!(events, [StreamEvent::Delta(StreamDelta::text("hi")), StreamEvent::Done]);
        assert_eq!(client.labels(), ["a", "b"]);
        assert_eq!(claude.records()[0].state().error_count, 1);
    }

    #[tokio::test]
    async fn framing_only_stream_commits_at_its_end() {
        let claude = pool(ProviderType::Claude, &["a"]);
        let client = ScriptedClient::new(ProviderType::Claude, vec![Step::Stream(vec![claude_message_start()])]);
        let router = router(vec![Arc::clone(&claude)], vec![Arc::clone(&client)], policy(0));

        let stream = router
            .dispatch_stream(&request(), ProviderType::Claude, context(true))
            .await
            .unwrap();
        let events: Vec<_> = stream.collect().await;

        assert_eq!(events, [StreamEvent::Done]);
        assert_eq!(claude.records()[0].state().error_count, 0);
        assert_eq!(claude.records()[0].state().in_flight, 0);
    }

    #[tokio::test]
    async fn failure_after_commit_ends_with_error_chunk() {
        let openai = pool(ProviderType::Openai, &["a", "b"]);
        let client = ScriptedClient::new(
            ProviderType::Openai,
            vec![Step::Stream(vec![
                openai_chunk("par"),
                Err(ProviderError::Transport("connection reset".into())),
                openai_chunk("never"),
            ])],
        );
        let router = router(vec![Arc::clone(&openai)], vec![Arc::clone(&client)], policy(3));

        let mut stream = router
            .dispatch_stream(&request(), ProviderType::Openai, context(true))
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::Delta(StreamDelta::text("par")));
        let StreamEvent::Error(failure) = &events[1] else {
            panic!("expected a terminal error, got {:?}", events[1]);
        };
        assert_eq!(failure.kind, ErrorKind::Transport);
        assert!(!failure.fallback_attempted);
        assert_eq!(stream.phase(), StreamPhase::Errored);

        assert_eq!(client.labels(), ["a"]);
        assert_eq!(openai.records()[0].state().error_count, 1);
    }

    #[tokio::test]
    async fn dropped_stream_releases_without_penalty() {
        let openai = pool(ProviderType::Openai, &["a"]);
        let client = ScriptedClient::new(
            ProviderType::Openai,
            vec![Step::Stream(vec![openai_chunk("one"), openai_chunk("two"), openai_done()])],
        );
        let router = router(vec![Arc::clone(&openai)], vec![client], policy(0));

        let mut stream = router
            .dispatch_stream(&request(), ProviderType::Openai, context(true))
            .await
            .unwrap();
        assert_eq!(stream.next().await, Some(StreamEvent::Delta(StreamDelta::text("one"))));
        assert_eq!(openai.records()[0].state().in_flight, 1);
        drop(stream);

        let state = openai.records()[0].state();
        assert_eq!(state.in_flight, 0);
        assert_eq!(state.error_count, 0);
        assert_eq!(state.status, CredentialStatus::Active);
    }

    #[tokio::test]
    async fn in_band_error_in_first_chunk_is_a_failed_attempt() {
        let openai = pool(ProviderType::Openai, &["a", "b"]);
        let error_frame = OpenAiStreamFrame::parse(r#"{"error": {"message": "overloaded", "type": "server_error"}}"#).unwrap();
        let client = ScriptedClient::new(
            ProviderType::Openai,
            vec![
                Step::Stream(vec![Ok(NativeChunk::OpenAi(error_frame))]),
                Step::Stream(vec![openai_chunk("ok"), openai_done()]),
            ],
        );
        let router = router(vec![openai], vec![Arc::clone(&client)], policy(0));

        let stream = router
            .dispatch_stream(&request(), ProviderType::Openai, context(true))
            .await
            .unwrap();
        let events: Vec<_> = stream.collect().await;

        assert_eq!(events.last(), Some(&StreamEvent::Done));
        assert_eq!(client.labels(), ["a", "b"]);
    }
}
