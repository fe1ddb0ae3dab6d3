//! Provider clients for the upstream backends
//!
//! A client turns an already-encoded [`NativeRequest`] into an HTTP call
//! through the shared [`Transport`] and decodes the reply into native
//! values. It knows nothing about pools or fallback; the router hands it
//! one credential per call.

pub mod anthropic;
pub mod google;
pub mod grok;
pub mod kiro;
pub mod openai;

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::{Stream, StreamExt, TryStreamExt};
use http::{HeaderMap, HeaderValue, Method};
use indexmap::IndexMap;
use switchyard_config::{Config, ProviderConfig, ProviderType, TransportConfig};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use url::Url;

use crate::error::{GatewayError, ProviderError, classify_status, parse_retry_after};
use crate::pool::CredentialRecord;
use crate::protocol::kiro::{KiroEvent, scan_events};
use crate::protocol::{NativeChunk, NativeRequest, NativeResponse};
use crate::transport::{ByteStream, Transport, TransportError, TransportRequest, TransportResponse};

/// Native chunks of one streaming call
pub type NativeChunkStream = Pin<Box<dyn Stream<Item = Result<NativeChunk, ProviderError>> + Send>>;

/// Result of a successful provider call
pub enum ProviderResponse {
    Unary(NativeResponse),
    Stream(NativeChunkStream),
}

impl std::fmt::Debug for ProviderResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unary(response) => f.debug_tuple("Unary").field(response).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Client for one provider family
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn provider(&self) -> ProviderType;

    /// Send one request with one credential
    async fn send(
        &self,
        request: &NativeRequest,
        credential: &CredentialRecord,
        streaming: bool,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Whether [`ProviderClient::sync_usage`] is implemented
    fn supports_usage_sync(&self) -> bool {
        false
    }

    /// Fetch the credential's usage or quota snapshot
    async fn sync_usage(&self, credential: &CredentialRecord) -> Result<serde_json::Value, ProviderError> {
        let _ = credential;
        Err(ProviderError::Protocol(format!("{} has no usage endpoint", self.provider())))
    }
}

pub type SharedClient = Arc<dyn ProviderClient>;

/// Clients keyed by provider
pub type ClientMap = IndexMap<ProviderType, SharedClient>;

/// Build a client for every configured provider
///
/// # Errors
///
/// Returns `Configuration` when a provider's base URL cannot be used.
pub fn build_clients(config: &Config, transport: &Arc<dyn Transport>) -> Result<ClientMap, GatewayError> {
    let upstream = Upstream::new(Arc::clone(transport), &config.transport);
    let mut clients = ClientMap::new();

    for (provider, provider_config) in &config.providers {
        let client: SharedClient = match provider {
            ProviderType::Openai => Arc::new(openai::OpenAiClient::new(provider_config, upstream.clone())?),
            ProviderType::Claude => Arc::new(anthropic::AnthropicClient::new(provider_config, upstream.clone())?),
            ProviderType::Gemini => Arc::new(google::GeminiClient::new(provider_config, upstream.clone())),
            ProviderType::Grok => Arc::new(grok::GrokClient::new(provider_config, upstream.clone())?),
            ProviderType::Kiro => Arc::new(kiro::KiroClient::new(provider_config, upstream.clone())),
        };
        clients.insert(*provider, client);
    }

    Ok(clients)
}

/// Transport plus the timeouts every client applies
#[derive(Clone)]
pub struct Upstream {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    stream_timeout: Duration,
}

impl Upstream {
    pub fn new(transport: Arc<dyn Transport>, config: &TransportConfig) -> Self {
        Self {
            transport,
            timeout: config.timeout(),
            stream_timeout: config.stream_timeout(),
        }
    }

    /// POST a JSON body and fail on non-success statuses
    pub async fn post_json<T: serde::Serialize + Sync>(
        &self,
        url: Url,
        headers: HeaderMap,
        body: &T,
        profile: Option<String>,
        streaming: bool,
    ) -> Result<TransportResponse, ProviderError> {
        let body = serde_json::to_vec(body)
            .map_err(|e| ProviderError::Protocol(format!("failed to encode request: {e}")))?;

        let timeout = if streaming { self.stream_timeout } else { self.timeout };
        let mut request = TransportRequest::post(url, Bytes::from(body), timeout);
        request.headers.extend(headers);
        request.profile = profile;

        self.execute(request).await
    }

    /// GET with the unary timeout and fail on non-success statuses
    pub async fn get(&self, url: Url, headers: HeaderMap, profile: Option<String>) -> Result<TransportResponse, ProviderError> {
        let mut request = TransportRequest::post(url, Bytes::new(), self.timeout);
        request.method = Method::GET;
        request.headers = headers;
        request.profile = profile;

        self.execute(request).await
    }

    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, ProviderError> {
        let url = request.url.clone();
        let response = self.transport.call(request).await.map_err(|e| {
            tracing::warn!(url = %url, error = %e, "upstream request failed");
            ProviderError::from(e)
        })?;

        if response.status.is_success() {
            return Ok(response);
        }

        let status = response.status;
        let retry_after = parse_retry_after(&response.headers);
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(url = %url, status = %status, "upstream returned error");

        Err(classify_status(status, retry_after, body.trim()))
    }
}

/// Append `path` to a base URL
pub(crate) fn endpoint(base: &str, path: &str) -> Result<Url, url::ParseError> {
    Url::parse(&format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/')))
}

/// Base URL from config, or the provider default
pub(crate) fn base_url(config: &ProviderConfig, default: &str) -> String {
    config
        .base_url
        .as_ref()
        .map_or_else(|| default.to_owned(), |url| url.as_str().trim_end_matches('/').to_owned())
}

pub(crate) fn header_value(value: &str) -> Result<HeaderValue, ProviderError> {
    HeaderValue::from_str(value).map_err(|_| ProviderError::Auth("credential contains invalid header characters".into()))
}

/// Decode a whole JSON body
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(response: TransportResponse) -> Result<T, ProviderError> {
    let bytes = response.bytes().await.map_err(ProviderError::from)?;
    serde_json::from_slice(&bytes).map_err(|e| ProviderError::Protocol(format!("failed to parse response: {e}")))
}

/// SSE `data:` payloads, skipping blank ones
pub(crate) fn sse_data(body: ByteStream) -> impl Stream<Item = Result<(String, String), ProviderError>> + Send {
    body.eventsource()
        .map_err(|error| match error {
            EventStreamError::Transport(e) => ProviderError::from(e),
            other => ProviderError::Transport(other.to_string()),
        })
        .try_filter_map(|event| async move {
            let data = event.data.trim();
            if data.is_empty() {
                return Ok(None);
            }
            Ok(Some((event.event, data.to_owned())))
        })
}

/// Newline-delimited lines of the body
pub(crate) fn body_lines(body: ByteStream) -> impl Stream<Item = Result<String, ProviderError>> + Send {
    let reader = StreamReader::new(body.map_err(std::io::Error::other));
    FramedRead::new(reader, LinesCodec::new()).map_err(|error| match error {
        LinesCodecError::Io(e) => io_error(&e),
        LinesCodecError::MaxLineLengthExceeded => ProviderError::Protocol("stream line too long".into()),
    })
}

fn io_error(error: &std::io::Error) -> ProviderError {
    error
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<TransportError>())
        .map_or_else(|| ProviderError::Transport(error.to_string()), |e| ProviderError::from(e.clone()))
}

/// Kiro event payloads scanned out of the raw event-stream bytes
pub(crate) fn kiro_events(body: ByteStream) -> impl Stream<Item = Result<KiroEvent, ProviderError>> + Send {
    let scanner = KiroScanner {
        body,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures_util::stream::unfold(scanner, |mut scanner| async move {
        let item = scanner.next_event().await?;
        Some((item, scanner))
    })
}

struct KiroScanner {
    body: ByteStream,
    buffer: Vec<u8>,
    pending: VecDeque<KiroEvent>,
    finished: bool,
}

impl KiroScanner {
    async fn next_event(&mut self) -> Option<Result<KiroEvent, ProviderError>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.finished {
                return None;
            }

            match self.body.next().await {
                Some(Ok(bytes)) => {
                    self.buffer.extend_from_slice(&bytes);
                    let (events, consumed) = scan_events(&self.buffer);
                    self.buffer.drain(..consumed);
                    self.pending.extend(events);
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
                None => {
                    self.finished = true;
                    if !self.buffer.is_empty() {
                        tracing::debug!(bytes = self.buffer.len(), "discarding trailing Kiro stream bytes");
                    }
                }
            }
        }
    }
}
