//! Outbound HTTP transport
//!
//! Provider clients send every call through a [`Transport`]. Two
//! strategies exist: [`GenericTransport`] over `reqwest`, and
//! [`FingerprintTransport`], which delegates to an externally supplied
//! browser-fingerprinting backend. [`select_transport`] picks one at
//! startup.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};
use http::{HeaderMap, Method, StatusCode};
use switchyard_config::TransportConfig;
use thiserror::Error;
use url::Url;

use crate::error::ProviderError;

/// Profile used when neither the request nor the config names one
pub const DEFAULT_PROFILE: &str = "chrome_131";

/// Response body as it arrives
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The fingerprint backend cannot impersonate the requested profile
    #[error("transport profile `{0}` is unavailable")]
    ProfileUnavailable(String),

    #[error("transport timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport i/o error: {0}")]
    Io(String),
}

impl From<TransportError> for ProviderError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Timeout(after) => Self::Timeout(after),
            other => Self::Transport(other.to_string()),
        }
    }
}

/// One outbound HTTP call
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Browser profile for fingerprinting transports
    pub profile: Option<String>,
    pub timeout: Duration,
}

impl TransportRequest {
    /// JSON `POST` with no extra headers
    pub fn post(url: Url, body: Bytes, timeout: Duration) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, http::HeaderValue::from_static("application/json"));

        Self {
            url,
            method: Method::POST,
            headers,
            body,
            profile: None,
            timeout,
        }
    }
}

pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl TransportResponse {
    /// Collect the whole body
    pub async fn bytes(self) -> Result<Bytes, TransportError> {
        let chunks: Vec<Bytes> = self.body.try_collect().await?;
        Ok(chunks.concat().into())
    }

    /// Collect the body as lossy UTF-8
    pub async fn text(self) -> Result<String, TransportError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn call(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Plain `reqwest` transport
pub struct GenericTransport {
    client: reqwest::Client,
}

impl GenericTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for GenericTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for GenericTransport {
    fn name(&self) -> &'static str {
        "generic"
    }

    async fn call(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let timeout = request.timeout;
        let response = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .body(request.body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest(&e, timeout))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| classify_reqwest(&e, timeout)))
            .boxed();

        Ok(TransportResponse { status, headers, body })
    }
}

fn classify_reqwest(error: &reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout)
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Io(error.to_string())
    }
}

/// Request handed to a fingerprinting backend
#[derive(Debug, Clone)]
pub struct FingerprintRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub profile: String,
    pub timeout: Duration,
}

/// Buffered reply from a fingerprinting backend
///
/// A `status` of 0 means the backend itself failed; `error` then says why.
#[derive(Debug, Clone, Default)]
pub struct FingerprintResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub error: Option<String>,
}

/// TLS/HTTP2 fingerprinting client installed by the embedding application
#[async_trait]
pub trait FingerprintBackend: Send + Sync {
    fn supports_profile(&self, profile: &str) -> bool;

    async fn execute(&self, request: FingerprintRequest) -> FingerprintResponse;
}

/// Transport that impersonates a browser through a [`FingerprintBackend`]
pub struct FingerprintTransport {
    backend: Arc<dyn FingerprintBackend>,
    default_profile: String,
}

impl FingerprintTransport {
    pub fn new(backend: Arc<dyn FingerprintBackend>, default_profile: impl Into<String>) -> Self {
        Self {
            backend,
            default_profile: default_profile.into(),
        }
    }
}

#[async_trait]
impl Transport for FingerprintTransport {
    fn name(&self) -> &'static str {
        "fingerprint"
    }

    async fn call(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let profile = request.profile.unwrap_or_else(|| self.default_profile.clone());
        if !self.backend.supports_profile(&profile) {
            return Err(TransportError::ProfileUnavailable(profile));
        }

        let timeout = request.timeout;
        let call = self.backend.execute(FingerprintRequest {
            method: request.method,
            url: request.url,
            headers: request.headers,
            body: request.body,
            profile,
            timeout,
        });

        let response = tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| TransportError::Timeout(timeout))?;

        if response.status == 0 {
            return Err(TransportError::Io(
                response
                    .error
                    .unwrap_or_else(|| "fingerprint backend failed".to_owned()),
            ));
        }

        let status = StatusCode::from_u16(response.status)
            .map_err(|_| TransportError::Io(format!("invalid status {}", response.status)))?;
        let body = futures_util::stream::once(std::future::ready(Ok(response.body))).boxed();

        Ok(TransportResponse {
            status,
            headers: response.headers,
            body,
        })
    }
}

/// Choose the transport once at startup
///
/// The fingerprinting transport is used only when enabled, installed and
/// able to serve the configured profile; otherwise the generic one is.
pub fn select_transport(config: &TransportConfig, backend: Option<Arc<dyn FingerprintBackend>>) -> Arc<dyn Transport> {
    if !config.fingerprint {
        return Arc::new(GenericTransport::new());
    }

    match backend {
        Some(backend) if backend.supports_profile(&config.profile) => {
            tracing::info!(profile = %config.profile, "using fingerprinting transport");
            Arc::new(FingerprintTransport::new(backend, config.profile.clone()))
        }
        Some(_) => {
            tracing::warn!(
                profile = %config.profile,
                "fingerprint backend does not support profile, using generic transport"
            );
            Arc::new(GenericTransport::new())
        }
        None => {
            tracing::warn!("fingerprinting requested but no backend installed, using generic transport");
            Arc::new(GenericTransport::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    struct StubBackend {
        profiles: &'static [&'static str],
        status: u16,
        calls: AtomicU32,
    }

    impl StubBackend {
        fn new(profiles: &'static [&'static str], status: u16) -> Arc<Self> {
            Arc::new(Self {
                profiles,
                status,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl FingerprintBackend for StubBackend {
        fn supports_profile(&self, profile: &str) -> bool {
            self.profiles.contains(&profile)
        }

        async fn execute(&self, request: FingerprintRequest) -> FingerprintResponse {
            self.calls.fetch_add(1, Ordering::Relaxed);
            FingerprintResponse {
                status: self.status,
                headers: HeaderMap::new(),
                body: Bytes::from(format!("{} via {}", request.url, request.profile)),
                error: (self.status == 0).then(|| "handshake failed".to_owned()),
            }
        }
    }

    fn request(profile: Option<&str>) -> TransportRequest {
        let mut request = TransportRequest::post(
            Url::parse("https://example.com/x").unwrap(),
            Bytes::from_static(b"{}"),
            Duration::from_secs(5),
        );
        request.profile = profile.map(str::to_owned);
        request
    }

    fn config(fingerprint: bool) -> TransportConfig {
        TransportConfig {
            fingerprint,
            ..TransportConfig::default()
        }
    }

    #[test]
    fn generic_unless_fingerprint_is_requested() {
        let backend: Arc<dyn FingerprintBackend> = StubBackend::new(&[DEFAULT_PROFILE], 200);
        assert_eq!(select_transport(&config(false), Some(backend)).name(), "generic");
    }

    #[test]
    fn falls_back_when_backend_is_missing_or_lacks_profile() {
        assert_eq!(select_transport(&config(true), None).name(), "generic");

        let backend: Arc<dyn FingerprintBackend> = StubBackend::new(&["firefox_133"], 200);
        assert_eq!(select_transport(&config(true), Some(backend)).name(), "generic");

        let backend: Arc<dyn FingerprintBackend> = StubBackend::new(&[DEFAULT_PROFILE], 200);
        assert_eq!(select_transport(&config(true), Some(backend)).name(), "fingerprint");
    }

    #[tokio::test]
    async fn fingerprint_body_is_buffered() {
        let transport = FingerprintTransport::new(StubBackend::new(&[DEFAULT_PROFILE], 200), DEFAULT_PROFILE);
        let response = transport.call(request(None)).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "https://example.com/x via chrome_131");
    }

    #[tokio::test]
    async fn unknown_profile_is_reported_distinctly() {
        let backend = StubBackend::new(&[DEFAULT_PROFILE], 200);
        let transport = FingerprintTransport::new(backend.clone(), DEFAULT_PROFILE);

        let error = transport.call(request(Some("safari_18"))).await.unwrap_err();
        assert_eq!(error, TransportError::ProfileUnavailable("safari_18".into()));
        assert_eq!(backend.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn status_zero_is_an_internal_error() {
        let transport = FingerprintTransport::new(StubBackend::new(&[DEFAULT_PROFILE], 0), DEFAULT_PROFILE);
        let error = transport.call(request(None)).await.unwrap_err();
        assert_eq!(error, TransportError::Io("handshake failed".into()));
    }

    #[test]
    fn timeouts_stay_timeouts() {
        let after = Duration::from_secs(3);
        assert!(matches!(
            ProviderError::from(TransportError::Timeout(after)),
            ProviderError::Timeout(d) if d == after
        ));
        assert!(matches!(
            ProviderError::from(TransportError::ProfileUnavailable("x".into())),
            ProviderError::Transport(_)
        ));
    }
}
