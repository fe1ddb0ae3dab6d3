//! Grok web chat client
//!
//! Grok authenticates with the `sso` session cookie and answers every chat
//! request with a newline-delimited JSON stream; unary calls collect that
//! stream before returning. Browser-like headers are sent so the
//! fingerprinting transport's TLS profile and the HTTP layer agree.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::{StreamExt, TryStreamExt};
use http::{HeaderMap, HeaderValue, header};
use rand::Rng;
use secrecy::ExposeSecret;
use switchyard_config::{ProviderConfig, ProviderType};
use url::Url;
use uuid::Uuid;

use super::{ProviderClient, ProviderResponse, Upstream, base_url, body_lines, endpoint, header_value, read_json};
use crate::error::{GatewayError, ProviderError};
use crate::pool::CredentialRecord;
use crate::protocol::grok::{GrokLine, GrokRateLimitRequest, GrokRateLimits, GrokResponse, parse_line};
use crate::protocol::{NativeChunk, NativeRequest, NativeResponse, Protocol};

const DEFAULT_BASE_URL: &str = "https://grok.com";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";

pub struct GrokClient {
    upstream: Upstream,
    origin: String,
    chat_url: Url,
    rate_limits_url: Url,
}

impl GrokClient {
    /// # Errors
    ///
    /// Returns `Configuration` if the base URL cannot take a path.
    pub fn new(config: &ProviderConfig, upstream: Upstream) -> Result<Self, GatewayError> {
        let origin = base_url(config, DEFAULT_BASE_URL);
        let invalid = |e: url::ParseError| GatewayError::Configuration(format!("invalid grok base_url: {e}"));

        Ok(Self {
            upstream,
            chat_url: endpoint(&origin, "rest/app-chat/conversations/new").map_err(invalid)?,
            rate_limits_url: endpoint(&origin, "rest/rate-limits").map_err(invalid)?,
            origin,
        })
    }

    fn headers(&self, credential: &CredentialRecord) -> Result<HeaderMap, ProviderError> {
        let secret = credential.secret.expose_secret();
        let token = secret.strip_prefix("sso=").unwrap_or(secret);

        let mut cookies = vec![format!("sso={token}"), format!("sso-rw={token}")];
        if let Some(clearance) = credential.attribute("cf_clearance") {
            cookies.push(format!("cf_clearance={clearance}"));
        }

        let user_agent = credential.attribute("user_agent").unwrap_or(DEFAULT_USER_AGENT);

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::COOKIE, header_value(&cookies.join("; "))?);
        headers.insert(header::ORIGIN, header_value(&self.origin)?);
        headers.insert(header::REFERER, header_value(&format!("{}/", self.origin))?);
        headers.insert(header::USER_AGENT, header_value(user_agent)?);
        headers.insert("sec-fetch-dest", HeaderValue::from_static("empty"));
        headers.insert("sec-fetch-mode", HeaderValue::from_static("cors"));
        headers.insert("sec-fetch-site", HeaderValue::from_static("same-origin"));
        headers.insert("x-statsig-id", header_value(&statsig_id())?);
        headers.insert("x-xai-request-id", header_value(&Uuid::new_v4().to_string())?);

        Ok(headers)
    }
}

/// Opaque client-telemetry id the web app attaches to each call
fn statsig_id() -> String {
    const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

    let mut rng = rand::rng();
    let (len, charset) = if rng.random_bool(0.5) {
        (5, ALPHANUMERIC)
    } else {
        (10, &ALPHANUMERIC[..26])
    };
    let tag: String = (0..len)
        .map(|_| char::from(charset[rng.random_range(0..charset.len())]))
        .collect();

    let message = if len == 5 {
        format!("e:TypeError: Cannot read properties of null (reading 'children['{tag}']')")
    } else {
        format!("e:TypeError: Cannot read properties of undefined (reading '{tag}')")
    };

    STANDARD.encode(message)
}

#[async_trait]
impl ProviderClient for GrokClient {
    fn provider(&self) -> ProviderType {
        ProviderType::Grok
    }

    async fn send(
        &self,
        request: &NativeRequest,
        credential: &CredentialRecord,
        streaming: bool,
    ) -> Result<ProviderResponse, ProviderError> {
        let NativeRequest::Grok(body) = request else {
            return Err(ProviderError::Protocol(format!(
                "grok client cannot send a {} request",
                request.protocol()
            )));
        };

        let profile = credential.attribute("profile").map(str::to_owned);
        let response = self
            .upstream
            .post_json(self.chat_url.clone(), self.headers(credential)?, body, profile, streaming)
            .await?;

        let chunks = body_lines(response.body).try_filter_map(|line| async move {
            match parse_line(&line) {
                Ok(GrokLine::Chunk(chunk)) => Ok(Some(chunk)),
                Ok(GrokLine::Ignored | GrokLine::Done) => Ok(None),
                Err(e) => {
                    tracing::debug!(protocol = %Protocol::Grok, error = %e, "skipping unparseable stream line");
                    Ok(None)
                }
            }
        });

        if streaming {
            return Ok(ProviderResponse::Stream(chunks.map_ok(NativeChunk::Grok).boxed()));
        }

        let chunks: Vec<_> = chunks.try_collect().await?;
        Ok(ProviderResponse::Unary(NativeResponse::Grok(GrokResponse {
            model: body.model_name.clone(),
            chunks,
        })))
    }

    fn supports_usage_sync(&self) -> bool {
        true
    }

    async fn sync_usage(&self, credential: &CredentialRecord) -> Result<serde_json::Value, ProviderError> {
        let profile = credential.attribute("profile").map(str::to_owned);
        let response = self
            .upstream
            .post_json(
                self.rate_limits_url.clone(),
                self.headers(credential)?,
                &GrokRateLimitRequest::default(),
                profile,
                false,
            )
            .await?;

        let limits: GrokRateLimits = read_json(response).await?;
        let usage = limits.usage();
        tracing::debug!(credential = %credential.id, remaining = ?usage.remaining, used = usage.used, "grok usage synced");

        serde_json::to_value(usage).map_err(|e| ProviderError::Protocol(e.to_string()))
    }
}
