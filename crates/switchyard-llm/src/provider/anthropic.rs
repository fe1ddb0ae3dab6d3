//! Anthropic Messages API client

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use http::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use switchyard_config::{ProviderConfig, ProviderType};
use url::Url;

use super::{ProviderClient, ProviderResponse, Upstream, base_url, endpoint, header_value, read_json, sse_data};
use crate::error::{GatewayError, ProviderError};
use crate::pool::CredentialRecord;
use crate::protocol::anthropic::{AnthropicResponse, AnthropicStreamEvent};
use crate::protocol::{NativeChunk, NativeRequest, NativeResponse, Protocol};

/// Default Anthropic API base URL
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    upstream: Upstream,
    messages_url: Url,
}

impl AnthropicClient {
    /// # Errors
    ///
    /// Returns `Configuration` if the base URL cannot take a path.
    pub fn new(config: &ProviderConfig, upstream: Upstream) -> Result<Self, GatewayError> {
        let messages_url = endpoint(&base_url(config, DEFAULT_BASE_URL), "messages")
            .map_err(|e| GatewayError::Configuration(format!("invalid claude base_url: {e}")))?;

        Ok(Self { upstream, messages_url })
    }
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    fn provider(&self) -> ProviderType {
        ProviderType::Claude
    }

    async fn send(
        &self,
        request: &NativeRequest,
        credential: &CredentialRecord,
        streaming: bool,
    ) -> Result<ProviderResponse, ProviderError> {
        let NativeRequest::Anthropic(body) = request else {
            return Err(ProviderError::Protocol(format!(
                "claude client cannot send a {} request",
                request.protocol()
            )));
        };

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", header_value(credential.secret.expose_secret())?);
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));

        let response = self
            .upstream
            .post_json(self.messages_url.clone(), headers, body, None, streaming)
            .await?;

        if !streaming {
            let response: AnthropicResponse = read_json(response).await?;
            return Ok(ProviderResponse::Unary(NativeResponse::Anthropic(response)));
        }

        let events = sse_data(response.body).try_filter_map(|(_, data)| async move {
            match serde_json::from_str::<AnthropicStreamEvent>(&data) {
                Ok(event) => Ok(Some(NativeChunk::Anthropic(event))),
                Err(e) => {
                    tracing::debug!(protocol = %Protocol::Anthropic, error = %e, "skipping unparseable SSE event");
                    Ok(None)
                }
            }
        });

        Ok(ProviderResponse::Stream(events.boxed()))
    }
}
