//! `OpenAI` chat completions client

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use http::HeaderMap;
use http::header::AUTHORIZATION;
use secrecy::ExposeSecret;
use switchyard_config::{ProviderConfig, ProviderType};
use url::Url;

use super::{ProviderClient, ProviderResponse, Upstream, base_url, endpoint, header_value, read_json, sse_data};
use crate::error::{GatewayError, ProviderError};
use crate::pool::CredentialRecord;
use crate::protocol::openai::{OpenAiResponse, OpenAiStreamFrame};
use crate::protocol::{NativeChunk, NativeRequest, NativeResponse, Protocol};

/// Default `OpenAI` API base URL
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiClient {
    upstream: Upstream,
    completions_url: Url,
}

impl OpenAiClient {
    /// # Errors
    ///
    /// Returns `Configuration` if the base URL cannot take a path.
    pub fn new(config: &ProviderConfig, upstream: Upstream) -> Result<Self, GatewayError> {
        let completions_url = endpoint(&base_url(config, DEFAULT_BASE_URL), "chat/completions")
            .map_err(|e| GatewayError::Configuration(format!("invalid openai base_url: {e}")))?;

        Ok(Self {
            upstream,
            completions_url,
        })
    }
}

#[async_trait]
impl ProviderClient for OpenAiClient {
    fn provider(&self) -> ProviderType {
        ProviderType::Openai
    }

    async fn send(
        &self,
        request: &NativeRequest,
        credential: &CredentialRecord,
        streaming: bool,
    ) -> Result<ProviderResponse, ProviderError> {
        let NativeRequest::OpenAi(body) = request else {
            return Err(ProviderError::Protocol(format!(
                "openai client cannot send a {} request",
                request.protocol()
            )));
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("Bearer {}", credential.secret.expose_secret()))?,
        );

        let response = self
            .upstream
            .post_json(self.completions_url.clone(), headers, body, None, streaming)
            .await?;

        if !streaming {
            let response: OpenAiResponse = read_json(response).await?;
            return Ok(ProviderResponse::Unary(NativeResponse::OpenAi(response)));
        }

        let chunks = sse_data(response.body).try_filter_map(|(_, data)| async move {
            match OpenAiStreamFrame::parse(&data) {
                Ok(frame) => Ok(Some(NativeChunk::OpenAi(frame))),
                Err(e) => {
                    tracing::debug!(protocol = %Protocol::OpenAi, error = %e, "skipping unparseable SSE frame");
                    Ok(None)
                }
            }
        });

        Ok(ProviderResponse::Stream(chunks.boxed()))
    }
}
