//! Google Generative Language API client

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use http::HeaderMap;
use secrecy::ExposeSecret;
use switchyard_config::{ProviderConfig, ProviderType};
use url::Url;

use super::{ProviderClient, ProviderResponse, Upstream, base_url, endpoint, header_value, read_json, sse_data};
use crate::error::ProviderError;
use crate::pool::CredentialRecord;
use crate::protocol::google::{GoogleResponse, GoogleStreamFrame};
use crate::protocol::{NativeChunk, NativeRequest, NativeResponse, Protocol};

/// Default Google Generative Language API base URL
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiClient {
    upstream: Upstream,
    base_url: String,
}

impl GeminiClient {
    pub fn new(config: &ProviderConfig, upstream: Upstream) -> Self {
        Self {
            upstream,
            base_url: base_url(config, DEFAULT_BASE_URL),
        }
    }

    /// `generateContent` or SSE `streamGenerateContent` endpoint for a model
    fn action_url(&self, model: &str, streaming: bool) -> Result<Url, ProviderError> {
        let action = if streaming {
            "streamGenerateContent?alt=sse"
        } else {
            "generateContent"
        };

        endpoint(&self.base_url, &format!("models/{model}:{action}"))
            .map_err(|e| ProviderError::Protocol(format!("invalid gemini model `{model}`: {e}")))
    }
}

#[async_trait]
impl ProviderClient for GeminiClient {
    fn provider(&self) -> ProviderType {
        ProviderType::Gemini
    }

    async fn send(
        &self,
        request: &NativeRequest,
        credential: &CredentialRecord,
        streaming: bool,
    ) -> Result<ProviderResponse, ProviderError> {
        let NativeRequest::Gemini { model, request: body } = request else {
            return Err(ProviderError::Protocol(format!(
                "gemini client cannot send a {} request",
                request.protocol()
            )));
        };

        let mut headers = HeaderMap::new();
        headers.insert("x-goog-api-key", header_value(credential.secret.expose_secret())?);

        let url = self.action_url(model, streaming)?;
        let response = self.upstream.post_json(url, headers, body, None, streaming).await?;

        if !streaming {
            let response: GoogleResponse = read_json(response).await?;
            return Ok(ProviderResponse::Unary(NativeResponse::Gemini(response)));
        }

        let frames = sse_data(response.body).try_filter_map(|(_, data)| async move {
            match GoogleStreamFrame::parse(&data) {
                Ok(frame) => Ok(Some(NativeChunk::Gemini(frame))),
                Err(e) => {
                    tracing::debug!(protocol = %Protocol::Gemini, error = %e, "skipping unparseable SSE frame");
                    Ok(None)
                }
            }
        });

        Ok(ProviderResponse::Stream(frames.boxed()))
    }
}
