//! Kiro (`CodeWhisperer`) client
//!
//! The region and profile ARN are per credential. Replies are AWS event
//! streams; payloads are scanned out of the raw bytes as they arrive.

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use http::{HeaderMap, HeaderValue, header};
use secrecy::ExposeSecret;
use switchyard_config::{ProviderConfig, ProviderType};
use url::Url;
use uuid::Uuid;

use super::{ProviderClient, ProviderResponse, Upstream, endpoint, header_value, kiro_events, read_json};
use crate::error::ProviderError;
use crate::pool::CredentialRecord;
use crate::protocol::kiro::{KiroResponse, ORIGIN};
use crate::protocol::{NativeChunk, NativeRequest, NativeResponse};

const DEFAULT_REGION: &str = "us-east-1";

pub struct KiroClient {
    upstream: Upstream,
    /// Overrides both regional hosts when set
    base_url: Option<String>,
}

impl KiroClient {
    pub fn new(config: &ProviderConfig, upstream: Upstream) -> Self {
        Self {
            upstream,
            base_url: config
                .base_url
                .as_ref()
                .map(|url| url.as_str().trim_end_matches('/').to_owned()),
        }
    }

    fn url(&self, host: &str, credential: &CredentialRecord, path: &str) -> Result<Url, ProviderError> {
        let base = self.base_url.clone().unwrap_or_else(|| {
            let region = credential.attribute("region").unwrap_or(DEFAULT_REGION);
            format!("https://{host}.{region}.amazonaws.com")
        });

        endpoint(&base, path).map_err(|e| ProviderError::Protocol(format!("invalid kiro endpoint: {e}")))
    }

    fn headers(credential: &CredentialRecord) -> Result<HeaderMap, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header_value(&format!("Bearer {}", credential.secret.expose_secret()))?,
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert("amz-sdk-invocation-id", header_value(&Uuid::new_v4().to_string())?);
        headers.insert("amz-sdk-request", HeaderValue::from_static("attempt=1; max=1"));
        headers.insert("x-amzn-kiro-agent-mode", HeaderValue::from_static("vibe"));

        Ok(headers)
    }
}

#[async_trait]
impl ProviderClient for KiroClient {
    fn provider(&self) -> ProviderType {
        ProviderType::Kiro
    }

    async fn send(
        &self,
        request: &NativeRequest,
        credential: &CredentialRecord,
        streaming: bool,
    ) -> Result<ProviderResponse, ProviderError> {
        let NativeRequest::Kiro(body) = request else {
            return Err(ProviderError::Protocol(format!(
                "kiro client cannot send a {} request",
                request.protocol()
            )));
        };

        let mut body = body.clone();
        if let Some(arn) = credential.attribute("profile_arn") {
            body.profile_arn = Some(arn.to_owned());
        }

        let url = self.url("codewhisperer", credential, "generateAssistantResponse")?;
        let response = self
            .upstream
            .post_json(url, Self::headers(credential)?, &body, None, streaming)
            .await?;

        let events = kiro_events(response.body);
        if streaming {
            return Ok(ProviderResponse::Stream(events.map_ok(NativeChunk::Kiro).boxed()));
        }

        let events: Vec<_> = events.try_collect().await?;
        Ok(ProviderResponse::Unary(NativeResponse::Kiro(KiroResponse {
            model: body.conversation_state.current_message.user_input_message.model_id,
            events,
        })))
    }

    fn supports_usage_sync(&self) -> bool {
        true
    }

    async fn sync_usage(&self, credential: &CredentialRecord) -> Result<serde_json::Value, ProviderError> {
        let mut url = self.url("q", credential, "getUsageLimits")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("origin", ORIGIN);
            query.append_pair("resourceType", "AGENTIC_REQUEST");
            if let Some(arn) = credential.attribute("profile_arn") {
                query.append_pair("profileArn", arn);
            }
        }

        let response = self.upstream.get(url, Self::headers(credential)?, None).await?;
        read_json(response).await
    }
}
