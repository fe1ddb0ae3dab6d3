/// Header a client uses to pin the primary provider of an exchange
pub const PROVIDER_HEADER: &str = "model-provider";

/// Per-request data captured by the server middleware
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// HTTP request parts (method, URI, headers, extensions)
    pub parts: http::request::Parts,
    /// Provider requested through the `model-provider` header
    pub provider_hint: Option<String>,
}

impl RequestContext {
    /// Capture the parts of an inbound request
    pub fn new(parts: http::request::Parts) -> Self {
        let provider_hint = parts
            .headers
            .get(PROVIDER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_ascii_lowercase);

        Self { parts, provider_hint }
    }

    /// Context for calls that did not arrive over HTTP
    pub fn empty() -> Self {
        let (parts, ()) = http::Request::new(()).into_parts();
        Self::new(parts)
    }

    /// Access request headers
    pub fn headers(&self) -> &http::HeaderMap {
        &self.parts.headers
    }
}
