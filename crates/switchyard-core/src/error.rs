use http::StatusCode;

/// Domain error that the HTTP layer knows how to render
///
/// Conversion and pooling code never touches axum; the server and
/// handler layers turn these into protocol-specific error bodies.
pub trait HttpError: std::error::Error {
    /// HTTP status code for this error
    fn status_code(&self) -> StatusCode;

    /// Machine-readable error type (e.g. `pool_exhausted_error`)
    fn error_type(&self) -> &str;

    /// Message safe to expose to API consumers
    fn client_message(&self) -> String;

    /// Coarse failure class reported next to the message
    fn error_kind(&self) -> Option<&'static str> {
        None
    }

    /// Whether the gateway walked a fallback chain before giving up
    fn fallback_attempted(&self) -> bool {
        false
    }
}
