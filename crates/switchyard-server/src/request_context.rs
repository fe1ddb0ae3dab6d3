use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use switchyard_core::RequestContext;

/// Middleware that attaches a `RequestContext` to the incoming request
///
/// Handlers read the provider hint from it instead of parsing headers.
pub async fn request_context_middleware(request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let context = RequestContext::new(parts.clone());

    let mut request = Request::from_parts(parts, body);
    request.extensions_mut().insert(context);

    next.run(request).await
}
