//! Request identification for the REST side.
//!
//! # Responsibilities
//! - Adopt the caller's `x-request-id` or generate one
//! - Make it visible to translation handlers (header, extension, task-local)
//! - Echo it on every response
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The header is rewritten on the request, so the metadata annotator
//!   forwards the same id the caller gets back

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::correlation::layer::{from_headers, insert_header};
use crate::correlation::CorrelationId;

/// Middleware assigning a correlation id to each REST request.
///
/// Install with `axum::middleware::from_fn(assign_request_id)`.
pub async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let id = from_headers(request.headers()).unwrap_or_else(CorrelationId::generate);
    insert_header(request.headers_mut(), &id);
    request.extensions_mut().insert(id.clone());

    let mut response = id.clone().scope(next.run(request)).await;
    insert_header(response.headers_mut(), &id);
    response
}
