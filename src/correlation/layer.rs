//! Tower layer applying the correlation interceptor to every call of an RPC
//! server.
//!
//! Works on plain `http` types so it can sit in front of tonic services via
//! `Server::builder().layer(CorrelationLayer)`.

use std::panic::AssertUnwindSafe;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http::{HeaderMap, HeaderValue, Request, Response};
use tonic::Status;
use tower::{Layer, Service};
use tracing::Instrument;

use super::id::CorrelationId;
use super::interceptor::recovered;
use super::REQUEST_ID_KEY;

/// Layer producing [`CorrelationService`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationLayer;

impl CorrelationLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for CorrelationLayer {
    type Service = CorrelationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationService { inner }
    }
}

/// Correlation middleware service.
#[derive(Debug, Clone)]
pub struct CorrelationService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CorrelationService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let id = from_headers(req.headers()).unwrap_or_else(CorrelationId::generate);
        insert_header(req.headers_mut(), &id);
        req.extensions_mut().insert(id.clone());

        let span = tracing::info_span!("rpc", request_id = %id, method = %req.uri().path());

        // The clone may not be ready; keep the polled service for this call.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let guarded = async move {
                match std::panic::catch_unwind(AssertUnwindSafe(|| inner.call(req))) {
                    Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                    Err(payload) => Err(payload),
                }
            };

            let mut response = match id.clone().scope(guarded).instrument(span).await {
                Ok(Ok(response)) => response,
                // An error carries no headers to echo the id on.
                Ok(Err(err)) => return Err(err),
                Err(payload) => status_response(recovered(&id, payload.as_ref())),
            };
            insert_header(response.headers_mut(), &id);
            Ok(response)
        })
    }
}

pub(crate) fn from_headers(headers: &HeaderMap) -> Option<CorrelationId> {
    headers
        .get(REQUEST_ID_KEY)
        .and_then(|v| v.to_str().ok())
        .and_then(CorrelationId::adopt)
}

pub(crate) fn insert_header(headers: &mut HeaderMap, id: &CorrelationId) {
    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        headers.insert(REQUEST_ID_KEY, value);
    }
}

/// Trailers-only gRPC response carrying `status`.
fn status_response<B: Default>(status: Status) -> Response<B> {
    let mut response = Response::new(B::default());
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/grpc"),
    );
    if let Err(err) = status.add_header(response.headers_mut()) {
        tracing::warn!(error = %err, "Failed to encode status headers");
    }
    response
}
