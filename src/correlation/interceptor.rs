//! Unary correlation interceptor.
//!
//! # Responsibilities
//! - Adopt the caller's correlation id or generate one
//! - Expose the id to the wrapped handler (extensions, metadata, task-local)
//! - Echo the id in response metadata, on success and on error
//! - Turn a panicking handler into an `Internal` status
//!
//! # Design Decisions
//! - The guard covers both the synchronous call and the returned future
//! - Panic payloads are logged, never sent to the caller

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tonic::metadata::{AsciiMetadataValue, MetadataMap};
use tonic::service::Interceptor;
use tonic::{Request, Response, Status};
use tracing::Instrument;

use super::id::CorrelationId;
use super::REQUEST_ID_KEY;
use crate::observability::metrics;

/// Wrap a unary handler call with correlation id handling and a panic guard.
///
/// Normal responses and errors from `next` are returned unchanged apart from
/// the `x-request-id` metadata entry.
pub async fn intercept<Req, Res, F, Fut>(
    mut request: Request<Req>,
    next: F,
) -> Result<Response<Res>, Status>
where
    F: FnOnce(Request<Req>) -> Fut,
    Fut: Future<Output = Result<Response<Res>, Status>>,
{
    let id = from_metadata(request.metadata()).unwrap_or_else(CorrelationId::generate);
    insert_metadata(request.metadata_mut(), &id);
    request.extensions_mut().insert(id.clone());

    let span = tracing::info_span!("rpc", request_id = %id);
    let guarded = async move {
        match std::panic::catch_unwind(AssertUnwindSafe(move || next(request))) {
            Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
            Err(payload) => Err(payload),
        }
    };

    let mut result = match id.clone().scope(guarded).instrument(span).await {
        Ok(result) => result,
        Err(payload) => Err(recovered(&id, payload.as_ref())),
    };

    match &mut result {
        Ok(response) => insert_metadata(response.metadata_mut(), &id),
        Err(status) => insert_metadata(status.metadata_mut(), &id),
    }
    result
}

/// Correlation id attached to a request by the interceptor.
pub fn correlation_id<T>(request: &Request<T>) -> Option<&CorrelationId> {
    request.extensions().get::<CorrelationId>()
}

/// Client interceptor forwarding the current call's id to outbound RPCs.
///
/// A request that already carries `x-request-id` is left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationPropagator;

impl Interceptor for CorrelationPropagator {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        if from_metadata(request.metadata()).is_none() {
            let id = request
                .extensions()
                .get::<CorrelationId>()
                .cloned()
                .or_else(CorrelationId::current);
            if let Some(id) = id {
                insert_metadata(request.metadata_mut(), &id);
            }
        }
        Ok(request)
    }
}

pub(crate) fn from_metadata(metadata: &MetadataMap) -> Option<CorrelationId> {
    metadata
        .get(REQUEST_ID_KEY)
        .and_then(|v| v.to_str().ok())
        .and_then(CorrelationId::adopt)
}

pub(crate) fn insert_metadata(metadata: &mut MetadataMap, id: &CorrelationId) {
    if let Ok(value) = AsciiMetadataValue::try_from(id.as_str()) {
        metadata.insert(REQUEST_ID_KEY, value);
    }
}

/// Convert a caught panic into the status returned to the caller.
pub(crate) fn recovered(id: &CorrelationId, payload: &(dyn Any + Send)) -> Status {
    let reason = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload");

    tracing::error!(request_id = %id, panic = %reason, "Handler panicked");
    metrics::record_panic();

    Status::internal(format!("internal failure, request id {id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tonic::Code;

    fn request_with_id(id: &str) -> Request<()> {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(REQUEST_ID_KEY, id.parse().unwrap());
        request
    }

    async fn echo_id(request: Request<()>) -> Result<Response<String>, Status> {
        let from_extensions = correlation_id(&request).cloned();
        let from_task = CorrelationId::current();
        assert_eq!(from_extensions, from_task);
        Ok(Response::new(from_task.map(|id| id.to_string()).unwrap_or_default()))
    }

    async fn exploding(_request: Request<()>) -> Result<Response<()>, Status> {
        panic!("handler exploded")
    }

    #[tokio::test]
    async fn generates_id_when_absent() {
        let response = intercept(Request::new(()), echo_id).await.unwrap();

        let id = response.get_ref().clone();
        assert!(!id.is_empty());
        assert_eq!(
            response.metadata().get(REQUEST_ID_KEY).unwrap().to_str().unwrap(),
            id
        );
    }

    #[tokio::test]
    async fn propagates_incoming_id() {
        let incoming = CorrelationId::generate();
        let response = intercept(request_with_id(incoming.as_str()), echo_id)
            .await
            .unwrap();

        assert_eq!(response.get_ref(), incoming.as_str());
        assert_eq!(
            response.metadata().get(REQUEST_ID_KEY).unwrap(),
            incoming.as_str()
        );
    }

    #[tokio::test]
    async fn empty_id_is_replaced() {
        let empty = intercept(request_with_id(""), echo_id).await.unwrap();
        assert!(!empty.get_ref().is_empty());
    }

    #[tokio::test]
    async fn long_id_is_kept_exactly() {
        let long = format!("trace-{}", "x".repeat(512));
        let response = intercept(request_with_id(&long), echo_id).await.unwrap();
        assert_eq!(response.get_ref(), &long);
        assert_eq!(response.metadata().get(REQUEST_ID_KEY).unwrap(), long.as_str());
    }

    #[tokio::test]
    async fn panic_becomes_internal_status() {
        let status = intercept(request_with_id("panic-call"), exploding)
            .await
            .unwrap_err();

        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("panic-call"));
        assert!(!status.message().contains("handler exploded"));
        assert_eq!(status.metadata().get(REQUEST_ID_KEY).unwrap(), "panic-call");
    }

    #[tokio::test]
    async fn synchronous_panic_is_caught() {
        let result = intercept(
            Request::new(()),
            |_request: Request<()>| -> std::future::Ready<Result<Response<()>, Status>> {
                panic!("panicked before returning a future")
            },
        )
        .await;

        assert_eq!(result.unwrap_err().code(), Code::Internal);
    }

    #[tokio::test]
    async fn handler_errors_pass_through() {
        let status = intercept(request_with_id("err-call"), |_request: Request<()>| async {
            Err::<Response<()>, _>(Status::not_found("no such widget"))
        })
        .await
        .unwrap_err();

        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "no such widget");
        assert_eq!(status.metadata().get(REQUEST_ID_KEY).unwrap(), "err-call");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_get_distinct_ids() {
        let handles: Vec<_> = (0..1_000)
            .map(|_| {
                tokio::spawn(async {
                    intercept(Request::new(()), echo_id)
                        .await
                        .unwrap()
                        .into_inner()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            assert!(seen.insert(handle.await.unwrap()));
        }
    }

    #[tokio::test]
    async fn propagator_forwards_current_id() {
        let id = CorrelationId::adopt("outbound").unwrap();
        let request = id
            .scope(async { CorrelationPropagator.call(Request::new(())) })
            .await
            .unwrap();
        assert_eq!(request.metadata().get(REQUEST_ID_KEY).unwrap(), "outbound");

        let untouched = CorrelationPropagator.call(Request::new(())).unwrap();
        assert!(untouched.metadata().get(REQUEST_ID_KEY).is_none());
    }

    #[tokio::test]
    async fn propagator_keeps_explicit_id() {
        let request = CorrelationId::adopt("ambient")
            .unwrap()
            .scope(async { CorrelationPropagator.call(request_with_id("explicit")) })
            .await
            .unwrap();
        assert_eq!(request.metadata().get(REQUEST_ID_KEY).unwrap(), "explicit");
    }
}
