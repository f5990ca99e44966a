//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Wrap the built gateway router with the shared middleware stack
//! - Bind the router to a listener and serve until shutdown
//!
//! # Middleware order (outermost first)
//! ```text
//! TraceLayer → request id → TimeoutLayer → gateway router
//! ```

use std::future::Future;
use std::time::Duration;

use axum::extract::Request;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::correlation::REQUEST_ID_KEY;
use crate::http::request::assign_request_id;

/// HTTP server fronting the gateway.
pub struct GatewayServer {
    router: Router,
}

impl GatewayServer {
    /// Wrap `router` (usually from `GatewayBuilder::build`) with middleware.
    pub fn new(router: Router, config: &GatewayConfig) -> Self {
        Self {
            router: Self::build_router(router, config),
        }
    }

    #[allow(deprecated)]
    fn build_router(router: Router, config: &GatewayConfig) -> Router {
        router
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(axum::middleware::from_fn(assign_request_id))
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_KEY)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = %request_id,
                )
            }))
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` resolves, then drain.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::get;
    use tower::ServiceExt;

    #[tokio::test]
    async fn slow_handlers_time_out() {
        let mut config = GatewayConfig::default();
        config.timeouts.request_secs = 1;
        let router = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );

        let response = GatewayServer::new(router, &config)
            .router()
            .oneshot(http::Request::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert!(response.headers().contains_key(REQUEST_ID_KEY));
    }

    #[tokio::test]
    async fn unmatched_paths_still_get_an_id() {
        let response = GatewayServer::new(Router::new(), &GatewayConfig::default())
            .router()
            .oneshot(http::Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key(REQUEST_ID_KEY));
    }
}
