//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use rpc_gateway::{CorrelationLayer, GatewayConfig, GatewayServer, Shutdown};
use tokio::net::TcpListener;

/// Serve `router` behind the full middleware stack on `addr`.
///
/// The listener is bound before returning; trigger the returned handle to
/// stop the server.
pub async fn spawn_gateway(addr: SocketAddr, router: Router) -> Shutdown {
    let listener = TcpListener::bind(addr).await.unwrap();
    let shutdown = Shutdown::new();
    let server = GatewayServer::new(router, &GatewayConfig::default());
    let signal = shutdown.signal();

    tokio::spawn(async move {
        server.run(listener, signal).await.unwrap();
    });
    shutdown
}

/// Start a gRPC health server that also runs the correlation layer.
///
/// `orders.v1.Orders` reports SERVING, `billing.v1.Billing` NOT_SERVING.
#[allow(dead_code)]
pub async fn start_health_upstream(addr: SocketAddr) {
    let (mut reporter, service) = tonic_health::server::health_reporter();
    reporter
        .set_service_status("orders.v1.Orders", tonic_health::ServingStatus::Serving)
        .await;
    reporter
        .set_service_status("billing.v1.Billing", tonic_health::ServingStatus::NotServing)
        .await;

    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .layer(CorrelationLayer::new())
            .add_service(service)
            .serve(addr)
            .await
            .unwrap();
    });

    // Give the server time to bind.
    tokio::time::sleep(Duration::from_millis(200)).await;
}

pub fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}
