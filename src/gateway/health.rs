//! Built-in health translation.
//!
//! Maps `GET /health` and `GET /health/{service}` to
//! `grpc.health.v1.Health/Check` on the upstream.

use axum::http::Method;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tonic::{Extensions, Status};
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

use super::dial::DialOptions;
use super::error::GatewayError;
use super::mux::ServeMux;
use crate::correlation::CorrelationPropagator;

#[derive(Debug, Default, Deserialize)]
struct CheckRequest {
    #[serde(default)]
    service: String,
}

#[derive(Debug, Serialize)]
struct CheckResponse {
    status: &'static str,
}

/// Registration for the upstream health service.
pub fn register(
    _ctx: &CancellationToken,
    mux: &mut ServeMux,
    address: &str,
    dial: &DialOptions,
) -> Result<(), GatewayError> {
    let channel = dial.connect_lazy(address)?;
    let client = HealthClient::with_interceptor(channel, CorrelationPropagator);

    let check = move |request: tonic::Request<CheckRequest>| {
        let mut client = client.clone();
        async move {
            let (metadata, _, message) = request.into_parts();
            let request = tonic::Request::from_parts(
                metadata,
                Extensions::default(),
                HealthCheckRequest {
                    service: message.service,
                },
            );

            let (metadata, reply, extensions) = client.check(request).await?.into_parts();
            let status = ServingStatus::try_from(reply.status)
                .map_err(|_| Status::unknown(format!("unknown serving status {}", reply.status)))?;
            Ok(tonic::Response::from_parts(
                metadata,
                CheckResponse {
                    status: status.as_str_name(),
                },
                extensions,
            ))
        }
    };

    mux.handle_unary(Method::GET, "/health", check.clone())?;
    mux.handle_unary(Method::GET, "/health/{service}", check)
}
