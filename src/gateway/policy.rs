//! Default error and metadata policies of the translation multiplexer.
//!
//! # Responsibilities
//! - Map an RPC `Status` to an HTTP status and JSON error body
//! - Select request headers to forward as RPC call metadata
//!
//! # Design Decisions
//! - Both policies are pure functions behind `Arc`, shared by every request
//! - The correlation id travels both ways: `x-request-id` is forwarded
//!   upstream and echoed back (header and `request_id` field) on errors

use std::sync::Arc;

use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};
use tonic::{Code, Status};

use crate::correlation::REQUEST_ID_KEY;

/// Maps an RPC error to the REST response.
pub type ErrorHandler = Arc<dyn Fn(&Parts, Status) -> Response + Send + Sync>;

/// Extracts RPC call metadata from the incoming REST request.
pub type MetadataAnnotator = Arc<dyn Fn(&Parts) -> MetadataMap + Send + Sync>;

/// Header prefix for arbitrary caller metadata.
pub const METADATA_HEADER_PREFIX: &str = "grpc-metadata-";

/// Headers forwarded to the upstream as-is.
const FORWARDED_HEADERS: &[&str] = &[REQUEST_ID_KEY, "authorization"];

/// Headers in status metadata that must not be copied onto the REST response.
const RESERVED_HEADERS: &[&str] = &["content-type", "content-length", "te", "grpc-status", "grpc-message"];

#[derive(Debug, Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorBody<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    status: u16,
    code: &'static str,
    message: &'a str,
}

/// Default error handler.
///
/// Produces `{"error": {"status", "code", "message"}, "request_id"}` with the
/// canonical HTTP status for the RPC code.
pub fn proto_message_error_handler(_parts: &Parts, status: Status) -> Response {
    let http_status = http_status_from_code(status.code());
    let request_id = status
        .metadata()
        .get(REQUEST_ID_KEY)
        .and_then(|v| v.to_str().ok());

    let body = ErrorEnvelope {
        error: ErrorBody {
            status: http_status.as_u16(),
            code: code_name(status.code()),
            message: status.message(),
        },
        request_id,
    };

    let mut response = (http_status, Json(body)).into_response();
    forward_metadata(status.metadata(), response.headers_mut());
    response
}

/// Default metadata annotator.
///
/// Forwards `x-request-id` and `authorization`, plus every
/// `grpc-metadata-<key>` header as `<key>`.
pub fn metadata_annotator(parts: &Parts) -> MetadataMap {
    let mut metadata = MetadataMap::new();

    for (name, value) in &parts.headers {
        let name = name.as_str();
        let key = if FORWARDED_HEADERS.contains(&name) {
            name
        } else if let Some(stripped) = name.strip_prefix(METADATA_HEADER_PREFIX) {
            stripped
        } else {
            continue;
        };

        let Ok(value) = value.to_str() else {
            continue;
        };
        if let (Ok(key), Ok(value)) = (
            AsciiMetadataKey::from_bytes(key.as_bytes()),
            AsciiMetadataValue::try_from(value),
        ) {
            metadata.insert(key, value);
        }
    }

    metadata
}

/// Copy RPC metadata onto REST response headers.
pub(crate) fn forward_metadata(metadata: &MetadataMap, headers: &mut HeaderMap) {
    for (name, value) in metadata.clone().into_headers() {
        let Some(name) = name else { continue };
        if RESERVED_HEADERS.contains(&name.as_str()) || name.as_str().ends_with("-bin") {
            continue;
        }
        headers.append(name, value);
    }
}

/// Attach `x-request-id` to a response built without status metadata.
pub(crate) fn echo_request_id(parts: &Parts, headers: &mut HeaderMap) {
    if headers.contains_key(REQUEST_ID_KEY) {
        return;
    }
    if let Some(value) = parts.headers.get(REQUEST_ID_KEY) {
        headers.insert(REQUEST_ID_KEY, value.clone());
    }
}

/// Canonical RPC code to HTTP status mapping.
pub fn http_status_from_code(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        Code::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::FailedPrecondition => StatusCode::BAD_REQUEST,
        Code::Aborted => StatusCode::CONFLICT,
        Code::OutOfRange => StatusCode::BAD_REQUEST,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
    }
}

/// `SCREAMING_SNAKE_CASE` name of an RPC code.
pub fn code_name(code: Code) -> &'static str {
    match code {
        Code::Ok => "OK",
        Code::Cancelled => "CANCELLED",
        Code::Unknown => "UNKNOWN",
        Code::InvalidArgument => "INVALID_ARGUMENT",
        Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
        Code::NotFound => "NOT_FOUND",
        Code::AlreadyExists => "ALREADY_EXISTS",
        Code::PermissionDenied => "PERMISSION_DENIED",
        Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
        Code::FailedPrecondition => "FAILED_PRECONDITION",
        Code::Aborted => "ABORTED",
        Code::OutOfRange => "OUT_OF_RANGE",
        Code::Unimplemented => "UNIMPLEMENTED",
        Code::Internal => "INTERNAL",
        Code::Unavailable => "UNAVAILABLE",
        Code::DataLoss => "DATA_LOSS",
        Code::Unauthenticated => "UNAUTHENTICATED",
    }
}
