//! REST to RPC translation multiplexer.
//!
//! # Responsibilities
//! - Collect the translation handlers registered for one prefix
//! - Decode JSON requests (body, query, path captures) into RPC messages
//! - Attach call metadata through the configured annotators
//! - Encode RPC responses as JSON, or map errors through the error handler
//!
//! # Design Decisions
//! - Every new path is checked against a shadow `matchit` table, the same
//!   matcher axum routes with, so duplicate and overlapping routes surface
//!   as errors at registration instead of router panics
//! - Path captures use axum syntax (`/v1/items/{id}`)
//! - Captured and query values are converted to the message field types
//!   (see `transcode.rs`); repeated query keys fill list fields

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::extract::rejection::RawPathParamsRejection;
use axum::extract::{FromRequestParts, RawPathParams, Request};
use axum::handler::Handler;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tonic::metadata::MetadataMap;
use tonic::{Extensions, Status};
use url::form_urlencoded;

use super::error::GatewayError;
use super::transcode::{self, Params};
use super::policy::{
    echo_request_id, forward_metadata, proto_message_error_handler, ErrorHandler,
    MetadataAnnotator,
};
use crate::observability::metrics;

/// Default request body limit (4 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 4 * 1024 * 1024;

/// Multiplexer-level option.
///
/// `ErrorHandler`, `MaxBodySize` and `PrettyJson` replace earlier values;
/// `Metadata` annotators accumulate and run in order.
#[derive(Clone)]
pub enum ServeMuxOption {
    ErrorHandler(ErrorHandler),
    Metadata(MetadataAnnotator),
    MaxBodySize(usize),
    PrettyJson(bool),
}

impl fmt::Debug for ServeMuxOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ErrorHandler(_) => f.write_str("ErrorHandler(..)"),
            Self::Metadata(_) => f.write_str("Metadata(..)"),
            Self::MaxBodySize(size) => f.debug_tuple("MaxBodySize").field(size).finish(),
            Self::PrettyJson(pretty) => f.debug_tuple("PrettyJson").field(pretty).finish(),
        }
    }
}

/// Option installing `handler` as the error handler.
pub fn with_error_handler<F>(handler: F) -> ServeMuxOption
where
    F: Fn(&Parts, Status) -> Response + Send + Sync + 'static,
{
    ServeMuxOption::ErrorHandler(Arc::new(handler))
}

/// Option adding a metadata annotator.
pub fn with_metadata<F>(annotator: F) -> ServeMuxOption
where
    F: Fn(&Parts) -> MetadataMap + Send + Sync + 'static,
{
    ServeMuxOption::Metadata(Arc::new(annotator))
}

/// Request-time settings shared by every handler of a mux.
pub struct MuxRuntime {
    error_handler: ErrorHandler,
    annotators: Vec<MetadataAnnotator>,
    max_body_size: usize,
    pretty: bool,
}

impl MuxRuntime {
    fn new(options: impl IntoIterator<Item = ServeMuxOption>) -> Self {
        let mut runtime = Self {
            error_handler: Arc::new(proto_message_error_handler),
            annotators: Vec::new(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            pretty: false,
        };
        for option in options {
            match option {
                ServeMuxOption::ErrorHandler(handler) => runtime.error_handler = handler,
                ServeMuxOption::Metadata(annotator) => runtime.annotators.push(annotator),
                ServeMuxOption::MaxBodySize(size) => runtime.max_body_size = size,
                ServeMuxOption::PrettyJson(pretty) => runtime.pretty = pretty,
            }
        }
        runtime
    }

    /// Run every annotator; later annotators overwrite earlier keys.
    pub fn annotate(&self, parts: &Parts) -> MetadataMap {
        let mut headers = HeaderMap::new();
        for annotator in &self.annotators {
            for (name, value) in annotator(parts).into_headers() {
                if let Some(name) = name {
                    headers.insert(name, value);
                }
            }
        }
        MetadataMap::from_headers(headers)
    }

    /// Map an RPC error to the REST response.
    pub fn error_response(&self, parts: &Parts, status: Status) -> Response {
        tracing::debug!(
            method = %parts.method,
            path = %parts.uri.path(),
            code = ?status.code(),
            message = %status.message(),
            "RPC call failed"
        );
        let mut response = (self.error_handler)(parts, status);
        echo_request_id(parts, response.headers_mut());
        response
    }

    /// Encode a successful RPC response.
    pub fn json_response<T: Serialize>(
        &self,
        parts: &Parts,
        metadata: &MetadataMap,
        message: &T,
    ) -> Response {
        let encoded = if self.pretty {
            serde_json::to_vec_pretty(message)
        } else {
            serde_json::to_vec(message)
        };
        let body = match encoded {
            Ok(body) => body,
            Err(err) => {
                tracing::error!(error = %err, "Failed to encode response message");
                return self.error_response(parts, Status::internal("failed to encode response"));
            }
        };

        let mut response = (
            [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            body,
        )
            .into_response();
        forward_metadata(metadata, response.headers_mut());
        echo_request_id(parts, response.headers_mut());
        response
    }

    /// Decode the request message from body, query string and path captures.
    ///
    /// An empty body decodes as `{}`. Query values override body fields and
    /// path captures override both.
    pub async fn decode_request<T: DeserializeOwned>(
        &self,
        parts: &mut Parts,
        body: Body,
    ) -> Result<T, Status> {
        let bytes = to_bytes(body, self.max_body_size)
            .await
            .map_err(|err| Status::invalid_argument(format!("failed to read request body: {err}")))?;

        let value = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Object(Map::new())
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|err| Status::invalid_argument(format!("invalid JSON body: {err}")))?
        };

        let mut params = Params::default();
        if let Some(query) = parts.uri.query() {
            for (key, param) in form_urlencoded::parse(query.as_bytes()) {
                // Undecodable escapes come back as U+FFFD.
                if key.contains(char::REPLACEMENT_CHARACTER)
                    || param.contains(char::REPLACEMENT_CHARACTER)
                {
                    return Err(Status::invalid_argument(format!(
                        "invalid query string: {key:?} is not valid UTF-8"
                    )));
                }
                params.append(key.into_owned(), param.into_owned());
            }
        }
        match RawPathParams::from_request_parts(parts, &()).await {
            Ok(captures) => {
                for (key, capture) in &captures {
                    params.replace(key, capture);
                }
            }
            Err(RawPathParamsRejection::InvalidUtf8InPathParam(err)) => {
                return Err(Status::invalid_argument(err.body_text()));
            }
            // No captures on this route.
            Err(_) => {}
        }

        transcode::decode(value, params)
            .map_err(|err| Status::invalid_argument(format!("invalid request message: {err}")))
    }

    async fn unary<Req, Res, F, Fut>(&self, request: Request, route: &str, call: F) -> Response
    where
        Req: DeserializeOwned,
        Res: Serialize,
        F: Fn(tonic::Request<Req>) -> Fut,
        Fut: Future<Output = Result<tonic::Response<Res>, Status>>,
    {
        let started = Instant::now();
        let (mut parts, body) = request.into_parts();

        let response = match self.decode_request::<Req>(&mut parts, body).await {
            Ok(message) => {
                let metadata = self.annotate(&parts);
                let request = tonic::Request::from_parts(metadata, Extensions::default(), message);
                match call(request).await {
                    Ok(response) => {
                        let (metadata, message, _) = response.into_parts();
                        self.json_response(&parts, &metadata, &message)
                    }
                    Err(status) => self.error_response(&parts, status),
                }
            }
            Err(status) => self.error_response(&parts, status),
        };

        metrics::record_request(parts.method.as_str(), route, response.status().as_u16(), started);
        response
    }
}

/// Translation multiplexer for one prefix.
pub struct ServeMux {
    runtime: Arc<MuxRuntime>,
    routes: BTreeMap<String, MethodRouter>,
    registered: HashSet<(String, Method)>,
    paths: matchit::Router<()>,
}

impl fmt::Debug for ServeMux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServeMux")
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for ServeMux {
    fn default() -> Self {
        Self::new([])
    }
}

impl ServeMux {
    /// Create a mux; options apply in order.
    pub fn new(options: impl IntoIterator<Item = ServeMuxOption>) -> Self {
        Self {
            runtime: Arc::new(MuxRuntime::new(options)),
            routes: BTreeMap::new(),
            registered: HashSet::new(),
            paths: matchit::Router::new(),
        }
    }

    /// Settings for handlers that do their own transcoding.
    pub fn runtime(&self) -> Arc<MuxRuntime> {
        self.runtime.clone()
    }

    /// Number of registered method/path pairs.
    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    /// Register an arbitrary axum handler.
    pub fn handle<H, T>(&mut self, method: Method, path: &str, handler: H) -> Result<(), GatewayError>
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        let valid = path.starts_with('/')
            && !path
                .split('/')
                .any(|segment| segment.starts_with(':') || segment.starts_with('*'));
        if !valid {
            return Err(GatewayError::InvalidRoute(path.to_string()));
        }

        let filter = MethodFilter::try_from(method.clone())
            .map_err(|_| GatewayError::UnsupportedMethod(method.clone()))?;
        let key = (path.to_string(), method.clone());
        if self.registered.contains(&key) {
            return Err(GatewayError::DuplicateRoute {
                method,
                path: path.to_string(),
            });
        }
        if !self.routes.contains_key(path) {
            self.paths
                .insert(path, ())
                .map_err(|err| GatewayError::RouteConflict {
                    path: path.to_string(),
                    reason: err.to_string(),
                })?;
        }
        self.registered.insert(key);

        let route = self.routes.remove(path).unwrap_or_else(MethodRouter::new);
        self.routes.insert(path.to_string(), route.on(filter, handler));
        tracing::debug!(method = %method, path = %path, "Registered translation handler");
        Ok(())
    }

    /// Register a unary RPC call with JSON transcoding.
    pub fn handle_unary<Req, Res, F, Fut>(
        &mut self,
        method: Method,
        path: &str,
        call: F,
    ) -> Result<(), GatewayError>
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
        F: Fn(tonic::Request<Req>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<tonic::Response<Res>, Status>> + Send + 'static,
    {
        let runtime = self.runtime.clone();
        let route = path.to_string();
        let handler = move |request: Request| {
            let runtime = runtime.clone();
            let call = call.clone();
            let route = route.clone();
            async move { runtime.unary(request, &route, call).await }
        };
        self.handle(method, path, handler)
    }

    /// Freeze the registered routes.
    pub fn into_router(self) -> Router {
        self.routes
            .into_iter()
            .fold(Router::new(), |router, (path, route)| router.route(&path, route))
    }
}
