//! Prefix router assembly.
//!
//! # Responsibilities
//! - Collect registrations per prefix, the upstream address and dial options
//! - Build one `ServeMux` per prefix and run its registrations
//! - Mount every mux on the base router with the prefix stripped
//!
//! # Design Decisions
//! - `build` consumes the builder: a configuration is built exactly once
//! - All-or-nothing: the first failing registration aborts the build and
//!   nothing is returned but its error
//! - Prefixes are independent routes; they are processed in key order
//! - A mux whose routes collide with the base router or with another prefix
//!   fails the build with `RouteConflict`

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use axum::Router;
use tokio_util::sync::CancellationToken;

use super::dial::DialOptions;
use super::error::GatewayError;
use super::mux::{ServeMux, ServeMuxOption};
use super::policy::{metadata_annotator, proto_message_error_handler};

/// Upstream address used when none is configured.
pub const DEFAULT_SERVER_ADDRESS: &str = "127.0.0.1:9090";

/// Wires one service's translation handlers onto a mux.
///
/// Usually produced by code generation; the gateway only observes the side
/// effect on the mux and the returned result.
pub trait Registration: Send {
    fn register(
        &self,
        ctx: &CancellationToken,
        mux: &mut ServeMux,
        address: &str,
        dial: &DialOptions,
    ) -> Result<(), GatewayError>;
}

impl<F> Registration for F
where
    F: Fn(&CancellationToken, &mut ServeMux, &str, &DialOptions) -> Result<(), GatewayError> + Send,
{
    fn register(
        &self,
        ctx: &CancellationToken,
        mux: &mut ServeMux,
        address: &str,
        dial: &DialOptions,
    ) -> Result<(), GatewayError> {
        self(ctx, mux, address, dial)
    }
}

/// Box a registration closure.
pub fn registration<F>(f: F) -> Box<dyn Registration>
where
    F: Fn(&CancellationToken, &mut ServeMux, &str, &DialOptions) -> Result<(), GatewayError>
        + Send
        + 'static,
{
    Box::new(f)
}

/// Builder for the prefix router.
pub struct GatewayBuilder {
    server_address: String,
    dial_options: DialOptions,
    endpoints: BTreeMap<String, Vec<Box<dyn Registration>>>,
    router: Router,
    mux_options: Vec<ServeMuxOption>,
}

impl fmt::Debug for GatewayBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endpoints: BTreeMap<&str, usize> = self
            .endpoints
            .iter()
            .map(|(prefix, registrations)| (prefix.as_str(), registrations.len()))
            .collect();
        f.debug_struct("GatewayBuilder")
            .field("server_address", &self.server_address)
            .field("dial_options", &self.dial_options)
            .field("endpoints", &endpoints)
            .field("mux_options", &self.mux_options)
            .finish()
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self {
            server_address: DEFAULT_SERVER_ADDRESS.to_string(),
            dial_options: DialOptions::default(),
            endpoints: BTreeMap::new(),
            router: Router::new(),
            mux_options: Vec::new(),
        }
    }
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the dial options handed to every registration.
    pub fn dial_options(mut self, options: DialOptions) -> Self {
        self.dial_options = options;
        self
    }

    /// Append a registration under `prefix` (e.g. `/v1/`).
    pub fn register<F>(self, prefix: impl Into<String>, f: F) -> Self
    where
        F: Fn(&CancellationToken, &mut ServeMux, &str, &DialOptions) -> Result<(), GatewayError>
            + Send
            + 'static,
    {
        self.registrations(prefix, [registration(f)])
    }

    /// Append several registrations under `prefix`, keeping their order.
    pub fn registrations(
        mut self,
        prefix: impl Into<String>,
        registrations: impl IntoIterator<Item = Box<dyn Registration>>,
    ) -> Self {
        self.endpoints
            .entry(prefix.into())
            .or_default()
            .extend(registrations);
        self
    }

    /// Upstream address the registrations dial.
    pub fn server_address(mut self, address: impl Into<String>) -> Self {
        self.server_address = address.into();
        self
    }

    /// Mount onto an existing router instead of a fresh one.
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Extra mux options, applied after the default error handler and
    /// metadata annotator.
    pub fn mux_options(mut self, options: impl IntoIterator<Item = ServeMuxOption>) -> Self {
        self.mux_options.extend(options);
        self
    }

    /// Run every registration and mount the resulting muxes.
    pub fn build(self) -> Result<Router, GatewayError> {
        let Self {
            server_address,
            dial_options,
            endpoints,
            mut router,
            mux_options,
        } = self;

        if let Some(prefix) = endpoints.keys().find(|prefix| !valid_prefix(prefix)) {
            return Err(GatewayError::InvalidPrefix(prefix.clone()));
        }

        let ctx = CancellationToken::new();
        for (prefix, registrations) in endpoints {
            let options = [
                ServeMuxOption::ErrorHandler(Arc::new(proto_message_error_handler)),
                ServeMuxOption::Metadata(Arc::new(metadata_annotator)),
            ]
            .into_iter()
            .chain(mux_options.iter().cloned());
            let mut mux = ServeMux::new(options);

            for registration in &registrations {
                if let Err(err) = registration.register(&ctx, &mut mux, &server_address, &dial_options) {
                    tracing::error!(prefix = %prefix, error = %err, "Endpoint registration failed");
                    return Err(err);
                }
            }

            tracing::info!(
                prefix = %prefix,
                upstream = %server_address,
                routes = mux.len(),
                "Mounted gateway endpoints"
            );

            router = mount(router, &prefix, mux.into_router()).inspect_err(|err| {
                tracing::error!(prefix = %prefix, error = %err, "Endpoint mount failed");
            })?;
        }

        Ok(router)
    }
}

/// Mount `mux` at `prefix`. axum panics on conflicting routes; the panic is
/// turned into `RouteConflict`.
fn mount(router: Router, prefix: &str, mux: Router) -> Result<Router, GatewayError> {
    // Strip all but the trailing separator.
    let path = &prefix[..prefix.len() - 1];
    panic::catch_unwind(AssertUnwindSafe(move || {
        if path.is_empty() {
            router.merge(mux)
        } else {
            router.nest(path, mux)
        }
    }))
    .map_err(|payload| GatewayError::RouteConflict {
        path: prefix.to_string(),
        reason: panic_message(payload.as_ref()),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "conflicting routes".to_string()
    }
}

fn valid_prefix(prefix: &str) -> bool {
    prefix.starts_with('/') && prefix.ends_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mux::with_error_handler;
    use axum::body::{to_bytes, Body};
    use axum::http::request::Parts;
    use axum::http::{Method, Request, StatusCode, Uri};
    use axum::response::{IntoResponse, Response};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tonic::Status;
    use tower::ServiceExt;

    fn echo_path(label: &'static str) -> Box<dyn Registration> {
        registration(move |_ctx, mux, _address, _dial| {
            mux.handle(Method::GET, "/{*rest}", move |uri: Uri| async move {
                format!("{label}:{}", uri.path())
            })
        })
    }

    async fn get(router: Router, uri: &str) -> Response {
        router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn prefixes_route_to_their_own_mux() {
        let router = GatewayBuilder::new()
            .registrations("/a/", [echo_path("a")])
            .registrations("/b/", [echo_path("b")])
            .build()
            .unwrap();

        assert_eq!(text(get(router.clone(), "/a/anything").await).await, "a:/anything");
        assert_eq!(text(get(router.clone(), "/b/anything").await).await, "b:/anything");
        assert_eq!(get(router, "/c/anything").await.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn failing_registration_aborts_build() {
        let result = GatewayBuilder::new()
            .registrations("/a/", [echo_path("a")])
            .register("/b/", |_ctx, _mux, _address, _dial| {
                Err(GatewayError::registration("service b unavailable"))
            })
            .build();

        let err = result.unwrap_err();
        assert!(err.to_string().contains("service b unavailable"));
    }

    #[test]
    fn later_prefixes_are_skipped_after_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();

        let result = GatewayBuilder::new()
            .register("/a/", |_ctx, _mux, _address, _dial| {
                Err(GatewayError::registration("first prefix failed"))
            })
            .register("/b/", move |_ctx, _mux, _address, _dial| {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build();

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn defaults_dial_loopback_without_tls() {
        let seen = Arc::new(Mutex::new(None));
        let captured = seen.clone();

        GatewayBuilder::new()
            .register("/v1/", move |ctx, _mux, address, dial| {
                assert!(!ctx.is_cancelled());
                *captured.lock().unwrap() = Some((address.to_string(), dial.is_insecure()));
                Ok(())
            })
            .build()
            .unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, Some((DEFAULT_SERVER_ADDRESS.to_string(), true)));
    }

    #[test]
    fn registrations_accumulate_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = order.clone();
        let second = order.clone();

        GatewayBuilder::new()
            .server_address("10.0.0.5:7000")
            .register("/svc/", move |_ctx, _mux, address, _dial| {
                first.lock().unwrap().push(format!("first@{address}"));
                Ok(())
            })
            .register("/svc/", move |_ctx, _mux, address, _dial| {
                second.lock().unwrap().push(format!("second@{address}"));
                Ok(())
            })
            .build()
            .unwrap();

        assert_eq!(
            *order.lock().unwrap(),
            vec!["first@10.0.0.5:7000".to_string(), "second@10.0.0.5:7000".to_string()]
        );
    }

    #[tokio::test]
    async fn empty_registration_list_mounts_nothing_routable() {
        let router = GatewayBuilder::new()
            .registrations("/empty/", Vec::new())
            .build()
            .unwrap();
        assert_eq!(get(router, "/empty/x").await.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn prefix_must_be_slash_delimited() {
        let err = GatewayBuilder::new()
            .registrations("/v1", [echo_path("v1")])
            .build()
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidPrefix(prefix) if prefix == "/v1"));
    }

    #[tokio::test]
    async fn base_router_routes_are_kept() {
        let base = Router::new().route("/healthz", axum::routing::get(|| async { "ok" }));
        let router = GatewayBuilder::new()
            .router(base)
            .registrations("/api/", [echo_path("api")])
            .build()
            .unwrap();

        assert_eq!(text(get(router.clone(), "/healthz").await).await, "ok");
        assert_eq!(text(get(router, "/api/x").await).await, "api:/x");
    }

    #[tokio::test]
    async fn root_prefix_is_merged() {
        let router = GatewayBuilder::new()
            .registrations("/", [echo_path("root")])
            .build()
            .unwrap();
        assert_eq!(text(get(router, "/deep/path").await).await, "root:/deep/path");
    }

    #[tokio::test]
    async fn extra_mux_options_override_default_error_handler() {
        let router = GatewayBuilder::new()
            .mux_options([with_error_handler(|_parts: &Parts, status: Status| {
                (StatusCode::BAD_GATEWAY, status.message().to_string()).into_response()
            })])
            .register("/v1/", |_ctx, mux, _address, _dial| {
                mux.handle_unary(Method::GET, "/fail", |_req: tonic::Request<serde_json::Value>| async {
                    Err::<tonic::Response<serde_json::Value>, _>(Status::unavailable("down"))
                })
            })
            .build()
            .unwrap();

        let response = get(router, "/v1/fail").await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(text(response).await, "down");
    }

    fn fixed_route(path: &'static str) -> Box<dyn Registration> {
        registration(move |_ctx, mux, _address, _dial| {
            mux.handle(Method::GET, path, move || async move { path })
        })
    }

    #[test]
    fn conflicting_captures_across_registrations_fail_the_build() {
        let err = GatewayBuilder::new()
            .registrations("/v1/", [fixed_route("/users/{id}"), fixed_route("/users/{name}")])
            .build()
            .unwrap_err();
        assert!(
            matches!(err, GatewayError::RouteConflict { ref path, .. } if path == "/users/{name}"),
            "{err}"
        );
    }

    #[test]
    fn prefix_overlapping_base_router_fails_the_build() {
        let base = Router::new().route("/api/x", axum::routing::get(|| async { "base" }));
        let err = GatewayBuilder::new()
            .router(base)
            .registrations("/api/", [fixed_route("/x")])
            .build()
            .unwrap_err();
        assert!(
            matches!(err, GatewayError::RouteConflict { ref path, .. } if path == "/api/"),
            "{err}"
        );
    }

    #[test]
    fn overlapping_prefixes_fail_the_build() {
        let err = GatewayBuilder::new()
            .registrations("/a/", [fixed_route("/b/{id}")])
            .registrations("/a/b/", [fixed_route("/{name}")])
            .build()
            .unwrap_err();
        assert!(matches!(err, GatewayError::RouteConflict { .. }), "{err}");
    }

    #[tokio::test]
    async fn disjoint_nested_prefixes_still_build() {
        let router = GatewayBuilder::new()
            .registrations("/a/", [fixed_route("/one")])
            .registrations("/a/b/", [fixed_route("/two")])
            .build()
            .unwrap();
        assert_eq!(text(get(router.clone(), "/a/one").await).await, "/one");
        assert_eq!(text(get(router, "/a/b/two").await).await, "/two");
    }
}
