//! Gateway construction errors.

use thiserror::Error;

/// Errors raised while building the gateway or registering handlers.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid prefix {0:?}: must start and end with '/'")]
    InvalidPrefix(String),

    #[error("invalid upstream address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("invalid route path {0:?}")]
    InvalidRoute(String),

    #[error("unsupported method {0}")]
    UnsupportedMethod(http::Method),

    #[error("route already registered: {method} {path}")]
    DuplicateRoute { method: http::Method, path: String },

    #[error("route {path:?} conflicts with an existing route: {reason}")]
    RouteConflict { path: String, reason: String },

    #[error("registration failed: {0}")]
    Registration(String),
}

impl GatewayError {
    /// Failure reported by a registration function.
    pub fn registration(msg: impl Into<String>) -> Self {
        Self::Registration(msg.into())
    }
}
