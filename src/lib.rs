//! REST to RPC gateway.
//!
//! Exposes RPC services over REST/JSON by mounting one translation
//! multiplexer per URL prefix, and carries a correlation id across every
//! RPC call.
//!
//! # Architecture Overview
//!
//! ```text
//!   REST client
//!       │
//!       ▼
//!   http::server ── trace, request id, timeout
//!       │
//!       ▼
//!   gateway::builder ── prefix router ("/v1/" → mux, "/admin/" → mux)
//!       │
//!       ▼
//!   gateway::mux ── JSON ⇄ message, metadata, error mapping
//!       │  (lazy channel, gateway::dial)
//!       ▼
//!   RPC server ── correlation::{intercept, CorrelationLayer}
//!                 adopt/generate id, panic → Internal
//! ```

pub mod config;
pub mod correlation;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use crate::config::GatewayConfig;
pub use crate::correlation::{intercept, CorrelationId, CorrelationLayer, CorrelationPropagator};
pub use crate::gateway::{GatewayBuilder, GatewayError, ServeMux};
pub use crate::http::GatewayServer;
pub use crate::lifecycle::Shutdown;
