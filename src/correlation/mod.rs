//! Correlation identifier subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound RPC call (metadata: x-request-id?)
//!     → layer.rs / interceptor.rs (adopt or generate id)
//!     → id.rs (task-local scope + request extensions)
//!     → wrapped handler (reads id via accessors)
//!     → response / status metadata: x-request-id
//!
//! Outbound RPC call made from a handler:
//!     → CorrelationPropagator copies the current id into request metadata
//! ```
//!
//! # Design Decisions
//! - One published key, shared by the gateway and RPC servers
//! - An empty or non-ASCII incoming id counts as absent; any other value is
//!   adopted exactly
//! - Panics stay inside the call that raised them

pub mod id;
pub mod interceptor;
pub mod layer;

pub use id::{new_id, CorrelationId};
pub use interceptor::{correlation_id, intercept, CorrelationPropagator};
pub use layer::{CorrelationLayer, CorrelationService};

/// Metadata / header key carrying the correlation id.
pub const REQUEST_ID_KEY: &str = "x-request-id";
