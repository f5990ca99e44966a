//! HTTP serving subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum serve, trace + timeout layers)
//!     → request.rs (adopt or generate x-request-id)
//!     → gateway router (prefix → ServeMux → RPC call)
//!     → response with x-request-id
//! ```

pub mod request;
pub mod server;

pub use request::assign_request_id;
pub use server::GatewayServer;
