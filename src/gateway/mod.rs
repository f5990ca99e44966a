//! REST to RPC gateway.
//!
//! # Data Flow
//! ```text
//! Startup (builder.rs):
//!     GatewayBuilder { address, dial options, prefix → registrations }
//!     → per prefix: ServeMux::new(default policies + extra options)
//!     → registration(ctx, mux, address, dial) for each, in order
//!     → Router with every mux mounted at its prefix (prefix stripped)
//!
//! Per request (mux.rs):
//!     REST request
//!     → decode JSON body + query + path captures (mux.rs)
//!     → annotate call metadata (policy.rs)
//!     → RPC call over a lazily dialed channel (dial.rs)
//!     → JSON response, or error handler on Status (policy.rs)
//! ```
//!
//! # Design Decisions
//! - Any registration failure fails the whole build
//! - Dialing is lazy; an unreachable upstream surfaces per request
//! - The correlation id header is forwarded upstream and echoed back

pub mod builder;
pub mod dial;
pub mod error;
pub mod health;
pub mod mux;
pub mod policy;
mod transcode;

pub use builder::{registration, GatewayBuilder, Registration, DEFAULT_SERVER_ADDRESS};
pub use dial::{DialOption, DialOptions};
pub use error::GatewayError;
pub use mux::{
    with_error_handler, with_metadata, MuxRuntime, ServeMux, ServeMuxOption, DEFAULT_MAX_BODY_SIZE,
};
pub use policy::{
    http_status_from_code, metadata_annotator, proto_message_error_handler, ErrorHandler,
    MetadataAnnotator,
};
