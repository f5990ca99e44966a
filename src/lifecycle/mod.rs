//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Init logging/metrics → Build gateway → Bind
//!
//! Shutdown (shutdown.rs):
//!     Ctrl+C or trigger() → Stop accepting → Drain in-flight requests → Exit
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error, including a failed registration, is fatal
//! - The listener binds last (traffic only when the gateway is built)

pub mod shutdown;

pub use shutdown::Shutdown;
