//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway and interceptor produce:
//!     → logging.rs (structured events, spans carrying request_id)
//!     → metrics.rs (request counters, latency histogram, panic counter)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - The correlation id is a span field, so every event inside a call
//!   carries it without repeating it at each call site
//! - Metrics are cheap (atomic increments through the facade)

pub mod logging;
pub mod metrics;
