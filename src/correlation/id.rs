//! Correlation identifiers.
//!
//! # Responsibilities
//! - Generate unique identifiers (UUID v4)
//! - Carry the identifier of the call currently being handled
//!
//! # Design Decisions
//! - `uuid` draws from a thread-local CSPRNG, so generation never contends
//! - The identifier is cheap to clone (`Arc<str>`) since it is copied into
//!   extensions, metadata and log fields

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use uuid::Uuid;

tokio::task_local! {
    static CURRENT: CorrelationId;
}

/// Generate a new identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Correlation identifier for a single inbound call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        Self(new_id().into())
    }

    /// Adopt an identifier supplied by the caller.
    ///
    /// Returns `None` for the empty string, which is treated as absent.
    pub fn adopt(value: &str) -> Option<Self> {
        if value.is_empty() {
            None
        } else {
            Some(Self(value.into()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier of the call the current task is handling.
    ///
    /// `None` when no interceptor established a scope for this task.
    pub fn current() -> Option<Self> {
        CURRENT.try_with(|id| id.clone()).ok()
    }

    /// Run `fut` with `self` as the current identifier.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT.scope(self, fut).await
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
