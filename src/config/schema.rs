//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gateway::{DialOption, DialOptions, DEFAULT_MAX_BODY_SIZE, DEFAULT_SERVER_ADDRESS};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Upstream RPC server and how to dial it.
    pub upstream: UpstreamConfig,

    /// Translation settings.
    pub gateway: TranslationConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream RPC server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Address of the RPC server (`host:port`, `:port` or a full URI).
    pub address: String,

    /// Dial without transport security.
    pub insecure: bool,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Per-call deadline in seconds (0 disables it).
    pub request_timeout_secs: u64,

    /// User agent sent to the upstream.
    pub user_agent: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_SERVER_ADDRESS.to_string(),
            insecure: true,
            connect_timeout_secs: 5,
            request_timeout_secs: 0,
            user_agent: None,
        }
    }
}

impl UpstreamConfig {
    /// Dial options described by this section.
    pub fn dial_options(&self) -> DialOptions {
        let mut options = if self.insecure {
            DialOptions::insecure()
        } else {
            DialOptions::new([DialOption::Tls(
                tonic::transport::ClientTlsConfig::new().with_native_roots(),
            )])
        };
        if self.connect_timeout_secs > 0 {
            options = options.with(DialOption::ConnectTimeout(Duration::from_secs(
                self.connect_timeout_secs,
            )));
        }
        if self.request_timeout_secs > 0 {
            options = options.with(DialOption::Timeout(Duration::from_secs(
                self.request_timeout_secs,
            )));
        }
        if let Some(agent) = &self.user_agent {
            options = options.with(DialOption::UserAgent(agent.clone()));
        }
        options
    }
}

/// Translation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// Prefix the built-in health endpoints are mounted under.
    pub health_prefix: String,

    /// Maximum accepted request body in bytes.
    pub max_body_size: usize,

    /// Indent JSON responses.
    pub pretty_json: bool,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            health_prefix: "/".to_string(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            pretty_json: false,
        }
    }
}

/// Timeout configuration for inbound requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9100".to_string(),
        }
    }
}
