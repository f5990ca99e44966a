//! Upstream dial configuration.
//!
//! # Responsibilities
//! - Hold the opaque list of options registrations dial the upstream with
//! - Turn an address plus options into a tonic `Endpoint` / lazy `Channel`
//!
//! # Design Decisions
//! - Transport security is off by default (`DialOption::Insecure`)
//! - `Insecure` decides the scheme of bare `host:port` addresses; explicit
//!   URIs are used as given
//! - Channels are created lazily so building the gateway never blocks on the
//!   upstream being reachable

use std::time::Duration;

use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

use super::error::GatewayError;

/// A single upstream dial setting.
#[derive(Debug, Clone)]
pub enum DialOption {
    /// Plaintext HTTP/2 (no transport security).
    Insecure,
    Tls(ClientTlsConfig),
    ConnectTimeout(Duration),
    /// Per-request deadline applied by the channel.
    Timeout(Duration),
    UserAgent(String),
    TcpKeepalive(Duration),
    ConcurrencyLimit(usize),
}

/// Ordered list of dial settings shared by every registration.
#[derive(Debug, Clone)]
pub struct DialOptions {
    options: Vec<DialOption>,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self::insecure()
    }
}

impl DialOptions {
    pub fn new(options: impl IntoIterator<Item = DialOption>) -> Self {
        Self {
            options: options.into_iter().collect(),
        }
    }

    /// Options with transport security disabled.
    pub fn insecure() -> Self {
        Self::new([DialOption::Insecure])
    }

    /// Append an option.
    pub fn with(mut self, option: DialOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn options(&self) -> &[DialOption] {
        &self.options
    }

    pub fn is_insecure(&self) -> bool {
        self.options
            .iter()
            .any(|option| matches!(option, DialOption::Insecure))
    }

    /// Normalize `address` into a URI string.
    ///
    /// `:9090` dials the loopback interface, `host:port` gets a scheme
    /// matching the security setting.
    pub fn uri(&self, address: &str) -> Result<String, GatewayError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(GatewayError::InvalidAddress {
                address: address.to_string(),
                reason: "empty address".to_string(),
            });
        }
        if address.contains("://") {
            return Ok(address.to_string());
        }

        let scheme = if self.is_insecure() { "http" } else { "https" };
        if address.starts_with(':') {
            Ok(format!("{scheme}://127.0.0.1{address}"))
        } else {
            Ok(format!("{scheme}://{address}"))
        }
    }

    /// Build an endpoint for `address` with every option applied.
    pub fn endpoint(&self, address: &str) -> Result<Endpoint, GatewayError> {
        let uri = self.uri(address)?;
        let mut endpoint = Endpoint::from_shared(uri)?;

        for option in &self.options {
            endpoint = match option {
                DialOption::Insecure => endpoint,
                DialOption::Tls(tls) => endpoint.tls_config(tls.clone())?,
                DialOption::ConnectTimeout(timeout) => endpoint.connect_timeout(*timeout),
                DialOption::Timeout(timeout) => endpoint.timeout(*timeout),
                DialOption::UserAgent(agent) => endpoint.user_agent(agent.clone())?,
                DialOption::TcpKeepalive(interval) => endpoint.tcp_keepalive(Some(*interval)),
                DialOption::ConcurrencyLimit(limit) => endpoint.concurrency_limit(*limit),
            };
        }

        Ok(endpoint)
    }

    /// Channel to `address` that connects on first use.
    pub fn connect_lazy(&self, address: &str) -> Result<Channel, GatewayError> {
        Ok(self.endpoint(address)?.connect_lazy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_insecure() {
        let options = DialOptions::default();
        assert!(options.is_insecure());
        assert_eq!(options.options().len(), 1);
    }

    #[test]
    fn uri_normalization() {
        let insecure = DialOptions::insecure();
        assert_eq!(insecure.uri("127.0.0.1:9090").unwrap(), "http://127.0.0.1:9090");
        assert_eq!(insecure.uri(":9090").unwrap(), "http://127.0.0.1:9090");
        assert_eq!(insecure.uri("https://api.internal").unwrap(), "https://api.internal");

        let secure = DialOptions::new([]);
        assert_eq!(secure.uri("api.internal:443").unwrap(), "https://api.internal:443");
    }

    #[test]
    fn empty_address_is_rejected() {
        let err = DialOptions::default().uri("  ").unwrap_err();
        assert!(matches!(err, GatewayError::InvalidAddress { .. }));
    }

    #[test]
    fn endpoint_applies_options() {
        let options = DialOptions::insecure()
            .with(DialOption::ConnectTimeout(Duration::from_secs(2)))
            .with(DialOption::UserAgent("rpc-gateway-test".to_string()));

        let endpoint = options.endpoint("localhost:50051").unwrap();
        let uri = endpoint.uri();
        assert_eq!(uri.scheme_str(), Some("http"));
        assert_eq!(uri.host(), Some("localhost"));
        assert_eq!(uri.port_u16(), Some(50051));
    }

    #[test]
    fn malformed_address_is_a_transport_error() {
        let err = DialOptions::default().endpoint("bad host:1").unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }

    #[tokio::test]
    async fn lazy_channel_does_not_dial() {
        assert!(DialOptions::default().connect_lazy("127.0.0.1:1").is_ok());
    }
}
