use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use rpc_gateway::config::{load_config, GatewayConfig};
use rpc_gateway::gateway::{health, GatewayBuilder, ServeMuxOption};
use rpc_gateway::observability::{logging, metrics};
use rpc_gateway::{GatewayServer, Shutdown};

/// REST to RPC gateway.
#[derive(Debug, Parser)]
#[command(name = "rpc-gateway", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init(&config.observability)?;
    tracing::info!("rpc-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(err) = metrics::init_metrics(addr) {
                    tracing::error!(error = %err, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let router = GatewayBuilder::new()
        .server_address(config.upstream.address.clone())
        .dial_options(config.upstream.dial_options())
        .mux_options([
            ServeMuxOption::MaxBodySize(config.gateway.max_body_size),
            ServeMuxOption::PrettyJson(config.gateway.pretty_json),
        ])
        .register(config.gateway.health_prefix.clone(), health::register)
        .build()?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    GatewayServer::new(router, &config)
        .run(listener, shutdown.signal())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
