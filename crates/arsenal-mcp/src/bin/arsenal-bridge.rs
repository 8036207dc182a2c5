use std::sync::Arc;

use anyhow::Context;
use arsenal_mcp::transport::{http, stdio};
use arsenal_mcp::{BridgeConfig, McpServer, Transport};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout belongs to the stdio transport; logs always go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "invalid configuration");
            std::process::exit(1);
        }
    };

    let server = Arc::new(McpServer::from_config(&config).context("failed to build tool clients")?);
    info!(
        transport = ?config.transport,
        tools = server.registry().names().len(),
        "arsenal-bridge starting"
    );

    match config.transport {
        Transport::Stdio => stdio::serve_stdio(&server).await?,
        Transport::Http => http::serve(server, &config.bind_addr()).await?,
    }
    Ok(())
}
