//! Binary entry point: parses the CLI, builds the composition root, and
//! runs it over whichever transport was selected.

mod cli;
mod composition;
mod http;
mod stdio_loop;
mod ws_listener;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands, TransportKind};
use memcortex_server::config::ServerConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let Commands::Serve { transport, bind, ws_bind } = cli.command;

    // stdio reserves stdout for the JSON-RPC stream; logs always go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(error) = metrics_exporter_prometheus::PrometheusBuilder::new().install() {
        tracing::warn!(%error, "failed to install the Prometheus metrics recorder; metrics will be no-ops");
    }
    memcortex_server::MetricsRegistry::describe();

    let config = ServerConfig::from_env();
    let server = Arc::new(composition::build(&config));

    let ws_handle = tokio::spawn(ws_listener::run(server.clone(), ws_bind));

    let result = match transport {
        TransportKind::Stdio => stdio_loop::run(&server).await,
        TransportKind::Http => {
            let app = http::router(server.clone());
            let listener = tokio::net::TcpListener::bind(bind.as_str()).await?;
            tracing::info!(%bind, "serving MCP over HTTP");
            axum::serve(listener, app).await.map_err(anyhow::Error::from)
        }
    };

    ws_handle.abort();
    result
}
