//! panorama-mcp server entry point.
//!
//! Boots the MCP server on stdio transport. Logging goes to stderr to avoid
//! interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use panorama_core::AppConfig;
use panorama_query::ConnectionManager;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod error;
mod handler;
mod state;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(
        cache = if config.redis_url().is_some() { "redis" } else { "local" },
        database = %config.database.main_database,
        "starting panorama server on stdio transport"
    );

    let connections = Arc::new(ConnectionManager::new(config.database.clone()));
    let sweeper = connections.spawn_sweeper();

    let state = state::AppState::from_config(&config, Arc::clone(&connections)).await?;
    let handler = handler::PanoramaServer::new(Arc::new(state));
    let server = serve_server(handler, stdio()).await?;

    server.waiting().await?;

    sweeper.abort();
    let closed = connections.close_all();
    tracing::info!(closed, "connection pools closed; shutting down");

    Ok(())
}
