use anyhow::{Context, Result};
use clap::Parser;
use document_index::api;
use document_index::config::ServerConfig;
use document_index::models::{DOWNLOAD_ROUTE, LIST_ROUTE, UPLOAD_ROUTE};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::parse();
    let store = config.blob_store().await?;
    let app = api::router(store);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    info!("🚀 Document index file service running on http://{}", config.bind);
    info!("   POST {} - Upload a file (multipart field 'file')", UPLOAD_ROUTE);
    info!("   GET  {} - List uploaded files", LIST_ROUTE);
    info!("   GET  {}?key=... - Download a file", DOWNLOAD_ROUTE);

    axum::serve(listener, app)
        .await
        .context("Server terminated unexpectedly")?;
    Ok(())
}
