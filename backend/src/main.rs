use anyhow::Context;
use data_feed::{CsvRowSource, SeriesEngine};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::{ApiState, DynRowSource};
use crate::config::Config;

mod api;
mod config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    info!(?config, "config");

    // Re-read on every request so edits to the data file show up immediately.
    let source: DynRowSource =
        Box::new(CsvRowSource::new(&config.data_path).with_strict_cells(config.strict_cells));
    let engine = SeriesEngine::new(source).with_policy(config.match_policy);
    let app = api::router(ApiState::new(engine));

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("bind {}", config.addr))?;
    info!(addr = %config.addr, data = %config.data_path.display(), "series api listening");
    axum::serve(listener, app).await.context("server failed")?;
    Ok(())
}
