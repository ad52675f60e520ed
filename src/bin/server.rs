//! Board Audio Server
//!
//! Serves board playback control and live transcoded audio over HTTP.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use board_audio_streamer::{
    api::WebServer,
    catalog::InMemoryCatalog,
    config::AppConfig,
    PlaybackService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Board Audio Server");

    // Config path from args, else the platform config dir
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => AppConfig::load(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AppConfig::load_or_default()?,
    };

    let catalog = match &config.catalog.seed_file {
        Some(path) => InMemoryCatalog::load(path)
            .with_context(|| format!("loading catalog {}", path.display()))?,
        None => {
            tracing::warn!("No catalog seed file configured, starting with an empty catalog");
            InMemoryCatalog::new()
        }
    };
    tracing::info!(
        "Catalog: {} boards, {} tracks",
        catalog.board_count(),
        catalog.track_count()
    );

    let format = config.audio.pcm_format();
    tracing::info!(
        "PCM format: {}Hz, {} channels, {}ms frames ({} bytes)",
        format.sample_rate,
        format.channels,
        format.frame_duration_ms,
        format.frame_bytes()
    );

    let playback = Arc::new(PlaybackService::from_config(&config, Arc::new(catalog)));
    let web_server = WebServer::new(config.server.clone(), playback);

    web_server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
            tracing::info!("Shutdown requested");
        })
        .await?;

    tracing::info!("Board Audio Server stopped");
    Ok(())
}
