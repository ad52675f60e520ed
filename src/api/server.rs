//! HTTP server setup

use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::handlers;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::playback::PlaybackService;

/// Shared handler state
pub struct AppState {
    pub playback: Arc<PlaybackService>,
    pub started: Instant,
}

/// Playback HTTP server
pub struct WebServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: ServerConfig, playback: Arc<PlaybackService>) -> Self {
        Self {
            config,
            state: Arc::new(AppState {
                playback,
                started: Instant::now(),
            }),
        }
    }

    /// Build the router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/v1/status", get(handlers::get_status))
            .route("/api/v1/boards/:board_id/playback", get(handlers::get_playback))
            .route("/api/v1/boards/:board_id/playback/play", post(handlers::play))
            .route("/api/v1/boards/:board_id/playback/pause", post(handlers::pause))
            .route("/api/v1/boards/:board_id/playback/resume", post(handlers::resume))
            .route("/api/v1/boards/:board_id/playback/stop", post(handlers::stop))
            .route("/api/v1/boards/:board_id/playback/seek", post(handlers::seek))
            .route("/api/v1/boards/:board_id/playback/stream", get(handlers::stream))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    ///
    /// When `shutdown` resolves every session is stopped before the server
    /// drains, which ends every open audio stream.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Web server listening on http://{}", listener.local_addr()?);

        let playback = self.state.playback.clone();
        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                playback.shutdown().await;
                info!("Sessions stopped, draining connections");
            })
            .await?;

        Ok(())
    }
}
