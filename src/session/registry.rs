//! Board id → session map
//!
//! Sessions are created lazily on the first `play` and live until the
//! registry shuts down. Concurrent first use of one board yields a single
//! session.

use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::audio::PcmFormat;
use crate::catalog::BoardId;
use crate::config::SessionConfig;
use crate::session::board::BoardSession;

/// Owns every board session and the tasks they spawn
pub struct SessionRegistry {
    sessions: DashMap<BoardId, Arc<BoardSession>>,
    format: PcmFormat,
    config: SessionConfig,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl SessionRegistry {
    pub fn new(format: PcmFormat, config: SessionConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            format,
            config,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn get(&self, board_id: BoardId) -> Option<Arc<BoardSession>> {
        self.sessions.get(&board_id).map(|s| s.value().clone())
    }

    /// Session for `board_id`, created on first use
    pub fn get_or_create(&self, board_id: BoardId) -> Arc<BoardSession> {
        self.sessions
            .entry(board_id)
            .or_insert_with(|| {
                debug!(board_id, "Creating board session");
                Arc::new(BoardSession::new(
                    board_id,
                    self.format,
                    self.config.clone(),
                    &self.shutdown,
                    self.tasks.clone(),
                ))
            })
            .value()
            .clone()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn board_ids(&self) -> Vec<BoardId> {
        let mut ids: Vec<_> = self.sessions.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancel all workers and streams, then wait for their tasks to exit
    pub async fn shutdown(&self) {
        info!(sessions = self.sessions.len(), "Shutting down board sessions");
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!("All session tasks finished");
    }
}
