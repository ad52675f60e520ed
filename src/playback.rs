//! Playback orchestrator
//!
//! The public contract consumed by the HTTP layer. Every operation first
//! checks that the caller may act on the board, then dispatches to that
//! board's session.

use std::sync::Arc;
use tracing::{info, instrument};

use crate::catalog::{
    AccessPolicy, Board, BoardId, Catalog, OwnershipPolicy, Track, TrackId, UserId,
};
use crate::config::AppConfig;
use crate::error::PlaybackError;
use crate::session::{BoardSession, PlayRequest, PlaybackState, SeekRequest, SessionRegistry};
use crate::source::{SourceLoader, SourceRouter};
use crate::stream::{open_stream, AudioStream, FfmpegTranscoder, Transcoder};

/// Board playback facade
pub struct PlaybackService {
    catalog: Arc<dyn Catalog>,
    policy: Arc<dyn AccessPolicy>,
    loader: Arc<dyn SourceLoader>,
    transcoder: Arc<dyn Transcoder>,
    sessions: SessionRegistry,
}

impl PlaybackService {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        policy: Arc<dyn AccessPolicy>,
        loader: Arc<dyn SourceLoader>,
        transcoder: Arc<dyn Transcoder>,
        sessions: SessionRegistry,
    ) -> Self {
        Self {
            catalog,
            policy,
            loader,
            transcoder,
            sessions,
        }
    }

    /// Service with the built-in sources, ffmpeg and the ownership policy
    pub fn from_config(config: &AppConfig, catalog: Arc<dyn Catalog>) -> Self {
        let format = config.audio.pcm_format();
        Self::new(
            catalog,
            Arc::new(OwnershipPolicy),
            Arc::new(SourceRouter::with_defaults(format)),
            Arc::new(FfmpegTranscoder::new(config.transcoder.clone())),
            SessionRegistry::new(format, config.session.clone()),
        )
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Current state; boards that never played report STOPPED
    pub fn get_state(
        &self,
        user: UserId,
        board_id: BoardId,
    ) -> Result<PlaybackState, PlaybackError> {
        self.require_board(user, board_id)?;
        Ok(self
            .sessions
            .get(board_id)
            .map(|s| s.snapshot())
            .unwrap_or_else(|| PlaybackState::stopped(board_id)))
    }

    #[instrument(skip(self, request), fields(track_id = ?request.track_id))]
    pub async fn play(
        &self,
        user: UserId,
        board_id: BoardId,
        request: PlayRequest,
    ) -> Result<PlaybackState, PlaybackError> {
        let board = self.require_board(user, board_id)?;
        let track = self.resolve_track(&board, request.track_id)?;

        if !self.policy.may_play_track(user, &track) {
            return Err(PlaybackError::Forbidden("Forbidden (track not accessible)".into()));
        }
        let window = request.window();
        window.validate(track.duration_secs)?;

        info!(board_id, track_id = track.id, "Play requested");
        let session = self.sessions.get_or_create(board_id);
        session
            .load_and_play(&track, window, self.loader.as_ref())
            .await
    }

    pub async fn pause(
        &self,
        user: UserId,
        board_id: BoardId,
    ) -> Result<PlaybackState, PlaybackError> {
        self.require_session(user, board_id)?.pause().await
    }

    pub async fn resume(
        &self,
        user: UserId,
        board_id: BoardId,
    ) -> Result<PlaybackState, PlaybackError> {
        self.require_session(user, board_id)?.resume().await
    }

    pub async fn stop(
        &self,
        user: UserId,
        board_id: BoardId,
    ) -> Result<PlaybackState, PlaybackError> {
        self.require_session(user, board_id)?.stop().await
    }

    pub async fn seek(
        &self,
        user: UserId,
        board_id: BoardId,
        request: SeekRequest,
    ) -> Result<PlaybackState, PlaybackError> {
        self.require_session(user, board_id)?
            .seek(request.position_s)
            .await
    }

    /// Open the board's live stream
    pub async fn stream(
        &self,
        user: UserId,
        board_id: BoardId,
    ) -> Result<AudioStream, PlaybackError> {
        self.require_board(user, board_id)?;
        let session = self
            .sessions
            .get(board_id)
            .ok_or_else(|| PlaybackError::Conflict("Board is not playing".into()))?;
        open_stream(session, self.transcoder.as_ref()).await
    }

    /// Stop every session and wait for their tasks
    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
    }

    fn require_board(&self, user: UserId, board_id: BoardId) -> Result<Board, PlaybackError> {
        let board = self
            .catalog
            .board(board_id)
            .ok_or_else(|| PlaybackError::NotFound("Board not found".into()))?;
        if !self.policy.may_control_board(user, &board) {
            return Err(PlaybackError::Forbidden("Forbidden (board not owned by user)".into()));
        }
        Ok(board)
    }

    fn require_session(
        &self,
        user: UserId,
        board_id: BoardId,
    ) -> Result<Arc<BoardSession>, PlaybackError> {
        self.require_board(user, board_id)?;
        self.sessions
            .get(board_id)
            .ok_or_else(PlaybackError::invalid_state)
    }

    /// Explicit track, else the board's selection
    fn resolve_track(
        &self,
        board: &Board,
        requested: Option<TrackId>,
    ) -> Result<Track, PlaybackError> {
        let track_id = match requested.or(board.selected_track_id) {
            Some(id) => id,
            None => {
                return Err(PlaybackError::Conflict(
                    "No track selected on board (and no trackId provided)".into(),
                ))
            }
        };
        self.catalog
            .track(track_id)
            .ok_or_else(|| PlaybackError::NotFound("Track not found".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::session::PlaybackStatus;

    const SEED: &str = r#"
        [[tracks]]
        id = 10
        name = "Forest"
        uri = "tone:220?duration=120"
        duration_secs = 120
        owner_id = 1

        [[tracks]]
        id = 11
        name = "Private"
        uri = "tone:330?duration=60"
        duration_secs = 60
        owner_id = 2

        [[boards]]
        id = 1
        name = "Campaign"
        owner_id = 1
        selected_track_id = 10

        [[boards]]
        id = 2
        name = "Empty"
        owner_id = 1
    "#;

    fn service() -> PlaybackService {
        let catalog = Arc::new(InMemoryCatalog::from_toml_str(SEED).unwrap());
        PlaybackService::from_config(&AppConfig::default(), catalog)
    }

    #[tokio::test]
    async fn test_get_state_does_not_create_session() {
        let service = service();
        let state = service.get_state(1, 1).unwrap();
        assert_eq!(state, PlaybackState::stopped(1));
        assert!(service.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_board_access_checks() {
        let service = service();
        assert_eq!(
            service.get_state(1, 99).unwrap_err(),
            PlaybackError::NotFound("Board not found".into())
        );
        assert!(matches!(
            service.play(2, 1, PlayRequest::default()).await,
            Err(PlaybackError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_play_resolves_selected_track() {
        let service = service();
        let state = service.play(1, 1, PlayRequest::default()).await.unwrap();
        assert_eq!(state.status, PlaybackStatus::Playing);
        assert_eq!(state.track_id, Some(10));
        assert_eq!(service.sessions().len(), 1);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_play_track_errors() {
        let service = service();

        let err = service.play(1, 2, PlayRequest::default()).await.unwrap_err();
        assert_eq!(
            err,
            PlaybackError::Conflict("No track selected on board (and no trackId provided)".into())
        );

        let err = service.play(1, 1, PlayRequest::track(404)).await.unwrap_err();
        assert_eq!(err, PlaybackError::NotFound("Track not found".into()));

        let err = service.play(1, 1, PlayRequest::track(11)).await.unwrap_err();
        assert_eq!(err, PlaybackError::Forbidden("Forbidden (track not accessible)".into()));

        let request = PlayRequest {
            track_id: Some(10),
            window_start_s: Some(50),
            window_end_s: Some(500),
        };
        assert!(matches!(
            service.play(1, 1, request).await,
            Err(PlaybackError::BadRequest(_))
        ));
        assert!(service.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_controls_without_session_conflict() {
        let service = service();
        let conflict = PlaybackError::invalid_state();
        assert_eq!(service.pause(1, 1).await.unwrap_err(), conflict);
        assert_eq!(service.resume(1, 1).await.unwrap_err(), conflict);
        assert_eq!(service.stop(1, 1).await.unwrap_err(), conflict);
        assert_eq!(
            service.seek(1, 1, SeekRequest { position_s: 3 }).await.unwrap_err(),
            conflict
        );
        assert_eq!(
            service.stream(1, 1).await.unwrap_err(),
            PlaybackError::Conflict("Board is not playing".into())
        );
    }
}
