//! Board session: the per-board playback state machine
//!
//! ```text
//!            play                load ok
//!  STOPPED ────────► BUFFERING ─────────► PLAYING ◄──── resume ──── PAUSED
//!     ▲                  │                 │   └────── pause ──────►  │
//!     │                  │ timeout / fail  │ stuck / exception         │
//!     │                  ▼                 ▼                           │
//!     │                ERROR ◄─────────────┘                           │
//!     └──── stop / track end (from PLAYING, PAUSED, ERROR) ────────────┘
//! ```
//!
//! Control operations are serialized per session. Producer lifecycle changes
//! all pass through [`BoardSession::handle_event`].

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::audio::{FrameProducer, PcmFormat, PcmRingBuffer, ProducerEvent};
use crate::catalog::{BoardId, Track, TrackId};
use crate::config::SessionConfig;
use crate::error::{PlaybackError, SourceError};
use crate::session::state::{PlaybackState, PlaybackStatus, PlaybackWindow};
use crate::session::worker;
use crate::source::SourceLoader;

struct SessionState {
    status: PlaybackStatus,
    track_id: Option<TrackId>,
    window: PlaybackWindow,
}

/// Live playback context of one board
pub struct BoardSession {
    board_id: BoardId,
    config: SessionConfig,
    producer: FrameProducer,
    frames: PcmRingBuffer,
    state: Mutex<SessionState>,
    /// Serializes play/pause/resume/stop/seek
    ops: tokio::sync::Mutex<()>,

    loop_running: AtomicBool,
    worker_cancel: Mutex<CancellationToken>,

    /// Id of the stream currently attached, 0 when none
    active_stream: AtomicU64,
    next_stream_id: AtomicU64,
    stream_cancel: Mutex<Option<CancellationToken>>,

    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl BoardSession {
    pub fn new(
        board_id: BoardId,
        format: PcmFormat,
        config: SessionConfig,
        parent: &CancellationToken,
        tasks: TaskTracker,
    ) -> Self {
        let idle_worker = CancellationToken::new();
        idle_worker.cancel();

        Self {
            board_id,
            producer: FrameProducer::new(format, config.stuck_threshold()),
            frames: PcmRingBuffer::new(config.queue_capacity),
            config,
            state: Mutex::new(SessionState {
                status: PlaybackStatus::Stopped,
                track_id: None,
                window: PlaybackWindow::default(),
            }),
            ops: tokio::sync::Mutex::new(()),
            loop_running: AtomicBool::new(false),
            worker_cancel: Mutex::new(idle_worker),
            active_stream: AtomicU64::new(0),
            next_stream_id: AtomicU64::new(0),
            stream_cancel: Mutex::new(None),
            cancel: parent.child_token(),
            tasks,
        }
    }

    pub fn board_id(&self) -> BoardId {
        self.board_id
    }

    pub fn status(&self) -> PlaybackStatus {
        self.state.lock().status
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn producer(&self) -> &FrameProducer {
        &self.producer
    }

    pub fn frames(&self) -> &PcmRingBuffer {
        &self.frames
    }

    pub(crate) fn window(&self) -> PlaybackWindow {
        self.state.lock().window
    }

    pub(crate) fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    pub fn is_loop_running(&self) -> bool {
        self.loop_running.load(Ordering::SeqCst)
    }

    pub fn is_streaming(&self) -> bool {
        self.active_stream.load(Ordering::SeqCst) != 0
    }

    /// Current playback state
    pub fn snapshot(&self) -> PlaybackState {
        let state = self.state.lock();
        PlaybackState {
            board_id: self.board_id,
            status: state.status,
            track_id: state.track_id,
            window_start_s: state.window.start_s,
            window_end_s: state.window.end_s,
            position_s: self.producer.position_ms().map(|ms| ms / 1000),
        }
    }

    /// Apply a producer lifecycle event to the state machine
    pub fn handle_event(&self, event: ProducerEvent) {
        match event {
            ProducerEvent::TrackStarted { title, uri } => {
                info!(board_id = self.board_id, %uri, "Track started: {}", title);
                self.set_status(PlaybackStatus::Playing);
            }
            ProducerEvent::Paused => {
                self.transition(PlaybackStatus::Playing, PlaybackStatus::Paused);
            }
            ProducerEvent::Resumed => {
                self.transition(PlaybackStatus::Paused, PlaybackStatus::Playing);
            }
            ProducerEvent::TrackStuck { threshold_ms } => {
                warn!(board_id = self.board_id, threshold_ms, "Track stuck");
                self.set_status(PlaybackStatus::Error);
            }
            ProducerEvent::TrackException { message } => {
                error!(board_id = self.board_id, "Track exception: {}", message);
                self.set_status(PlaybackStatus::Error);
            }
            ProducerEvent::TrackEnded { reason } => {
                debug!(board_id = self.board_id, ?reason, "Track ended");
                if reason.ends_playback() {
                    self.reset_to_stopped();
                }
            }
        }
    }

    fn set_status(&self, status: PlaybackStatus) {
        self.state.lock().status = status;
    }

    fn transition(&self, from: PlaybackStatus, to: PlaybackStatus) {
        let mut state = self.state.lock();
        if state.status == from {
            state.status = to;
        }
    }

    /// Back to STOPPED: forget the track, stop the worker, drop buffered
    /// audio and detach any stream.
    fn reset_to_stopped(&self) {
        {
            let mut state = self.state.lock();
            state.status = PlaybackStatus::Stopped;
            state.track_id = None;
            state.window = PlaybackWindow::default();
        }
        self.worker_cancel.lock().cancel();
        self.frames.clear();
        self.end_stream();
    }

    /// Load `track` and start playing it
    pub async fn load_and_play(
        self: &Arc<Self>,
        track: &Track,
        window: PlaybackWindow,
        loader: &dyn SourceLoader,
    ) -> Result<PlaybackState, PlaybackError> {
        let _op = self.ops.lock().await;

        if self.producer.stop_track().is_some() {
            debug!(board_id = self.board_id, "Replacing current track");
        }
        {
            let mut state = self.state.lock();
            state.status = PlaybackStatus::Buffering;
            state.track_id = Some(track.id);
            state.window = window;
        }
        self.frames.clear();

        // Any early return below, including this future being dropped,
        // leaves the session in ERROR instead of BUFFERING.
        let buffering = BufferingGuard::new(self);

        let resolved =
            tokio::time::timeout(self.config.load_timeout(), loader.resolve(&track.uri)).await;
        let outcome = match resolved {
            Err(_) => {
                warn!(board_id = self.board_id, uri = %track.uri, "Timeout while loading track");
                return Err(PlaybackError::GatewayTimeout("Timeout while loading track".into()));
            }
            Ok(Err(SourceError::NoMatches(uri))) => {
                warn!(board_id = self.board_id, %uri, "No matches");
                return Err(PlaybackError::NotFound(format!("No matches for: {}", uri)));
            }
            Ok(Err(e)) => {
                warn!(board_id = self.board_id, uri = %track.uri, "Load failed: {}", e);
                return Err(PlaybackError::BadGateway(format!("Failed to load track: {}", e)));
            }
            Ok(Ok(outcome)) => outcome,
        };

        let Some(mut loaded) = outcome.into_first() else {
            warn!(board_id = self.board_id, uri = %track.uri, "Collection has no tracks");
            return Err(PlaybackError::NotFound("Collection loaded but has no tracks".into()));
        };

        if let Some(start_s) = window.start_s {
            if loaded.is_seekable() {
                if let Err(e) = loaded.seek(start_s * 1000) {
                    warn!(board_id = self.board_id, "Cannot apply window start: {}", e);
                }
            } else {
                debug!(board_id = self.board_id, "Track not seekable, window start ignored");
            }
        }

        buffering.disarm();
        for event in self.producer.play_track(loaded) {
            self.handle_event(event);
        }
        self.start_loop_if_needed().await;

        Ok(self.snapshot())
    }

    pub async fn pause(&self) -> Result<PlaybackState, PlaybackError> {
        let _op = self.ops.lock().await;
        if self.status() != PlaybackStatus::Playing {
            return Err(PlaybackError::invalid_state());
        }

        let event = self.producer.set_paused(true).unwrap_or(ProducerEvent::Paused);
        self.handle_event(event);
        info!(board_id = self.board_id, "Playback paused");
        Ok(self.snapshot())
    }

    pub async fn resume(&self) -> Result<PlaybackState, PlaybackError> {
        let _op = self.ops.lock().await;
        if self.status() != PlaybackStatus::Paused {
            return Err(PlaybackError::invalid_state());
        }

        let event = self.producer.set_paused(false).unwrap_or(ProducerEvent::Resumed);
        self.handle_event(event);
        info!(board_id = self.board_id, "Playback resumed");
        Ok(self.snapshot())
    }

    pub async fn stop(&self) -> Result<PlaybackState, PlaybackError> {
        let _op = self.ops.lock().await;
        if self.status() == PlaybackStatus::Stopped {
            return Err(PlaybackError::invalid_state());
        }

        self.producer.set_paused(false);
        match self.producer.stop_track() {
            Some(event) => self.handle_event(event),
            None => self.reset_to_stopped(),
        }
        info!(board_id = self.board_id, "Playback stopped");
        Ok(self.snapshot())
    }

    /// Reposition the loaded track. Tracks that cannot seek keep their
    /// position; the call still succeeds.
    pub async fn seek(&self, position_s: u64) -> Result<PlaybackState, PlaybackError> {
        let _op = self.ops.lock().await;
        if !self.producer.has_track() {
            return Err(PlaybackError::invalid_state());
        }

        match self.producer.seek(position_s.saturating_mul(1000)) {
            Ok(true) => {
                // Buffered audio belongs to the old position
                self.frames.clear();
                info!(board_id = self.board_id, position_s, "Seeked");
            }
            Ok(false) => {
                debug!(board_id = self.board_id, "Track not seekable, position unchanged");
            }
            Err(e) => {
                warn!(board_id = self.board_id, "Seek failed: {}", e);
                return Err(PlaybackError::BadGateway(format!("Seek failed: {}", e)));
            }
        }
        Ok(self.snapshot())
    }

    /// Spawn the loop worker unless one is already serving this session
    async fn start_loop_if_needed(self: &Arc<Self>) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            if self
                .loop_running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let token = self.cancel.child_token();
                *self.worker_cancel.lock() = token.clone();
                self.tasks.spawn(worker::run(self.clone(), token));
                return;
            }
            if !self.worker_cancel.lock().is_cancelled() {
                return;
            }
            // A previous worker was told to stop and has not exited yet
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    pub(crate) fn clear_loop_running(&self) {
        self.loop_running.store(false, Ordering::SeqCst);
    }

    /// Reserve the single stream slot of this session
    pub(crate) fn claim_stream(&self) -> Result<(u64, CancellationToken), PlaybackError> {
        let id = self.next_stream_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.active_stream
            .compare_exchange(0, id, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PlaybackError::Conflict("Stream already active for this board".into()))?;

        let token = self.cancel.child_token();
        *self.stream_cancel.lock() = Some(token.clone());
        Ok((id, token))
    }

    /// Free the stream slot if `stream_id` still holds it
    pub(crate) fn release_stream(&self, stream_id: u64) -> bool {
        let released = self
            .active_stream
            .compare_exchange(stream_id, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if released {
            self.stream_cancel.lock().take();
        }
        released
    }

    /// Detach whatever stream is attached and tell it to wind down
    fn end_stream(&self) {
        if self.active_stream.swap(0, Ordering::AcqRel) != 0 {
            if let Some(token) = self.stream_cancel.lock().take() {
                token.cancel();
            }
        }
    }

    /// Cancel the worker and any stream of this session
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Puts a session that is still BUFFERING into ERROR when dropped armed
struct BufferingGuard<'a> {
    session: &'a BoardSession,
    armed: bool,
}

impl<'a> BufferingGuard<'a> {
    fn new(session: &'a BoardSession) -> Self {
        Self {
            session,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for BufferingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.session
                .transition(PlaybackStatus::Buffering, PlaybackStatus::Error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::EndReason;
    use crate::source::{LoadOutcome, ToneTrack};
    use async_trait::async_trait;

    struct ToneOnly;

    #[async_trait]
    impl SourceLoader for ToneOnly {
        async fn resolve(&self, uri: &str) -> Result<LoadOutcome, SourceError> {
            match uri {
                "tone:long" => Ok(LoadOutcome::Track(Box::new(ToneTrack::new(
                    PcmFormat::default(),
                    440.0,
                    Some(600_000),
                    0.5,
                )))),
                "never" => std::future::pending().await,
                "broken" => Err(SourceError::LoadFailed("decoder exploded".into())),
                "empty" => Ok(LoadOutcome::Collection {
                    name: "empty".into(),
                    tracks: Vec::new(),
                }),
                other => Err(SourceError::NoMatches(other.to_string())),
            }
        }
    }

    fn track(uri: &str) -> Track {
        Track {
            id: 42,
            name: "test".into(),
            uri: uri.into(),
            duration_secs: 600,
            owner_id: 1,
            shared_with: Vec::new(),
        }
    }

    fn session(load_timeout_ms: u64) -> Arc<BoardSession> {
        let config = SessionConfig {
            load_timeout_ms,
            ..SessionConfig::default()
        };
        Arc::new(BoardSession::new(
            1,
            PcmFormat::default(),
            config,
            &CancellationToken::new(),
            TaskTracker::new(),
        ))
    }

    #[tokio::test]
    async fn test_play_pause_resume_stop() {
        let session = session(1000);
        let state = session
            .load_and_play(&track("tone:long"), PlaybackWindow::default(), &ToneOnly)
            .await
            .unwrap();
        assert_eq!(state.status, PlaybackStatus::Playing);
        assert_eq!(state.track_id, Some(42));
        assert!(session.is_loop_running());

        assert!(matches!(session.resume().await, Err(PlaybackError::Conflict(_))));
        assert_eq!(session.pause().await.unwrap().status, PlaybackStatus::Paused);
        assert!(matches!(session.pause().await, Err(PlaybackError::Conflict(_))));
        assert_eq!(session.resume().await.unwrap().status, PlaybackStatus::Playing);

        let state = session.stop().await.unwrap();
        assert_eq!(state.status, PlaybackStatus::Stopped);
        assert_eq!(state.track_id, None);
        assert!(session.frames().is_empty());
        assert!(matches!(session.stop().await, Err(PlaybackError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_load_failures_set_error() {
        let session = session(50);

        let err = session
            .load_and_play(&track("never"), PlaybackWindow::default(), &ToneOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::GatewayTimeout(_)));
        assert_eq!(session.status(), PlaybackStatus::Error);

        let err = session
            .load_and_play(&track("broken"), PlaybackWindow::default(), &ToneOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::BadGateway(_)));

        let err = session
            .load_and_play(&track("missing"), PlaybackWindow::default(), &ToneOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::NotFound(_)));

        let err = session
            .load_and_play(&track("empty"), PlaybackWindow::default(), &ToneOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::NotFound(_)));
        assert_eq!(session.status(), PlaybackStatus::Error);

        // ERROR can be stopped back to STOPPED
        assert_eq!(session.stop().await.unwrap().status, PlaybackStatus::Stopped);
    }

    #[tokio::test]
    async fn test_dropped_play_leaves_error() {
        let session = session(10_000);
        let play = {
            let session = session.clone();
            tokio::spawn(async move {
                let _ = session
                    .load_and_play(&track("never"), PlaybackWindow::default(), &ToneOnly)
                    .await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.status(), PlaybackStatus::Buffering);

        play.abort();
        let _ = play.await;
        assert_eq!(session.status(), PlaybackStatus::Error);
    }

    #[tokio::test]
    async fn test_events_drive_transitions() {
        let session = session(1000);
        session
            .load_and_play(&track("tone:long"), PlaybackWindow::default(), &ToneOnly)
            .await
            .unwrap();

        session.handle_event(ProducerEvent::TrackStuck { threshold_ms: 10 });
        assert_eq!(session.status(), PlaybackStatus::Error);

        session.handle_event(ProducerEvent::TrackEnded {
            reason: EndReason::Replaced,
        });
        assert_eq!(session.status(), PlaybackStatus::Error);

        session.handle_event(ProducerEvent::TrackEnded {
            reason: EndReason::Finished,
        });
        let state = session.snapshot();
        assert_eq!(state.status, PlaybackStatus::Stopped);
        assert_eq!(state.track_id, None);
    }

    #[tokio::test]
    async fn test_seek_requires_track() {
        let session = session(1000);
        assert!(matches!(session.seek(5).await, Err(PlaybackError::Conflict(_))));

        session
            .load_and_play(&track("tone:long"), PlaybackWindow::default(), &ToneOnly)
            .await
            .unwrap();
        let state = session.seek(120).await.unwrap();
        assert!(state.position_s.unwrap() >= 120);
    }

    #[tokio::test]
    async fn test_seek_past_the_end_finishes_track() {
        let session = session(1000);
        session
            .load_and_play(&track("tone:long"), PlaybackWindow::default(), &ToneOnly)
            .await
            .unwrap();

        let state = session.seek(u64::MAX).await.unwrap();
        assert_ne!(state.status, PlaybackStatus::Error);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while session.status() != PlaybackStatus::Stopped {
            assert!(tokio::time::Instant::now() < deadline, "track did not finish");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(session.snapshot().track_id, None);
    }

    #[test]
    fn test_single_stream_slot() {
        let session = session(1000);
        let (first, _token) = session.claim_stream().unwrap();
        assert!(session.is_streaming());
        assert!(matches!(session.claim_stream(), Err(PlaybackError::Conflict(_))));

        // A stale id cannot free the slot
        assert!(!session.release_stream(first + 100));
        assert!(session.release_stream(first));
        assert!(!session.is_streaming());

        let (second, token) = session.claim_stream().unwrap();
        assert_ne!(first, second);
        session.end_stream();
        assert!(token.is_cancelled());
        assert!(!session.release_stream(second));
    }
}
