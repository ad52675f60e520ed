//! Playback status and the request/response values around it

use serde::{Deserialize, Serialize};

use crate::catalog::{BoardId, TrackId};
use crate::error::PlaybackError;

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybackStatus {
    Stopped,
    Buffering,
    Playing,
    Paused,
    Error,
}

impl PlaybackStatus {
    /// No audio will flow until the next `play`
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlaybackStatus::Stopped | PlaybackStatus::Error)
    }

    /// A stream may be opened in this status
    pub fn is_streamable(&self) -> bool {
        matches!(self, PlaybackStatus::Playing | PlaybackStatus::Paused)
    }
}

impl std::fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PlaybackStatus::Stopped => "STOPPED",
            PlaybackStatus::Buffering => "BUFFERING",
            PlaybackStatus::Playing => "PLAYING",
            PlaybackStatus::Paused => "PAUSED",
            PlaybackStatus::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Snapshot of a board's playback, computed fresh on every read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub board_id: BoardId,
    pub status: PlaybackStatus,
    pub track_id: Option<TrackId>,
    pub window_start_s: Option<u64>,
    pub window_end_s: Option<u64>,
    pub position_s: Option<u64>,
}

impl PlaybackState {
    /// State reported for a board that never played
    pub fn stopped(board_id: BoardId) -> Self {
        Self {
            board_id,
            status: PlaybackStatus::Stopped,
            track_id: None,
            window_start_s: None,
            window_end_s: None,
            position_s: None,
        }
    }
}

/// Optional sub-range of a track, in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackWindow {
    pub start_s: Option<u64>,
    pub end_s: Option<u64>,
}

impl PlaybackWindow {
    pub fn new(start_s: Option<u64>, end_s: Option<u64>) -> Self {
        Self { start_s, end_s }
    }

    /// Check the bounds against a track of `duration_secs`
    pub fn validate(&self, duration_secs: u64) -> Result<(), PlaybackError> {
        if let (Some(start), Some(end)) = (self.start_s, self.end_s) {
            if start > end {
                return Err(PlaybackError::BadRequest(
                    "Window start must not be after window end".into(),
                ));
            }
        }
        for bound in [self.start_s, self.end_s].into_iter().flatten() {
            if bound > duration_secs {
                return Err(PlaybackError::BadRequest(
                    "Window must be within track duration".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Body of a play call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlayRequest {
    /// Explicit track; the board's selected track otherwise
    pub track_id: Option<TrackId>,
    pub window_start_s: Option<u64>,
    pub window_end_s: Option<u64>,
}

impl PlayRequest {
    pub fn track(track_id: TrackId) -> Self {
        Self {
            track_id: Some(track_id),
            ..Self::default()
        }
    }

    pub fn window(&self) -> PlaybackWindow {
        PlaybackWindow::new(self.window_start_s, self.window_end_s)
    }
}

/// Body of a seek call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekRequest {
    pub position_s: u64,
}
