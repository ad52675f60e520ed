//! Error types for the playback service

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Conditions surfaced to callers of the playback operations.
///
/// Each variant maps to one stable HTTP status in the API layer; none of
/// them is ever folded into another.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    GatewayTimeout(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    Internal(String),
}

impl PlaybackError {
    /// The generic conflict raised for actions that do not fit the current state
    pub fn invalid_state() -> Self {
        Self::Conflict("Action not valid in current playback state".into())
    }

    /// Short machine-readable name of the condition
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::BadRequest(_) => "bad_request",
            Self::GatewayTimeout(_) => "gateway_timeout",
            Self::BadGateway(_) => "bad_gateway",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Track source errors
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("No matches for: {0}")]
    NoMatches(String),

    #[error("Failed to load track: {0}")]
    LoadFailed(String),

    #[error("Unsupported source scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Track does not support seeking")]
    SeekUnsupported,

    #[error("Source IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transcoder subprocess errors
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transcoder {0} pipe unavailable")]
    MissingPipe(&'static str),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_error_display_is_message() {
        let err = PlaybackError::Conflict("Stream already active for this board".into());
        assert_eq!(err.to_string(), "Stream already active for this board");
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn test_wraps_into_top_level() {
        let err: Error = PlaybackError::invalid_state().into();
        assert!(matches!(err, Error::Playback(PlaybackError::Conflict(_))));
    }
}
