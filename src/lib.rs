//! # Board Audio Streamer
//!
//! Per-board playback sessions with a live transcoded HTTP audio stream.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                     HTTP API (api::server / api::handlers)                  │
//! │   GET state   POST play/pause/resume/stop/seek            GET stream        │
//! └──────────────────────────────┬──────────────────────────────────┬──────────┘
//!                                │                                  │
//!                                ▼                                  │
//! ┌─────────────────────────────────────────────────────────────┐   │
//! │          Playback Orchestrator (playback::PlaybackService)  │   │
//! │     catalog lookup ─ access policy ─ session dispatch       │   │
//! └──────────────────────────────┬──────────────────────────────┘   │
//!                                ▼                                  │
//! ┌─────────────────────────────────────────────────────────────┐   │
//! │            Session Registry (session::registry)             │   │
//! │   board 1 ──► BoardSession   board 2 ──► BoardSession  ...  │   │
//! └──────────────────────────────┬──────────────────────────────┘   │
//!                                ▼                                  │
//! │  ┌────────────────┐   ┌──────────────┐   ┌──────────────────┐   │
//! │  │ Source Loader  │──►│FrameProducer │◄──│   Loop Worker    │   │
//! │  │ (source::*)    │   │(audio::prod.)│   │ (session::worker)│   │
//! │  └────────────────┘   └──────────────┘   └────────┬─────────┘   │
//! │                                                   │ drop-oldest │
//! │                                                   ▼             │
//! │                                         ┌──────────────────┐    │
//! │                                         │  PCM Ring Buffer │    │
//! │                                         │ (audio::buffer)  │    │
//! │                                         └────────┬─────────┘    │
//! │                                                  │ feeder       ▼
//! │                                         ┌──────────────────────────────┐
//! │                                         │ Stream Bridge (stream::*)    │
//! │                                         │ PCM ─► ffmpeg ─► pump ─► body │
//! │                                         └──────────────────────────────┘
//! ```

pub mod api;
pub mod audio;
pub mod catalog;
pub mod config;
pub mod error;
pub mod playback;
pub mod session;
pub mod source;
pub mod stream;

pub use error::{Error, PlaybackError, Result};
pub use playback::PlaybackService;

/// Application-wide constants
pub mod constants {
    /// Sample rate of the PCM frames handed to the transcoder
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Duration of a single PCM frame in milliseconds
    pub const DEFAULT_FRAME_DURATION_MS: u32 = 20;

    /// PCM queue capacity (in frames) per board session
    pub const PCM_QUEUE_CAPACITY: usize = 200;

    /// Upper bound on waiting for the source loader
    pub const LOAD_TIMEOUT_MS: u64 = 10_000;

    /// Loop worker sleep when no track is loaded
    pub const IDLE_POLL_MS: u64 = 20;

    /// Loop worker sleep when the producer has no frame ready
    pub const PENDING_POLL_MS: u64 = 10;

    /// Loop worker pacing after each produced frame
    pub const FRAME_INTERVAL_MS: u64 = 20;

    /// Feeder wait on an empty PCM queue
    pub const FEEDER_POLL_MS: u64 = 250;

    /// A track producing nothing for this long is reported stuck
    pub const STUCK_THRESHOLD_MS: u64 = 10_000;

    /// Capacity of the pipe between the transcoder and the HTTP body
    pub const STREAM_PIPE_CAPACITY: usize = 64 * 1024;

    /// Default HTTP port for the control API
    pub const DEFAULT_HTTP_PORT: u16 = 8080;
}
