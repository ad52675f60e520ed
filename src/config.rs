//! Application configuration
//!
//! Loaded from TOML. Every section has defaults so a missing or partial file
//! still yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::PcmFormat;
use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub session: SessionConfig,
    pub transcoder: TranscoderConfig,
    pub catalog: CatalogConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.http_port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid bind address: {}", e)))
    }
}

/// PCM format produced by the frame producer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_duration_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frame_duration_ms: DEFAULT_FRAME_DURATION_MS,
        }
    }
}

impl AudioConfig {
    pub fn pcm_format(&self) -> PcmFormat {
        PcmFormat::new(self.sample_rate, self.channels, self.frame_duration_ms)
    }
}

/// Board session timing and buffering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub queue_capacity: usize,
    pub load_timeout_ms: u64,
    pub idle_poll_ms: u64,
    pub pending_poll_ms: u64,
    pub frame_interval_ms: u64,
    pub feeder_poll_ms: u64,
    pub stuck_threshold_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: PCM_QUEUE_CAPACITY,
            load_timeout_ms: LOAD_TIMEOUT_MS,
            idle_poll_ms: IDLE_POLL_MS,
            pending_poll_ms: PENDING_POLL_MS,
            frame_interval_ms: FRAME_INTERVAL_MS,
            feeder_poll_ms: FEEDER_POLL_MS,
            stuck_threshold_ms: STUCK_THRESHOLD_MS,
        }
    }
}

impl SessionConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn pending_poll(&self) -> Duration {
        Duration::from_millis(self.pending_poll_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn feeder_poll(&self) -> Duration {
        Duration::from_millis(self.feeder_poll_ms)
    }

    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_millis(self.stuck_threshold_ms)
    }
}

/// External transcoder invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    /// Executable name or path
    pub program: String,
    /// Container format passed to `-f`
    pub output_format: String,
    pub codec: String,
    pub bitrate: String,
    /// Content type of the HTTP stream
    pub content_type: String,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            output_format: "mp3".to_string(),
            codec: "libmp3lame".to_string(),
            bitrate: "192k".to_string(),
            content_type: "audio/mpeg".to_string(),
        }
    }
}

/// Board and track seed data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub seed_file: Option<PathBuf>,
}

impl AppConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Load from the platform config directory, falling back to defaults
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading configuration from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/config.toml` for this application
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "board-audio-streamer")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(Error::Config("audio.sample_rate must be positive".into()));
        }
        if !(1..=2).contains(&self.audio.channels) {
            return Err(Error::Config(format!(
                "audio.channels must be 1 or 2, got {}",
                self.audio.channels
            )));
        }
        if self.audio.frame_duration_ms == 0 {
            return Err(Error::Config("audio.frame_duration_ms must be positive".into()));
        }
        if self.session.queue_capacity == 0 {
            return Err(Error::Config("session.queue_capacity must be positive".into()));
        }
        if self.session.load_timeout_ms == 0 {
            return Err(Error::Config("session.load_timeout_ms must be positive".into()));
        }
        if self.transcoder.program.trim().is_empty() {
            return Err(Error::Config("transcoder.program is empty".into()));
        }
        Ok(())
    }
}
