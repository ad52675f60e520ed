//! External transcoder process
//!
//! Reads raw s16le PCM on stdin and writes a compressed, streamable format on
//! stdout.

use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::audio::PcmFormat;
use crate::config::TranscoderConfig;
use crate::error::TranscodeError;

/// Spawns one transcoder process per stream
pub trait Transcoder: Send + Sync {
    /// Content type of the bytes written on stdout
    fn content_type(&self) -> &str;

    /// Start a process reading `format` PCM with stdin and stdout piped
    fn spawn(&self, format: PcmFormat) -> Result<Child, TranscodeError>;
}

/// ffmpeg configured from [`TranscoderConfig`]
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    config: TranscoderConfig,
}

impl FfmpegTranscoder {
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    /// Command-line arguments for input in `format`
    pub fn args(&self, format: PcmFormat) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "s16le".into(),
            "-ar".into(),
            format.sample_rate.to_string(),
            "-ac".into(),
            format.channels.to_string(),
            "-i".into(),
            "pipe:0".into(),
            "-f".into(),
            self.config.output_format.clone(),
            "-codec:a".into(),
            self.config.codec.clone(),
            "-b:a".into(),
            self.config.bitrate.clone(),
            "pipe:1".into(),
        ]
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new(TranscoderConfig::default())
    }
}

impl Transcoder for FfmpegTranscoder {
    fn content_type(&self) -> &str {
        &self.config.content_type
    }

    fn spawn(&self, format: PcmFormat) -> Result<Child, TranscodeError> {
        let args = self.args(format);
        debug!(program = %self.config.program, ?args, "Spawning transcoder");

        Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::Spawn {
                program: self.config.program.clone(),
                source,
            })
    }
}
