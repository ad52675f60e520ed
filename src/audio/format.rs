//! Fixed PCM frame format (signed 16-bit little endian, interleaved)

use serde::{Deserialize, Serialize};

/// Bytes per sample for s16le
pub const BYTES_PER_SAMPLE: usize = 2;

/// Format of every frame a producer emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_duration_ms: u32,
}

impl PcmFormat {
    pub fn new(sample_rate: u32, channels: u16, frame_duration_ms: u32) -> Self {
        Self {
            sample_rate,
            channels,
            frame_duration_ms,
        }
    }

    /// Samples per channel in one frame
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate as u64 * self.frame_duration_ms as u64 / 1000) as usize
    }

    /// Size of one frame in bytes
    pub fn frame_bytes(&self) -> usize {
        self.samples_per_frame() * self.channels as usize * BYTES_PER_SAMPLE
    }

    /// Bytes per second of audio
    pub fn byte_rate(&self) -> u64 {
        self.sample_rate as u64 * self.channels as u64 * BYTES_PER_SAMPLE as u64
    }

    /// Byte offset of a position in milliseconds, aligned to a sample boundary
    pub fn byte_offset(&self, position_ms: u64) -> u64 {
        let block = (self.channels as usize * BYTES_PER_SAMPLE) as u64;
        let raw = position_ms.saturating_mul(self.byte_rate()) / 1000;
        raw - raw % block
    }

    /// Duration in milliseconds covered by a byte count
    pub fn duration_ms(&self, bytes: u64) -> u64 {
        bytes * 1000 / self.byte_rate()
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::new(
            crate::constants::DEFAULT_SAMPLE_RATE,
            crate::constants::DEFAULT_CHANNELS,
            crate::constants::DEFAULT_FRAME_DURATION_MS,
        )
    }
}
