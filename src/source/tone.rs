//! Synthetic sine tone source
//!
//! `tone:<frequency>[?duration=<seconds>&amplitude=<0..1>]`. Without a
//! duration the tone behaves like an endless live stream.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::f64::consts::TAU;

use super::{split_query, AudioTrack, FrameRead, LoadOutcome, SourceLoader, TrackInfo};
use crate::audio::PcmFormat;
use crate::error::SourceError;

const DEFAULT_AMPLITUDE: f64 = 0.25;

/// Generated sine wave track
pub struct ToneTrack {
    info: TrackInfo,
    format: PcmFormat,
    frequency: f64,
    amplitude: f64,
    /// Sample index (per channel) of the next frame
    cursor: u64,
    total_samples: Option<u64>,
}

impl ToneTrack {
    pub fn new(
        format: PcmFormat,
        frequency: f64,
        duration_ms: Option<u64>,
        amplitude: f64,
    ) -> Self {
        let total_samples = duration_ms.map(|ms| samples_at(ms, format.sample_rate));
        Self {
            info: TrackInfo {
                title: format!("{} Hz tone", frequency),
                uri: format!("tone:{}", frequency),
                duration_ms,
                is_stream: duration_ms.is_none(),
            },
            format,
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
            cursor: 0,
            total_samples,
        }
    }

    fn parse(format: PcmFormat, uri: &str) -> Result<Self, SourceError> {
        let (scheme, rest) = uri
            .split_once(':')
            .ok_or_else(|| SourceError::NoMatches(uri.to_string()))?;
        if !scheme.eq_ignore_ascii_case("tone") {
            return Err(SourceError::UnsupportedScheme(scheme.to_string()));
        }
        let (freq, query) = split_query(rest);

        let frequency: f64 = freq
            .parse()
            .map_err(|_| SourceError::NoMatches(uri.to_string()))?;
        if !(frequency > 0.0 && frequency < format.sample_rate as f64 / 2.0) {
            return Err(SourceError::LoadFailed(format!(
                "tone frequency {} out of range",
                frequency
            )));
        }

        let mut duration_ms = None;
        let mut amplitude = DEFAULT_AMPLITUDE;
        for (key, value) in query {
            match key {
                "duration" => {
                    let secs: f64 = value.parse().map_err(|_| {
                        SourceError::LoadFailed(format!("invalid tone duration {:?}", value))
                    })?;
                    duration_ms = Some((secs.max(0.0) * 1000.0) as u64);
                }
                "amplitude" => {
                    amplitude = value.parse().map_err(|_| {
                        SourceError::LoadFailed(format!("invalid tone amplitude {:?}", value))
                    })?;
                }
                _ => {}
            }
        }

        let mut track = Self::new(format, frequency, duration_ms, amplitude);
        track.info.uri = uri.to_string();
        Ok(track)
    }
}

impl AudioTrack for ToneTrack {
    fn info(&self) -> &TrackInfo {
        &self.info
    }

    fn read_frame(&mut self) -> Result<FrameRead, SourceError> {
        let mut samples = self.format.samples_per_frame() as u64;
        if let Some(total) = self.total_samples {
            if self.cursor >= total {
                return Ok(FrameRead::End);
            }
            samples = samples.min(total - self.cursor);
        }

        let channels = self.format.channels as usize;
        let rate = self.format.sample_rate as f64;
        let mut buf = BytesMut::with_capacity(samples as usize * channels * 2);
        for i in 0..samples {
            let t = self.cursor.saturating_add(i) as f64 / rate;
            let value = (TAU * self.frequency * t).sin() * self.amplitude * i16::MAX as f64;
            let sample = value as i16;
            for _ in 0..channels {
                buf.put_i16_le(sample);
            }
        }
        self.cursor = self.cursor.saturating_add(samples);

        Ok(FrameRead::Frame(buf.freeze()))
    }

    fn position_ms(&self) -> u64 {
        (self.cursor as u128 * 1000 / self.format.sample_rate as u128) as u64
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn seek(&mut self, position_ms: u64) -> Result<(), SourceError> {
        let target = samples_at(position_ms, self.format.sample_rate);
        self.cursor = match self.total_samples {
            Some(total) => target.min(total),
            None => target,
        };
        Ok(())
    }
}

/// Per-channel sample index at `position_ms`, saturating
fn samples_at(position_ms: u64, sample_rate: u32) -> u64 {
    let samples = position_ms as u128 * sample_rate as u128 / 1000;
    u64::try_from(samples).unwrap_or(u64::MAX)
}

/// Loader for `tone:` URIs
pub struct ToneLoader {
    format: PcmFormat,
}

impl ToneLoader {
    pub fn new(format: PcmFormat) -> Self {
        Self { format }
    }
}

#[async_trait]
impl SourceLoader for ToneLoader {
    async fn resolve(&self, uri: &str) -> Result<LoadOutcome, SourceError> {
        let track = ToneTrack::parse(self.format, uri)?;
        Ok(LoadOutcome::Track(Box::new(track)))
    }
}
