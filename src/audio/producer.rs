//! Pull-based frame producer
//!
//! Wraps the currently loaded [`AudioTrack`] and hands out one PCM frame per
//! call. Lifecycle changes are returned to the caller as [`ProducerEvent`]s
//! instead of being pushed through callbacks, so the owning session applies
//! them through a single transition function.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::audio::buffer::{PcmFrame, PcmRingBuffer};
use crate::audio::format::PcmFormat;
use crate::error::SourceError;
use crate::source::{BoxedTrack, FrameRead, TrackInfo};

/// Why a track stopped producing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Played to the end
    Finished,
    /// Stopped explicitly (control call or window end)
    Stopped,
    /// Another track was started in its place
    Replaced,
}

impl EndReason {
    /// Whether this end moves the session back to STOPPED
    pub fn ends_playback(&self) -> bool {
        !matches!(self, EndReason::Replaced)
    }
}

/// Producer lifecycle notification
#[derive(Debug, Clone, PartialEq)]
pub enum ProducerEvent {
    TrackStarted { title: String, uri: String },
    TrackEnded { reason: EndReason },
    TrackStuck { threshold_ms: u64 },
    TrackException { message: String },
    Paused,
    Resumed,
}

/// Outcome of a single [`FrameProducer::provide`] call
#[derive(Debug, PartialEq)]
pub enum Provide {
    /// A frame was pushed into the sink
    Delivered { timecode_ms: u64, evicted: bool },
    NotReady,
    Event(ProducerEvent),
}

struct ProducerInner {
    track: Option<BoxedTrack>,
    pending_since: Option<Instant>,
    stuck_reported: bool,
}

/// Frame producer for one board session
pub struct FrameProducer {
    format: PcmFormat,
    stuck_threshold: Duration,
    inner: Mutex<ProducerInner>,
    paused: AtomicBool,
}

impl FrameProducer {
    pub fn new(format: PcmFormat, stuck_threshold: Duration) -> Self {
        Self {
            format,
            stuck_threshold,
            inner: Mutex::new(ProducerInner {
                track: None,
                pending_since: None,
                stuck_reported: false,
            }),
            paused: AtomicBool::new(false),
        }
    }

    /// Format of every frame this producer emits
    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Start playing `track`, replacing any current one
    pub fn play_track(&self, track: BoxedTrack) -> Vec<ProducerEvent> {
        let mut events = Vec::with_capacity(2);
        let info = track.info().clone();

        let mut inner = self.inner.lock();
        if inner.track.replace(track).is_some() {
            events.push(ProducerEvent::TrackEnded {
                reason: EndReason::Replaced,
            });
        }
        inner.pending_since = None;
        inner.stuck_reported = false;
        self.paused.store(false, Ordering::SeqCst);

        events.push(ProducerEvent::TrackStarted {
            title: info.title,
            uri: info.uri,
        });
        events
    }

    /// Stop and drop the current track
    pub fn stop_track(&self) -> Option<ProducerEvent> {
        let mut inner = self.inner.lock();
        inner.pending_since = None;
        inner.track.take().map(|_| ProducerEvent::TrackEnded {
            reason: EndReason::Stopped,
        })
    }

    /// Pause or resume. Returns an event only when the flag actually changed.
    pub fn set_paused(&self, paused: bool) -> Option<ProducerEvent> {
        if self.paused.swap(paused, Ordering::SeqCst) == paused {
            return None;
        }
        if !paused {
            self.inner.lock().pending_since = None;
        }
        Some(if paused {
            ProducerEvent::Paused
        } else {
            ProducerEvent::Resumed
        })
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn has_track(&self) -> bool {
        self.inner.lock().track.is_some()
    }

    pub fn track_info(&self) -> Option<TrackInfo> {
        self.inner.lock().track.as_ref().map(|t| t.info().clone())
    }

    /// Position of the current track, if one is loaded
    pub fn position_ms(&self) -> Option<u64> {
        self.inner.lock().track.as_ref().map(|t| t.position_ms())
    }

    /// Reposition the current track.
    ///
    /// Returns `Ok(false)` when no track is loaded or it cannot seek.
    pub fn seek(&self, position_ms: u64) -> Result<bool, SourceError> {
        let mut inner = self.inner.lock();
        match inner.track.as_mut() {
            Some(track) if track.is_seekable() => {
                track.seek(position_ms)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Pull one frame from the current track into `sink`.
    ///
    /// The push happens under the producer lock, so once `stop_track`
    /// returns no frame of the stopped track can still reach the sink.
    pub fn provide(&self, sink: &PcmRingBuffer) -> Provide {
        let mut inner = self.inner.lock();
        if self.paused.load(Ordering::SeqCst) {
            return Provide::NotReady;
        }
        let Some(track) = inner.track.as_mut() else {
            return Provide::NotReady;
        };

        let timecode_ms = track.position_ms();
        match track.read_frame() {
            Ok(FrameRead::Frame(data)) => {
                inner.pending_since = None;
                inner.stuck_reported = false;
                let evicted = sink.push(PcmFrame::new(data, timecode_ms)).is_some();
                Provide::Delivered {
                    timecode_ms,
                    evicted,
                }
            }
            Ok(FrameRead::Pending) => {
                let since = *inner.pending_since.get_or_insert_with(Instant::now);
                if !inner.stuck_reported && since.elapsed() >= self.stuck_threshold {
                    inner.stuck_reported = true;
                    Provide::Event(ProducerEvent::TrackStuck {
                        threshold_ms: self.stuck_threshold.as_millis() as u64,
                    })
                } else {
                    Provide::NotReady
                }
            }
            Ok(FrameRead::End) => {
                inner.track = None;
                Provide::Event(ProducerEvent::TrackEnded {
                    reason: EndReason::Finished,
                })
            }
            Err(e) => {
                inner.track = None;
                Provide::Event(ProducerEvent::TrackException {
                    message: e.to_string(),
                })
            }
        }
    }
}
