//! Loop worker: moves frames from the producer into the session's PCM queue
//!
//! One worker per session at most, paced roughly to real time. It only ever
//! sleeps for short bounded intervals and exits as soon as its cancellation
//! token fires. Each poll runs on the blocking pool since sources may read
//! from disk.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::audio::Provide;
use crate::session::board::BoardSession;

/// What one poll of the producer amounted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopStep {
    /// No track loaded
    Idle,
    /// Track loaded but no frame available
    NotReady,
    /// One frame pushed into the queue
    Produced,
}

/// Run a single poll cycle against `session`
pub(crate) fn step(session: &BoardSession) -> LoopStep {
    let producer = session.producer();
    let Some(position_ms) = producer.position_ms() else {
        return LoopStep::Idle;
    };

    if let Some(end_s) = session.window().end_s {
        if position_ms >= end_s.saturating_mul(1000) {
            debug!(board_id = session.board_id(), end_s, "Window end reached");
            if let Some(event) = producer.stop_track() {
                session.handle_event(event);
            }
            return LoopStep::Idle;
        }
    }

    match producer.provide(session.frames()) {
        Provide::Delivered {
            timecode_ms,
            evicted,
        } => {
            if evicted {
                trace!(
                    board_id = session.board_id(),
                    timecode_ms,
                    "PCM queue full, dropped oldest frame"
                );
            }
            LoopStep::Produced
        }
        Provide::NotReady => LoopStep::NotReady,
        Provide::Event(event) => {
            session.handle_event(event);
            LoopStep::NotReady
        }
    }
}

/// Clears the session's run flag however the worker exits
struct RunningGuard(Arc<BoardSession>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.clear_loop_running();
    }
}

pub(crate) async fn run(session: Arc<BoardSession>, cancel: CancellationToken) {
    let board_id = session.board_id();
    debug!(board_id, "Loop worker started");
    let _running = RunningGuard(session.clone());

    let config = session.config().clone();
    let (idle, pending, interval) = (
        config.idle_poll(),
        config.pending_poll(),
        config.frame_interval(),
    );

    while !cancel.is_cancelled() {
        let polled = {
            let session = session.clone();
            tokio::task::spawn_blocking(move || step(&session)).await
        };
        let pause = match polled {
            Ok(LoopStep::Idle) => idle,
            Ok(LoopStep::NotReady) => pending,
            Ok(LoopStep::Produced) => interval,
            Err(e) => {
                error!(board_id, "Loop step failed: {}", e);
                break;
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }

    debug!(board_id, "Loop worker exited");
}
