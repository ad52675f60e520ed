//! Audio subsystem module
//!
//! PCM framing, the per-session frame queue and the pull-based producer that
//! feeds it.

pub mod buffer;
pub mod format;
pub mod producer;

pub use buffer::{PcmFrame, PcmRingBuffer};
pub use format::PcmFormat;
pub use producer::{EndReason, FrameProducer, ProducerEvent, Provide};
