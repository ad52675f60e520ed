//! Live transcoded stream of a board session

pub mod bridge;
pub mod transcoder;

pub use bridge::{open_stream, AudioStream, StreamStats};
pub use transcoder::{FfmpegTranscoder, Transcoder};
