//! Board sessions: state machine, loop worker and the registry holding them

pub mod board;
pub mod registry;
pub mod state;
pub(crate) mod worker;

pub use board::BoardSession;
pub use registry::SessionRegistry;
pub use state::{PlayRequest, PlaybackState, PlaybackStatus, PlaybackWindow, SeekRequest};
