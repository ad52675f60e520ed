//! HTTP API

pub mod handlers;
pub mod server;

pub use handlers::{ApiError, ApiResponse, Caller};
pub use server::{AppState, WebServer};
