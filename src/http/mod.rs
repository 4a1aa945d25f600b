//! HTTP surface of the service.
//!
//! - `GET /generate_music?prompt=...&duration=...&seed=...` returns a WAV file
//! - `GET /health` reports model and queue state

pub mod handlers;
pub mod server;
pub mod types;

pub use server::{build_router, run_server, serve, shutdown_signal, AppState, PreloadStatus};
pub use types::{ErrorBody, ErrorDetail, GenerateQuery, HealthResponse};
