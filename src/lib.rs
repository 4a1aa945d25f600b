//! lofi-server: lo-fi music generation behind a small HTTP API.
//!
//! The model is loaded once per process (optionally from a cached,
//! checksum-verified checkpoint), requests run on a bounded worker queue, and
//! the output is normalized, dithered and encoded as 16-bit mono WAV.
//!
//! # Modules
//!
//! - [`audio`]: Normalization, dithered WAV encoding, resampling, loop extension
//! - [`models`]: Generator trait, checkpoint fetcher, lazy model loader
//! - [`generation`]: Generation pipeline, request handler, worker queue
//! - [`http`]: `/generate_music` and `/health` routes
//! - [`client`]: Tag-based prompt builder and remote client
//! - [`types`]: Requests, sample buffers and WAV artifacts
//! - [`config`]: Runtime configuration (ServerConfig, Device)
//! - [`error`]: Error types and codes (ServiceError, ErrorCode)
//!
//! # Environment
//!
//! | Variable | Default |
//! |---|---|
//! | `LOFI_HOST` / `LOFI_PORT` | `0.0.0.0` / `8000` |
//! | `LOFI_DEVICE` | `auto` (`cpu`, `cuda`, `metal`) |
//! | `LOFI_MODEL_SIZE` | `small` |
//! | `LOFI_CHECKPOINT_BUCKET` / `LOFI_CHECKPOINT_BLOB` | unset (built-in weights) |
//! | `LOFI_CHECKPOINT_ENDPOINT` / `LOFI_CHECKPOINT_SHA256` | public storage endpoint / unset |
//! | `LOFI_CHECKPOINT_DIR` / `LOFI_OUTPUT_DIR` | platform cache dirs |
//! | `LOFI_DURATION_MULTIPLIER` | `1.0` |
//! | `LOFI_MAX_DURATION` | `30` |
//! | `LOFI_SAMPLE_RATE` | `32000` (`48000`) |
//! | `LOFI_NORMALIZATION` / `LOFI_HEADROOM` | `peak_headroom` / `0.95` |
//! | `LOFI_DITHER` | `triangular` |
//! | `LOFI_ARTIFACT_MODE` | `disk` |
//! | `LOFI_PROMPT_PREFIX` | `lo-fi` |
//! | `LOFI_TEMPERATURE` | `1.0` |
//! | `LOFI_PRELOAD` | `true` |
//! | `LOFI_WORKERS` / `LOFI_QUEUE_CAPACITY` | `1` / `10` |
//! | `LOFI_REQUEST_TIMEOUT` / `LOFI_FETCH_RETRIES` | `300` / `3` |
//!
//! Logging is controlled with `RUST_LOG`.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lofi_server::{
//!     config::ServerConfig,
//!     generation::RequestHandler,
//!     models::ModelLoader,
//!     types::{ArtifactMode, GenerationRequest},
//! };
//!
//! let config = ServerConfig {
//!     artifact_mode: ArtifactMode::Memory,
//!     ..Default::default()
//! };
//! let loader = Arc::new(ModelLoader::from_config(&config)?);
//! let handler = RequestHandler::from_config(&config, loader)?;
//!
//! let request = GenerationRequest::new("rainy night jazz", 10, Some(42), config.max_duration_sec)?;
//! let artifact = handler.handle(&request)?;
//! ```

pub mod audio;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod generation;
pub mod http;
pub mod models;
pub mod types;

// Re-export commonly used types at crate root for convenience
pub use config::{Device, ServerConfig};
pub use error::{ErrorCode, Result, ServiceError};
pub use types::{ArtifactMode, GenerationRequest, RawSampleBuffer, WavArtifact};
