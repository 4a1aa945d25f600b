//! Audio generation module.
//!
//! Provides the generation pipeline, the per-request handler that wraps it
//! with model loading and encoding, and the bounded worker queue that runs it.

pub mod handler;
pub mod pipeline;
pub mod queue;

pub use handler::RequestHandler;
pub use pipeline::{generate, PipelineSettings};
pub use queue::{GenerationQueue, Ticket, DEFAULT_QUEUE_CAPACITY};
