//! Core types for the lofi-server.
//!
//! - [`GenerationRequest`]: A validated inbound generation call
//! - [`RawSampleBuffer`]: Model output owned by one request
//! - [`WavArtifact`]: The encoded result handed back to the caller

mod artifact;
mod request;

pub use artifact::{
    artifact_file_name, content_disposition, sanitize_prompt, ArtifactMode, ArtifactPayload,
    CleanupGuard, TransientArtifact, WavArtifact,
};
pub use request::{GenerationRequest, RawSampleBuffer, DEFAULT_DURATION_SEC, MAX_PROMPT_CHARS};
