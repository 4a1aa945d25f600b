//! Generation request and raw sample buffer types.
//!
//! A GenerationRequest is created per inbound call, validated before any
//! model work happens, and discarded once the response is sent.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

/// Maximum prompt length in characters.
pub const MAX_PROMPT_CHARS: usize = 1000;

/// Duration used when the caller does not pass one.
pub const DEFAULT_DURATION_SEC: u32 = 10;

/// A validated request for music generation.
///
/// Immutable once constructed: the prompt is non-empty and trimmed, and the
/// duration lies within `1..=max_duration_sec` of the server that built it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Text description of the desired music.
    pub prompt: String,

    /// Requested audio duration in whole seconds.
    pub duration_sec: u32,

    /// Seed for reproducible generation. If None, one is drawn at random.
    pub seed: Option<u64>,
}

impl GenerationRequest {
    /// Validates the inputs and builds a request.
    ///
    /// Duration is taken as a signed value so that negative inputs are
    /// rejected here with a specific message instead of failing to parse.
    pub fn new(
        prompt: &str,
        duration_sec: i64,
        seed: Option<u64>,
        max_duration_sec: u32,
    ) -> Result<Self> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ServiceError::empty_prompt());
        }

        let chars = prompt.chars().count();
        if chars > MAX_PROMPT_CHARS {
            return Err(ServiceError::prompt_too_long(chars, MAX_PROMPT_CHARS));
        }

        if duration_sec <= 0 || duration_sec > i64::from(max_duration_sec) {
            return Err(ServiceError::invalid_duration(duration_sec, max_duration_sec));
        }

        Ok(Self {
            prompt: prompt.to_string(),
            duration_sec: duration_sec as u32,
            seed,
        })
    }

    /// Builds a request from raw query-string values.
    ///
    /// A missing duration falls back to [`DEFAULT_DURATION_SEC`]; a missing
    /// prompt is treated as empty.
    pub fn from_raw(
        prompt: Option<&str>,
        duration: Option<&str>,
        seed: Option<&str>,
        max_duration_sec: u32,
    ) -> Result<Self> {
        let duration_sec = match duration.map(str::trim) {
            None | Some("") => i64::from(DEFAULT_DURATION_SEC),
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| ServiceError::unparsable_duration(raw))?,
        };

        let seed = match seed.map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                raw.parse::<u64>()
                    .map_err(|_| ServiceError::invalid_seed(raw))?,
            ),
        };

        Self::new(prompt.unwrap_or(""), duration_sec, seed, max_duration_sec)
    }
}

/// Floating-point samples produced by one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSampleBuffer {
    /// Mono samples, normalized once the pipeline is done with them.
    pub samples: Vec<f32>,
    /// Native sample rate of the generator that produced them.
    pub sample_rate: u32,
    /// Seed that was actually used for generation.
    pub seed: u64,
}

impl RawSampleBuffer {
    /// Returns the buffer duration in seconds.
    pub fn duration_sec(&self) -> f32 {
        crate::audio::samples_to_duration(self.samples.len(), self.sample_rate)
    }

    /// Returns true if every sample is exactly zero.
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|s| *s == 0.0)
    }
}
