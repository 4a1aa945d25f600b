//! Generator abstraction.
//!
//! The music model is a black box behind the [`Generator`] trait. Every
//! generation parameter travels with the call in [`GenerationParams`]; a
//! generator never holds per-request configuration, so concurrent calls on
//! one shared handle cannot leak duration or temperature into each other.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Device;
use crate::error::Result;

/// Model capacity variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    /// Fastest variant.
    #[default]
    Small,
    /// Richer output, slower generation.
    Medium,
}

impl ModelSize {
    /// Returns the string representation of the size.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
        }
    }

    /// Parses a size from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "small" | "s" => Some(ModelSize::Small),
            "medium" | "m" => Some(ModelSize::Medium),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-call generation parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    /// Length of audio to produce, after the duration multiplier.
    pub duration_sec: f32,
    /// Seed for every randomness source used by the call.
    pub seed: u64,
    /// Sampling temperature.
    pub temperature: f32,
}

/// A loaded, ready-to-use music generator.
pub trait Generator: Send + Sync {
    /// Native sample rate of generated audio.
    fn sample_rate(&self) -> u32;

    /// Version string of the loaded weights.
    fn version(&self) -> &str;

    /// Generates mono samples for `prompt`.
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<Vec<f32>>;
}

/// Shared, immutable handle to the loaded generator.
pub type ModelHandle = Arc<dyn Generator>;

/// Constructs generators from optional checkpoint weights.
pub trait GeneratorFactory: Send + Sync {
    /// Instantiates the base generator and applies `checkpoint` if given.
    fn build(&self, checkpoint: Option<&Path>, device: Device, size: ModelSize)
        -> Result<ModelHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_size_parsing() {
        assert_eq!(ModelSize::parse("small"), Some(ModelSize::Small));
        assert_eq!(ModelSize::parse("MEDIUM"), Some(ModelSize::Medium));
        assert_eq!(ModelSize::parse("large"), None);
        assert_eq!(ModelSize::default(), ModelSize::Small);
        assert_eq!(ModelSize::Medium.to_string(), "medium");
    }
}
