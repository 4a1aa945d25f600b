//! Generation pipeline.
//!
//! Turns a validated request into a normalized sample buffer: resolves the
//! seed, applies the duration multiplier and prompt prefix, calls the
//! generator with per-call parameters, and normalizes the result.

use tracing::{debug, warn};

use crate::audio::{normalize, NormalizationStrategy, DEFAULT_HEADROOM};
use crate::config::ServerConfig;
use crate::error::{Result, ServiceError};
use crate::models::{GenerationParams, Generator};
use crate::types::{GenerationRequest, RawSampleBuffer};

/// Post-request policy applied around every generator call.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Factor applied to the requested duration before it reaches the model.
    pub duration_multiplier: f32,
    /// Normalization applied to the raw model output.
    pub normalization: NormalizationStrategy,
    /// Keywords prepended to every prompt.
    pub prompt_prefix: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            duration_multiplier: 1.0,
            normalization: NormalizationStrategy::PeakHeadroom(DEFAULT_HEADROOM),
            prompt_prefix: Some("lo-fi".to_string()),
            temperature: 1.0,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            duration_multiplier: config.duration_multiplier,
            normalization: config.normalization,
            prompt_prefix: config.prompt_prefix.clone(),
            temperature: config.temperature,
        }
    }

    /// Prompt as sent to the model, with the prefix applied once.
    pub fn model_prompt(&self, prompt: &str) -> String {
        match self.prompt_prefix.as_deref().map(str::trim) {
            Some(prefix)
                if !prefix.is_empty()
                    && !prompt.to_lowercase().starts_with(&prefix.to_lowercase()) =>
            {
                format!("{} {}", prefix, prompt)
            }
            _ => prompt.to_string(),
        }
    }
}

/// Generates and normalizes audio for `request`.
///
/// The seed actually used is returned on the buffer, whether the caller
/// supplied it or it was drawn here. A failure the generator marks as
/// retryable is retried once.
pub fn generate(
    generator: &dyn Generator,
    request: &GenerationRequest,
    settings: &PipelineSettings,
) -> Result<RawSampleBuffer> {
    let seed = request.seed.unwrap_or_else(rand::random);
    let params = GenerationParams {
        duration_sec: request.duration_sec as f32 * settings.duration_multiplier,
        seed,
        temperature: settings.temperature,
    };
    let prompt = settings.model_prompt(&request.prompt);

    debug!(prompt = %prompt, seed, duration_sec = params.duration_sec, "invoking generator");

    let mut samples = match generator.generate(&prompt, &params) {
        Err(e) if e.retryable => {
            warn!(error = %e, "transient generation failure, retrying once");
            generator.generate(&prompt, &params)?
        }
        result => result?,
    };

    if samples.is_empty() {
        return Err(ServiceError::generation_failed("model returned no audio"));
    }

    let mut non_finite = 0usize;
    for sample in samples.iter_mut().filter(|s| !s.is_finite()) {
        *sample = 0.0;
        non_finite += 1;
    }
    if non_finite > 0 {
        warn!(non_finite, "replaced non-finite samples with silence");
    }

    normalize(&mut samples, settings.normalization);

    Ok(RawSampleBuffer {
        samples,
        sample_rate: generator.sample_rate(),
        seed,
    })
}
