//! Procedural lo-fi generator.
//!
//! A seeded chord-and-texture synthesizer that fills the [`Generator`] seam
//! without an ML runtime. Its checkpoint is a small JSON weights file that
//! sets the tempo range, the chord roots and the number of voices.

use std::f32::consts::TAU;
use std::path::Path;
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::backend::{GenerationParams, Generator, GeneratorFactory, ModelHandle, ModelSize};
use crate::config::{Device, SUPPORTED_SAMPLE_RATES};
use crate::error::{Result, ServiceError};

/// Maximum number of chord voices.
pub const MAX_VOICES: u32 = 8;

/// Frequency ratios stacked on a chord root (root, maj3, 5th, min7, 9th, ...).
const CHORD_RATIOS: &[f32] = &[1.0, 1.26, 1.5, 1.78, 2.24, 2.52, 3.0, 3.56];

/// Beats per chord change.
const BEATS_PER_BAR: f32 = 4.0;

/// Weights applied to the procedural generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProceduralWeights {
    /// Version reported by the loaded model.
    pub version: String,
    /// Native sample rate.
    pub sample_rate: u32,
    /// Inclusive tempo range in beats per minute.
    pub tempo_bpm: [f32; 2],
    /// Chord roots to draw progressions from.
    pub chord_roots_hz: Vec<f32>,
    /// Stacked chord voices.
    pub voices: u32,
}

impl Default for ProceduralWeights {
    fn default() -> Self {
        Self {
            version: "procedural-lofi-1".to_string(),
            sample_rate: 32000,
            tempo_bpm: [70.0, 85.0],
            chord_roots_hz: vec![220.0, 174.61, 196.0, 164.81],
            voices: 3,
        }
    }
}

impl ProceduralWeights {
    /// Reads weights from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ServiceError::model_load_failed(format!(
                "Failed to read checkpoint {}: {}",
                path.display(),
                e
            ))
        })?;
        let weights: Self = serde_json::from_str(&contents).map_err(|e| {
            ServiceError::model_load_failed(format!(
                "Invalid checkpoint {}: {}",
                path.display(),
                e
            ))
        })?;
        weights.validate()?;
        Ok(weights)
    }

    /// Checks that the weights fit the synthesizer.
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(ServiceError::model_load_failed(format!(
                "Unsupported checkpoint sample rate {} Hz",
                self.sample_rate
            )));
        }
        if self.chord_roots_hz.is_empty() {
            return Err(ServiceError::model_load_failed("Checkpoint has no chord roots"));
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        if self
            .chord_roots_hz
            .iter()
            .any(|f| !f.is_finite() || *f <= 0.0 || *f * CHORD_RATIOS[CHORD_RATIOS.len() - 1] >= nyquist)
        {
            return Err(ServiceError::model_load_failed(
                "Checkpoint chord roots must be positive and below Nyquist",
            ));
        }
        if self.voices == 0 || self.voices > MAX_VOICES {
            return Err(ServiceError::model_load_failed(format!(
                "Checkpoint voices must be between 1 and {}, got {}",
                MAX_VOICES, self.voices
            )));
        }
        let [min, max] = self.tempo_bpm;
        if !(min.is_finite() && max.is_finite() && 20.0 <= min && min <= max && max <= 300.0) {
            return Err(ServiceError::model_load_failed(format!(
                "Checkpoint tempo range {:?} is not within 20..=300 BPM",
                self.tempo_bpm
            )));
        }
        Ok(())
    }
}

/// Deterministic synthesizer keyed by prompt and seed.
#[derive(Debug, Clone)]
pub struct ProceduralGenerator {
    weights: ProceduralWeights,
    voices: u32,
}

impl ProceduralGenerator {
    /// Creates a generator, layering extra voices for larger sizes.
    pub fn new(weights: ProceduralWeights, size: ModelSize) -> Self {
        let voices = match size {
            ModelSize::Small => weights.voices,
            ModelSize::Medium => (weights.voices + 2).min(MAX_VOICES),
        };
        Self { weights, voices }
    }

    /// Number of chord voices in use.
    pub fn voices(&self) -> u32 {
        self.voices
    }
}

/// First eight bytes of the prompt's SHA-256 as an integer.
fn prompt_fingerprint(prompt: &str) -> u64 {
    let digest = Sha256::digest(prompt.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

impl Generator for ProceduralGenerator {
    fn sample_rate(&self) -> u32 {
        self.weights.sample_rate
    }

    fn version(&self) -> &str {
        &self.weights.version
    }

    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<Vec<f32>> {
        if !params.duration_sec.is_finite() || params.duration_sec <= 0.0 {
            return Err(ServiceError::generation_failed(format!(
                "duration must be positive, got {}",
                params.duration_sec
            )));
        }
        if !params.temperature.is_finite() || params.temperature < 0.0 {
            return Err(ServiceError::generation_failed(format!(
                "temperature must be non-negative, got {}",
                params.temperature
            )));
        }

        let rate = self.weights.sample_rate as f32;
        let total = (params.duration_sec * rate).round() as usize;
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed ^ prompt_fingerprint(prompt));

        let [min_bpm, max_bpm] = self.weights.tempo_bpm;
        let bpm = if max_bpm > min_bpm {
            rng.gen_range(min_bpm..=max_bpm)
        } else {
            min_bpm
        };
        let beat_len = (60.0 / bpm * rate) as usize;
        let bar_len = (beat_len as f32 * BEATS_PER_BAR) as usize;
        let bars = total / bar_len.max(1) + 1;
        let progression: Vec<f32> = (0..bars)
            .map(|_| self.weights.chord_roots_hz[rng.gen_range(0..self.weights.chord_roots_hz.len())])
            .collect();

        debug!(bpm, bars, voices = self.voices, "synthesizing");

        let voices = self.voices as usize;
        let voice_gain = 0.5 / voices as f32;
        let noise_gain = 0.01 * params.temperature;
        let mut phases = vec![0.0f32; voices];
        let mut kick_phase = 0.0f32;
        let mut samples = Vec::with_capacity(total);

        for n in 0..total {
            let t = n as f32 / rate;
            let root = progression[n / bar_len.max(1)];
            let wobble = 1.0 + 0.002 * (TAU * 0.5 * t).sin();

            let mut chord = 0.0;
            for (v, phase) in phases.iter_mut().enumerate() {
                let freq = root * CHORD_RATIOS[v % CHORD_RATIOS.len()] * wobble;
                *phase = (*phase + TAU * freq / rate) % TAU;
                chord += phase.sin() * voice_gain;
            }

            let since_beat = (n % beat_len.max(1)) as f32 / rate;
            kick_phase = (kick_phase + TAU * 55.0 / rate) % TAU;
            let kick = kick_phase.sin() * (-since_beat * 12.0).exp() * 0.4;

            let crackle = (rng.gen::<f32>() * 2.0 - 1.0) * noise_gain;

            samples.push(chord + kick + crackle);
        }

        Ok(samples)
    }
}

/// Builds [`ProceduralGenerator`]s from optional JSON checkpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProceduralFactory;

impl GeneratorFactory for ProceduralFactory {
    fn build(
        &self,
        checkpoint: Option<&Path>,
        device: Device,
        size: ModelSize,
    ) -> Result<ModelHandle> {
        match device {
            Device::Auto | Device::Cpu => {}
            Device::Cuda | Device::Metal => {
                return Err(ServiceError::model_load_failed(format!(
                    "{} device is not available in this build",
                    device
                )));
            }
        }

        let weights = match checkpoint {
            Some(path) => ProceduralWeights::load(path)?,
            None => ProceduralWeights::default(),
        };

        Ok(Arc::new(ProceduralGenerator::new(weights, size)))
    }
}
