//! Crossfaded loop extension.
//!
//! Lengthens a clip past the backend's duration cap by repeating it and
//! overlapping each seam with a linear crossfade. The result is a loop of
//! the same material, not a longer composition: nothing makes the music
//! coherent across the seam beyond the fade itself.

use std::path::Path;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use super::normalize::{normalize, NormalizationStrategy};
use super::wav::{read_wav, samples_to_duration, write_wav, DitherStrategy};
use crate::error::{Result, ServiceError};
use crate::types::{ArtifactPayload, WavArtifact};

/// Default overlap between consecutive repeats.
pub const DEFAULT_CROSSFADE_MS: u32 = 500;

/// Options for extending a WAV file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopOptions {
    /// Overlap between repeats in milliseconds.
    pub crossfade_ms: u32,
    /// Final loudness pass, if any.
    pub loudness: Option<NormalizationStrategy>,
    /// Dither used when re-encoding.
    pub dither: DitherStrategy,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            crossfade_ms: DEFAULT_CROSSFADE_MS,
            loudness: None,
            dither: DitherStrategy::default(),
        }
    }
}

/// Loops `samples` towards `target_sec` seconds.
///
/// The clip is repeated `n = ceil(target / source)` times and each pair of
/// neighbours overlaps by the crossfade, so the output holds
/// `n * len - (n - 1) * crossfade` samples. That can fall short of the
/// target: a 10 s clip looped to 30 s with a 500 ms crossfade yields 29 s.
/// The crossfade is clamped to half the clip. A target no longer than the
/// clip returns it unchanged.
pub fn extend(
    samples: &[f32],
    sample_rate: u32,
    target_sec: f32,
    crossfade_ms: u32,
    loudness: Option<NormalizationStrategy>,
) -> Result<Vec<f32>> {
    if samples.is_empty() {
        return Err(ServiceError::invalid_audio("Cannot extend an empty clip"));
    }
    if sample_rate == 0 {
        return Err(ServiceError::invalid_audio("Clip has a sample rate of 0 Hz"));
    }
    if !target_sec.is_finite() || target_sec <= 0.0 {
        return Err(ServiceError::invalid_audio(format!(
            "Invalid target duration: {} seconds",
            target_sec
        )));
    }

    let clip_len = samples.len();
    let target_len = (target_sec as f64 * sample_rate as f64).round() as usize;
    if target_len <= clip_len {
        return Ok(samples.to_vec());
    }

    let repeats = target_len.div_ceil(clip_len);
    let crossfade = ((crossfade_ms as u64 * sample_rate as u64) / 1000) as usize;
    let crossfade = crossfade.min(clip_len / 2);

    let mut out = Vec::with_capacity(repeats * clip_len - (repeats - 1) * crossfade);
    out.extend_from_slice(samples);

    for _ in 1..repeats {
        let seam = out.len() - crossfade;
        for (i, incoming) in samples[..crossfade].iter().enumerate() {
            let fade_in = (i + 1) as f32 / (crossfade + 1) as f32;
            out[seam + i] = out[seam + i] * (1.0 - fade_in) + incoming * fade_in;
        }
        out.extend_from_slice(&samples[crossfade..]);
    }

    if let Some(strategy) = loudness {
        normalize(&mut out, strategy);
    }

    Ok(out)
}

/// Reads a WAV file, extends it, and writes the result to `output`.
///
/// `seed` keys the dither noise and is recorded on the returned artifact.
pub fn extend_wav(
    input: &Path,
    output: &Path,
    target_sec: f32,
    options: &LoopOptions,
    seed: u64,
) -> Result<WavArtifact> {
    let (samples, sample_rate) = read_wav(input)?;
    let source_sec = samples_to_duration(samples.len(), sample_rate);

    let extended = extend(
        &samples,
        sample_rate,
        target_sec,
        options.crossfade_ms,
        options.loudness,
    )?;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    write_wav(&extended, output, sample_rate, options.dither, &mut rng)?;

    let duration_sec = samples_to_duration(extended.len(), sample_rate);
    info!(
        input = %input.display(),
        output = %output.display(),
        source_sec,
        duration_sec,
        "extended clip"
    );

    Ok(WavArtifact {
        file_name: output
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        sample_rate,
        duration_sec,
        seed,
        payload: ArtifactPayload::File(output.to_path_buf()),
    })
}
