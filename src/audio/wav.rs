//! PCM-16 WAV encoding and decoding.
//!
//! Writes dithered 16-bit mono WAV data using the hound crate, and reads
//! WAV files back into f32 samples for loop extension and verification.

use std::io::{Cursor, Read};
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rand::Rng;
use rand_distr::{Distribution, Triangular, Uniform};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

/// Number of audio channels (mono).
pub const CHANNELS: u16 = 1;

/// Bit depth of encoded samples.
pub const BITS_PER_SAMPLE: u16 = 16;

/// Scale factor between [-1.0, 1.0] and the 16-bit integer range.
pub const PCM16_FULL_SCALE: f32 = 32767.0;

/// Largest dither perturbation: one quantization step.
pub const DITHER_AMPLITUDE: f32 = 1.0 / PCM16_FULL_SCALE;

/// Noise added before quantization to decorrelate quantization error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DitherStrategy {
    /// Quantize without dither.
    None,
    /// Rectangular noise in ±1 step.
    Uniform,
    /// Triangular (TPDF) noise in ±1 step.
    #[default]
    Triangular,
}

impl DitherStrategy {
    /// Returns the string representation of the strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            DitherStrategy::None => "none",
            DitherStrategy::Uniform => "uniform",
            DitherStrategy::Triangular => "triangular",
        }
    }

    /// Parses a strategy from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" | "off" => Some(DitherStrategy::None),
            "uniform" | "rectangular" | "rpdf" => Some(DitherStrategy::Uniform),
            "triangular" | "tpdf" => Some(DitherStrategy::Triangular),
            _ => None,
        }
    }
}

impl std::fmt::Display for DitherStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Converts one sample to 16-bit PCM, clipping to [-1.0, 1.0] first.
fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * PCM16_FULL_SCALE).round() as i16
}

/// Dithers and quantizes samples to 16-bit integers.
pub fn quantize<R: Rng + ?Sized>(
    samples: &[f32],
    dither: DitherStrategy,
    rng: &mut R,
) -> Result<Vec<i16>> {
    let pcm = match dither {
        DitherStrategy::None => samples.iter().map(|s| to_pcm16(*s)).collect(),
        DitherStrategy::Uniform => {
            let noise = Uniform::new_inclusive(-DITHER_AMPLITUDE, DITHER_AMPLITUDE);
            samples
                .iter()
                .map(|s| to_pcm16(s + noise.sample(rng)))
                .collect()
        }
        DitherStrategy::Triangular => {
            let noise = Triangular::new(-DITHER_AMPLITUDE, DITHER_AMPLITUDE, 0.0).map_err(|e| {
                ServiceError::encoding_failed(format!("invalid dither distribution: {}", e))
            })?;
            samples
                .iter()
                .map(|s| to_pcm16(s + noise.sample(rng)))
                .collect()
        }
    };
    Ok(pcm)
}

fn pcm16_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: CHANNELS,
        sample_rate,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: SampleFormat::Int,
    }
}

/// Writes quantized samples to an in-memory WAV buffer.
pub fn pcm16_to_wav_bytes(pcm: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::with_capacity(44 + pcm.len() * 2));
    {
        let mut writer = WavWriter::new(&mut cursor, pcm16_spec(sample_rate)).map_err(|e| {
            ServiceError::encoding_failed(format!("Failed to create WAV writer: {}", e))
        })?;

        let mut samples = writer.get_i16_writer(pcm.len() as u32);
        for sample in pcm {
            samples.write_sample(*sample);
        }
        samples.flush().map_err(|e| {
            ServiceError::encoding_failed(format!("Failed to write samples: {}", e))
        })?;

        writer.finalize().map_err(|e| {
            ServiceError::encoding_failed(format!("Failed to finalize WAV buffer: {}", e))
        })?;
    }
    Ok(cursor.into_inner())
}

/// Writes quantized samples to a WAV file.
pub fn write_pcm16(pcm: &[i16], path: &Path, sample_rate: u32) -> Result<()> {
    let mut writer = WavWriter::create(path, pcm16_spec(sample_rate)).map_err(|e| {
        ServiceError::encoding_failed(format!(
            "Failed to create WAV file {}: {}",
            path.display(),
            e
        ))
    })?;

    for sample in pcm {
        writer.write_sample(*sample).map_err(|e| {
            ServiceError::encoding_failed(format!("Failed to write sample: {}", e))
        })?;
    }

    writer.finalize().map_err(|e| {
        ServiceError::encoding_failed(format!("Failed to finalize WAV file: {}", e))
    })?;

    Ok(())
}

/// Dithers, quantizes and writes samples to a WAV file.
///
/// # Example
///
/// ```ignore
/// use lofi_server::audio::{write_wav, DitherStrategy};
///
/// let samples = vec![0.0, 0.5, -0.5, 0.0];
/// write_wav(&samples, Path::new("/tmp/test.wav"), 32000, DitherStrategy::Triangular, &mut rng)?;
/// ```
pub fn write_wav<R: Rng + ?Sized>(
    samples: &[f32],
    path: &Path,
    sample_rate: u32,
    dither: DitherStrategy,
    rng: &mut R,
) -> Result<()> {
    let pcm = quantize(samples, dither, rng)?;
    write_pcm16(&pcm, path, sample_rate)
}

/// Dithers, quantizes and encodes samples into WAV bytes.
pub fn encode_wav<R: Rng + ?Sized>(
    samples: &[f32],
    sample_rate: u32,
    dither: DitherStrategy,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let pcm = quantize(samples, dither, rng)?;
    pcm16_to_wav_bytes(&pcm, sample_rate)
}

/// Reads a WAV file into mono f32 samples and its sample rate.
pub fn read_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let reader = WavReader::open(path).map_err(|e| {
        ServiceError::invalid_audio(format!("Failed to open WAV {}: {}", path.display(), e))
    })?;
    decode_reader(reader)
}

/// Decodes in-memory WAV bytes into mono f32 samples and their sample rate.
pub fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| ServiceError::invalid_audio(format!("Failed to parse WAV: {}", e)))?;
    decode_reader(reader)
}

fn decode_reader<R: Read>(mut reader: WavReader<R>) -> Result<(Vec<f32>, u32)> {
    let spec = reader.spec();
    let read_error = |e: hound::Error| ServiceError::invalid_audio(format!("Failed to read samples: {}", e));

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(read_error)?,
        SampleFormat::Int => {
            let scale = ((1i64 << (spec.bits_per_sample - 1)) - 1) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(read_error)?
        }
    };

    let channels = spec.channels.max(1) as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok((samples, spec.sample_rate))
}

/// Calculates the duration of audio in seconds from sample count.
pub fn samples_to_duration(sample_count: usize, sample_rate: u32) -> f32 {
    sample_count as f32 / sample_rate as f32
}
