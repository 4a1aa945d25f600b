//! Raw sample buffer to WAV artifact encoding.

use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use super::resample::resample;
use super::wav::{pcm16_to_wav_bytes, quantize, samples_to_duration, write_pcm16, DitherStrategy};
use crate::error::Result;
use crate::types::{artifact_file_name, ArtifactPayload, RawSampleBuffer, WavArtifact};

/// Stream of the seed's ChaCha generator reserved for dither noise.
const DITHER_STREAM: u64 = 1;

/// Where an encoded artifact is placed.
#[derive(Debug, Clone, Copy)]
pub enum Destination<'a> {
    /// Keep the WAV bytes in memory.
    Memory,
    /// Write a file into the given directory.
    Directory(&'a Path),
}

/// Converts raw float buffers into PCM-16 mono WAV artifacts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioEncoder {
    /// Output sample rate written to the WAV header.
    pub sample_rate: u32,
    /// Dither applied before quantization.
    pub dither: DitherStrategy,
}

impl AudioEncoder {
    pub fn new(sample_rate: u32, dither: DitherStrategy) -> Self {
        Self {
            sample_rate,
            dither,
        }
    }

    /// Encodes `buffer`, resampling it to the output rate if needed.
    ///
    /// Dither noise comes from a generator keyed by the buffer's seed, so
    /// the same buffer always encodes to the same bytes.
    pub fn encode(
        &self,
        buffer: &RawSampleBuffer,
        destination: Destination<'_>,
        prefix: Option<&str>,
        prompt: &str,
    ) -> Result<WavArtifact> {
        let samples = if buffer.sample_rate == self.sample_rate {
            buffer.samples.clone()
        } else {
            debug!(
                from = buffer.sample_rate,
                to = self.sample_rate,
                "resampling generator output"
            );
            resample(&buffer.samples, buffer.sample_rate, self.sample_rate)?
        };

        let mut rng = ChaCha8Rng::seed_from_u64(buffer.seed);
        rng.set_stream(DITHER_STREAM);
        let pcm = quantize(&samples, self.dither, &mut rng)?;

        let file_name = artifact_file_name(prefix, prompt);
        let payload = match destination {
            Destination::Memory => ArtifactPayload::Memory(pcm16_to_wav_bytes(&pcm, self.sample_rate)?),
            Destination::Directory(dir) => {
                let path: PathBuf = dir.join(&file_name);
                write_pcm16(&pcm, &path, self.sample_rate)?;
                ArtifactPayload::File(path)
            }
        };

        Ok(WavArtifact {
            file_name,
            sample_rate: self.sample_rate,
            duration_sec: samples_to_duration(pcm.len(), self.sample_rate),
            seed: buffer.seed,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decode_wav;
    use tempfile::tempdir;

    fn buffer(sample_rate: u32, seed: u64) -> RawSampleBuffer {
        RawSampleBuffer {
            samples: (0..sample_rate as usize)
                .map(|i| (i as f32 * 0.01).sin() * 0.7)
                .collect(),
            sample_rate,
            seed,
        }
    }

    #[test]
    fn memory_artifact_matches_header() {
        let encoder = AudioEncoder::new(32000, DitherStrategy::Triangular);
        let artifact = encoder
            .encode(&buffer(32000, 5), Destination::Memory, Some("lo-fi"), "rain")
            .unwrap();

        assert_eq!(artifact.sample_rate, 32000);
        assert_eq!(artifact.seed, 5);
        assert!((artifact.duration_sec - 1.0).abs() < 1e-6);
        assert!(artifact.path().is_none());
        assert!(artifact.file_name.contains("_lo_fi_rain_"));

        let (samples, rate) = decode_wav(&artifact.read_bytes().unwrap()).unwrap();
        assert_eq!(rate, 32000);
        assert_eq!(samples.len(), 32000);
    }

    #[test]
    fn same_seed_encodes_identically() {
        let encoder = AudioEncoder::new(32000, DitherStrategy::Triangular);
        let a = encoder.encode(&buffer(32000, 11), Destination::Memory, None, "x").unwrap();
        let b = encoder.encode(&buffer(32000, 11), Destination::Memory, None, "x").unwrap();
        assert_eq!(a.read_bytes().unwrap(), b.read_bytes().unwrap());
    }

    #[test]
    fn resamples_to_output_rate() {
        let encoder = AudioEncoder::new(48000, DitherStrategy::None);
        let artifact = encoder
            .encode(&buffer(32000, 1), Destination::Memory, None, "x")
            .unwrap();
        let (samples, rate) = decode_wav(&artifact.read_bytes().unwrap()).unwrap();
        assert_eq!(rate, 48000);
        assert_eq!(samples.len(), 48000);
        assert!((artifact.duration_sec - 1.0).abs() < 1e-3);
    }

    #[test]
    fn directory_artifact_is_written() {
        let dir = tempdir().unwrap();
        let encoder = AudioEncoder::new(32000, DitherStrategy::Triangular);
        let artifact = encoder
            .encode(&buffer(32000, 2), Destination::Directory(dir.path()), Some("lo-fi"), "Café")
            .unwrap();

        let path = artifact.path().unwrap();
        assert!(path.exists());
        assert_eq!(path.parent().unwrap(), dir.path());
        assert_eq!(path.file_name().unwrap().to_string_lossy(), artifact.file_name);
        assert!(artifact.read_bytes().unwrap().starts_with(b"RIFF"));
    }
}
