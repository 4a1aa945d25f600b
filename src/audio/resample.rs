//! Sample rate conversion with rubato.

use rubato::{FftFixedInOut, Resampler};

use crate::error::{Result, ServiceError};

/// Frames per resampler chunk.
const CHUNK_SIZE: usize = 1024;

/// Number of output samples expected for `len` input samples.
pub fn resampled_len(len: usize, sr_in: u32, sr_out: u32) -> usize {
    ((len as u64 * sr_out as u64 + sr_in as u64 / 2) / sr_in as u64) as usize
}

/// Resamples mono audio from `sr_in` to `sr_out`.
///
/// The resampler's group delay is trimmed from the start and the tail is
/// flushed, so the result is time-aligned with the input and holds exactly
/// [`resampled_len`] samples.
pub fn resample(pcm_in: &[f32], sr_in: u32, sr_out: u32) -> Result<Vec<f32>> {
    if sr_in == 0 || sr_out == 0 {
        return Err(ServiceError::encoding_failed(format!(
            "cannot resample from {} Hz to {} Hz",
            sr_in, sr_out
        )));
    }
    if sr_in == sr_out || pcm_in.is_empty() {
        return Ok(pcm_in.to_vec());
    }

    let mut resampler = FftFixedInOut::<f32>::new(sr_in as usize, sr_out as usize, CHUNK_SIZE, 1)
        .map_err(resampler_error)?;
    let delay = resampler.output_delay();
    let expected = resampled_len(pcm_in.len(), sr_in, sr_out);

    let mut pcm_out = Vec::with_capacity(expected + delay + CHUNK_SIZE);
    let mut output_buffer = resampler.output_buffer_allocate(true);

    let mut pos_in = 0;
    while pos_in + resampler.input_frames_next() < pcm_in.len() {
        let (in_len, out_len) = resampler
            .process_into_buffer(&[&pcm_in[pos_in..]], &mut output_buffer, None)
            .map_err(resampler_error)?;
        pos_in += in_len;
        pcm_out.extend_from_slice(&output_buffer[0][..out_len]);
    }

    if pos_in < pcm_in.len() {
        let (_in_len, out_len) = resampler
            .process_partial_into_buffer(Some(&[&pcm_in[pos_in..]]), &mut output_buffer, None)
            .map_err(resampler_error)?;
        pcm_out.extend_from_slice(&output_buffer[0][..out_len]);
    }

    while pcm_out.len() < expected + delay {
        let (_in_len, out_len) = resampler
            .process_partial_into_buffer(None::<&[&[f32]]>, &mut output_buffer, None)
            .map_err(resampler_error)?;
        if out_len == 0 {
            break;
        }
        pcm_out.extend_from_slice(&output_buffer[0][..out_len]);
    }

    let mut aligned: Vec<f32> = pcm_out.into_iter().skip(delay).take(expected).collect();
    aligned.resize(expected, 0.0);
    Ok(aligned)
}

fn resampler_error(e: impl std::fmt::Display) -> ServiceError {
    ServiceError::encoding_failed(format!("resampler: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_rate_is_identity() {
        let samples = vec![0.1, -0.2, 0.3];
        assert_eq!(resample(&samples, 32000, 32000).unwrap(), samples);
    }

    #[test]
    fn upsample_length_matches_ratio() {
        let samples: Vec<f32> = (0..32000)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI * 220.0 / 32000.0).sin() * 0.5)
            .collect();
        let out = resample(&samples, 32000, 48000).unwrap();
        assert_eq!(out.len(), 48000);
        assert!(out.iter().all(|s| s.is_finite()));

        // The middle of a pure tone keeps roughly its amplitude
        let mid_peak = out[10000..40000].iter().fold(0.0f32, |a, s| a.max(s.abs()));
        assert!(mid_peak > 0.4 && mid_peak < 0.6, "peak {}", mid_peak);
    }

    #[test]
    fn resampled_len_rounds() {
        assert_eq!(resampled_len(32000, 32000, 48000), 48000);
        assert_eq!(resampled_len(3, 32000, 48000), 5);
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(resample(&[0.0], 0, 48000).is_err());
    }
}
