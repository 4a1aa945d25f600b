//! Audio post-processing module.
//!
//! Normalization, dithered PCM-16 WAV encoding, resampling and crossfaded
//! loop extension.

pub mod encoder;
pub mod loop_extend;
pub mod normalize;
pub mod resample;
pub mod wav;

pub use encoder::{AudioEncoder, Destination};
pub use loop_extend::{extend, extend_wav, LoopOptions, DEFAULT_CROSSFADE_MS};
pub use normalize::{normalize, peak, NormalizationStrategy, DEFAULT_HEADROOM, NORMALIZE_EPSILON};
pub use resample::resample;
pub use wav::{
    decode_wav, encode_wav, read_wav, samples_to_duration, write_wav, DitherStrategy, CHANNELS,
};
