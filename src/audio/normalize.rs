//! Peak normalization strategies.
//!
//! Every strategy divides by the buffer's peak absolute value, floored at
//! [`NORMALIZE_EPSILON`] so silent buffers stay silent instead of dividing
//! by zero.

use serde::{Deserialize, Serialize};

/// Smallest divisor used when normalizing.
pub const NORMALIZE_EPSILON: f32 = 1e-8;

/// Default peak level for headroom normalization (95% of full scale).
pub const DEFAULT_HEADROOM: f32 = 0.95;

/// How raw model output is brought to full scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationStrategy {
    /// Scale so the peak sits at 1.0.
    Peak,
    /// Peak normalize, then apply `tanh` soft clipping.
    PeakSoftClip,
    /// Peak normalize, then scale the peak to the given fraction of full scale.
    PeakHeadroom(f32),
}

impl NormalizationStrategy {
    /// Returns the string representation of the strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizationStrategy::Peak => "peak",
            NormalizationStrategy::PeakSoftClip => "peak_soft_clip",
            NormalizationStrategy::PeakHeadroom(_) => "peak_headroom",
        }
    }

    /// Parses a strategy name; headroom uses [`DEFAULT_HEADROOM`].
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "peak" | "peak_normalize" => Some(NormalizationStrategy::Peak),
            "peak_soft_clip" | "soft_clip" | "tanh" => Some(NormalizationStrategy::PeakSoftClip),
            "peak_headroom" | "headroom" => {
                Some(NormalizationStrategy::PeakHeadroom(DEFAULT_HEADROOM))
            }
            _ => None,
        }
    }

    /// Upper bound of the absolute sample value after normalization.
    pub fn ceiling(&self) -> f32 {
        match self {
            NormalizationStrategy::Peak => 1.0,
            NormalizationStrategy::PeakSoftClip => 1.0_f32.tanh(),
            NormalizationStrategy::PeakHeadroom(headroom) => *headroom,
        }
    }
}

impl std::fmt::Display for NormalizationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NormalizationStrategy::PeakHeadroom(headroom) => {
                write!(f, "{}({})", self.as_str(), headroom)
            }
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

/// Returns the maximum absolute sample value.
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

/// Normalizes samples in place according to `strategy`.
pub fn normalize(samples: &mut [f32], strategy: NormalizationStrategy) {
    let divisor = peak(samples).max(NORMALIZE_EPSILON);
    let gain = match strategy {
        NormalizationStrategy::PeakHeadroom(headroom) => headroom / divisor,
        _ => 1.0 / divisor,
    };

    for sample in samples.iter_mut() {
        *sample *= gain;
        if strategy == NormalizationStrategy::PeakSoftClip {
            *sample = sample.tanh();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Vec<f32> {
        (0..1000).map(|i| ((i as f32) * 0.37).sin() * 0.3).collect()
    }

    #[test]
    fn peak_normalize_reaches_full_scale() {
        let mut samples = ramp();
        normalize(&mut samples, NormalizationStrategy::Peak);
        let p = peak(&samples);
        assert!(p > 0.0 && p <= 1.0);
        assert!((p - 1.0).abs() < 1e-6);
    }

    #[test]
    fn headroom_bound() {
        let mut samples = ramp();
        normalize(&mut samples, NormalizationStrategy::PeakHeadroom(0.95));
        let p = peak(&samples);
        assert!(p > 0.0 && p <= 0.95 + 1e-6);
        assert!((p - 0.95).abs() < 1e-5);
    }

    #[test]
    fn soft_clip_bound() {
        let mut samples = ramp();
        normalize(&mut samples, NormalizationStrategy::PeakSoftClip);
        let p = peak(&samples);
        assert!(p > 0.0 && p <= NormalizationStrategy::PeakSoftClip.ceiling() + 1e-6);
    }

    #[test]
    fn silence_is_safe() {
        for strategy in [
            NormalizationStrategy::Peak,
            NormalizationStrategy::PeakSoftClip,
            NormalizationStrategy::PeakHeadroom(DEFAULT_HEADROOM),
        ] {
            let mut samples = vec![0.0f32; 256];
            normalize(&mut samples, strategy);
            assert!(samples.iter().all(|s| *s == 0.0 && s.is_finite()));
        }
    }

    #[test]
    fn strategy_parsing() {
        assert_eq!(NormalizationStrategy::parse("peak"), Some(NormalizationStrategy::Peak));
        assert_eq!(
            NormalizationStrategy::parse("peak-soft-clip"),
            Some(NormalizationStrategy::PeakSoftClip)
        );
        assert_eq!(
            NormalizationStrategy::parse("headroom"),
            Some(NormalizationStrategy::PeakHeadroom(DEFAULT_HEADROOM))
        );
        assert_eq!(NormalizationStrategy::parse("loudness"), None);
    }
}
