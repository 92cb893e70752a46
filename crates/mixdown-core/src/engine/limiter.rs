//! Master limiter - soft-knee downward compressor with separate attack/release
//!
//! Last stage of the mixdown pipeline:
//!   stems → metronome → peak meter → **limiter** → audio buffer
//!
//! # Algorithm
//!
//! Per channel and per sample:
//!
//! 1. A decaying peak follower tracks the input level
//!    (`peak = max(peak × 0.999, |x|)`) and converts it to dB.
//! 2. A static transfer curve maps the peak to a target output level:
//!    - below `threshold − knee/2` the level passes through,
//!    - above `threshold + knee/2` it follows `threshold + (in − threshold) / ratio`,
//!    - inside the knee it follows the quadratic blend of both lines.
//! 3. The gain needed to reach the target (`target − in`, always ≤ 0 dB) is
//!    approached by an exponential moving average. The attack coefficient is
//!    used when more reduction is needed and the release coefficient when
//!    the reduction should recover.
//! 4. The sample is scaled by the smoothed reduction.
//!
//! With `ratio = ∞` and `knee = 0` this is a hard limiter.
//!
//! Parameters live in [`LimiterParams`] as atomics so the control thread can
//! change them while the mixer thread is processing. They are sampled once
//! at the start of each chunk.

use crate::types::{gain_to_db, AtomicF64, AudioChunk, CHUNK_SAMPLES, SAMPLE_RATE};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

// ═══════════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-sample multiplier applied to the peak follower
pub const LIMITER_PEAK_DESCENT_RATE: f64 = 0.999;

/// Reference frequency for converting a time constant in ms to an EWMA coefficient
const EWMA_REFERENCE_HZ: f64 = 100.0;

/// Time constants shorter than this snap to "no smoothing"
const MIN_TIME_MS: f64 = 0.001;

// ═══════════════════════════════════════════════════════════════════════════════
// Parameters
// ═══════════════════════════════════════════════════════════════════════════════

/// Limiter parameters as plain values (configuration / snapshot form)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterSettings {
    pub attack_ms: f64,
    pub release_ms: f64,
    pub knee_db: f64,
    /// Compression ratio above the knee, `inf` for limiting
    pub ratio: f64,
    pub threshold_db: f64,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            attack_ms: 5.0,
            release_ms: 24.0,
            knee_db: 0.0,
            ratio: f64::INFINITY,
            threshold_db: -1.0,
        }
    }
}

/// Limiter parameters shared between the control and mixer threads
#[derive(Debug)]
pub struct LimiterParams {
    attack_ms: AtomicF64,
    release_ms: AtomicF64,
    knee_db: AtomicF64,
    ratio: AtomicF64,
    threshold_db: AtomicF64,
}

impl LimiterParams {
    pub fn new(settings: LimiterSettings) -> Self {
        Self {
            attack_ms: AtomicF64::new(settings.attack_ms),
            release_ms: AtomicF64::new(settings.release_ms),
            knee_db: AtomicF64::new(settings.knee_db),
            ratio: AtomicF64::new(settings.ratio),
            threshold_db: AtomicF64::new(settings.threshold_db),
        }
    }

    pub fn attack_ms(&self) -> f64 {
        self.attack_ms.load()
    }

    pub fn set_attack_ms(&self, value: f64) {
        self.attack_ms.store(value.max(0.0));
    }

    pub fn release_ms(&self) -> f64 {
        self.release_ms.load()
    }

    pub fn set_release_ms(&self, value: f64) {
        self.release_ms.store(value.max(0.0));
    }

    pub fn knee_db(&self) -> f64 {
        self.knee_db.load()
    }

    pub fn set_knee_db(&self, value: f64) {
        self.knee_db.store(value.max(0.0));
    }

    pub fn ratio(&self) -> f64 {
        self.ratio.load()
    }

    /// Ratios below 1:1 would expand, they are clamped to 1
    pub fn set_ratio(&self, value: f64) {
        self.ratio.store(if value.is_nan() { 1.0 } else { value.max(1.0) });
    }

    pub fn threshold_db(&self) -> f64 {
        self.threshold_db.load()
    }

    pub fn set_threshold_db(&self, value: f64) {
        self.threshold_db.store(value);
    }

    /// Current values as a plain struct
    pub fn snapshot(&self) -> LimiterSettings {
        LimiterSettings {
            attack_ms: self.attack_ms(),
            release_ms: self.release_ms(),
            knee_db: self.knee_db(),
            ratio: self.ratio(),
            threshold_db: self.threshold_db(),
        }
    }
}

impl Default for LimiterParams {
    fn default() -> Self {
        Self::new(LimiterSettings::default())
    }
}

/// Per-chunk derived coefficients
#[derive(Debug, Clone, Copy)]
struct Curve {
    attack_coeff: f64,
    release_coeff: f64,
    knee: f64,
    /// `1 / ratio`, zero for an infinite ratio
    slope: f64,
    threshold: f64,
}

impl Curve {
    fn from_settings(settings: &LimiterSettings) -> Self {
        Self {
            attack_coeff: ms_to_ewma_coeff(settings.attack_ms),
            release_coeff: ms_to_ewma_coeff(settings.release_ms),
            knee: settings.knee_db,
            slope: 1.0 / settings.ratio,
            threshold: settings.threshold_db,
        }
    }

    /// Static transfer curve: input level (dB) → target output level (dB)
    fn target_db(&self, input_db: f64) -> f64 {
        let half_knee = self.knee / 2.0;
        if input_db < self.threshold - half_knee {
            return input_db;
        }
        if input_db > self.threshold + half_knee || self.knee <= 0.0 {
            return self.threshold + (input_db - self.threshold) * self.slope;
        }
        let over = input_db - self.threshold + half_knee;
        input_db + (self.slope - 1.0) * over * over / (2.0 * self.knee)
    }
}

/// Convert a time constant to the per-sample EWMA coefficient
pub fn ms_to_ewma_coeff(time_ms: f64) -> f64 {
    if time_ms < MIN_TIME_MS {
        return 0.0;
    }
    1.0 - (-2.0 * PI * EWMA_REFERENCE_HZ / SAMPLE_RATE as f64 / time_ms).exp()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Limiter
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    peak: f64,
    /// Smoothed gain change in dB, always ≤ 0
    reduction_db: f64,
}

impl ChannelState {
    #[inline]
    fn process_sample(&mut self, curve: &Curve, sample: &mut f32) {
        self.peak = (self.peak * LIMITER_PEAK_DESCENT_RATE).max(sample.abs() as f64);

        let peak_db = gain_to_db(self.peak);
        let target_gain_db = curve.target_db(peak_db) - peak_db;

        if self.reduction_db < target_gain_db {
            self.reduction_db += curve.release_coeff * (target_gain_db - self.reduction_db);
        } else if self.reduction_db > target_gain_db {
            self.reduction_db += curve.attack_coeff * (target_gain_db - self.reduction_db);
        }

        *sample *= 10.0_f64.powf(self.reduction_db / 20.0) as f32;
    }
}

/// Stereo limiter state. Parameters are passed in on every call.
#[derive(Debug, Clone, Default)]
pub struct Limiter {
    left: ChannelState,
    right: ChannelState,
    reduction_db: f64,
}

impl Limiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit a chunk in place
    pub fn apply(&mut self, params: &LimiterParams, chunk: &mut AudioChunk) {
        let curve = Curve::from_settings(&params.snapshot());

        for i in 0..CHUNK_SAMPLES {
            self.left.process_sample(&curve, &mut chunk.left[i]);
            self.right.process_sample(&curve, &mut chunk.right[i]);
        }

        self.reduction_db = self.left.reduction_db.min(self.right.reduction_db);
    }

    /// Gain reduction at the end of the last chunk, the more negative channel
    pub fn reduction_db(&self) -> f64 {
        self.reduction_db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::db_to_gain;

    fn dc_chunk(level: f32) -> AudioChunk {
        let mut chunk = AudioChunk::silence();
        chunk.left = [level; CHUNK_SAMPLES];
        chunk.right = [level; CHUNK_SAMPLES];
        chunk
    }

    #[test]
    fn test_quiet_signal_passes_unchanged() {
        let params = LimiterParams::default();
        let mut limiter = Limiter::new();
        let mut chunk = dc_chunk(db_to_gain(-6.0));
        let original = chunk;

        limiter.apply(&params, &mut chunk);

        assert_eq!(chunk, original);
        assert_eq!(limiter.reduction_db(), 0.0);
    }

    #[test]
    fn test_hard_limit_converges_to_overshoot() {
        let params = LimiterParams::default();
        let threshold = params.threshold_db();
        let input_db = threshold + 10.0;

        let level = db_to_gain(input_db as f32);
        let mut limiter = Limiter::new();
        for _ in 0..99 {
            limiter.apply(&params, &mut dc_chunk(level));
        }
        let mut out = dc_chunk(level);
        limiter.apply(&params, &mut out);

        assert!(
            (limiter.reduction_db() - (threshold - input_db)).abs() < 0.1,
            "expected ≈ -10 dB reduction, got {}",
            limiter.reduction_db()
        );
        let out_db = gain_to_db(out.left[CHUNK_SAMPLES - 1] as f64);
        assert!((out_db - threshold).abs() < 0.1, "output at {out_db} dB");
    }

    #[test]
    fn test_release_returns_to_unity() {
        let params = LimiterParams::default();
        let mut limiter = Limiter::new();
        for _ in 0..100 {
            limiter.apply(&params, &mut dc_chunk(db_to_gain(9.0)));
        }
        assert!(limiter.reduction_db() < -9.0);

        for _ in 0..400 {
            limiter.apply(&params, &mut AudioChunk::silence());
        }
        assert!(
            limiter.reduction_db().abs() < 0.01,
            "reduction should recover, got {}",
            limiter.reduction_db()
        );
    }

    #[test]
    fn test_attack_is_faster_than_release() {
        // Default attack (5 ms) must have a larger per-sample coefficient than release (24 ms)
        assert!(ms_to_ewma_coeff(5.0) > ms_to_ewma_coeff(24.0));
        assert_eq!(ms_to_ewma_coeff(0.0), 0.0);
    }

    #[test]
    fn test_transfer_curve_shapes() {
        let hard = Curve::from_settings(&LimiterSettings::default());
        assert_eq!(hard.target_db(-20.0), -20.0);
        assert_eq!(hard.target_db(5.0), -1.0);

        let soft = Curve::from_settings(&LimiterSettings {
            knee_db: 6.0,
            ratio: 4.0,
            threshold_db: -10.0,
            ..LimiterSettings::default()
        });
        // Below the knee: unchanged
        assert_eq!(soft.target_db(-14.0), -14.0);
        // Above the knee: 4:1 slope from threshold
        assert!((soft.target_db(2.0) - (-10.0 + 12.0 / 4.0)).abs() < 1e-9);
        // Knee is continuous at both edges
        assert!((soft.target_db(-13.0) - (-13.0)).abs() < 1e-9);
        assert!((soft.target_db(-7.0) - (-10.0 + 3.0 / 4.0)).abs() < 1e-9);
    }

    #[test]
    fn test_params_clamp_nonsense() {
        let params = LimiterParams::default();
        params.set_ratio(0.5);
        params.set_attack_ms(-3.0);
        assert_eq!(params.ratio(), 1.0);
        assert_eq!(params.attack_ms(), 0.0);
    }
}
