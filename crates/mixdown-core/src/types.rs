//! Common types for the mixdown engine
//!
//! This module contains the fundamental audio and musical types shared by the
//! engine, the stem manager and the host shims: the fixed-size audio chunk,
//! playback state, musical positions, tempo tags and stem descriptions.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// System sample rate. The engine does no sample-rate conversion, every stem
/// is expected to be decoded at this rate.
pub const SAMPLE_RATE: u32 = 44100;

/// Number of frames in one [`AudioChunk`]
pub const CHUNK_SAMPLES: usize = 128;

/// Lowest level reported by [`gain_to_db`]; silence maps here instead of -inf
pub const MIN_DB: f64 = -200.0;

/// Stem identifier, assigned by the host
pub type StemId = u32;

/// Convert decibels to linear gain
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear gain to decibels, floored at [`MIN_DB`]
#[inline]
pub fn gain_to_db(gain: f64) -> f64 {
    if gain <= 0.0 {
        return MIN_DB;
    }
    (20.0 * gain.log10()).max(MIN_DB)
}

// ────────────────────────────────────────────────────────────────────────────
// Audio chunk
// ────────────────────────────────────────────────────────────────────────────

/// One block of planar stereo audio, the unit of production and consumption
///
/// Uses `#[repr(C)]` so the chunk is plain old data: it can be zeroed and
/// copied as a whole by bytemuck, which the audio buffer relies on to never
/// expose a partially written chunk.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AudioChunk {
    pub left: [f32; CHUNK_SAMPLES],
    pub right: [f32; CHUNK_SAMPLES],
}

impl AudioChunk {
    /// Create a silent chunk
    #[inline]
    pub fn silence() -> Self {
        bytemuck::Zeroable::zeroed()
    }

    /// Reset every sample to zero
    #[inline]
    pub fn clear(&mut self) {
        *self = Self::silence();
    }

    /// Returns true if every sample is exactly zero
    pub fn is_silent(&self) -> bool {
        self.left.iter().chain(self.right.iter()).all(|&s| s == 0.0)
    }

    /// Multiply frame `i` of both channels by `gain(i)`
    pub fn apply_gain_with<F>(&mut self, gain: F)
    where
        F: Fn(usize) -> f32,
    {
        for i in 0..CHUNK_SAMPLES {
            let g = gain(i);
            self.left[i] *= g;
            self.right[i] *= g;
        }
    }
}

impl Default for AudioChunk {
    fn default() -> Self {
        Self::silence()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Playback
// ────────────────────────────────────────────────────────────────────────────

/// Transport state of the mixer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PlaybackState {
    #[default]
    Stopped = 0,
    Playing = 1,
    Paused = 2,
}

impl PlaybackState {
    /// Decode the value stored in the mixer's state atomic
    ///
    /// Any other value means the atomic was corrupted, which is a programming
    /// error and therefore fatal.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => PlaybackState::Stopped,
            1 => PlaybackState::Playing,
            2 => PlaybackState::Paused,
            other => unreachable!("invalid playback state value {other}"),
        }
    }

    /// Short name used by hosts ("play", "pause", "stop")
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Playing => "play",
            PlaybackState::Paused => "pause",
            PlaybackState::Stopped => "stop",
        }
    }
}

/// Musical position, all fields 1-indexed
///
/// A zeroed position means "no tempo information".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SongPosition {
    pub bar: u32,
    pub step: u32,
    pub tick: u32,
}

impl SongPosition {
    pub fn new(bar: u32, step: u32, tick: u32) -> Self {
        Self { bar, step, tick }
    }
}

/// One entry of a variable tempo map
///
/// Between two consecutive tags the bar count progresses linearly with the
/// sample index, using the time signature of the earlier tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoTag {
    pub sample: u32,
    pub bar: u32,
    pub time_signature: u32,
}

impl TempoTag {
    pub fn new(sample: u32, bar: u32, time_signature: u32) -> Self {
        Self {
            sample,
            bar,
            time_signature,
        }
    }
}

/// Host-side description of a stem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemInfo {
    pub id: StemId,
    /// Source location handed to the fetcher
    pub path: String,
    /// Declared length in stereo frames
    pub samples: u32,
    /// Stem frame heard at track sample 0; negative values start the stem later
    #[serde(default)]
    pub offset: i32,
    #[serde(default)]
    pub gain_db: f32,
    /// -1.0 = hard left, 1.0 = hard right
    #[serde(default)]
    pub pan: f32,
}

// ────────────────────────────────────────────────────────────────────────────
// Float atomics
// ────────────────────────────────────────────────────────────────────────────

/// `f32` stored as raw bits in an `AtomicU32`
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// `f64` stored as raw bits in an `AtomicU64`
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_is_zeroed() {
        let chunk = AudioChunk::silence();
        assert!(chunk.is_silent());
        assert_eq!(chunk, AudioChunk::default());
    }

    #[test]
    fn test_gain_ramp_applies_per_frame() {
        let mut chunk = AudioChunk::silence();
        chunk.left = [1.0; CHUNK_SAMPLES];
        chunk.right = [-1.0; CHUNK_SAMPLES];
        chunk.apply_gain_with(|i| i as f32 / CHUNK_SAMPLES as f32);

        assert_eq!(chunk.left[0], 0.0);
        assert_eq!(chunk.right[64], -0.5);
        assert!((chunk.left[CHUNK_SAMPLES - 1] - 127.0 / 128.0).abs() < 1e-6);
    }

    #[test]
    fn test_db_conversions() {
        assert!((db_to_gain(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_gain(-6.0) - 0.501).abs() < 1e-3);
        assert!((gain_to_db(1.0)).abs() < 1e-9);
        assert_eq!(gain_to_db(0.0), MIN_DB);
    }

    #[test]
    fn test_playback_state_round_trips_through_u8() {
        for state in [
            PlaybackState::Stopped,
            PlaybackState::Playing,
            PlaybackState::Paused,
        ] {
            assert_eq!(PlaybackState::from_u8(state as u8), state);
        }
        assert_eq!(PlaybackState::Paused.as_str(), "pause");
    }

    #[test]
    #[should_panic]
    fn test_invalid_playback_state_is_fatal() {
        PlaybackState::from_u8(7);
    }

    #[test]
    fn test_atomic_floats() {
        let a = AtomicF32::new(-3.5);
        assert_eq!(a.load(), -3.5);
        a.store(f32::INFINITY);
        assert_eq!(a.load(), f32::INFINITY);

        let b = AtomicF64::new(0.25);
        b.store(-120.0);
        assert_eq!(b.load(), -120.0);
    }
}
