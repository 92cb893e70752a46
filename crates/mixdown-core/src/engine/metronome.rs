//! Metronome click generator
//!
//! Follows the tempo map's musical position, so the clicks land on every
//! step under both stable and varying tempo. A step boundary is detected
//! sample-accurately inside the chunk; the first step of a bar gets the
//! higher "bar" click, every other step the "beat" click. A click keeps
//! sounding across chunk boundaries until its sample buffer runs out, and is
//! added on top of whatever the chunk already holds.

use crate::engine::tempo::TempoMap;
use crate::types::{db_to_gain, AtomicF32, AudioChunk, CHUNK_SAMPLES, SAMPLE_RATE};
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};

/// Length of a synthesized click
const CLICK_MS: f32 = 40.0;

const BAR_CLICK_HZ: f32 = 1760.0;
const BEAT_CLICK_HZ: f32 = 1320.0;
const CLICK_AMPLITUDE: f32 = 0.5;

/// Host-adjustable metronome settings
#[derive(Debug)]
pub struct MetronomeParams {
    enabled: AtomicBool,
    gain_db: AtomicF32,
}

impl MetronomeParams {
    pub fn new(enabled: bool, gain_db: f32) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            gain_db: AtomicF32::new(gain_db),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Flip the enabled flag, returning the new value
    pub fn toggle(&self) -> bool {
        !self.enabled.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db.load()
    }

    pub fn set_gain_db(&self, gain_db: f32) {
        self.gain_db.store(gain_db);
    }
}

impl Default for MetronomeParams {
    fn default() -> Self {
        Self::new(false, 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Click {
    Bar,
    Beat,
}

/// Decaying sine burst
fn synthesize_click(frequency: f32) -> Vec<f32> {
    let length = (CLICK_MS / 1000.0 * SAMPLE_RATE as f32) as usize;
    let decay = 5.0 / length as f32;
    (0..length)
        .map(|n| {
            let t = n as f32 / SAMPLE_RATE as f32;
            CLICK_AMPLITUDE * (TAU * frequency * t).sin() * (-decay * n as f32).exp()
        })
        .collect()
}

/// Click playback state. Lives inside the mixer pipeline.
#[derive(Debug, Clone)]
pub struct Metronome {
    bar_click: Vec<f32>,
    beat_click: Vec<f32>,
    current: Click,
    /// Read position in the current click; past the end means silent
    play_pos: usize,
}

impl Metronome {
    pub fn new() -> Self {
        let bar_click = synthesize_click(BAR_CLICK_HZ);
        let play_pos = bar_click.len();
        Self {
            bar_click,
            beat_click: synthesize_click(BEAT_CLICK_HZ),
            current: Click::Bar,
            play_pos,
        }
    }

    fn click_samples(&self) -> &[f32] {
        match self.current {
            Click::Bar => &self.bar_click,
            Click::Beat => &self.beat_click,
        }
    }

    /// Silence any click in progress
    pub fn reset(&mut self) {
        self.play_pos = usize::MAX;
    }

    /// Musical step at `sample`, `None` where the tempo map has no beat grid
    fn step_key(map: &TempoMap, sample: u32) -> Option<(u32, u32)> {
        if map.is_before_start(sample) {
            return None;
        }
        let position = map.current_position(sample);
        Some((position.bar, position.step))
    }

    /// Trigger clicks for the chunk starting at `first_sample` and mix them in
    pub fn process(&mut self, map: &TempoMap, first_sample: u32, gain_db: f32, chunk: &mut AudioChunk) {
        let gain = db_to_gain(gain_db);
        let last_sample = first_sample.saturating_add(CHUNK_SAMPLES as u32 - 1);

        let mut previous = if first_sample == 0 {
            None
        } else {
            Self::step_key(map, first_sample - 1)
        };
        // Only scan sample by sample when a step starts inside this chunk
        let boundary_in_chunk = first_sample == 0 || Self::step_key(map, last_sample) != previous;

        for i in 0..CHUNK_SAMPLES {
            if boundary_in_chunk {
                let sample = first_sample.saturating_add(i as u32);
                let key = Self::step_key(map, sample);
                if let Some((_, step)) = key {
                    if key != previous {
                        self.current = if step == 1 { Click::Bar } else { Click::Beat };
                        self.play_pos = 0;
                    }
                }
                previous = key;
            }

            if let Some(&value) = self.click_samples().get(self.play_pos) {
                chunk.left[i] += value * gain;
                chunk.right[i] += value * gain;
                self.play_pos += 1;
            }
        }
    }
}

impl Default for Metronome {
    fn default() -> Self {
        Self::new()
    }
}
