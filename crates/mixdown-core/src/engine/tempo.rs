//! Tempo map - sample index ↔ musical position
//!
//! Two modes:
//!
//! - **Stable**: one BPM and time signature for the whole track. Positions
//!   are a closed-form division by samples-per-beat.
//! - **Varying**: a table of [`TempoTag`]s sorted by sample. Between two
//!   consecutive tags the bar count grows linearly with the sample index,
//!   so each segment has a constant BPM of its own.
//!
//! ```text
//!   tag[0]            tag[1]                 tag[2]
//!   │  bar 1, 4/4      │  bar 9, 3/4           │  bar 17
//!   ├──────────────────┼───────────────────────┼────────────► samples
//!   segment 1          segment 2               (extrapolated)
//! ```
//!
//! Segment lookup in varying mode checks the table bounds first, then the
//! segment resolved by the previous query (the mixer asks for consecutive
//! chunks), and only then binary searches. The cached segment is a hint: a
//! stale value only costs the search.
//!
//! Bars, steps and ticks are 1-indexed. A step is one beat and is divided
//! into [`TICKS_PER_STEP`] ticks. Ticks are counted from the start of the
//! bar, so in 4/4 they run 1..=16.

use crate::types::{SongPosition, TempoTag, SAMPLE_RATE};
use std::cell::Cell;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Tick subdivisions per step
pub const TICKS_PER_STEP: u32 = 4;

/// Tempo used until the host sets one
pub const DEFAULT_BPM: f64 = 120.0;

/// Time signature numerator used until the host sets one
pub const DEFAULT_TIME_SIGNATURE: u32 = 4;

/// Rejected tempo definitions. The previous tempo stays in effect.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TempoError {
    #[error("BPM must be a positive finite number, got {0}")]
    InvalidBpm(f64),

    #[error("Time signature numerator must be positive (tag {index})")]
    ZeroTimeSignature { index: usize },

    #[error("Varying tempo needs at least 2 tags, got {0}")]
    TooFewTags(usize),

    #[error("Tempo tags must be strictly ascending by sample (tag {index})")]
    Unsorted { index: usize },

    #[error("Tempo tag bars must not decrease (tag {index})")]
    BarsDecreasing { index: usize },
}

/// Samples per beat at the system sample rate
pub fn samples_per_beat(bpm: f64) -> f64 {
    SAMPLE_RATE as f64 * 60.0 / bpm
}

/// Split a fractional step count into a position, starting from `first_bar`
fn position_from_steps(step_position: f64, time_signature: u32, first_bar: u32) -> SongPosition {
    let whole_ticks = (step_position * TICKS_PER_STEP as f64).floor().max(0.0) as u64;
    let whole_steps = whole_ticks / TICKS_PER_STEP as u64;
    let whole_bars = whole_steps / time_signature as u64;

    SongPosition {
        bar: first_bar.saturating_add(whole_bars.min(u32::MAX as u64) as u32),
        step: (whole_steps % time_signature as u64) as u32 + 1,
        tick: (whole_ticks - whole_bars * time_signature as u64 * TICKS_PER_STEP as u64) as u32
            + 1,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TempoMode {
    Stable {
        bpm: f64,
        time_signature: u32,
        samples_per_beat: f64,
    },
    Varying(Vec<TempoTag>),
}

// ────────────────────────────────────────────────────────────────────────────
// TempoMap
// ────────────────────────────────────────────────────────────────────────────

/// Unsynchronized tempo model. See [`Tempo`] for the shared wrapper.
#[derive(Debug, Clone)]
pub struct TempoMap {
    mode: TempoMode,
    /// Index of the end tag of the last resolved segment
    segment_hint: Cell<usize>,
}

impl TempoMap {
    /// Constant tempo for the whole track
    pub fn stable(bpm: f64, time_signature: u32) -> Result<Self, TempoError> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(TempoError::InvalidBpm(bpm));
        }
        if time_signature == 0 {
            return Err(TempoError::ZeroTimeSignature { index: 0 });
        }

        Ok(Self {
            mode: TempoMode::Stable {
                bpm,
                time_signature,
                samples_per_beat: samples_per_beat(bpm),
            },
            segment_hint: Cell::new(0),
        })
    }

    /// Piecewise tempo from a tag table
    pub fn varying(tags: Vec<TempoTag>) -> Result<Self, TempoError> {
        if tags.len() < 2 {
            return Err(TempoError::TooFewTags(tags.len()));
        }
        for (index, tag) in tags.iter().enumerate() {
            if tag.time_signature == 0 {
                return Err(TempoError::ZeroTimeSignature { index });
            }
        }
        for (i, pair) in tags.windows(2).enumerate() {
            if pair[1].sample <= pair[0].sample {
                return Err(TempoError::Unsorted { index: i + 1 });
            }
            if pair[1].bar < pair[0].bar {
                return Err(TempoError::BarsDecreasing { index: i + 1 });
            }
        }

        Ok(Self {
            mode: TempoMode::Varying(tags),
            segment_hint: Cell::new(0),
        })
    }

    pub fn is_stable(&self) -> bool {
        matches!(self.mode, TempoMode::Stable { .. })
    }

    pub fn is_varying(&self) -> bool {
        matches!(self.mode, TempoMode::Varying(_))
    }

    /// Tags of a varying map, empty in stable mode
    pub fn tags(&self) -> &[TempoTag] {
        match &self.mode {
            TempoMode::Varying(tags) => tags,
            TempoMode::Stable { .. } => &[],
        }
    }

    /// True when `position` precedes the first tag of a varying map
    pub fn is_before_start(&self, position: u32) -> bool {
        match &self.mode {
            TempoMode::Varying(tags) => position < tags[0].sample,
            TempoMode::Stable { .. } => false,
        }
    }

    pub fn current_bpm(&self, position: u32) -> f64 {
        match &self.mode {
            TempoMode::Stable { bpm, .. } => *bpm,
            TempoMode::Varying(tags) => {
                let segment = self.find_segment(tags, position).max(1);
                let (start, end) = (&tags[segment - 1], &tags[segment]);
                let step_delta = (end.bar - start.bar) as f64 * start.time_signature as f64;
                let sample_delta = (end.sample - start.sample) as f64;
                step_delta / sample_delta * SAMPLE_RATE as f64 * 60.0
            }
        }
    }

    pub fn current_time_signature(&self, position: u32) -> u32 {
        match &self.mode {
            TempoMode::Stable { time_signature, .. } => *time_signature,
            TempoMode::Varying(tags) => {
                let segment = self.find_segment(tags, position).max(1);
                tags[segment - 1].time_signature
            }
        }
    }

    pub fn current_position(&self, position: u32) -> SongPosition {
        match &self.mode {
            TempoMode::Stable {
                time_signature,
                samples_per_beat,
                ..
            } => position_from_steps(position as f64 / samples_per_beat, *time_signature, 1),
            TempoMode::Varying(tags) => {
                let segment = self.find_segment(tags, position);
                if segment == 0 {
                    // Before the first tag: hold at its downbeat
                    return SongPosition::new(tags[0].bar, 1, 1);
                }

                let (start, end) = (&tags[segment - 1], &tags[segment]);
                let sample_delta = (end.sample - start.sample) as f64;
                let step_delta = (end.bar - start.bar) as f64 * start.time_signature as f64;
                let segment_sample = (position - start.sample) as f64;

                position_from_steps(
                    segment_sample / sample_delta * step_delta,
                    start.time_signature,
                    start.bar,
                )
            }
        }
    }

    /// First sample of `bar`
    pub fn bar_sample(&self, bar: u32) -> u32 {
        match &self.mode {
            TempoMode::Stable {
                time_signature,
                samples_per_beat,
                ..
            } => {
                let beats = bar.saturating_sub(1) as f64 * *time_signature as f64;
                (beats * samples_per_beat).round() as u32
            }
            TempoMode::Varying(tags) => {
                let Some(found) = tags.iter().rposition(|tag| tag.bar <= bar) else {
                    return tags[0].sample;
                };
                // Past the last tag, extrapolate with the last segment
                let start = found.min(tags.len() - 2);
                let (a, b) = (&tags[start], &tags[start + 1]);

                let bar_delta = (b.bar - a.bar) as f64;
                if bar_delta == 0.0 {
                    return tags[found].sample;
                }
                let sample_delta = (b.sample - a.sample) as f64;
                let sample = (bar - a.bar) as f64 / bar_delta * sample_delta + a.sample as f64;
                sample.round() as u32
            }
        }
    }

    /// Index of the segment's end tag, or 0 when `position` precedes the table
    fn find_segment(&self, tags: &[TempoTag], position: u32) -> usize {
        let last = tags.len() - 1;

        if position < tags[0].sample {
            self.segment_hint.set(0);
            return 0;
        }
        if position >= tags[last].sample {
            self.segment_hint.set(last);
            return last;
        }

        let hint = self.segment_hint.get();
        if hint > 0
            && hint <= last
            && position >= tags[hint - 1].sample
            && position < tags[hint].sample
        {
            return hint;
        }

        // First tag strictly after position; bounds above keep it in 1..=last
        let segment = tags.partition_point(|tag| tag.sample <= position);
        self.segment_hint.set(segment);
        segment
    }
}

impl Default for TempoMap {
    fn default() -> Self {
        Self {
            mode: TempoMode::Stable {
                bpm: DEFAULT_BPM,
                time_signature: DEFAULT_TIME_SIGNATURE,
                samples_per_beat: samples_per_beat(DEFAULT_BPM),
            },
            segment_hint: Cell::new(0),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tempo (shared)
// ────────────────────────────────────────────────────────────────────────────

/// Tempo map behind a single mutex, queried by both the control thread and
/// the mixer thread. No query does more than a binary search under the lock.
#[derive(Debug, Default)]
pub struct Tempo {
    map: Mutex<TempoMap>,
}

impl Tempo {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TempoMap> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run several queries against one consistent map
    pub fn with_map<R>(&self, f: impl FnOnce(&TempoMap) -> R) -> R {
        f(&self.lock())
    }

    pub fn set_stable_bpm(&self, bpm: f64, time_signature: u32) -> Result<(), TempoError> {
        let map = TempoMap::stable(bpm, time_signature)?;
        *self.lock() = map;
        log::debug!("Tempo: stable {} BPM, {}/4", bpm, time_signature);
        Ok(())
    }

    pub fn set_varying_bpm(&self, tags: Vec<TempoTag>) -> Result<(), TempoError> {
        let count = tags.len();
        let map = TempoMap::varying(tags)?;
        *self.lock() = map;
        log::debug!("Tempo: varying map with {} tags", count);
        Ok(())
    }

    pub fn bpm_stable(&self) -> bool {
        self.lock().is_stable()
    }

    pub fn bpm_varying(&self) -> bool {
        self.lock().is_varying()
    }

    pub fn current_bpm(&self, position: u32) -> f64 {
        self.lock().current_bpm(position)
    }

    pub fn current_time_signature(&self, position: u32) -> u32 {
        self.lock().current_time_signature(position)
    }

    pub fn current_position(&self, position: u32) -> SongPosition {
        self.lock().current_position(position)
    }

    pub fn bar_sample(&self, bar: u32) -> u32 {
        self.lock().bar_sample(bar)
    }
}
