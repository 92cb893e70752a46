//! Stems - loading, mute/solo and mixing of the individual source tracks
//!
//! A stem is one independently mixed track (vocals, drums, ...) placed on
//! the timeline at a signed offset with its own gain and pan. The
//! [`StemManager`] owns the stem set; [`StemSource`] and
//! [`WaveformRenderer`] are the pluggable collaborators it runs on its
//! worker pool.

mod error;
mod manager;
mod mute_solo;
mod source;
mod waveform;

pub use error::{StemError, StemResult};
pub use manager::StemManager;
pub use mute_solo::MuteSolo;
pub use source::{FileFetcher, RawPcmDecoder, StemDecoder, StemFetcher, StemSource, SymphoniaDecoder};
pub use waveform::{PeakWaveformRenderer, WaveformImage, WaveformRenderer, WaveformSettings};
