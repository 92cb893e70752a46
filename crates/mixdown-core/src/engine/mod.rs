//! Audio engine - mixer, output buffer and the per-chunk DSP
//!
//! - Mixer: transport, mixdown pipeline and the mixer thread
//! - AudioBuffer: chunk queue between the mixer thread and the audio callback
//! - Tempo: stable or varying tempo map, musical position queries
//! - Metronome: bar/beat clicks following the tempo map
//! - PeakMeter: 4× oversampled true-peak meter
//! - Limiter: soft-knee output limiter

mod audio_buffer;
mod fir;
pub(crate) mod gc;
mod limiter;
mod metronome;
mod mixer;
mod peak_meter;
mod tempo;

pub use audio_buffer::*;
pub use fir::FirFilter;
pub use limiter::*;
pub use metronome::*;
pub use mixer::*;
pub use peak_meter::*;
pub use tempo::*;
