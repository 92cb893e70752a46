//! Mixdown Core - real-time multi-track stem mixing engine
//!
//! ```text
//!   host ──► Mixer (control surface) ──► mixer thread ──► AudioBuffer ──► audio callback
//!                  │                        │
//!                  │                        ├── StemManager::render (stems at track position)
//!                  │                        ├── Metronome (follows the Tempo map)
//!                  │                        └── PeakMeter ──► Limiter
//!                  └──► events() ◄── state changes, stem and waveform notifications
//! ```
//!
//! Audio is produced in fixed chunks of [`CHUNK_SAMPLES`] stereo frames at
//! [`SAMPLE_RATE`]. Stems are fetched and decoded on a background pool and
//! join the mix as soon as they are ready.

pub mod audio;
pub mod config;
pub mod engine;
pub mod events;
pub mod session;
pub mod stems;
pub mod types;

pub use types::*;
