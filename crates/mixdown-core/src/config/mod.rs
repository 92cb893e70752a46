//! Engine configuration
//!
//! Everything the engine reads at construction lives in [`EngineConfig`],
//! stored as YAML (by default at `<config dir>/mixdown/config.yaml`).
//! Every field has a default, so a partial file only overrides what it names:
//!
//! ```yaml
//! buffer_samples: 4096
//! limiter:
//!   threshold_db: -0.3
//! stems:
//!   base_dir: /srv/stems
//! ```
//!
//! Limiter and metronome values are starting points only; both can be
//! changed at runtime through the [`Mixer`](crate::engine::Mixer).

mod io;
mod paths;

pub use io::{load_config, read_yaml, save_config};
pub use paths::{config_dir, default_config_path};

use crate::engine::LimiterSettings;
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::stems::WaveformSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Samples buffered between the mixer thread and the audio callback.
    /// Rounded up to whole 128-sample chunks. Larger values survive longer
    /// scheduling hiccups at the cost of control latency.
    pub buffer_samples: usize,

    pub limiter: LimiterSettings,

    pub metronome: MetronomeSettings,

    pub stems: StemsConfig,

    pub waveform: WaveformSettings,

    /// Undelivered engine events kept before new ones are dropped
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_samples: 2048,
            limiter: LimiterSettings::default(),
            metronome: MetronomeSettings::default(),
            stems: StemsConfig::default(),
            waveform: WaveformSettings::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Initial metronome state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeSettings {
    pub enabled: bool,
    pub gain_db: f32,
}

/// Stem loading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StemsConfig {
    /// Fetch attempts after the first failure before a stem is marked errored
    pub download_retries: u32,

    /// Pause between fetch attempts
    pub retry_delay_ms: u64,

    /// Size of the background loading pool
    pub worker_threads: usize,

    /// Relative stem paths are resolved against this directory
    pub base_dir: Option<PathBuf>,
}

impl StemsConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for StemsConfig {
    fn default() -> Self {
        Self {
            download_retries: 3,
            retry_delay_ms: 250,
            worker_threads: 4,
            base_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.buffer_samples, 2048);
        assert_eq!(config.event_capacity, 1024);
        assert_eq!(config.stems.download_retries, 3);
        assert_eq!(config.stems.worker_threads, 4);
        assert!(!config.metronome.enabled);
        assert!(config.limiter.ratio.is_infinite());
    }

    #[test]
    fn test_partial_yaml_overrides_only_named_fields() {
        let yaml = "buffer_samples: 4096\nlimiter:\n  threshold_db: -3.0\nstems:\n  base_dir: /srv/stems\n";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.buffer_samples, 4096);
        assert_eq!(config.limiter.threshold_db, -3.0);
        assert_eq!(config.limiter.attack_ms, 5.0);
        assert_eq!(config.stems.base_dir, Some(PathBuf::from("/srv/stems")));
        assert_eq!(config.stems.worker_threads, 4);
        assert_eq!(config.waveform, WaveformSettings::default());
    }

    #[test]
    fn test_infinite_ratio_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut config = EngineConfig::default();
        config.metronome.enabled = true;

        save_config(&config, &path).unwrap();
        let loaded: EngineConfig = load_config(&path);
        assert_eq!(loaded, config);
    }
}
