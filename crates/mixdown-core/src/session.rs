//! Session files - a track's stems, tempo and length in one YAML document
//!
//! ```yaml
//! track_length: 441000
//! tempo:
//!   mode: varying
//!   tags:
//!     - { sample: 0, bar: 1, time_signature: 4 }
//!     - { sample: 88200, bar: 2, time_signature: 4 }
//! stems:
//!   - { id: 1, path: drums.ogg, samples: 441000 }
//!   - { id: 2, path: vocals.ogg, samples: 400000, offset: -41000, gain_db: -3.0, pan: 0.2 }
//! metronome: true
//! ```
//!
//! `tempo` defaults to 120 BPM in 4, `stems` to none.

use crate::config::{read_yaml, save_config};
use crate::engine::{Mixer, DEFAULT_BPM, DEFAULT_TIME_SIGNATURE};
use crate::types::{StemInfo, TempoTag};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SessionTempo {
    Stable { bpm: f64, time_signature: u32 },
    Varying { tags: Vec<TempoTag> },
}

impl Default for SessionTempo {
    fn default() -> Self {
        SessionTempo::Stable {
            bpm: DEFAULT_BPM,
            time_signature: DEFAULT_TIME_SIGNATURE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Length in samples; playback stops here
    pub track_length: u32,
    #[serde(default)]
    pub tempo: SessionTempo,
    #[serde(default)]
    pub stems: Vec<StemInfo>,
    #[serde(default)]
    pub metronome: bool,
}

impl Session {
    pub fn load(path: &Path) -> Result<Self> {
        read_yaml(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_config(self, path)
    }

    /// Push the session into a mixer
    ///
    /// Tempo is validated first, so a rejected tempo map leaves the mixer
    /// untouched.
    pub fn apply(&self, mixer: &Mixer) -> Result<()> {
        match &self.tempo {
            SessionTempo::Stable { bpm, time_signature } => mixer
                .set_stable_bpm(*bpm, *time_signature)
                .context("Invalid stable tempo")?,
            SessionTempo::Varying { tags } => mixer
                .set_varying_bpm(tags.clone())
                .context("Invalid tempo map")?,
        }

        mixer.set_track_length(self.track_length);
        mixer.update_stem_info(&self.stems);
        mixer.set_metronome_enabled(self.metronome);
        log::info!(
            "Session applied: {} stems, {} samples",
            self.stems.len(),
            self.track_length
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::stems::{PeakWaveformRenderer, StemSource};
    use std::sync::Arc;

    const VARYING: &str = "\
track_length: 88200
tempo:
  mode: varying
  tags:
    - { sample: 0, bar: 1, time_signature: 4 }
    - { sample: 88200, bar: 3, time_signature: 3 }
stems:
  - { id: 4, path: bass.wav, samples: 88200, offset: -100, pan: -0.5 }
metronome: true
";

    fn mixer() -> Mixer {
        Mixer::manual(
            &EngineConfig::default(),
            StemSource::files(None),
            Arc::new(PeakWaveformRenderer::default()),
        )
    }

    #[test]
    fn test_minimal_session_uses_defaults() {
        let session: Session = serde_yaml::from_str("track_length: 1000\n").unwrap();
        assert_eq!(session.tempo, SessionTempo::default());
        assert!(session.stems.is_empty());
        assert!(!session.metronome);
    }

    #[test]
    fn test_varying_session_parses() {
        let session: Session = serde_yaml::from_str(VARYING).unwrap();
        let SessionTempo::Varying { tags } = &session.tempo else {
            panic!("expected varying tempo");
        };
        assert_eq!(tags[1], TempoTag::new(88200, 3, 3));
        assert_eq!(session.stems[0].offset, -100);
        assert_eq!(session.stems[0].gain_db, 0.0);
        assert!(session.metronome);
    }

    #[test]
    fn test_apply_configures_mixer() {
        let session: Session = serde_yaml::from_str(VARYING).unwrap();
        let mixer = mixer();
        session.apply(&mixer).unwrap();

        assert!(mixer.bpm_varying());
        assert_eq!(mixer.track_length(), 88200);
        assert_eq!(mixer.count_stems(), 1);
        assert!(mixer.metronome_enabled());
    }

    #[test]
    fn test_invalid_tempo_is_rejected_before_anything_changes() {
        let session = Session {
            track_length: 5000,
            tempo: SessionTempo::Stable {
                bpm: -1.0,
                time_signature: 4,
            },
            stems: Vec::new(),
            metronome: true,
        };
        let mixer = mixer();
        assert!(session.apply(&mixer).is_err());
        assert_eq!(mixer.track_length(), 0);
        assert!(!mixer.metronome_enabled());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.yaml");
        let session: Session = serde_yaml::from_str(VARYING).unwrap();

        session.save(&path).unwrap();
        assert_eq!(Session::load(&path).unwrap(), session);
        assert!(Session::load(&dir.path().join("missing.yaml")).is_err());
    }
}
