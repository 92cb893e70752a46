//! cpal output stream fed from the engine's audio buffer
//!
//! ```text
//!   mixer thread ──push──► AudioBuffer ──pop──► ChunkReader ──► cpal callback ──► device
//! ```
//!
//! The callback owns its [`ChunkReader`] outright, so no lock is taken on
//! the real-time thread beyond the buffer's own slot `try_lock`.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};

use super::error::{AudioError, AudioResult};
use super::output::ChunkReader;
use crate::engine::AudioBuffer;
use crate::types::SAMPLE_RATE;

/// Keeps the output stream alive. Drop it to stop audio.
pub struct OutputHandle {
    _stream: Stream,
    device_name: String,
    channels: u16,
}

impl OutputHandle {
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl std::fmt::Debug for OutputHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputHandle")
            .field("device_name", &self.device_name)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

/// Pick an f32 config at the engine rate, preferring stereo or wider
fn output_config(device: &cpal::Device) -> AudioResult<StreamConfig> {
    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&SAMPLE_RATE))
        .collect();

    let best = supported
        .iter()
        .find(|c| c.channels() >= 2)
        .or_else(|| supported.first())
        .ok_or(AudioError::UnsupportedConfig {
            sample_rate: SAMPLE_RATE,
        })?;

    Ok(best.clone().with_sample_rate(SampleRate(SAMPLE_RATE)).config())
}

/// Open the default output device and start pulling from `buffer`
pub fn start_output(buffer: Arc<AudioBuffer>) -> AudioResult<OutputHandle> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or(AudioError::NoDefaultDevice)?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let config = output_config(&device)?;
    let channels = config.channels;
    log::info!(
        "Audio output: {} ({} channels, {} Hz)",
        device_name,
        channels,
        config.sample_rate.0
    );

    let mut reader = ChunkReader::new(buffer);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                reader.fill_interleaved(data, channels as usize);
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

    Ok(OutputHandle {
        _stream: stream,
        device_name,
        channels,
    })
}
