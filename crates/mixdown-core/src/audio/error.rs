//! Output backend errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No default audio output device")]
    NoDefaultDevice,

    #[error("Failed to query device config: {0}")]
    ConfigError(String),

    /// The device offers no f32 configuration at the engine sample rate
    #[error("No output configuration with f32 samples at {sample_rate} Hz")]
    UnsupportedConfig { sample_rate: u32 },

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),
}

pub type AudioResult<T> = Result<T, AudioError>;
