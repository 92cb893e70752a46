//! Stem loading error types

use thiserror::Error;

/// Errors that can occur while fetching or decoding a stem
///
/// None of these reach the audio path: a failed stem is flagged and plays
/// silence until the host re-creates it.
#[derive(Error, Debug)]
pub enum StemError {
    /// The fetcher could not deliver the encoded bytes
    #[error("Failed to fetch stem {path}: {reason}")]
    Fetch { path: String, reason: String },

    /// The container or codec could not be read
    #[error("Failed to decode stem: {0}")]
    Decode(String),

    /// The stream ended before the declared number of frames
    #[error("Stem is shorter than declared: expected {expected} frames, decoded {found}")]
    LengthMismatch { expected: u32, found: u32 },
}

/// Result type for stem loading
pub type StemResult<T> = Result<T, StemError>;
