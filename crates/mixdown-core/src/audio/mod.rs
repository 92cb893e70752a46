//! Host audio output
//!
//! [`ChunkReader`] turns the engine's fixed 128-frame chunks into whatever
//! buffer size the host callback asks for. With the `cpal-backend` feature,
//! [`start_output`] wires it to the default output device.

mod error;
mod output;

#[cfg(feature = "cpal-backend")]
mod cpal_backend;

pub use error::{AudioError, AudioResult};
pub use output::ChunkReader;

#[cfg(feature = "cpal-backend")]
pub use cpal_backend::{start_output, OutputHandle};
