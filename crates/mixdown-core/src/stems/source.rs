//! Fetch and decode collaborators for stem loading
//!
//! A stem is loaded in two blocking steps that run on the stem worker pool:
//!
//! 1. [`StemFetcher`] turns the stem's path into encoded bytes
//!    (local files by default; hosts can plug in a network transport).
//! 2. [`StemDecoder`] turns those bytes into interleaved stereo `i16` PCM
//!    holding exactly the declared number of frames.
//!
//! Both are traits so tests and hosts can substitute their own.

use super::error::{StemError, StemResult};
use crate::types::SAMPLE_RATE;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Delivers the encoded bytes of a stem
pub trait StemFetcher: Send + Sync {
    fn fetch(&self, path: &str) -> StemResult<Vec<u8>>;
}

/// Decodes encoded bytes to interleaved stereo PCM
pub trait StemDecoder: Send + Sync {
    /// Produce exactly `frames` stereo frames (`2 × frames` samples)
    ///
    /// Frames beyond the declared count are dropped; a shorter stream is
    /// [`StemError::LengthMismatch`].
    fn decode(&self, bytes: &[u8], frames: u32) -> StemResult<Vec<i16>>;
}

// ────────────────────────────────────────────────────────────────────────────
// Fetchers
// ────────────────────────────────────────────────────────────────────────────

/// Reads stems from the local filesystem
///
/// Relative paths are resolved against `base_dir` when one is set.
#[derive(Debug, Clone, Default)]
pub struct FileFetcher {
    base_dir: Option<PathBuf>,
}

impl FileFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        match &self.base_dir {
            Some(base) => base.join(path),
            None => PathBuf::from(path),
        }
    }
}

impl StemFetcher for FileFetcher {
    fn fetch(&self, path: &str) -> StemResult<Vec<u8>> {
        let resolved = self.resolve(path);
        std::fs::read(&resolved).map_err(|e| StemError::Fetch {
            path: resolved.display().to_string(),
            reason: e.to_string(),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Decoders
// ────────────────────────────────────────────────────────────────────────────

/// Container/codec decoder backed by symphonia (Ogg Vorbis, WAV, FLAC)
///
/// Mono sources are duplicated to both channels; extra channels beyond the
/// first two are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaDecoder;

impl StemDecoder for SymphoniaDecoder {
    fn decode(&self, bytes: &[u8], frames: u32) -> StemResult<Vec<i16>> {
        let target = frames as usize * 2;
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

        let probed = symphonia::default::get_probe()
            .format(
                &Hint::new(),
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| StemError::Decode(e.to_string()))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| StemError::Decode("No audio track found".to_string()))?;
        let track_id = track.id;

        if let Some(rate) = track.codec_params.sample_rate {
            if rate != SAMPLE_RATE {
                log::warn!(
                    "Stem decoded at {} Hz, engine runs at {} Hz (no resampling)",
                    rate,
                    SAMPLE_RATE
                );
            }
        }

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| StemError::Decode(e.to_string()))?;

        let mut pcm: Vec<i16> = Vec::with_capacity(target);
        let mut sample_buf: Option<SampleBuffer<i16>> = None;

        while pcm.len() < target {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(e) => return Err(StemError::Decode(e.to_string())),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::warn!("Skipping corrupt stem packet: {}", e);
                    continue;
                }
                Err(e) => return Err(StemError::Decode(e.to_string())),
            };

            let spec = *decoded.spec();
            let capacity = decoded.capacity() as u64;
            let needs_alloc = sample_buf
                .as_ref()
                .map_or(true, |buf| (buf.capacity() as u64) < capacity * spec.channels.count() as u64);
            if needs_alloc {
                sample_buf = Some(SampleBuffer::new(capacity, spec));
            }
            let Some(buf) = sample_buf.as_mut() else {
                continue;
            };
            buf.copy_interleaved_ref(decoded);

            let channels = spec.channels.count().max(1);
            for frame in buf.samples().chunks_exact(channels) {
                if pcm.len() >= target {
                    break;
                }
                let left = frame[0];
                let right = frame.get(1).copied().unwrap_or(left);
                pcm.push(left);
                pcm.push(right);
            }
        }

        if pcm.len() < target {
            return Err(StemError::LengthMismatch {
                expected: frames,
                found: (pcm.len() / 2) as u32,
            });
        }
        Ok(pcm)
    }
}

/// Raw interleaved little-endian `i16` stereo, no container
#[derive(Debug, Clone, Copy, Default)]
pub struct RawPcmDecoder;

impl StemDecoder for RawPcmDecoder {
    fn decode(&self, bytes: &[u8], frames: u32) -> StemResult<Vec<i16>> {
        let target = frames as usize * 2;
        let available = bytes.len() / 2;
        if available < target {
            return Err(StemError::LengthMismatch {
                expected: frames,
                found: (available / 2) as u32,
            });
        }

        Ok(bytes
            .chunks_exact(2)
            .take(target)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// StemSource
// ────────────────────────────────────────────────────────────────────────────

/// Fetcher + decoder pair used by the stem manager's background tasks
#[derive(Clone)]
pub struct StemSource {
    fetcher: Arc<dyn StemFetcher>,
    decoder: Arc<dyn StemDecoder>,
    /// Extra fetch attempts after the first failure
    retries: u32,
    retry_delay: Duration,
}

impl StemSource {
    pub fn new(fetcher: Arc<dyn StemFetcher>, decoder: Arc<dyn StemDecoder>) -> Self {
        Self {
            fetcher,
            decoder,
            retries: 0,
            retry_delay: Duration::from_millis(250),
        }
    }

    /// Files from `base_dir` decoded with symphonia
    pub fn files(base_dir: Option<PathBuf>) -> Self {
        let fetcher = match base_dir {
            Some(dir) => FileFetcher::with_base_dir(dir),
            None => FileFetcher::new(),
        };
        Self::new(Arc::new(fetcher), Arc::new(SymphoniaDecoder))
    }

    pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = delay;
        self
    }

    /// Fetch, retrying up to the configured count. Returns the last error.
    pub fn fetch(&self, path: &str) -> StemResult<Vec<u8>> {
        let mut attempt = 0;
        loop {
            match self.fetcher.fetch(path) {
                Ok(bytes) => return Ok(bytes),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    log::warn!(
                        "Fetching {} failed ({}), retry {}/{}",
                        path,
                        e,
                        attempt,
                        self.retries
                    );
                    thread::sleep(self.retry_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn decode(&self, bytes: &[u8], frames: u32) -> StemResult<Vec<i16>> {
        self.decoder.decode(bytes, frames)
    }
}

impl std::fmt::Debug for StemSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StemSource")
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn write_wav(path: &std::path::Path, channels: u16, frames: u32) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for n in 0..frames {
            for c in 0..channels {
                writer.write_sample((n as i16) * if c == 0 { 1 } else { -1 }).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_symphonia_decodes_stereo_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stem.wav");
        write_wav(&path, 2, 1000);

        let bytes = std::fs::read(&path).unwrap();
        let pcm = SymphoniaDecoder.decode(&bytes, 1000).unwrap();

        assert_eq!(pcm.len(), 2000);
        assert_eq!(&pcm[..6], &[0, 0, 1, -1, 2, -2]);
        assert_eq!(pcm[1998], 999);
    }

    #[test]
    fn test_symphonia_truncates_and_duplicates_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, 1, 500);

        let bytes = std::fs::read(&path).unwrap();
        let pcm = SymphoniaDecoder.decode(&bytes, 300).unwrap();

        assert_eq!(pcm.len(), 600, "frames past the declared count are dropped");
        assert_eq!(pcm[10], 5);
        assert_eq!(pcm[11], 5, "mono is copied to the right channel");
    }

    #[test]
    fn test_short_stream_is_length_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        write_wav(&path, 2, 100);

        let bytes = std::fs::read(&path).unwrap();
        let err = SymphoniaDecoder.decode(&bytes, 200).unwrap_err();
        assert!(matches!(
            err,
            StemError::LengthMismatch {
                expected: 200,
                found: 100
            }
        ));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let err = SymphoniaDecoder.decode(b"definitely not audio", 10).unwrap_err();
        assert!(matches!(err, StemError::Decode(_)));
    }

    #[test]
    fn test_raw_pcm_decoder() {
        let bytes: Vec<u8> = [1i16, -1, 300, -300, 7, 7]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();

        assert_eq!(RawPcmDecoder.decode(&bytes, 2).unwrap(), vec![1, -1, 300, -300]);
        assert!(matches!(
            RawPcmDecoder.decode(&bytes, 4),
            Err(StemError::LengthMismatch { expected: 4, found: 3 })
        ));
    }

    #[test]
    fn test_file_fetcher_resolves_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.raw"), [1u8, 2, 3]).unwrap();

        let fetcher = FileFetcher::with_base_dir(dir.path());
        assert_eq!(fetcher.fetch("a.raw").unwrap(), vec![1, 2, 3]);
        assert!(matches!(fetcher.fetch("missing.raw"), Err(StemError::Fetch { .. })));
    }

    struct FlakyFetcher {
        failures_left: AtomicU32,
    }

    impl StemFetcher for FlakyFetcher {
        fn fetch(&self, path: &str) -> StemResult<Vec<u8>> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(StemError::Fetch {
                    path: path.to_string(),
                    reason: "503".to_string(),
                });
            }
            Ok(vec![0; 4])
        }
    }

    #[test]
    fn test_fetch_retries_then_gives_up() {
        let flaky = Arc::new(FlakyFetcher {
            failures_left: AtomicU32::new(2),
        });
        let source = StemSource::new(flaky.clone(), Arc::new(RawPcmDecoder))
            .with_retries(2, Duration::from_millis(1));
        assert!(source.fetch("x").is_ok());

        flaky.failures_left.store(3, Ordering::SeqCst);
        assert!(source.fetch("x").is_err());
    }
}
