//! Waveform overview images for stems
//!
//! The overview spans the whole track: column `x` covers track samples
//! `[end(x-1), end(x))` with `end(x) = round((x + 1) / width × track_length)`.
//! Each column is filled between the highest and lowest sample value of both
//! channels in that range. Track sample `t` shows stem frame `t + offset`, the
//! same mapping the mixer uses, so a negative offset starts the stem later.
//! Long stretches of near-silence are drawn with a reduced alpha.
//!
//! Images are raw RGBA; encoding them (PNG or otherwise) is left to the host.

use serde::{Deserialize, Serialize};

/// Waveform appearance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveformSettings {
    pub width: u32,
    pub height: u32,
    /// RGBA fill colour
    pub color: [u8; 4],
    /// Alpha used for silent stretches
    pub silence_alpha: u8,
    /// Peak magnitude below which a column counts as silent
    pub silence_threshold: i16,
    /// Minimum silent stretch, in samples, before it is dimmed
    pub silence_min_length: u32,
}

impl Default for WaveformSettings {
    fn default() -> Self {
        Self {
            width: 4096,
            height: 128,
            color: [255, 255, 255, 255],
            silence_alpha: 128,
            silence_threshold: 256,
            silence_min_length: 100_000,
        }
    }
}

/// Raw RGBA image, row-major, 4 bytes per pixel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveformImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl WaveformImage {
    fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    /// RGBA value at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }

    fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.pixels[i..i + 4].copy_from_slice(&rgba);
    }
}

/// Renders a stem's PCM into an overview image
///
/// Runs on the stem worker pool, never on the mixer thread.
pub trait WaveformRenderer: Send + Sync {
    /// `pcm` is interleaved stereo; `offset` is the stem's track offset
    fn render(&self, offset: i32, track_length: u32, pcm: &[i16]) -> WaveformImage;
}

/// Min/max column renderer
#[derive(Debug, Clone, Default)]
pub struct PeakWaveformRenderer {
    settings: WaveformSettings,
}

impl PeakWaveformRenderer {
    pub fn new(settings: WaveformSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &WaveformSettings {
        &self.settings
    }

    fn column_end(&self, x: u32, track_length: u32) -> u32 {
        let fraction = (x + 1) as f64 / self.settings.width as f64;
        (fraction * track_length as f64).round() as u32
    }

    /// (high, low) over the stem samples under track range `[start, end)`
    fn column_peaks(start: u32, end: u32, offset: i32, pcm: &[i16]) -> Option<(i16, i16)> {
        let frames = (pcm.len() / 2) as i64;
        let first = (start as i64 + offset as i64).max(0);
        let last = (end as i64 + offset as i64).min(frames);
        if first >= last {
            return None;
        }

        let range = &pcm[first as usize * 2..last as usize * 2];
        let high = range.iter().copied().max()?;
        let low = range.iter().copied().min()?;
        Some((high, low))
    }

    fn peak_to_pixel(&self, peak: i16) -> u32 {
        let y = ((32767.0 - peak as f64) / 65535.0 * self.settings.height as f64).round() as u32;
        y.min(self.settings.height.saturating_sub(1))
    }
}

impl WaveformRenderer for PeakWaveformRenderer {
    fn render(&self, offset: i32, track_length: u32, pcm: &[i16]) -> WaveformImage {
        let WaveformSettings {
            width,
            height,
            color,
            silence_alpha,
            silence_threshold,
            silence_min_length,
        } = self.settings.clone();
        let mut image = WaveformImage::blank(width, height);
        if width == 0 || height == 0 {
            return image;
        }

        // Column extents and peaks first, silence needs to see whole runs
        let mut columns = Vec::with_capacity(width as usize);
        let mut start = 0;
        for x in 0..width {
            let end = self.column_end(x, track_length);
            columns.push((start, end, Self::column_peaks(start, end, offset, pcm)));
            start = end;
        }

        let is_quiet = |peaks: &Option<(i16, i16)>| match peaks {
            Some((high, low)) => {
                (*high as i32).abs() < silence_threshold as i32
                    && (*low as i32).abs() < silence_threshold as i32
            }
            None => false,
        };

        let mut x = 0;
        while x < columns.len() {
            // Extent of the quiet run starting here (empty if not quiet)
            let mut run_end = x;
            while run_end < columns.len() && is_quiet(&columns[run_end].2) {
                run_end += 1;
            }
            let dim = run_end > x && columns[run_end - 1].1 - columns[x].0 >= silence_min_length;
            let stop = run_end.max(x + 1);

            for (col, (_, _, peaks)) in columns.iter().enumerate().take(stop).skip(x) {
                let Some((high, low)) = *peaks else {
                    continue;
                };
                let mut rgba = color;
                if dim {
                    rgba[3] = silence_alpha;
                }
                for y in self.peak_to_pixel(high)..=self.peak_to_pixel(low) {
                    image.set_pixel(col as u32, y, rgba);
                }
            }
            x = stop;
        }

        image
    }
}
