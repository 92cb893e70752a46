//! True-peak meter
//!
//! Approximates the inter-sample peak of each channel following
//! ITU-R BS.1770-4 Annex 2:
//!
//! ```text
//!   x[n] ──┬─────────────────────────────┐
//!          │                             ▼
//!          └─► FIR(x[n]) FIR(0) FIR(0) FIR(0) ──► max |·| ──► decaying peak
//!              └──── 4× oversampled reconstruction ────┘
//! ```
//!
//! The -12.04 dB attenuation of the reference design is omitted because the
//! signal path is floating point and cannot clip inside the filter.
//!
//! The low-pass taps have unity DC gain, so every filter output is scaled by
//! the oversampling factor (×4, +12.04 dB) to restore the signal level. A
//! meter that feeds zero-stuffed samples through the same taps without this
//! makeup gain reads interpolated phases 12 dB low, and its true-peak value
//! collapses to the plain sample peak. Readings here are therefore at least
//! as high as such a meter's, never lower.

use crate::engine::fir::FirFilter;
use crate::types::{gain_to_db, AudioChunk, CHUNK_SAMPLES};

/// Per-sample multiplier applied to the held peak before comparing
pub const PEAK_METER_DESCENT_RATE: f64 = 0.99991;

const RESAMPLER_TAP_COUNT: usize = 111;

/// Oversampling factor, also the gain that compensates for zero stuffing
const OVERSAMPLING: f32 = 4.0;

/// Interpolation low-pass (Hamming window, 176 400 Hz, cutoff 22 050 Hz)
#[allow(clippy::excessive_precision)]
const RESAMPLER_TAPS: [f32; RESAMPLER_TAP_COUNT] = [
    -0.000327739447665758, -0.000476503758124312, -0.000352854190773928, -0.000000000000000001,
    0.000406260236619067, 0.000628593199614187, 0.000490884934198210, -0.000000000000000001,
    -0.000609788856962969, -0.000966047088142002, -0.000766208000080543, 0.000000000000000006,
    0.000963612783534569, 0.001525728306847041, 0.001205789350705905, -0.000000000000000002,
    -0.001496950835348211, -0.002350947122309537, -0.001841889519823695, 0.000000000000000003,
    0.002246185734559464, 0.003496814481702800, 0.002716496970288577, -0.000000000000000004,
    -0.003260962730025787, -0.005040383400506451, -0.003889780195494825, 0.000000000000000005,
    0.004616038373534016, 0.007100598452505119, 0.005456954456939170, -0.000000000000000006,
    -0.006435756097543829, -0.009880347762417137, -0.007584638951651009, 0.000000000000000007,
    0.008949590428842996, 0.013764747050914815, 0.010598615005927948, -0.000000000000000008,
    -0.012636534237729955, -0.019587784806651305, -0.015233440072845680, 0.000000000000000009,
    0.018684176366768283, 0.029538279853251533, 0.023547112370130258, -0.000000000000000009,
    -0.031020789456173804, -0.051687897771284415, -0.044224482837815764, 0.000000000000000010,
    0.074600943500622269, 0.158848192209276928, 0.225151831805774777, 0.250268562533626671,
    0.225151831805774777, 0.158848192209276928, 0.074600943500622269, 0.000000000000000010,
    -0.044224482837815771, -0.051687897771284415, -0.031020789456173804, -0.000000000000000009,
    0.023547112370130262, 0.029538279853251536, 0.018684176366768286, 0.000000000000000009,
    -0.015233440072845678, -0.019587784806651309, -0.012636534237729959, -0.000000000000000008,
    0.010598615005927948, 0.013764747050914818, 0.008949590428842998, 0.000000000000000007,
    -0.007584638951651012, -0.009880347762417141, -0.006435756097543833, -0.000000000000000006,
    0.005456954456939171, 0.007100598452505122, 0.004616038373534018, 0.000000000000000005,
    -0.003889780195494823, -0.005040383400506452, -0.003260962730025787, -0.000000000000000004,
    0.002716496970288581, 0.003496814481702800, 0.002246185734559465, 0.000000000000000003,
    -0.001841889519823696, -0.002350947122309539, -0.001496950835348211, -0.000000000000000002,
    0.001205789350705906, 0.001525728306847041, 0.000963612783534570, 0.000000000000000006,
    -0.000766208000080543, -0.000966047088142002, -0.000609788856962969, -0.000000000000000001,
    0.000490884934198210, 0.000628593199614187, 0.000406260236619067, -0.000000000000000001,
    -0.000352854190773928, -0.000476503758124312, -0.000327739447665758,
];

type Resampler = FirFilter<RESAMPLER_TAP_COUNT>;

/// Decaying true-peak estimator for one channel
#[derive(Debug, Clone)]
struct ChannelMeter {
    lpf: Resampler,
    peak: f64,
}

impl ChannelMeter {
    fn new() -> Self {
        Self {
            lpf: FirFilter::new(RESAMPLER_TAPS),
            peak: 0.0,
        }
    }

    #[inline]
    fn process_sample(&mut self, sample: f32) {
        self.peak *= PEAK_METER_DESCENT_RATE;

        let mut this_peak = sample.abs();
        this_peak = this_peak.max((self.lpf.process(sample) * OVERSAMPLING).abs());
        for _ in 1..OVERSAMPLING as usize {
            this_peak = this_peak.max((self.lpf.process(0.0) * OVERSAMPLING).abs());
        }

        if this_peak as f64 > self.peak {
            self.peak = this_peak as f64;
        }
    }

    fn reset(&mut self) {
        self.lpf.reset();
        self.peak = 0.0;
    }
}

/// Stereo true-peak meter fed one chunk at a time
#[derive(Debug, Clone)]
pub struct PeakMeter {
    left: ChannelMeter,
    right: ChannelMeter,
}

impl PeakMeter {
    pub fn new() -> Self {
        Self {
            left: ChannelMeter::new(),
            right: ChannelMeter::new(),
        }
    }

    /// Update the running peaks from a chunk. The chunk is not modified.
    pub fn process(&mut self, chunk: &AudioChunk) {
        for i in 0..CHUNK_SAMPLES {
            self.left.process_sample(chunk.left[i]);
            self.right.process_sample(chunk.right[i]);
        }
    }

    /// Drop both held peaks to zero and clear the interpolation history
    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }

    pub fn left_db(&self) -> f64 {
        gain_to_db(self.left.peak)
    }

    pub fn right_db(&self) -> f64 {
        gain_to_db(self.right.peak)
    }
}

impl Default for PeakMeter {
    fn default() -> Self {
        Self::new()
    }
}
