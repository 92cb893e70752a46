//! Fixed-size FIR filter with a circular history
//!
//! The tap count is a const generic so the coefficients and history live
//! inline in the owning struct. Nothing here allocates.

/// Direct-form FIR filter
///
/// `process(x)` pushes `x` into the history and returns
/// `sum(coeffs[k] * x[n - k])`, so the newest sample meets coefficient 0.
#[derive(Debug, Clone)]
pub struct FirFilter<const TAPS: usize> {
    coeffs: [f32; TAPS],
    history: [f32; TAPS],
    /// Slot the next input sample is written to
    head: usize,
}

impl<const TAPS: usize> FirFilter<TAPS> {
    pub fn new(coeffs: [f32; TAPS]) -> Self {
        assert!(TAPS > 0, "FIR filter needs at least one tap");
        Self {
            coeffs,
            history: [0.0; TAPS],
            head: 0,
        }
    }

    /// Feed one sample, return one filtered sample
    #[inline]
    pub fn process(&mut self, sample: f32) -> f32 {
        self.history[self.head] = sample;

        // Walk backwards through history starting at the newest sample
        let mut out = 0.0;
        let mut idx = self.head;
        for &c in self.coeffs.iter() {
            out += c * self.history[idx];
            idx = if idx == 0 { TAPS - 1 } else { idx - 1 };
        }

        self.head += 1;
        if self.head == TAPS {
            self.head = 0;
        }
        out
    }

    /// Zero the history
    pub fn reset(&mut self) {
        self.history = [0.0; TAPS];
        self.head = 0;
    }
}
