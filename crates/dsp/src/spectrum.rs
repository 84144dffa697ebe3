//! Spectrum snapshots for display.
//!
//! Windowed FFT of the most recent input samples, magnitudes in dB with DC
//! shifted to the center bin. Samples are accumulated into a sliding
//! buffer; `snapshot` can be taken at any cadence independent of the block
//! size feeding it.

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use crate::filter::kaiser;

pub const SPECTRUM_BINS: usize = 1024;

const FLOOR_DB: f32 = -160.0;

pub struct Spectrum {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    /// Most recent SPECTRUM_BINS input samples, oldest first.
    ring: Vec<Complex32>,
    filled: usize,
    scratch: Vec<Complex32>,
}

impl Spectrum {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(SPECTRUM_BINS);
        let scratch = vec![Complex32::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Self {
            fft,
            window: kaiser(SPECTRUM_BINS, 8.6).into_iter().map(|w| w as f32).collect(),
            ring: vec![Complex32::new(0.0, 0.0); SPECTRUM_BINS],
            filled: 0,
            scratch,
        }
    }

    /// Feed input samples; only the newest SPECTRUM_BINS are retained.
    pub fn feed(&mut self, data: &[Complex32]) {
        let take = data.len().min(SPECTRUM_BINS);
        let newest = &data[data.len() - take..];
        if take == SPECTRUM_BINS {
            self.ring.copy_from_slice(newest);
        } else {
            self.ring.copy_within(take.., 0);
            let start = SPECTRUM_BINS - take;
            self.ring[start..].copy_from_slice(newest);
        }
        self.filled = (self.filled + take).min(SPECTRUM_BINS);
    }

    /// Magnitude spectrum in dBFS, DC in the center bin. Returns None
    /// until a full window of samples has been fed.
    pub fn snapshot(&mut self, out: &mut [f32; SPECTRUM_BINS]) -> bool {
        if self.filled < SPECTRUM_BINS {
            return false;
        }
        let mut buf: Vec<Complex32> = self
            .ring
            .iter()
            .zip(self.window.iter())
            .map(|(s, w)| s * w)
            .collect();
        self.fft.process_with_scratch(&mut buf, &mut self.scratch);

        // Normalize to window gain so a full-scale tone reads ~0 dBFS.
        let gain: f32 = self.window.iter().sum();
        for (i, slot) in out.iter_mut().enumerate() {
            // fftshift: negative frequencies first.
            let bin = (i + SPECTRUM_BINS / 2) % SPECTRUM_BINS;
            let mag = buf[bin].norm() / gain;
            *slot = if mag > 0.0 {
                (20.0 * mag.log10()).max(FLOOR_DB)
            } else {
                FLOOR_DB
            };
        }
        true
    }
}

impl Default for Spectrum {
    fn default() -> Self {
        Self::new()
    }
}
