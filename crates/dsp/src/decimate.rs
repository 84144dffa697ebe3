//! Power-of-two decimation with intrinsic anti-aliasing.
//!
//! Each stage halves the sample rate through an 11-tap half-band FIR, so
//! the anti-alias filtering is part of the rate reduction itself rather
//! than a separate step. A chain of stages takes the wideband input rate
//! down to a quadrature rate suited to the channel filter and
//! demodulators.

use num_complex::Complex32;

use crate::filter::lowpass_taps;

const HB_TAPS: usize = 11;

/// One decimate-by-2 half-band stage with block-to-block history.
struct HalfbandStage {
    taps: Vec<f32>,
    delay: Vec<Complex32>,
    /// Parity carry: skip the first valid output of the next block.
    skip: bool,
}

impl HalfbandStage {
    fn new() -> Self {
        Self {
            // Cutoff at a quarter of the input rate; odd-symmetric zeros
            // fall out of the windowed sinc naturally.
            taps: lowpass_taps(HB_TAPS, 0.25, 60.0),
            delay: vec![Complex32::new(0.0, 0.0); HB_TAPS - 1],
            skip: false,
        }
    }

    fn reset(&mut self) {
        self.delay.iter_mut().for_each(|s| *s = Complex32::new(0.0, 0.0));
        self.skip = false;
    }

    fn process(&mut self, input: &[Complex32], out: &mut Vec<Complex32>) {
        let m = self.taps.len();
        let mut work = Vec::with_capacity(self.delay.len() + input.len());
        work.extend_from_slice(&self.delay);
        work.extend_from_slice(input);

        let mut p = m - 1 + usize::from(self.skip);
        while p < work.len() {
            let mut acc = Complex32::new(0.0, 0.0);
            for (k, &t) in self.taps.iter().enumerate() {
                acc += work[p - k] * t;
            }
            out.push(acc);
            p += 2;
        }
        self.skip = p - work.len() == 1;

        let start = work.len() - (m - 1);
        self.delay.copy_from_slice(&work[start..]);
    }
}

/// Chain of half-band stages decimating by a power of two.
pub struct Decimator {
    stages: Vec<HalfbandStage>,
    factor: usize,
    /// Scratch ping-pong buffers reused across blocks.
    work_a: Vec<Complex32>,
    work_b: Vec<Complex32>,
}

impl Decimator {
    /// `factor` must be a power of two (1 = pass-through).
    pub fn new(factor: usize) -> Self {
        assert!(factor.is_power_of_two(), "decimation factor must be 2^n");
        let stages = (0..factor.trailing_zeros()).map(|_| HalfbandStage::new()).collect();
        Self {
            stages,
            factor,
            work_a: Vec::new(),
            work_b: Vec::new(),
        }
    }

    /// Largest power-of-two factor keeping the output rate at or above
    /// `min_rate`.
    pub fn factor_for(input_rate: f32, min_rate: f32) -> usize {
        let mut factor = 1usize;
        while input_rate / (factor * 2) as f32 >= min_rate {
            factor *= 2;
        }
        factor
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    pub fn reset(&mut self) {
        self.stages.iter_mut().for_each(HalfbandStage::reset);
    }

    pub fn process(&mut self, input: &[Complex32], out: &mut Vec<Complex32>) {
        out.clear();
        if self.stages.is_empty() {
            out.extend_from_slice(input);
            return;
        }

        self.work_a.clear();
        self.work_a.extend_from_slice(input);
        for stage in self.stages.iter_mut() {
            self.work_b.clear();
            stage.process(&self.work_a, &mut self.work_b);
            std::mem::swap(&mut self.work_a, &mut self.work_b);
        }
        out.extend_from_slice(&self.work_a);
    }
}
