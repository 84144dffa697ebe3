//! Demodulators: AM, SSB, NFM, CW.
//!
//! Exactly one mode is active at a time. All per-mode state (DC-removal
//! pole, discriminator history, audio filter delay lines) lives inside
//! the mode's own struct, so switching modes rebuilds the state wholesale
//! and no stale filter memory bleeds into the next mode.

use num_complex::Complex32;

use crate::filter::{lowpass_taps, Fir};

/// Demodulation mode. CW is SSB detection after BFO mixing; the mixing
/// happens in the receiver so the CW oscillator stays independent of the
/// tuning offset oscillator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemodMode {
    Am,
    Ssb,
    Nfm,
    Cw,
}

impl DemodMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "am" => Some(Self::Am),
            "ssb" => Some(Self::Ssb),
            "nfm" => Some(Self::Nfm),
            "cw" => Some(Self::Cw),
            _ => None,
        }
    }
}

/// AM envelope detector: magnitude, one-pole DC removal, post-demod
/// audio lowpass matched to the configured bandwidth.
pub struct AmDemod {
    /// DC-removal state, carried across blocks.
    z1: f32,
    audio_filter: Fir,
    sample_rate: f32,
}

/// DC tracker pole; slow enough not to eat low audio frequencies.
const DC_ALPHA: f32 = 0.001;

const AUDIO_TAPS: usize = 65;

impl AmDemod {
    pub fn new(sample_rate: f32, bandwidth: f32) -> Self {
        Self {
            z1: 0.0,
            audio_filter: Fir::new(Self::design(sample_rate, bandwidth)),
            sample_rate,
        }
    }

    fn design(sample_rate: f32, bandwidth: f32) -> Vec<f32> {
        let cutoff = (bandwidth / sample_rate).clamp(0.01, 0.45);
        lowpass_taps(AUDIO_TAPS, cutoff as f64, 50.0)
    }

    pub fn set_bandwidth(&mut self, bandwidth: f32) {
        self.audio_filter
            .set_taps(Self::design(self.sample_rate, bandwidth));
    }

    pub fn process(&mut self, input: &[Complex32], out: &mut Vec<f32>) {
        out.clear();
        for s in input {
            let mag = s.norm();
            self.z1 += DC_ALPHA * (mag - self.z1);
            out.push(mag - self.z1);
        }
        self.audio_filter.process(out);
    }
}

/// SSB product detection. The channel filter has already selected the
/// sideband, so detection is the real part of the analytic signal.
pub struct SsbDemod;

impl SsbDemod {
    pub fn process(&self, input: &[Complex32], out: &mut Vec<f32>) {
        out.clear();
        out.extend(input.iter().map(|s| s.re));
    }
}

/// NFM frequency discriminator with de-emphasis.
pub struct NfmDemod {
    prev: Complex32,
    deemph_z: f32,
    deemph_alpha: f32,
    gain: f32,
}

/// Peak deviation the output is normalized against.
const NFM_MAX_DEV: f32 = 5_000.0;

/// De-emphasis time constant.
const NFM_TAU: f32 = 75e-6;

impl NfmDemod {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            prev: Complex32::new(0.0, 0.0),
            deemph_z: 0.0,
            deemph_alpha: 1.0 - (-1.0 / (sample_rate * NFM_TAU)).exp(),
            gain: sample_rate / (std::f32::consts::TAU * NFM_MAX_DEV),
        }
    }

    pub fn process(&mut self, input: &[Complex32], out: &mut Vec<f32>) {
        out.clear();
        for &s in input {
            // arg(y[n] * conj(y[n-1])) is the per-sample phase advance.
            let d = (s * self.prev.conj()).arg() * self.gain;
            self.prev = s;
            self.deemph_z += self.deemph_alpha * (d - self.deemph_z);
            out.push(self.deemph_z);
        }
    }
}
