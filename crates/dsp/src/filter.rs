//! FIR design helpers and the fast-convolution channel filter.
//!
//! The channel filter is a complex band-pass with independently
//! configurable low and high cut frequencies. Asymmetric cuts (e.g. 0 to
//! +3000 Hz) select a single sideband, so SSB needs no demodulator-specific
//! filter path. Filtering runs as overlap-add fast convolution over
//! rustfft, which keeps the cost flat for the long taps narrow voice
//! bandwidths need.

use std::f32::consts::TAU;
use std::f64::consts::PI;
use std::sync::Arc;

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

/// Modified Bessel function of the first kind, order 0 (for Kaiser window)
fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut term = 1.0;
    let x_sq_over_4 = x * x / 4.0;
    for k in 1..=30 {
        term *= x_sq_over_4 / (k * k) as f64;
        sum += term;
        if term < sum * 1e-12 {
            break;
        }
    }
    sum
}

/// Generate Kaiser window coefficients
pub fn kaiser(n: usize, beta: f64) -> Vec<f64> {
    let mut w = Vec::with_capacity(n);
    let n_f = n as f64;
    let denom = bessel_i0(beta);
    for i in 0..n {
        let x = 2.0 * i as f64 / (n_f - 1.0) - 1.0;
        let arg = beta * (1.0 - x * x).max(0.0).sqrt();
        w.push(bessel_i0(arg) / denom);
    }
    w
}

/// Kaiser beta for a given stopband attenuation in dB.
pub fn kaiser_beta(atten_db: f64) -> f64 {
    if atten_db > 50.0 {
        0.1102 * (atten_db - 8.7)
    } else if atten_db > 21.0 {
        0.5842 * (atten_db - 21.0).powf(0.4) + 0.07886 * (atten_db - 21.0)
    } else {
        0.0
    }
}

/// Windowed-sinc real lowpass prototype, unit DC gain.
///
/// `cutoff` is in cycles/sample (0..0.5).
pub fn lowpass_taps(len: usize, cutoff: f64, atten_db: f64) -> Vec<f32> {
    let win = kaiser(len, kaiser_beta(atten_db));
    let half = (len as f64 - 1.0) / 2.0;
    let mut taps: Vec<f64> = (0..len)
        .map(|n| {
            let t = n as f64 - half;
            let sinc = if t.abs() < 1e-12 {
                1.0
            } else {
                (2.0 * PI * cutoff * t).sin() / (PI * t)
            };
            sinc * win[n]
        })
        .collect();
    let sum: f64 = taps.iter().sum();
    for t in taps.iter_mut() {
        *t /= sum;
    }
    taps.into_iter().map(|t| t as f32).collect()
}

/// Complex band-pass taps with asymmetric cuts.
///
/// A lowpass prototype of half the passband width is shifted to the
/// passband center by a complex exponential. `low`/`high` are in Hz
/// relative to DC at sample rate `fs`; `low < high`, either may be
/// negative.
pub fn bandpass_taps(len: usize, low: f32, high: f32, fs: f32) -> Vec<Complex32> {
    debug_assert!(low < high);
    let width = (high - low) as f64 / 2.0 / fs as f64;
    let center = (high + low) / 2.0 / fs;
    let proto = lowpass_taps(len, width.max(1e-5), 60.0);
    let half = (len as f32 - 1.0) / 2.0;
    proto
        .iter()
        .enumerate()
        .map(|(n, &h)| {
            let phi = TAU * center * (n as f32 - half);
            Complex32::from_polar(h, phi)
        })
        .collect()
}

/// Plain real FIR with block-to-block history, for post-demod audio
/// filtering.
pub struct Fir {
    taps: Vec<f32>,
    hist: Vec<f32>,
}

impl Fir {
    pub fn new(taps: Vec<f32>) -> Self {
        let hist = vec![0.0; taps.len() - 1];
        Self { taps, hist }
    }

    pub fn set_taps(&mut self, taps: Vec<f32>) {
        self.hist = vec![0.0; taps.len() - 1];
        self.taps = taps;
    }

    pub fn process(&mut self, data: &mut [f32]) {
        let m = self.taps.len();
        let mut work = Vec::with_capacity(self.hist.len() + data.len());
        work.extend_from_slice(&self.hist);
        work.extend_from_slice(data);

        for (i, out) in data.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for (k, &t) in self.taps.iter().enumerate() {
                acc += t * work[i + m - 1 - k];
            }
            *out = acc;
        }
        let start = work.len() - (m - 1);
        self.hist.copy_from_slice(&work[start..]);
    }
}

/// Number of channel filter taps. Must be smaller than [`FFT_SIZE`].
const TAPS_LEN: usize = 257;
const FFT_SIZE: usize = 1024;

/// Overlap-add fast-convolution FIR.
///
/// Input is accumulated into segments of `FFT_SIZE - TAPS_LEN + 1`
/// samples; each segment is convolved in the frequency domain and the
/// filter tail carried into the next segment. Output therefore comes in
/// segment-sized bursts -- total count always equals total input count.
pub struct FastFir {
    h_freq: Vec<Complex32>,
    fwd: Arc<dyn Fft<f32>>,
    inv: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex32>,
    /// Carried convolution tail, `TAPS_LEN - 1` samples.
    overlap: Vec<Complex32>,
    /// Input accumulated toward the next full segment.
    pending: Vec<Complex32>,
}

impl FastFir {
    /// Segment advance per FFT.
    const SEG: usize = FFT_SIZE - TAPS_LEN + 1;

    pub fn new(low: f32, high: f32, fs: f32) -> Self {
        let mut planner = FftPlanner::new();
        let fwd = planner.plan_fft_forward(FFT_SIZE);
        let inv = planner.plan_fft_inverse(FFT_SIZE);
        let scratch_len = fwd
            .get_inplace_scratch_len()
            .max(inv.get_inplace_scratch_len());
        let mut this = Self {
            h_freq: vec![Complex32::new(0.0, 0.0); FFT_SIZE],
            fwd,
            inv,
            scratch: vec![Complex32::new(0.0, 0.0); scratch_len],
            overlap: vec![Complex32::new(0.0, 0.0); TAPS_LEN - 1],
            pending: Vec::with_capacity(Self::SEG),
        };
        this.set_filter(low, high, fs);
        this
    }

    /// Rebuild the frequency response for new cut frequencies. The whole
    /// response is swapped in one assignment; carried overlap state is
    /// kept so audio continues through the change.
    pub fn set_filter(&mut self, low: f32, high: f32, fs: f32) {
        let taps = bandpass_taps(TAPS_LEN, low, high, fs);
        let mut h = vec![Complex32::new(0.0, 0.0); FFT_SIZE];
        h[..TAPS_LEN].copy_from_slice(&taps);
        self.fwd.process_with_scratch(&mut h, &mut self.scratch);
        self.h_freq = h;
    }

    pub fn process(&mut self, input: &[Complex32], out: &mut Vec<Complex32>) {
        self.pending.extend_from_slice(input);

        let mut offset = 0;
        while self.pending.len() - offset >= Self::SEG {
            let seg = &self.pending[offset..offset + Self::SEG];
            let mut buf = vec![Complex32::new(0.0, 0.0); FFT_SIZE];
            buf[..Self::SEG].copy_from_slice(seg);

            self.fwd.process_with_scratch(&mut buf, &mut self.scratch);
            let scale = 1.0 / FFT_SIZE as f32;
            for (b, h) in buf.iter_mut().zip(self.h_freq.iter()) {
                *b = *b * *h * scale;
            }
            self.inv.process_with_scratch(&mut buf, &mut self.scratch);

            // First SEG samples plus the carried tail are valid output.
            for i in 0..Self::SEG {
                let mut v = buf[i];
                if i < self.overlap.len() {
                    v += self.overlap[i];
                }
                out.push(v);
            }
            self.overlap.copy_from_slice(&buf[Self::SEG..]);
            offset += Self::SEG;
        }
        self.pending.drain(..offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, rate: f32, n: usize, amp: f32) -> Vec<Complex32> {
        (0..n)
            .map(|i| Complex32::from_polar(amp, TAU * freq * i as f32 / rate))
            .collect()
    }

    fn rms(data: &[Complex32]) -> f32 {
        (data.iter().map(|s| s.norm_sqr()).sum::<f32>() / data.len() as f32).sqrt()
    }

    #[test]
    fn test_lowpass_unit_dc_gain() {
        let taps = lowpass_taps(101, 0.1, 60.0);
        let sum: f32 = taps.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5, "DC gain {} != 1", sum);
    }

    #[test]
    fn test_bandpass_passes_in_band_tone() {
        let fs = 96_000.0;
        let mut fir = FastFir::new(-6_000.0, 6_000.0, fs);
        let input = tone(1_000.0, fs, 8192, 1.0);
        let mut out = Vec::new();
        fir.process(&input, &mut out);
        // Skip the filter transient.
        let settled = &out[TAPS_LEN..];
        let level = rms(settled);
        assert!(
            (level - 1.0).abs() < 0.05,
            "in-band tone attenuated: rms {}",
            level
        );
    }

    #[test]
    fn test_bandpass_rejects_out_of_band_tone() {
        let fs = 96_000.0;
        let mut fir = FastFir::new(-6_000.0, 6_000.0, fs);
        let input = tone(20_000.0, fs, 8192, 1.0);
        let mut out = Vec::new();
        fir.process(&input, &mut out);
        let settled = &out[TAPS_LEN..];
        let level = rms(settled);
        assert!(level < 0.01, "stopband leak: rms {}", level);
    }

    #[test]
    fn test_asymmetric_cut_selects_sideband() {
        let fs = 96_000.0;
        // Upper sideband only: 100..3000 Hz.
        let mut fir = FastFir::new(100.0, 3_000.0, fs);

        let upper = tone(1_500.0, fs, 8192, 1.0);
        let lower = tone(-1_500.0, fs, 8192, 1.0);

        let mut out_u = Vec::new();
        fir.process(&upper, &mut out_u);
        let mut fir2 = FastFir::new(100.0, 3_000.0, fs);
        let mut out_l = Vec::new();
        fir2.process(&lower, &mut out_l);

        let ru = rms(&out_u[TAPS_LEN..]);
        let rl = rms(&out_l[TAPS_LEN..]);
        assert!(ru > 0.9, "USB tone should pass: rms {}", ru);
        assert!(rl < 0.01, "LSB tone should be rejected: rms {}", rl);
    }

    #[test]
    fn test_output_count_matches_input_count() {
        let fs = 48_000.0;
        let mut fir = FastFir::new(-3_000.0, 3_000.0, fs);
        let mut total_out = 0;
        let mut total_in = 0;
        let mut out = Vec::new();
        for n in [100usize, 777, 768, 1, 5000] {
            let input = tone(500.0, fs, n, 1.0);
            out.clear();
            fir.process(&input, &mut out);
            total_in += n;
            total_out += out.len();
        }
        // Everything except the still-pending partial segment came out.
        assert!(total_in - total_out < FastFir::SEG);
    }

    #[test]
    fn test_fir_history_across_blocks() {
        let taps = lowpass_taps(31, 0.2, 40.0);
        let mut fir_a = Fir::new(taps.clone());
        let mut fir_b = Fir::new(taps);

        let signal: Vec<f32> = (0..256).map(|i| ((i * 7) % 13) as f32 - 6.0).collect();

        let mut whole = signal.clone();
        fir_a.process(&mut whole);

        let mut first = signal[..100].to_vec();
        let mut second = signal[100..].to_vec();
        fir_b.process(&mut first);
        fir_b.process(&mut second);
        first.extend_from_slice(&second);

        for (i, (a, b)) in whole.iter().zip(first.iter()).enumerate() {
            assert!((a - b).abs() < 1e-4, "mismatch at {}: {} vs {}", i, a, b);
        }
    }
}
