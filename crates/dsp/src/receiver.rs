//! Receiver chain: complex baseband in, demodulated audio out.
//!
//! Stage order per block: tuning translator, power-of-two decimation to
//! the quadrature rate, fast-convolution channel filter, signal meter,
//! AGC, demodulator, squelch, fractional resampling to the audio rate.
//! All stages carry state across blocks so block size never affects the
//! output stream.

use num_complex::Complex32;

use crate::agc::Agc;
use crate::decimate::Decimator;
use crate::demod::{AmDemod, DemodMode, NfmDemod, SsbDemod};
use crate::filter::FastFir;
use crate::meter::SMeter;
use crate::resample::Resampler;
use crate::spectrum::{Spectrum, SPECTRUM_BINS};
use crate::translate::Translate;

/// Lowest quadrature rate the decimator is allowed to reach. Wide enough
/// for NFM deviation plus filter transition bands.
const QUAD_RATE_MIN: f32 = 50_000.0;

/// Squelch level that can never close (meter floor is -160 dBFS).
const SQL_OFF_DB: f32 = -170.0;

pub struct Receiver {
    input_rate: f32,
    quad_rate: f32,

    vfo: Translate,
    bfo: Translate,
    cw_offset: f32,

    decim: Decimator,
    filter: FastFir,
    filter_low: f32,
    filter_high: f32,

    meter: SMeter,
    agc: Agc,
    mode: DemodMode,
    am: AmDemod,
    ssb: SsbDemod,
    nfm: NfmDemod,

    sql_db: f32,
    resampler: Resampler,
    spectrum: Spectrum,

    work: Vec<Complex32>,
    quad_buf: Vec<Complex32>,
    filt_buf: Vec<Complex32>,
    demod_buf: Vec<f32>,
}

impl Receiver {
    pub fn new(input_rate: f32, audio_rate: f32) -> Self {
        let factor = Decimator::factor_for(input_rate, QUAD_RATE_MIN);
        let quad_rate = input_rate / factor as f32;
        log::info!(
            "receiver: input {} Hz, decimation {}, quad rate {} Hz, audio {} Hz",
            input_rate,
            factor,
            quad_rate,
            audio_rate
        );

        let filter_low = -5_000.0;
        let filter_high = 5_000.0;
        Self {
            input_rate,
            quad_rate,
            vfo: Translate::new(),
            bfo: Translate::new(),
            cw_offset: 700.0,
            decim: Decimator::new(factor),
            filter: FastFir::new(filter_low, filter_high, quad_rate),
            filter_low,
            filter_high,
            meter: SMeter::new(),
            agc: Agc::new(quad_rate),
            mode: DemodMode::Am,
            am: AmDemod::new(quad_rate, filter_high),
            ssb: SsbDemod,
            nfm: NfmDemod::new(quad_rate),
            sql_db: SQL_OFF_DB,
            resampler: Resampler::new(quad_rate, audio_rate),
            spectrum: Spectrum::new(),
            work: Vec::new(),
            quad_buf: Vec::new(),
            filt_buf: Vec::new(),
            demod_buf: Vec::new(),
        }
    }

    pub fn quad_rate(&self) -> f32 {
        self.quad_rate
    }

    /// Tune to a signal `offset_hz` away from the device center frequency.
    pub fn set_tuning_offset(&mut self, offset_hz: f32) {
        self.vfo.set_offset(-offset_hz, self.input_rate);
    }

    /// Channel filter edges in Hz relative to the tuned frequency.
    /// Asymmetric edges select a sideband (e.g. 200..2800 for USB).
    pub fn set_filter(&mut self, low_hz: f32, high_hz: f32) {
        self.filter_low = low_hz;
        self.filter_high = high_hz;
        self.filter.set_filter(low_hz, high_hz, self.quad_rate);
        self.am.set_bandwidth(low_hz.abs().max(high_hz.abs()));
    }

    /// CW sidetone pitch. Only audible in CW mode.
    pub fn set_cw_offset(&mut self, offset_hz: f32) {
        self.cw_offset = offset_hz;
        if self.mode == DemodMode::Cw {
            self.bfo.set_offset(offset_hz, self.quad_rate);
        }
    }

    pub fn set_agc(&mut self, threshold_db: i32, slope_percent: i32, decay_ms: i32) {
        self.agc.set_params(threshold_db, slope_percent, decay_ms);
    }

    pub fn set_demod(&mut self, mode: DemodMode) {
        if mode == self.mode {
            return;
        }
        log::info!("demodulator: {:?} -> {:?}", self.mode, mode);
        self.mode = mode;

        // Restart anything holding per-mode state so the first block of
        // the new mode starts clean instead of ringing on stale history.
        self.agc.reset();
        self.nfm = NfmDemod::new(self.quad_rate);
        self.am = AmDemod::new(self.quad_rate, self.filter_low.abs().max(self.filter_high.abs()));
        self.bfo.reset();
        if mode == DemodMode::Cw {
            self.bfo.set_offset(self.cw_offset, self.quad_rate);
        } else {
            self.bfo.set_offset(0.0, self.quad_rate);
        }
    }

    /// Squelch threshold in dBFS; anything at or below -160 disables it.
    pub fn set_sql(&mut self, level_db: f32) {
        self.sql_db = level_db;
    }

    /// Smoothed channel power in dBFS, measured after the channel filter.
    pub fn signal_strength(&self) -> f32 {
        self.meter.level_db()
    }

    /// Spectrum of the raw input in dBFS. False until enough input has
    /// been fed through `process`.
    pub fn spectrum_snapshot(&mut self, out: &mut [f32; SPECTRUM_BINS]) -> bool {
        self.spectrum.snapshot(out)
    }

    /// Run one block through the chain. `audio` is cleared and filled
    /// with output samples at the audio rate; returns the count.
    pub fn process(&mut self, input: &[Complex32], audio: &mut Vec<f32>) -> usize {
        audio.clear();
        if input.is_empty() {
            return 0;
        }
        self.spectrum.feed(input);

        self.work.clear();
        self.work.extend_from_slice(input);
        self.vfo.process(&mut self.work);

        self.decim.process(&self.work, &mut self.quad_buf);

        self.filt_buf.clear();
        self.filter.process(&self.quad_buf, &mut self.filt_buf);
        if self.filt_buf.is_empty() {
            return 0;
        }

        self.meter.process(&self.filt_buf);
        self.agc.process(&mut self.filt_buf);

        match self.mode {
            DemodMode::Am => self.am.process(&self.filt_buf, &mut self.demod_buf),
            DemodMode::Ssb => self.ssb.process(&self.filt_buf, &mut self.demod_buf),
            DemodMode::Nfm => self.nfm.process(&self.filt_buf, &mut self.demod_buf),
            DemodMode::Cw => {
                self.bfo.process(&mut self.filt_buf);
                self.ssb.process(&self.filt_buf, &mut self.demod_buf);
            }
        }

        if self.meter.level_db() < self.sql_db {
            self.demod_buf.iter_mut().for_each(|s| *s = 0.0);
        }

        audio.resize(self.resampler.max_output(self.demod_buf.len()), 0.0);
        let n = self.resampler.process(&self.demod_buf, audio);
        audio.truncate(n);
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    const INPUT_RATE: f32 = 2_500_000.0;
    const AUDIO_RATE: f32 = 48_000.0;

    /// AM carrier at `offset` Hz from center, modulated by `mod_freq`.
    fn am_signal(offset: f32, mod_freq: f32, depth: f32, amp: f32, n: usize) -> Vec<Complex32> {
        (0..n)
            .map(|i| {
                let t = i as f32 / INPUT_RATE;
                let env = amp * (1.0 + depth * (TAU * mod_freq * t).cos());
                Complex32::from_polar(env, TAU * offset * t)
            })
            .collect()
    }

    fn rms(data: &[f32]) -> f32 {
        (data.iter().map(|x| x * x).sum::<f32>() / data.len() as f32).sqrt()
    }

    fn run_blocks(rx: &mut Receiver, input: &[Complex32], block: usize) -> Vec<f32> {
        let mut audio = Vec::new();
        let mut out = Vec::new();
        for chunk in input.chunks(block) {
            rx.process(chunk, &mut out);
            audio.extend_from_slice(&out);
        }
        audio
    }

    #[test]
    fn test_am_demodulation_end_to_end() {
        let mut rx = Receiver::new(INPUT_RATE, AUDIO_RATE);
        rx.set_demod(DemodMode::Am);
        rx.set_tuning_offset(100_000.0);
        rx.set_filter(-5_000.0, 5_000.0);

        let input = am_signal(100_000.0, 1_000.0, 0.5, 0.5, (INPUT_RATE * 0.5) as usize);
        let audio = run_blocks(&mut rx, &input, 16_384);

        assert!(audio.len() > 20_000, "only {} audio samples", audio.len());
        let tail = &audio[audio.len() / 2..];
        let level = rms(tail);
        assert!(level > 0.05, "no modulation recovered, rms {}", level);

        // DC blocker: output should be centered near zero.
        let mean = tail.iter().sum::<f32>() / tail.len() as f32;
        assert!(mean.abs() < 0.02, "audio has DC offset {}", mean);
    }

    #[test]
    fn test_am_demodulation_is_linear_in_amplitude() {
        // With a neutral AGC, doubling the input amplitude must double
        // the recovered audio.
        let n = (INPUT_RATE * 0.4) as usize;
        let mut levels = Vec::new();
        for &amp in &[0.2f32, 0.4] {
            let mut rx = Receiver::new(INPUT_RATE, AUDIO_RATE);
            rx.set_demod(DemodMode::Am);
            rx.set_tuning_offset(50_000.0);
            rx.set_filter(-5_000.0, 5_000.0);
            let input = am_signal(50_000.0, 800.0, 0.5, amp, n);
            let audio = run_blocks(&mut rx, &input, 8_192);
            levels.push(rms(&audio[audio.len() / 2..]));
        }
        let ratio = levels[1] / levels[0];
        assert!(
            (ratio - 2.0).abs() < 0.1,
            "amplitude ratio {} (levels {:?})",
            ratio,
            levels
        );
    }

    #[test]
    fn test_mode_switch_does_not_spike() {
        let mut rx = Receiver::new(INPUT_RATE, AUDIO_RATE);
        rx.set_demod(DemodMode::Am);
        rx.set_tuning_offset(0.0);
        rx.set_filter(-5_000.0, 5_000.0);

        let n = (INPUT_RATE * 0.2) as usize;
        let input = am_signal(0.0, 1_000.0, 0.5, 0.5, n);
        let before = run_blocks(&mut rx, &input, 16_384);
        let steady = rms(&before[before.len() / 2..]);

        rx.set_demod(DemodMode::Ssb);
        let after = run_blocks(&mut rx, &input, 16_384);
        let peak = after.iter().fold(0.0f32, |m, x| m.max(x.abs()));
        assert!(
            peak < steady * 20.0,
            "transient after mode switch: peak {} vs steady rms {}",
            peak,
            steady
        );
    }

    #[test]
    fn test_squelch_mutes_weak_signal() {
        let mut rx = Receiver::new(INPUT_RATE, AUDIO_RATE);
        rx.set_demod(DemodMode::Am);
        rx.set_tuning_offset(0.0);
        rx.set_filter(-5_000.0, 5_000.0);
        rx.set_sql(-20.0);

        // -46 dBFS carrier, well below the squelch threshold.
        let n = (INPUT_RATE * 0.2) as usize;
        let input = am_signal(0.0, 1_000.0, 0.5, 0.005, n);
        let audio = run_blocks(&mut rx, &input, 16_384);
        let tail = &audio[audio.len() / 2..];
        assert!(rms(tail) < 1e-6, "audio leaked through squelch: {}", rms(tail));

        // Opening the squelch restores audio.
        rx.set_sql(SQL_OFF_DB);
        let audio = run_blocks(&mut rx, &input, 16_384);
        assert!(rms(&audio[audio.len() / 2..]) > 1e-4);
    }

    #[test]
    fn test_cw_produces_sidetone_at_pitch() {
        let mut rx = Receiver::new(INPUT_RATE, AUDIO_RATE);
        rx.set_tuning_offset(0.0);
        rx.set_filter(-500.0, 500.0);
        rx.set_cw_offset(700.0);
        rx.set_demod(DemodMode::Cw);

        // Unmodulated carrier on frequency: CW should render a 700 Hz tone.
        let n = (INPUT_RATE * 0.4) as usize;
        let input: Vec<Complex32> = (0..n).map(|_| Complex32::new(0.5, 0.0)).collect();
        let audio = run_blocks(&mut rx, &input, 16_384);
        let tail = &audio[audio.len() / 2..];
        assert!(rms(tail) > 0.05, "no sidetone, rms {}", rms(tail));

        // Count zero crossings to estimate the tone frequency.
        let crossings = tail
            .windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count();
        let freq = crossings as f32 * AUDIO_RATE / (2.0 * tail.len() as f32);
        assert!(
            (freq - 700.0).abs() < 30.0,
            "sidetone at {} Hz instead of 700",
            freq
        );
    }

    #[test]
    fn test_signal_strength_tracks_input_level() {
        let mut rx = Receiver::new(INPUT_RATE, AUDIO_RATE);
        rx.set_tuning_offset(0.0);
        rx.set_filter(-5_000.0, 5_000.0);

        let n = (INPUT_RATE * 0.2) as usize;
        let quiet: Vec<Complex32> = (0..n).map(|_| Complex32::new(0.01, 0.0)).collect();
        let mut out = Vec::new();
        for chunk in quiet.chunks(16_384) {
            rx.process(chunk, &mut out);
        }
        let quiet_db = rx.signal_strength();

        let loud: Vec<Complex32> = (0..n).map(|_| Complex32::new(0.1, 0.0)).collect();
        for chunk in loud.chunks(16_384) {
            rx.process(chunk, &mut out);
        }
        let loud_db = rx.signal_strength();
        assert!(
            (loud_db - quiet_db - 20.0).abs() < 1.5,
            "meter delta {} dB for a 20 dB step",
            loud_db - quiet_db
        );
    }

    #[test]
    fn test_spectrum_snapshot_shows_input_tone() {
        let mut rx = Receiver::new(INPUT_RATE, AUDIO_RATE);
        rx.set_tuning_offset(0.0);
        let input: Vec<Complex32> = (0..SPECTRUM_BINS * 4)
            .map(|i| Complex32::from_polar(0.8, TAU * 500_000.0 * i as f32 / INPUT_RATE))
            .collect();
        let mut out = Vec::new();
        rx.process(&input, &mut out);

        let mut bins = [0.0f32; SPECTRUM_BINS];
        assert!(rx.spectrum_snapshot(&mut bins));
        let peak = bins
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        // 500 kHz of 2.5 MHz span = 1/5 above center.
        let expected = SPECTRUM_BINS / 2 + SPECTRUM_BINS / 5;
        assert!(
            (peak as i64 - expected as i64).unsigned_abs() <= 1,
            "peak at bin {} (expected ~{})",
            peak,
            expected
        );
    }
}
