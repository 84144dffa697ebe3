//! Signal strength meter.
//!
//! Per-block RMS power smoothed by a one-pole IIR so the readout is
//! stable enough to drive a UI and a squelch comparison.

use num_complex::Complex32;

/// Smoothing factor toward the new block measurement.
const ALPHA: f32 = 0.25;

/// Floor reported when no signal has been seen yet.
const FLOOR_DB: f32 = -160.0;

#[derive(Debug)]
pub struct SMeter {
    /// Smoothed mean power, linear.
    power: f32,
    primed: bool,
}

impl SMeter {
    pub fn new() -> Self {
        Self {
            power: 0.0,
            primed: false,
        }
    }

    pub fn reset(&mut self) {
        self.power = 0.0;
        self.primed = false;
    }

    /// Measure one block. Read-only on the samples.
    pub fn process(&mut self, data: &[Complex32]) {
        if data.is_empty() {
            return;
        }
        let mean = data.iter().map(|s| s.norm_sqr()).sum::<f32>() / data.len() as f32;
        if self.primed {
            self.power += ALPHA * (mean - self.power);
        } else {
            self.power = mean;
            self.primed = true;
        }
    }

    /// Smoothed signal level in dBFS.
    pub fn level_db(&self) -> f32 {
        if self.power <= 0.0 {
            return FLOOR_DB;
        }
        (10.0 * self.power.log10()).max(FLOOR_DB)
    }
}

impl Default for SMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_reports_floor() {
        let meter = SMeter::new();
        assert_eq!(meter.level_db(), FLOOR_DB);
    }

    #[test]
    fn test_full_scale_tone_is_zero_dbfs() {
        let mut meter = SMeter::new();
        // Constant magnitude 1.0 has mean power 1.0 = 0 dBFS.
        let block = vec![Complex32::new(1.0, 0.0); 1024];
        for _ in 0..20 {
            meter.process(&block);
        }
        assert!(meter.level_db().abs() < 0.01, "level {}", meter.level_db());
    }

    #[test]
    fn test_level_tracks_power_not_amplitude() {
        let mut meter = SMeter::new();
        let block = vec![Complex32::new(0.1, 0.0); 1024];
        for _ in 0..40 {
            meter.process(&block);
        }
        // magnitude 0.1 -> power 0.01 -> -20 dBFS
        assert!(
            (meter.level_db() + 20.0).abs() < 0.1,
            "level {}",
            meter.level_db()
        );
    }

    #[test]
    fn test_smoothing_converges_monotonically() {
        let mut meter = SMeter::new();
        meter.process(&vec![Complex32::new(0.001, 0.0); 256]);
        let mut prev = meter.level_db();
        let loud = vec![Complex32::new(1.0, 0.0); 256];
        for _ in 0..30 {
            meter.process(&loud);
            let now = meter.level_db();
            assert!(now >= prev - 1e-3, "meter regressed: {} -> {}", prev, now);
            prev = now;
        }
        assert!(prev.abs() < 0.5, "did not converge: {}", prev);
    }
}
