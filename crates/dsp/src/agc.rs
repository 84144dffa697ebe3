//! Automatic gain control.
//!
//! Feedback loop across blocks: an envelope follower (fast attack,
//! configurable release) estimates signal level; above the threshold the
//! gain is reduced so the output rises only `slope`% of the input rise.
//! Below the threshold the signal passes at unity gain. A hard limiter
//! bounds the instantaneous output magnitude no matter what the loop
//! state is, so a transient can never slip through at full level.

use num_complex::Complex32;

/// Hard ceiling on output magnitude, linear.
const CEILING: f32 = 1.0;

/// Attack time constant in seconds (fixed; release is configurable).
const ATTACK_SECONDS: f32 = 0.002;

pub struct Agc {
    sample_rate: f32,
    threshold_db: f32,
    /// Fraction (0..=1) of input level rise passed through above the
    /// threshold; 1.0 disables compression.
    slope: f32,
    attack_alpha: f32,
    decay_alpha: f32,
    /// Envelope follower state, linear magnitude.
    envelope: f32,
}

impl Agc {
    /// A neutral AGC: threshold at full scale, so nothing is compressed
    /// until parameters are configured.
    pub fn new(sample_rate: f32) -> Self {
        let mut agc = Self {
            sample_rate,
            threshold_db: 0.0,
            slope: 1.0,
            attack_alpha: 0.0,
            decay_alpha: 0.0,
            envelope: 0.0,
        };
        agc.set_params(0, 100, 200);
        agc
    }

    /// Configure threshold (dBFS, negative), slope (percent 0..=100) and
    /// decay (release time in ms). Clamped to stable ranges: decay is
    /// floored at 20 ms so the loop cannot oscillate at audio rates.
    pub fn set_params(&mut self, threshold_db: i32, slope_percent: i32, decay_ms: i32) {
        self.threshold_db = (threshold_db as f32).clamp(-120.0, 0.0);
        self.slope = (slope_percent as f32 / 100.0).clamp(0.0, 1.0);
        let decay_s = (decay_ms.max(20) as f32) / 1000.0;
        self.attack_alpha = 1.0 - (-1.0 / (self.sample_rate * ATTACK_SECONDS)).exp();
        self.decay_alpha = 1.0 - (-1.0 / (self.sample_rate * decay_s)).exp();
    }

    /// Reset loop state (mode switches).
    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }

    /// Current gain in dB for the tracked envelope.
    fn gain_db(&self) -> f32 {
        let env_db = 20.0 * self.envelope.max(1e-9).log10();
        let over = env_db - self.threshold_db;
        if over > 0.0 {
            -over * (1.0 - self.slope)
        } else {
            0.0
        }
    }

    pub fn process(&mut self, data: &mut [Complex32]) {
        for s in data.iter_mut() {
            let mag = s.norm();
            let alpha = if mag > self.envelope {
                self.attack_alpha
            } else {
                self.decay_alpha
            };
            self.envelope += alpha * (mag - self.envelope);

            let g = 10f32.powf(self.gain_db() / 20.0);
            let mut y = *s * g;

            // Limiter: bounded output whatever the loop has converged to.
            let ymag = y.norm();
            if ymag > CEILING {
                y *= CEILING / ymag;
            }
            *s = y;
        }
    }
}
