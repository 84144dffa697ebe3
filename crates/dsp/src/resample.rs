//! Fractional-ratio resampler.
//!
//! Cubic Hermite interpolation over a four-sample window with a phase
//! accumulator. Good enough for the final audio-rate conversion where the
//! decimator has already done the heavy anti-alias filtering; the
//! interpolation error sits well below the channel filter's stopband.

/// Fractional resampler for real-valued audio.
pub struct Resampler {
    /// Input samples consumed per output sample.
    step: f64,
    /// Fractional position within the current input interval.
    phase: f64,
    /// Last three input samples carried across blocks.
    hist: [f32; 3],
}

impl Resampler {
    pub fn new(input_rate: f32, output_rate: f32) -> Self {
        Self {
            step: input_rate as f64 / output_rate as f64,
            phase: 0.0,
            hist: [0.0; 3],
        }
    }

    pub fn set_rates(&mut self, input_rate: f32, output_rate: f32) {
        self.step = input_rate as f64 / output_rate as f64;
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.hist = [0.0; 3];
    }

    /// Upper bound on output samples `process` can emit for `input` input
    /// samples, for sizing the output buffer.
    pub fn max_output(&self, input: usize) -> usize {
        (input as f64 / self.step).ceil() as usize + 2
    }

    /// Resample `input` into `output`, returning the number of samples
    /// written. `output` must hold at least `max_output(input.len())`.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> usize {
        let mut produced = 0;

        // Work on history + new block so interpolation can straddle the
        // block boundary without a seam.
        let mut buf = Vec::with_capacity(3 + input.len());
        buf.extend_from_slice(&self.hist);
        buf.extend_from_slice(input);

        // Interpolation needs points at idx-1 .. idx+2.
        let mut pos = self.phase + 1.0;
        while pos + 2.0 < buf.len() as f64 {
            let idx = pos as usize;
            let mu = (pos - idx as f64) as f32;
            output[produced] = hermite(buf[idx - 1], buf[idx], buf[idx + 1], buf[idx + 2], mu);
            produced += 1;
            pos += self.step;
        }

        let consumed = buf.len().saturating_sub(3);
        self.phase = pos - 1.0 - consumed as f64;
        let n = buf.len();
        self.hist = [buf[n - 3], buf[n - 2], buf[n - 1]];
        produced
    }
}

/// Catmull-Rom cubic interpolation between y1 and y2.
fn hermite(y0: f32, y1: f32, y2: f32, y3: f32, mu: f32) -> f32 {
    let c0 = y1;
    let c1 = 0.5 * (y2 - y0);
    let c2 = y0 - 2.5 * y1 + 2.0 * y2 - 0.5 * y3;
    let c3 = 0.5 * (y3 - y0) + 1.5 * (y1 - y2);
    ((c3 * mu + c2) * mu + c1) * mu + c0
}
