//! Recording mock backend for tests.
//!
//! Records every call made through the [`SdrDevice`] interface so tests
//! can assert on exact call sequences, and synthesizes a complex tone
//! into the sample ring on demand so pipeline tests can run without
//! hardware.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use num_complex::Complex32;

use crate::ring::RingBuffer;
use crate::{option_value, DeviceError, FreqRange, GainStage, Result, SdrDevice};

/// One recorded interface call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Init { rate: f32 },
    SetSampleRate(f32),
    SetFreq(u64),
    SetGain(GainStage, u8),
    Start,
    Stop,
}

const RATES: [f32; 3] = [1_000_000.0, 2_500_000.0, 8_000_000.0];

pub struct MockDevice {
    calls: Arc<Mutex<Vec<Call>>>,
    ring: Option<Arc<RingBuffer>>,
    sample_rate: f32,
    freq: u64,
    streaming: Arc<AtomicBool>,
    /// Tone generator state for [`produce`](MockDevice::produce).
    tone_freq: f32,
    tone_amp: f32,
    phase: f32,
    /// When set, `init` fails with this error kind name.
    fail_init: Option<&'static str>,
    /// Shared fault flag, settable from any thread like a real delivery
    /// callback would.
    fault: Arc<AtomicBool>,
    agc_enabled: bool,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            ring: None,
            sample_rate: 0.0,
            freq: 0,
            streaming: Arc::new(AtomicBool::new(false)),
            tone_freq: 0.0,
            tone_amp: 1.0,
            phase: 0.0,
            fail_init: None,
            fault: Arc::new(AtomicBool::new(false)),
            agc_enabled: false,
        }
    }

    /// Shared handle to the recorded call log.
    pub fn call_log(&self) -> Arc<Mutex<Vec<Call>>> {
        self.calls.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("call log poisoned").clone()
    }

    /// Configure the synthetic tone written by [`produce`](Self::produce)
    /// (baseband offset in Hz, linear amplitude).
    pub fn set_tone(&mut self, freq: f32, amp: f32) {
        self.tone_freq = freq;
        self.tone_amp = amp;
    }

    /// Arrange for the next `init` to fail like a missing driver library.
    pub fn fail_next_init(&mut self) {
        self.fail_init = Some("lib");
    }

    /// Handle to the streaming-fault flag. Tests set it to simulate an
    /// unrecoverable delivery error (e.g. wrong sample format) after the
    /// device has been handed to the capture thread.
    pub fn fault_handle(&self) -> Arc<AtomicBool> {
        self.fault.clone()
    }

    pub fn agc_enabled(&self) -> bool {
        self.agc_enabled
    }

    /// Act as the driver delivery thread: push `n` tone samples into the
    /// ring. Tests call this from any thread they like.
    pub fn produce(&mut self, n: usize) {
        let ring = match &self.ring {
            Some(r) => r.clone(),
            None => return,
        };
        let step = TAU * self.tone_freq / self.sample_rate;
        let mut block = Vec::with_capacity(n);
        for _ in 0..n {
            block.push(Complex32::from_polar(self.tone_amp, self.phase));
            self.phase = (self.phase + step) % TAU;
        }
        ring.write(&block);
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("call log poisoned").push(call);
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SdrDevice for MockDevice {
    fn init(&mut self, sample_rate: f32, options: &str) -> Result<()> {
        if self.ring.is_some() {
            return Err(DeviceError::Busy);
        }
        if self.fail_init.take().is_some() || option_value(options, "fail") == Some("lib") {
            return Err(DeviceError::Lib("mock: driver library missing".into()));
        }
        let rate = RATES
            .iter()
            .copied()
            .find(|r| (r - sample_rate).abs() / r < 0.01)
            .ok_or(DeviceError::SampleRate(sample_rate))?;

        if let Some(tf) = option_value(options, "tone") {
            self.tone_freq = tf
                .parse()
                .map_err(|_| DeviceError::Invalid(format!("tone={}", tf)))?;
        }
        if let Some(amp) = option_value(options, "amp") {
            self.tone_amp = amp
                .parse()
                .map_err(|_| DeviceError::Invalid(format!("amp={}", amp)))?;
        }

        self.sample_rate = rate;
        self.ring = Some(Arc::new(RingBuffer::new((0.1 * rate) as usize)));
        self.record(Call::Init { rate });
        Ok(())
    }

    fn sample_rates(&self) -> Vec<f32> {
        RATES.to_vec()
    }

    fn set_sample_rate(&mut self, rate: f32) -> Result<()> {
        if self.streaming.load(Ordering::Acquire) {
            return Err(DeviceError::Busy);
        }
        let rate = RATES
            .iter()
            .copied()
            .find(|r| (r - rate).abs() / r < 0.01)
            .ok_or_else(|| DeviceError::Invalid(format!("rate {}", rate)))?;
        self.sample_rate = rate;
        if let Some(ring) = &self.ring {
            ring.resize((0.1 * rate) as usize);
        }
        self.record(Call::SetSampleRate(rate));
        Ok(())
    }

    fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn set_freq(&mut self, hz: u64) -> Result<()> {
        if !self.freq_range().contains(hz) {
            return Err(DeviceError::Range(format!("{} Hz", hz)));
        }
        self.freq = hz;
        self.record(Call::SetFreq(hz));
        Ok(())
    }

    fn freq(&self) -> u64 {
        self.freq
    }

    fn freq_range(&self) -> FreqRange {
        FreqRange { min: 1_000_000, max: 6_000_000_000, step: 1 }
    }

    fn gain_stages(&self) -> Vec<GainStage> {
        vec![GainStage::Lna, GainStage::Vga, GainStage::RfAgc]
    }

    fn set_gain(&mut self, stage: GainStage, value: u8) -> Result<()> {
        if value > 100 {
            return Err(DeviceError::Range(format!("gain value {}", value)));
        }
        if !self.gain_stages().contains(&stage) {
            return Err(DeviceError::Invalid(format!("unsupported stage {:?}", stage)));
        }
        if stage == GainStage::RfAgc {
            self.agc_enabled = value != 0;
        }
        self.record(Call::SetGain(stage, value));
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.ring.is_none() {
            return Err(DeviceError::Backend("device not initialized".into()));
        }
        self.streaming.store(true, Ordering::Release);
        self.record(Call::Start);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.streaming.store(false, Ordering::Release);
        self.record(Call::Stop);
        Ok(())
    }

    fn num_samples(&self) -> usize {
        self.ring.as_ref().map_or(0, |r| r.count())
    }

    fn read_samples(&mut self, buf: &mut [Complex32]) -> usize {
        // Self-clocking: when streaming, top the ring up so the capture
        // loop always has a full block. Mirrors a driver that outpaces
        // the consumer.
        if self.streaming.load(Ordering::Acquire) && self.num_samples() < buf.len() {
            self.produce(buf.len());
        }
        match &self.ring {
            Some(ring) if ring.read(buf) => buf.len(),
            _ => 0,
        }
    }

    fn dropped_samples(&self) -> u64 {
        self.ring.as_ref().map_or(0, |r| r.dropped())
    }

    fn streaming_fault(&self) -> bool {
        self.fault.load(Ordering::Acquire)
    }
}
