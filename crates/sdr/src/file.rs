// Copyright 2025-2026 CEMAXECUTER LLC

//! IQ file playback backend.
//!
//! Reads raw IQ samples from a file and delivers them through the same
//! ring-buffer contract as the hardware backends, paced to the configured
//! sample rate so the capture loop sees realistic timing. Useful for
//! development and for exercising the full pipeline without hardware.

use std::fs::File;
use std::io::{BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use num_complex::Complex32;

use crate::ring::RingBuffer;
use crate::{option_value, DeviceError, FreqRange, GainStage, Result, SdrDevice};

/// IQ sample format on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Complex int8 (CS8): pairs of i8
    Cs8,
    /// Complex int16 (CS16): pairs of i16, little-endian
    Cs16,
    /// Complex float32 (CF32): pairs of f32, little-endian
    Cf32,
}

impl SampleFormat {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "cs8" => Ok(Self::Cs8),
            "cs16" => Ok(Self::Cs16),
            "cf32" => Ok(Self::Cf32),
            other => Err(DeviceError::Invalid(format!(
                "unknown sample format: {} (use cs8, cs16, or cf32)",
                other
            ))),
        }
    }

    fn bytes_per_sample(self) -> usize {
        match self {
            Self::Cs8 => 2,
            Self::Cs16 => 4,
            Self::Cf32 => 8,
        }
    }
}

/// Complex samples per delivery block.
const BLOCK_SAMPLES: usize = 8192;

fn convert_block(format: SampleFormat, bytes: &[u8], out: &mut Vec<Complex32>) {
    out.clear();
    match format {
        SampleFormat::Cs8 => {
            for pair in bytes.chunks_exact(2) {
                let i = pair[0] as i8 as f32 / 128.0;
                let q = pair[1] as i8 as f32 / 128.0;
                out.push(Complex32::new(i, q));
            }
        }
        SampleFormat::Cs16 => {
            for pair in bytes.chunks_exact(4) {
                let i = i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0;
                let q = i16::from_le_bytes([pair[2], pair[3]]) as f32 / 32768.0;
                out.push(Complex32::new(i, q));
            }
        }
        SampleFormat::Cf32 => {
            for pair in bytes.chunks_exact(8) {
                let i = f32::from_le_bytes([pair[0], pair[1], pair[2], pair[3]]);
                let q = f32::from_le_bytes([pair[4], pair[5], pair[6], pair[7]]);
                out.push(Complex32::new(i, q));
            }
        }
    }
}

/// File-based SDR device. `options` keys: `path=<file>` (required),
/// `format=cs8|cs16|cf32` (default cf32), `loop=1` to restart at EOF.
pub struct FileDevice {
    path: Option<String>,
    format: SampleFormat,
    loop_playback: bool,
    ring: Option<Arc<RingBuffer>>,
    sample_rate: f32,
    freq: u64,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl FileDevice {
    pub fn new() -> Self {
        Self {
            path: None,
            format: SampleFormat::Cf32,
            loop_playback: false,
            ring: None,
            sample_rate: 0.0,
            freq: 0,
            running: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }
}

impl Default for FileDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SdrDevice for FileDevice {
    fn init(&mut self, sample_rate: f32, options: &str) -> Result<()> {
        if self.ring.is_some() {
            return Err(DeviceError::Busy);
        }
        if sample_rate <= 0.0 {
            return Err(DeviceError::SampleRate(sample_rate));
        }
        let path = option_value(options, "path")
            .ok_or_else(|| DeviceError::Invalid("file backend requires path=<file>".into()))?
            .to_string();
        let format = match option_value(options, "format") {
            Some(f) => SampleFormat::parse(f)?,
            None => SampleFormat::Cf32,
        };

        // Probe now so a bad path fails init, not start.
        File::open(&path).map_err(|e| DeviceError::Open(format!("{}: {}", path, e)))?;

        self.loop_playback = option_value(options, "loop") == Some("1");
        self.format = format;
        self.sample_rate = sample_rate;
        self.ring = Some(Arc::new(RingBuffer::new((0.1 * sample_rate) as usize)));
        self.path = Some(path);
        Ok(())
    }

    fn sample_rates(&self) -> Vec<f32> {
        // Any rate: the file dictates content, the rate only sets pacing.
        Vec::new()
    }

    fn set_sample_rate(&mut self, rate: f32) -> Result<()> {
        if self.running.load(Ordering::Acquire) {
            return Err(DeviceError::Busy);
        }
        if rate <= 0.0 {
            return Err(DeviceError::Invalid(format!("rate {}", rate)));
        }
        self.sample_rate = rate;
        if let Some(ring) = &self.ring {
            ring.resize((0.1 * rate) as usize);
        }
        Ok(())
    }

    fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn set_freq(&mut self, hz: u64) -> Result<()> {
        self.freq = hz;
        Ok(())
    }

    fn freq(&self) -> u64 {
        self.freq
    }

    fn freq_range(&self) -> FreqRange {
        FreqRange { min: 0, max: u64::MAX, step: 1 }
    }

    fn gain_stages(&self) -> Vec<GainStage> {
        Vec::new()
    }

    fn set_gain(&mut self, stage: GainStage, _value: u8) -> Result<()> {
        Err(DeviceError::Invalid(format!("unsupported stage {:?}", stage)))
    }

    fn start(&mut self) -> Result<()> {
        let ring = self
            .ring
            .as_ref()
            .ok_or_else(|| DeviceError::Backend("device not initialized".into()))?
            .clone();
        let path = self.path.clone().unwrap_or_default();
        let format = self.format;
        let rate = self.sample_rate;
        let loop_playback = self.loop_playback;
        let running = self.running.clone();
        running.store(true, Ordering::Release);

        let block_period = Duration::from_secs_f64(BLOCK_SAMPLES as f64 / rate as f64);

        self.reader = Some(std::thread::spawn(move || {
            let mut bytes = vec![0u8; BLOCK_SAMPLES * format.bytes_per_sample()];
            let mut samples = Vec::with_capacity(BLOCK_SAMPLES);

            'outer: loop {
                let file = match File::open(&path) {
                    Ok(f) => f,
                    Err(e) => {
                        log::error!("file backend: {}: {}", path, e);
                        break;
                    }
                };
                let mut reader = BufReader::with_capacity(1 << 20, file);

                while running.load(Ordering::Acquire) {
                    let n = match reader.read(&mut bytes) {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(e) => {
                            log::error!("file backend read error: {}", e);
                            break 'outer;
                        }
                    };
                    convert_block(format, &bytes[..n], &mut samples);
                    ring.write(&samples);
                    std::thread::sleep(block_period);
                }

                if !running.load(Ordering::Acquire) || !loop_playback {
                    break;
                }
            }
            running.store(false, Ordering::Release);
        }));
        log::info!("file backend streaming from {:?}", self.path);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        Ok(())
    }

    fn num_samples(&self) -> usize {
        self.ring.as_ref().map_or(0, |r| r.count())
    }

    fn read_samples(&mut self, buf: &mut [Complex32]) -> usize {
        match &self.ring {
            Some(ring) if ring.read(buf) => buf.len(),
            _ => 0,
        }
    }

    fn dropped_samples(&self) -> u64 {
        self.ring.as_ref().map_or(0, |r| r.dropped())
    }
}

impl Drop for FileDevice {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
