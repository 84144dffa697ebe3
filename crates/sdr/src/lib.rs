//! SDR hardware abstraction layer.
//!
//! One trait ([`SdrDevice`]), a closed set of concrete backends selected
//! by string identifier, and the SPSC sample ring bridging each vendor's
//! asynchronous delivery thread to the capture loop. Application code
//! programs against `Box<dyn SdrDevice>` and never sees a vendor SDK.

pub mod airspy;
mod error;
pub mod file;
pub mod mock;
pub mod ring;

pub use error::{DeviceError, Result};

use num_complex::Complex32;

/// Gain stage kinds, stable across all backends so a control surface can
/// render a uniform gain UI without knowing the concrete device family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GainStage {
    Lna = 0,
    Mixer = 1,
    Vga = 2,
    Linearity = 3,
    Sensitivity = 4,
    /// RF automatic gain control; any nonzero value means "enable".
    RfAgc = 5,
    /// IF automatic gain control; any nonzero value means "enable".
    IfAgc = 6,
}

impl GainStage {
    /// Bit position in the supported-stages bitfield.
    pub fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// Hardware tuning range in Hz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreqRange {
    pub min: u64,
    pub max: u64,
    pub step: u64,
}

impl FreqRange {
    pub fn contains(&self, hz: u64) -> bool {
        hz >= self.min && hz <= self.max
    }
}

/// Common interface for all SDR device backends.
///
/// Lifecycle: Closed -> [`init`](SdrDevice::init) -> Open ->
/// [`start`](SdrDevice::start) -> Streaming -> [`stop`](SdrDevice::stop)
/// -> Open -> drop -> Closed. Capability queries are fixed once the
/// device is Open. An instance is exclusively owned by the capture
/// thread; only the vendor's own delivery thread touches the sample ring
/// concurrently, through the ring's producer contract.
pub trait SdrDevice: Send {
    /// Resolve the vendor driver, open the hardware, negotiate
    /// `sample_rate`, size the internal sample ring (~100 ms) and apply a
    /// default gain. `options` is a backend-specific `key=value` list.
    ///
    /// A failed init leaves no partial state: no driver handle, no ring.
    fn init(&mut self, sample_rate: f32, options: &str) -> Result<()>;

    /// Supported sample rates in Hz.
    fn sample_rates(&self) -> Vec<f32>;

    /// Map `rate` to the nearest supported rate within tolerance and
    /// apply it; resizes the sample ring. Fails with
    /// [`DeviceError::Invalid`] when no acceptable mapping exists.
    fn set_sample_rate(&mut self, rate: f32) -> Result<()>;

    /// Currently negotiated sample rate in Hz.
    fn sample_rate(&self) -> f32;

    /// Program the hardware center frequency. Safe to call while
    /// streaming (hardware retune without stop/start).
    fn set_freq(&mut self, hz: u64) -> Result<()>;

    /// Current center frequency in Hz.
    fn freq(&self) -> u64;

    /// Static tuning-range capability.
    fn freq_range(&self) -> FreqRange;

    /// Gain stages this backend supports, in presentation order.
    fn gain_stages(&self) -> Vec<GainStage>;

    /// Supported gain stages as a bitfield of [`GainStage::bit`] values.
    fn gain_stages_bf(&self) -> u16 {
        self.gain_stages().iter().fold(0, |bf, s| bf | s.bit())
    }

    /// Set a gain stage from a backend-independent 0-100 scale. Each
    /// backend maps the value onto its native range per stage; AGC stages
    /// treat any nonzero value as enable.
    fn set_gain(&mut self, stage: GainStage, value: u8) -> Result<()>;

    /// Begin asynchronous sample delivery into the internal ring.
    fn start(&mut self) -> Result<()>;

    /// End asynchronous sample delivery. After return no further callback
    /// writes occur.
    fn stop(&mut self) -> Result<()>;

    /// Samples currently buffered in the internal ring.
    fn num_samples(&self) -> usize;

    /// Pull exactly `buf.len()` samples from the internal ring. Returns 0
    /// (short read) without blocking when fewer samples are buffered; the
    /// caller retries on its next cycle.
    fn read_samples(&mut self, buf: &mut [Complex32]) -> usize;

    /// Samples discarded by ring overflow since streaming started.
    fn dropped_samples(&self) -> u64;

    /// True when the delivery callback reported an unrecoverable
    /// streaming fault (e.g. an unsupported sample format). The session
    /// must be aborted; the core never silently restarts.
    fn streaming_fault(&self) -> bool {
        false
    }
}

/// Instantiate a backend by its string identifier. Unknown identifiers
/// yield `None` rather than an error, so discovery can be driven from
/// untrusted configuration.
pub fn create_device(name: &str) -> Option<Box<dyn SdrDevice>> {
    match name {
        "airspy" => Some(Box::new(airspy::AirspyDevice::new())),
        "file" => Some(Box::new(file::FileDevice::new())),
        "mock" => Some(Box::new(mock::MockDevice::new())),
        _ => None,
    }
}

/// Parse a backend `options` string of comma-separated `key=value` pairs.
pub(crate) fn option_value<'a>(options: &'a str, key: &str) -> Option<&'a str> {
    options.split(',').find_map(|kv| {
        let (k, v) = kv.split_once('=')?;
        (k.trim() == key).then_some(v.trim())
    })
}
