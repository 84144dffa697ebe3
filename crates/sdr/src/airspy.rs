// Copyright 2025-2026 CEMAXECUTER LLC

//! Airspy backend.
//!
//! The vendor driver is resolved at runtime: the shared library is loaded
//! and every required entry point bound by symbol name into an
//! instance-scoped function table. Binding is all-or-nothing; the first
//! unresolved symbol unwinds the load and leaves nothing behind. No
//! process-global symbol state, so multiple Airspy instances are safe.

use std::ffi::OsString;
use std::os::raw::{c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use libloading::Library;
use num_complex::Complex32;

use crate::ring::RingBuffer;
use crate::{option_value, DeviceError, FreqRange, GainStage, Result, SdrDevice};

const AIRSPY_SUCCESS: c_int = 0;

/// Sample type requested from the driver: interleaved f32 I/Q.
const AIRSPY_SAMPLE_FLOAT32_IQ: c_int = 0;

// Driver API version this backend was written against. A different
// reported version is logged but non-fatal unless symbols are missing.
const API_VER_MAJOR: u32 = 1;
const API_VER_MINOR: u32 = 0;

// Per-stage scale factors mapping the backend-independent 0-100 gain
// scale onto native units. Declared by this backend, not shared: the
// stepped stages (LNA/mixer/VGA) span 0-15, the combined linearity and
// sensitivity curves span 0-21.
const GAIN_MAX_STEPPED: u32 = 15;
const GAIN_MAX_COMBINED: u32 = 21;

/// Default linearity gain applied right after open.
const DEFAULT_LINEARITY_GAIN: u8 = 15;

const RATES: [f32; 4] = [2_500_000.0, 3_000_000.0, 6_000_000.0, 10_000_000.0];

/// Rate mapping tolerance, relative.
const RATE_TOLERANCE: f32 = 0.01;

/// Ring capacity target: ~100 ms at the negotiated rate.
const RING_SECONDS: f32 = 0.1;

#[repr(C)]
struct AirspyLibVersion {
    major_version: u32,
    minor_version: u32,
    revision: u32,
}

#[repr(C)]
pub struct AirspyTransfer {
    pub device: *mut c_void,
    pub ctx: *mut c_void,
    pub samples: *mut c_void,
    pub sample_count: c_int,
    pub dropped_samples: u64,
    pub sample_type: c_int,
}

type SampleBlockCb = unsafe extern "C" fn(*mut AirspyTransfer) -> c_int;

/// Instance-scoped table of vendor entry points.
///
/// The `Library` handle is kept alive for as long as the table exists, so
/// the bound function pointers stay valid.
struct AirspyApi {
    _lib: Library,
    open: unsafe extern "C" fn(*mut *mut c_void) -> c_int,
    close: unsafe extern "C" fn(*mut c_void) -> c_int,
    set_samplerate: unsafe extern "C" fn(*mut c_void, u32) -> c_int,
    set_sample_type: unsafe extern "C" fn(*mut c_void, c_int) -> c_int,
    set_freq: unsafe extern "C" fn(*mut c_void, u32) -> c_int,
    start_rx: unsafe extern "C" fn(*mut c_void, SampleBlockCb, *mut c_void) -> c_int,
    stop_rx: unsafe extern "C" fn(*mut c_void) -> c_int,
    is_streaming: unsafe extern "C" fn(*mut c_void) -> c_int,
    set_lna_gain: unsafe extern "C" fn(*mut c_void, u8) -> c_int,
    set_mixer_gain: unsafe extern "C" fn(*mut c_void, u8) -> c_int,
    set_vga_gain: unsafe extern "C" fn(*mut c_void, u8) -> c_int,
    set_linearity_gain: unsafe extern "C" fn(*mut c_void, u8) -> c_int,
    set_sensitivity_gain: unsafe extern "C" fn(*mut c_void, u8) -> c_int,
    set_lna_agc: unsafe extern "C" fn(*mut c_void, u8) -> c_int,
    set_mixer_agc: unsafe extern "C" fn(*mut c_void, u8) -> c_int,
}

fn bind<T: Copy>(lib: &Library, name: &str) -> Result<T> {
    let mut sym = Vec::with_capacity(name.len() + 1);
    sym.extend_from_slice(name.as_bytes());
    sym.push(0);
    unsafe { lib.get::<T>(&sym) }
        .map(|s| *s)
        .map_err(|e| DeviceError::Lib(format!("{}: {}", name, e)))
}

impl AirspyApi {
    /// Load the vendor library (platform default name, or an explicit
    /// path) and bind every required symbol. All-or-nothing.
    fn load(lib_override: Option<&str>) -> Result<Self> {
        let name: OsString = match lib_override {
            Some(path) => path.into(),
            None => libloading::library_filename("airspy"),
        };
        let lib = unsafe { Library::new(&name) }
            .map_err(|e| DeviceError::Lib(format!("{}: {}", name.to_string_lossy(), e)))?;

        let lib_version: unsafe extern "C" fn(*mut AirspyLibVersion) =
            bind(&lib, "airspy_lib_version")?;
        let mut ver = AirspyLibVersion {
            major_version: 0,
            minor_version: 0,
            revision: 0,
        };
        unsafe { lib_version(&mut ver) };
        log::info!(
            "libairspy {}.{}.{}",
            ver.major_version,
            ver.minor_version,
            ver.revision
        );
        if ver.major_version != API_VER_MAJOR || ver.minor_version != API_VER_MINOR {
            log::warn!(
                "libairspy reports API {}.{}, backend written against {}.{}",
                ver.major_version,
                ver.minor_version,
                API_VER_MAJOR,
                API_VER_MINOR
            );
        }

        Ok(Self {
            open: bind(&lib, "airspy_open")?,
            close: bind(&lib, "airspy_close")?,
            set_samplerate: bind(&lib, "airspy_set_samplerate")?,
            set_sample_type: bind(&lib, "airspy_set_sample_type")?,
            set_freq: bind(&lib, "airspy_set_freq")?,
            start_rx: bind(&lib, "airspy_start_rx")?,
            stop_rx: bind(&lib, "airspy_stop_rx")?,
            is_streaming: bind(&lib, "airspy_is_streaming")?,
            set_lna_gain: bind(&lib, "airspy_set_lna_gain")?,
            set_mixer_gain: bind(&lib, "airspy_set_mixer_gain")?,
            set_vga_gain: bind(&lib, "airspy_set_vga_gain")?,
            set_linearity_gain: bind(&lib, "airspy_set_linearity_gain")?,
            set_sensitivity_gain: bind(&lib, "airspy_set_sensitivity_gain")?,
            set_lna_agc: bind(&lib, "airspy_set_lna_agc")?,
            set_mixer_agc: bind(&lib, "airspy_set_mixer_agc")?,
            _lib: lib,
        })
    }
}

/// State shared with the vendor delivery thread. Heap-allocated with a
/// stable address; the callback receives a raw pointer to it.
struct RxState {
    ring: Arc<RingBuffer>,
    received: AtomicU64,
    fault: AtomicBool,
}

/// Vendor RX callback. Runs on the driver's own thread under real-time
/// delivery constraints: no allocation, no logging, nothing that can
/// block except the ring's own write.
unsafe extern "C" fn rx_callback(transfer: *mut AirspyTransfer) -> c_int {
    let state = &*((*transfer).ctx as *const RxState);

    if (*transfer).sample_type != AIRSPY_SAMPLE_FLOAT32_IQ {
        state.fault.store(true, Ordering::Release);
        return -1; // abort streaming
    }

    let n = (*transfer).sample_count as usize;
    let samples = std::slice::from_raw_parts((*transfer).samples as *const Complex32, n);
    state.ring.write(samples);
    state.received.fetch_add(n as u64, Ordering::Relaxed);
    0
}

/// Airspy device backend. Exclusively owned by the capture thread.
pub struct AirspyDevice {
    api: Option<AirspyApi>,
    dev: *mut c_void,
    ring: Option<Arc<RingBuffer>>,
    rx: Option<Box<RxState>>,
    sample_rate: f32,
    freq: u64,
    streaming: bool,
    started_at: Option<Instant>,
}

// The device pointer has a single owner; the vendor thread only sees the
// RxState.
unsafe impl Send for AirspyDevice {}

impl AirspyDevice {
    pub fn new() -> Self {
        Self {
            api: None,
            dev: ptr::null_mut(),
            ring: None,
            rx: None,
            sample_rate: 0.0,
            freq: 0,
            streaming: false,
            started_at: None,
        }
    }

    /// Map a continuous rate request to the vendor's enumerated rate
    /// table. Returns the table index and exact rate.
    fn map_rate(rate: f32) -> Result<(u32, f32)> {
        let mut best: Option<(u32, f32, f32)> = None;
        for (i, &r) in RATES.iter().enumerate() {
            let rel = (rate - r).abs() / r;
            if best.map_or(true, |(_, _, b)| rel < b) {
                best = Some((i as u32, r, rel));
            }
        }
        match best {
            Some((idx, exact, rel)) if rel <= RATE_TOLERANCE => Ok((idx, exact)),
            _ => Err(DeviceError::Invalid(format!(
                "no supported rate within tolerance of {} Hz",
                rate
            ))),
        }
    }

    fn api(&self) -> Result<&AirspyApi> {
        self.api
            .as_ref()
            .ok_or_else(|| DeviceError::Backend("device not initialized".into()))
    }

    fn close_dev(&mut self) {
        if let (Some(api), false) = (self.api.as_ref(), self.dev.is_null()) {
            unsafe { (api.close)(self.dev) };
        }
        self.dev = ptr::null_mut();
    }
}

impl Default for AirspyDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SdrDevice for AirspyDevice {
    fn init(&mut self, sample_rate: f32, options: &str) -> Result<()> {
        if self.api.is_some() {
            return Err(DeviceError::Busy);
        }

        let api = AirspyApi::load(option_value(options, "lib"))?;

        let mut dev: *mut c_void = ptr::null_mut();
        let r = unsafe { (api.open)(&mut dev) };
        if r != AIRSPY_SUCCESS {
            return Err(DeviceError::Open(format!("airspy_open failed: {}", r)));
        }

        let (idx, exact) = match Self::map_rate(sample_rate) {
            Ok(m) => m,
            Err(_) => {
                unsafe { (api.close)(dev) };
                return Err(DeviceError::SampleRate(sample_rate));
            }
        };
        let r = unsafe { (api.set_samplerate)(dev, idx) };
        if r != AIRSPY_SUCCESS {
            unsafe { (api.close)(dev) };
            return Err(DeviceError::SampleRate(sample_rate));
        }

        let r = unsafe { (api.set_sample_type)(dev, AIRSPY_SAMPLE_FLOAT32_IQ) };
        if r != AIRSPY_SUCCESS {
            unsafe { (api.close)(dev) };
            return Err(DeviceError::Backend(format!(
                "airspy_set_sample_type failed: {}",
                r
            )));
        }

        let r = unsafe { (api.set_linearity_gain)(dev, DEFAULT_LINEARITY_GAIN) };
        if r != AIRSPY_SUCCESS {
            unsafe { (api.close)(dev) };
            return Err(DeviceError::Backend(format!(
                "airspy_set_linearity_gain failed: {}",
                r
            )));
        }

        let ring = Arc::new(RingBuffer::new((RING_SECONDS * exact) as usize));
        self.rx = Some(Box::new(RxState {
            ring: ring.clone(),
            received: AtomicU64::new(0),
            fault: AtomicBool::new(false),
        }));
        self.ring = Some(ring);
        self.sample_rate = exact;
        self.dev = dev;
        self.api = Some(api);

        log::info!("Airspy opened ({} MS/s)", exact / 1e6);
        Ok(())
    }

    fn sample_rates(&self) -> Vec<f32> {
        RATES.to_vec()
    }

    fn set_sample_rate(&mut self, rate: f32) -> Result<()> {
        if self.streaming {
            return Err(DeviceError::Busy);
        }
        let (idx, exact) = Self::map_rate(rate)?;
        let api = self.api()?;
        let r = unsafe { (api.set_samplerate)(self.dev, idx) };
        if r != AIRSPY_SUCCESS {
            return Err(DeviceError::Backend(format!(
                "airspy_set_samplerate({}) failed: {}",
                idx, r
            )));
        }
        self.sample_rate = exact;
        if let Some(ring) = &self.ring {
            ring.resize((RING_SECONDS * exact) as usize);
        }
        Ok(())
    }

    fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn set_freq(&mut self, hz: u64) -> Result<()> {
        if !self.freq_range().contains(hz) {
            return Err(DeviceError::Range(format!("{} Hz", hz)));
        }
        let api = self.api()?;
        let r = unsafe { (api.set_freq)(self.dev, hz as u32) };
        if r != AIRSPY_SUCCESS {
            return Err(DeviceError::Range(format!(
                "airspy_set_freq({}) failed: {}",
                hz, r
            )));
        }
        self.freq = hz;
        log::debug!("Airspy tuned to {} Hz", hz);
        Ok(())
    }

    fn freq(&self) -> u64 {
        self.freq
    }

    fn freq_range(&self) -> FreqRange {
        FreqRange {
            min: 24_000_000,
            max: 1_800_000_000,
            step: 1,
        }
    }

    fn gain_stages(&self) -> Vec<GainStage> {
        vec![
            GainStage::Lna,
            GainStage::Mixer,
            GainStage::Vga,
            GainStage::Linearity,
            GainStage::Sensitivity,
            GainStage::RfAgc,
            GainStage::IfAgc,
        ]
    }

    fn set_gain(&mut self, stage: GainStage, value: u8) -> Result<()> {
        if value > 100 {
            return Err(DeviceError::Range(format!("gain value {}", value)));
        }
        let api = self.api()?;
        let dev = self.dev;
        let r = match stage {
            GainStage::Lna => {
                let g = (value as u32 * GAIN_MAX_STEPPED / 100) as u8;
                unsafe { (api.set_lna_gain)(dev, g) }
            }
            GainStage::Mixer => {
                let g = (value as u32 * GAIN_MAX_STEPPED / 100) as u8;
                unsafe { (api.set_mixer_gain)(dev, g) }
            }
            GainStage::Vga => {
                let g = (value as u32 * GAIN_MAX_STEPPED / 100) as u8;
                unsafe { (api.set_vga_gain)(dev, g) }
            }
            GainStage::Linearity => {
                let g = (value as u32 * GAIN_MAX_COMBINED / 100) as u8;
                unsafe { (api.set_linearity_gain)(dev, g) }
            }
            GainStage::Sensitivity => {
                let g = (value as u32 * GAIN_MAX_COMBINED / 100) as u8;
                unsafe { (api.set_sensitivity_gain)(dev, g) }
            }
            GainStage::RfAgc => unsafe { (api.set_lna_agc)(dev, (value != 0) as u8) },
            GainStage::IfAgc => unsafe { (api.set_mixer_agc)(dev, (value != 0) as u8) },
        };
        if r != AIRSPY_SUCCESS {
            return Err(DeviceError::Backend(format!(
                "set_gain({:?}, {}) failed: {}",
                stage, value, r
            )));
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let rx = self
            .rx
            .as_ref()
            .ok_or_else(|| DeviceError::Backend("device not initialized".into()))?;
        rx.received.store(0, Ordering::Relaxed);
        rx.fault.store(false, Ordering::Relaxed);
        let ctx = &**rx as *const RxState as *mut c_void;

        let api = self.api()?;
        let r = unsafe { (api.start_rx)(self.dev, rx_callback, ctx) };
        if r != AIRSPY_SUCCESS {
            return Err(DeviceError::Backend(format!(
                "airspy_start_rx failed: {}",
                r
            )));
        }
        self.streaming = true;
        self.started_at = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let api = self.api()?;
        let r = unsafe { (api.stop_rx)(self.dev) };
        self.streaming = false;
        if r != AIRSPY_SUCCESS {
            return Err(DeviceError::Backend(format!(
                "airspy_stop_rx failed: {}",
                r
            )));
        }
        if let (Some(rx), Some(t0)) = (self.rx.as_ref(), self.started_at.take()) {
            let total = rx.received.load(Ordering::Relaxed);
            let ms = t0.elapsed().as_millis().max(1) as u64;
            log::info!(
                "Airspy: {} samples in {} ms = {:.4} MS/s",
                total,
                ms,
                1e-3 * total as f64 / ms as f64
            );
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

    fn streaming_fault(&self) -> bool {
        self.rx
            .as_ref()
            .map_or(false, |rx| rx.fault.load(Ordering::Acquire))
    }
}

impl Drop for AirspyDevice {
    fn drop(&mut self) {
        if let Some(api) = self.api.as_ref() {
            unsafe {
                if self.streaming && (api.is_streaming)(self.dev) != 0 {
                    (api.stop_rx)(self.dev);
                }
            }
        }
        self.close_dev();
    }
}
