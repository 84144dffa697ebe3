//! Capture thread.
//!
//! Owns the device and the receiver chain for the life of a session.
//! Control changes arrive over a crossbeam channel and are applied only
//! at block boundaries, so a retune or mode switch never tears a block
//! mid-flight. Status (signal level, sample counters, overflow drops) is
//! published after every block under a short-held mutex.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver as CmdReceiver, Sender, TryRecvError};
use num_complex::Complex32;

use srx_dsp::spectrum::SPECTRUM_BINS;
use srx_dsp::{DemodMode, Receiver};
use srx_sdr::{GainStage, SdrDevice};

use crate::audio::AudioSink;

/// Samples pulled from the device per loop cycle.
const BLOCK_SAMPLES: usize = 16_384;

#[derive(Debug, Clone, Copy)]
pub enum Command {
    SetFreq(u64),
    SetTuningOffset(f32),
    SetFilter(f32, f32),
    SetDemod(DemodMode),
    SetCwOffset(f32),
    SetAgc {
        threshold_db: i32,
        slope_percent: i32,
        decay_ms: i32,
    },
    SetSql(f32),
    SetGain(GainStage, u8),
    Stop,
}

#[derive(Debug, Clone, Default)]
pub struct Status {
    /// Smoothed channel power in dBFS.
    pub signal_db: f32,
    /// Samples pulled from the device since start.
    pub samples_read: u64,
    /// Audio samples delivered to the sink since start.
    pub audio_samples: u64,
    /// Samples lost to ring overflow, as reported by the backend.
    pub dropped: u64,
    /// Set when the backend reported an unrecoverable streaming fault or
    /// the audio sink failed; the worker has exited.
    pub fault: bool,
}

/// Handle to a running capture session. Dropping it stops the session.
pub struct SdrThread {
    cmd_tx: Sender<Command>,
    status: Arc<Mutex<Status>>,
    spectrum: Arc<Mutex<Option<Arc<[f32; SPECTRUM_BINS]>>>>,
    join: Option<JoinHandle<()>>,
}

impl SdrThread {
    /// Start streaming on an initialized device and spawn the worker.
    /// The device must be Open (init already done); `start` is issued
    /// here so a start failure surfaces before any thread exists.
    pub fn spawn(
        mut device: Box<dyn SdrDevice>,
        receiver: Receiver,
        sink: Box<dyn AudioSink>,
    ) -> srx_sdr::Result<Self> {
        device.start()?;

        let (cmd_tx, cmd_rx) = unbounded();
        let status = Arc::new(Mutex::new(Status::default()));
        let spectrum = Arc::new(Mutex::new(None));

        let worker_status = Arc::clone(&status);
        let worker_spectrum = Arc::clone(&spectrum);
        let join = thread::Builder::new()
            .name("sdr-capture".into())
            .spawn(move || {
                run(device, receiver, sink, cmd_rx, worker_status, worker_spectrum);
            })
            .map_err(srx_sdr::DeviceError::Io)?;

        Ok(Self {
            cmd_tx,
            status,
            spectrum,
            join: Some(join),
        })
    }

    /// Queue a control change; it takes effect at the next block boundary.
    pub fn send(&self, cmd: Command) {
        // A closed channel means the worker already exited; the fault is
        // visible through status().
        let _ = self.cmd_tx.send(cmd);
    }

    pub fn status(&self) -> Status {
        self.status.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Latest input spectrum in dBFS, None until one full FFT window of
    /// samples has been captured. Cheap: clones an `Arc`, never copies
    /// the bins or waits on the worker.
    pub fn spectrum(&self) -> Option<Arc<[f32; SPECTRUM_BINS]>> {
        self.spectrum.lock().ok().and_then(|s| s.clone())
    }

    /// True while the worker is alive (streaming or draining).
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    /// Stop the session and wait for the worker to drain and exit.
    pub fn stop(mut self) -> Status {
        self.shutdown();
        self.status()
    }

    fn shutdown(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = self.cmd_tx.send(Command::Stop);
            if join.join().is_err() {
                log::error!("capture thread panicked");
                if let Ok(mut s) = self.status.lock() {
                    s.fault = true;
                }
            }
        }
    }
}

impl Drop for SdrThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    mut device: Box<dyn SdrDevice>,
    mut receiver: Receiver,
    mut sink: Box<dyn AudioSink>,
    cmd_rx: CmdReceiver<Command>,
    status: Arc<Mutex<Status>>,
    spectrum: Arc<Mutex<Option<Arc<[f32; SPECTRUM_BINS]>>>>,
) {
    let block_period =
        Duration::from_secs_f32(BLOCK_SAMPLES as f32 / device.sample_rate().max(1.0));
    let mut block = vec![Complex32::new(0.0, 0.0); BLOCK_SAMPLES];
    let mut audio = Vec::new();
    let mut fault = false;

    log::info!(
        "capture started: {} sps, block {} samples ({:.1} ms)",
        device.sample_rate(),
        BLOCK_SAMPLES,
        block_period.as_secs_f32() * 1000.0
    );

    'session: loop {
        // Apply every queued command before touching the next block.
        loop {
            match cmd_rx.try_recv() {
                Ok(Command::Stop) => break 'session,
                Ok(cmd) => apply(&cmd, device.as_mut(), &mut receiver),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'session,
            }
        }

        if device.streaming_fault() {
            log::error!("backend streaming fault, aborting session");
            fault = true;
            break;
        }

        let n = device.read_samples(&mut block);
        if n == 0 {
            // Ring not full enough yet; wait out part of a block.
            thread::sleep(block_period / 4);
            continue;
        }

        let produced = receiver.process(&block[..n], &mut audio);
        if let Err(e) = sink.write(&audio[..produced]) {
            log::error!("audio sink error: {}", e);
            fault = true;
            break;
        }

        if let Ok(mut s) = status.lock() {
            s.signal_db = receiver.signal_strength();
            s.samples_read += n as u64;
            s.audio_samples += produced as u64;
            s.dropped = device.dropped_samples();
        }
        let mut bins = [0.0f32; SPECTRUM_BINS];
        if receiver.spectrum_snapshot(&mut bins) {
            // Swap in a fresh Arc; readers holding the old one keep a
            // consistent snapshot.
            if let Ok(mut slot) = spectrum.lock() {
                *slot = Some(Arc::new(bins));
            }
        }
    }

    // Shutdown order: stop delivery first, then drain what is already
    // buffered so the tail of the capture still reaches the sink.
    if let Err(e) = device.stop() {
        log::warn!("device stop failed: {}", e);
    }
    loop {
        let n = device.read_samples(&mut block);
        if n == 0 {
            break;
        }
        let produced = receiver.process(&block[..n], &mut audio);
        if sink.write(&audio[..produced]).is_err() {
            break;
        }
        if let Ok(mut s) = status.lock() {
            s.samples_read += n as u64;
            s.audio_samples += produced as u64;
        }
    }
    if let Err(e) = sink.finish() {
        log::warn!("audio sink close failed: {}", e);
    }

    if let Ok(mut s) = status.lock() {
        s.fault = fault;
        log::info!(
            "capture finished: {} samples in, {} audio out, {} dropped",
            s.samples_read,
            s.audio_samples,
            s.dropped
        );
    }
}

/// A failed control change is logged and the session continues; only
/// streaming faults end a session.
fn apply(cmd: &Command, device: &mut dyn SdrDevice, receiver: &mut Receiver) {
    match *cmd {
        Command::SetFreq(hz) => {
            if let Err(e) = device.set_freq(hz) {
                log::warn!("set_freq {} failed: {}", hz, e);
            }
        }
        Command::SetTuningOffset(hz) => receiver.set_tuning_offset(hz),
        Command::SetFilter(low, high) => receiver.set_filter(low, high),
        Command::SetDemod(mode) => receiver.set_demod(mode),
        Command::SetCwOffset(hz) => receiver.set_cw_offset(hz),
        Command::SetAgc {
            threshold_db,
            slope_percent,
            decay_ms,
        } => receiver.set_agc(threshold_db, slope_percent, decay_ms),
        Command::SetSql(db) => receiver.set_sql(db),
        Command::SetGain(stage, value) => {
            if let Err(e) = device.set_gain(stage, value) {
                log::warn!("set_gain {:?}={} failed: {}", stage, value, e);
            }
        }
        Command::Stop => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MemorySink;
    use srx_sdr::mock::{Call, MockDevice};

    fn session() -> (SdrThread, Arc<Mutex<Vec<Call>>>, Arc<Mutex<Vec<f32>>>) {
        let mut dev = MockDevice::new();
        dev.set_tone(10_000.0, 0.5);
        dev.init(2_500_000.0, "").unwrap();
        dev.set_freq(100_000_000).unwrap();
        let log = dev.call_log();

        let mut rx = Receiver::new(dev.sample_rate(), 48_000.0);
        rx.set_tuning_offset(10_000.0);
        rx.set_filter(-5_000.0, 5_000.0);

        let sink = MemorySink::new();
        let audio = sink.handle();
        let thread = SdrThread::spawn(Box::new(dev), rx, Box::new(sink)).unwrap();
        (thread, log, audio)
    }

    #[test]
    fn test_session_produces_audio_and_counts() {
        let (thread, _log, audio) = session();
        thread::sleep(Duration::from_millis(400));
        assert!(thread.is_running());
        let status = thread.stop();

        assert!(!status.fault);
        assert!(status.samples_read > 0, "no samples read");
        assert!(status.audio_samples > 0, "no audio produced");
        assert_eq!(audio.lock().unwrap().len() as u64, status.audio_samples);
    }

    #[test]
    fn test_commands_reach_device_at_block_boundary() {
        let (thread, log, _audio) = session();
        thread.send(Command::SetFreq(7_074_000));
        thread.send(Command::SetGain(GainStage::Vga, 50));
        thread::sleep(Duration::from_millis(300));
        thread.stop();

        let calls = log.lock().unwrap().clone();
        assert!(
            calls.iter().any(|c| matches!(c, Call::SetFreq(7_074_000))),
            "retune never reached device: {:?}",
            calls
        );
        assert!(calls
            .iter()
            .any(|c| matches!(c, Call::SetGain(GainStage::Vga, 50))));
    }

    #[test]
    fn test_stop_then_start_ordering() {
        let (thread, log, _audio) = session();
        thread::sleep(Duration::from_millis(150));
        thread.stop();

        let calls = log.lock().unwrap().clone();
        let start = calls.iter().position(|c| matches!(c, Call::Start));
        let stop = calls.iter().position(|c| matches!(c, Call::Stop));
        assert!(start.is_some(), "device never started");
        assert!(stop.is_some(), "device never stopped");
        assert!(start < stop);
        // Exactly one start/stop pair per session.
        assert_eq!(calls.iter().filter(|c| matches!(c, Call::Start)).count(), 1);
        assert_eq!(calls.iter().filter(|c| matches!(c, Call::Stop)).count(), 1);
    }

    #[test]
    fn test_streaming_fault_aborts_session() {
        let mut dev = MockDevice::new();
        dev.init(2_500_000.0, "").unwrap();
        let log = dev.call_log();
        let fault = dev.fault_handle();

        let rx = Receiver::new(dev.sample_rate(), 48_000.0);
        let thread =
            SdrThread::spawn(Box::new(dev), rx, Box::new(MemorySink::new())).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(thread.is_running());

        fault.store(true, std::sync::atomic::Ordering::Release);

        // The worker must exit on its own, without a Stop command.
        for _ in 0..50 {
            if !thread.is_running() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!thread.is_running(), "worker kept running after fault");

        let status = thread.stop();
        assert!(status.fault, "fault not reported in status");

        // Aborted once, never restarted: exactly one start/stop pair.
        let calls = log.lock().unwrap().clone();
        assert_eq!(calls.iter().filter(|c| matches!(c, Call::Start)).count(), 1);
        assert_eq!(calls.iter().filter(|c| matches!(c, Call::Stop)).count(), 1);
    }

    #[test]
    fn test_drop_stops_session() {
        let (thread, log, _audio) = session();
        thread::sleep(Duration::from_millis(100));
        drop(thread);
        let calls = log.lock().unwrap().clone();
        assert!(calls.iter().any(|c| matches!(c, Call::Stop)));
    }

    #[test]
    fn test_spectrum_becomes_available() {
        let (thread, _log, _audio) = session();
        thread::sleep(Duration::from_millis(400));
        let spectrum = thread.spectrum();
        thread.stop();
        let bins = spectrum.expect("no spectrum after 400 ms of capture");
        // Tone at +10 kHz of 2.5 MHz span sits just above the center bin.
        let peak = bins
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert!(
            (peak as i64 - (SPECTRUM_BINS / 2) as i64).unsigned_abs() <= 8,
            "peak at bin {}",
            peak
        );
    }
}
