mod audio;
mod sdr_thread;
mod settings;

use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use srx_dsp::{DemodMode, Receiver};
use srx_sdr::GainStage;

use audio::{AudioSink, NullSink, PcmFileSink};
use sdr_thread::SdrThread;
use settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "srx")]
#[command(about = "Software receiver: SDR capture, demodulation, audio output")]
struct Cli {
    /// Settings file (JSON); CLI flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Device backend: airspy, file or mock
    #[arg(short = 'd', long)]
    device: Option<String>,

    /// Backend options as comma-separated key=value pairs
    /// (e.g. "path=dump.iq,format=cs16" for the file backend)
    #[arg(short = 'o', long)]
    device_options: Option<String>,

    /// Input sample rate in Hz
    #[arg(short = 'r', long)]
    rate: Option<f32>,

    /// Hardware center frequency in Hz
    #[arg(short = 'c', long)]
    freq: Option<u64>,

    /// Tuned signal offset from center in Hz
    #[arg(long)]
    offset: Option<f32>,

    /// Demodulator: am, ssb, nfm or cw
    #[arg(short = 'm', long)]
    mode: Option<String>,

    /// Channel filter low edge in Hz (negative for lower sideband)
    #[arg(long)]
    filter_low: Option<f32>,

    /// Channel filter high edge in Hz
    #[arg(long)]
    filter_high: Option<f32>,

    /// CW sidetone pitch in Hz
    #[arg(long)]
    cw_offset: Option<f32>,

    /// Linearity gain 0-100
    #[arg(short = 'g', long)]
    gain: Option<u8>,

    /// Squelch threshold in dBFS
    #[arg(short = 's', long)]
    squelch: Option<f32>,

    /// Audio output file (signed 16-bit LE PCM, mono)
    #[arg(short = 'w', long)]
    write: Option<PathBuf>,

    /// Stop after this many seconds (default: run until fault)
    #[arg(short = 't', long)]
    duration: Option<f32>,

    /// Save the effective settings to a file and continue
    #[arg(long)]
    save_config: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn effective_settings(cli: &Cli) -> Result<Settings, String> {
    let mut s = match &cli.config {
        Some(path) => Settings::load(path).map_err(|e| e.to_string())?,
        None => Settings::default(),
    };
    if let Some(v) = &cli.device {
        s.device = v.clone();
    }
    if let Some(v) = &cli.device_options {
        s.device_options = v.clone();
    }
    if let Some(v) = cli.rate {
        s.sample_rate = v;
    }
    if let Some(v) = cli.freq {
        s.frequency = v;
    }
    if let Some(v) = cli.offset {
        s.tuning_offset = v;
    }
    if let Some(v) = &cli.mode {
        s.mode = v.clone();
    }
    if cli.filter_low.is_some() || cli.filter_high.is_some() {
        let mut cuts = s.active_filter();
        if let Some(v) = cli.filter_low {
            cuts.low = v;
        }
        if let Some(v) = cli.filter_high {
            cuts.high = v;
        }
        s.filters.insert(s.mode.clone(), cuts);
    }
    if let Some(v) = cli.cw_offset {
        s.cw_offset = v;
    }
    if let Some(v) = cli.gain {
        s.gain = v;
    }
    if let Some(v) = cli.squelch {
        s.sql_db = v;
    }
    Ok(s)
}

fn run(cli: Cli) -> Result<(), String> {
    let settings = effective_settings(&cli)?;
    let mode = DemodMode::parse(&settings.mode)
        .ok_or_else(|| format!("unknown mode: {} (use am, ssb, nfm or cw)", settings.mode))?;

    if let Some(path) = &cli.save_config {
        settings.save(path).map_err(|e| e.to_string())?;
        log::info!("settings saved to {}", path.display());
    }

    let mut device = srx_sdr::create_device(&settings.device)
        .ok_or_else(|| format!("unknown device: {}", settings.device))?;
    device
        .init(settings.sample_rate, &settings.device_options)
        .map_err(|e| format!("device init: {}", e))?;
    device
        .set_freq(settings.frequency)
        .map_err(|e| format!("tune {} Hz: {}", settings.frequency, e))?;
    if device.gain_stages_bf() & GainStage::Linearity.bit() != 0 {
        device
            .set_gain(GainStage::Linearity, settings.gain)
            .map_err(|e| format!("gain: {}", e))?;
    } else if cli.gain.is_some() {
        return Err(format!("device {} has no linearity gain stage", settings.device));
    }

    log::info!(
        "{} @ {} Hz, {} sps, mode {:?}",
        settings.device,
        settings.frequency,
        device.sample_rate(),
        mode
    );

    let cuts = settings.active_filter();
    let mut receiver = Receiver::new(device.sample_rate(), settings.audio_rate);
    receiver.set_tuning_offset(settings.tuning_offset);
    receiver.set_filter(cuts.low, cuts.high);
    receiver.set_cw_offset(settings.cw_offset);
    receiver.set_demod(mode);
    receiver.set_agc(
        settings.agc_threshold_db,
        settings.agc_slope_percent,
        settings.agc_decay_ms,
    );
    receiver.set_sql(settings.sql_db);

    let sink: Box<dyn AudioSink> = match &cli.write {
        Some(path) => Box::new(PcmFileSink::create(path).map_err(|e| e.to_string())?),
        None => Box::new(NullSink),
    };

    let thread = SdrThread::spawn(device, receiver, sink).map_err(|e| e.to_string())?;

    let started = Instant::now();
    let deadline = cli.duration.map(Duration::from_secs_f32);
    loop {
        std::thread::sleep(Duration::from_millis(1000));
        let status = thread.status();
        log::info!(
            "signal {:.1} dBFS, {} samples, {} audio, {} dropped",
            status.signal_db,
            status.samples_read,
            status.audio_samples,
            status.dropped
        );
        if status.fault {
            thread.stop();
            return Err("streaming fault".into());
        }
        if let Some(d) = deadline {
            if started.elapsed() >= d {
                break;
            }
        }
    }

    let status = thread.stop();
    log::info!(
        "done: {} audio samples written, {} input samples dropped",
        status.audio_samples,
        status.dropped
    );
    Ok(())
}
