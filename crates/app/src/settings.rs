//! Persisted receiver settings.
//!
//! JSON on disk. Unknown fields are ignored on load so older files keep
//! working; missing fields fall back to the defaults below. Filter cuts
//! are stored per demodulation mode so a mode switch restores the cuts
//! last used in that mode.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

/// Channel filter edges in Hz relative to the tuned frequency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterCuts {
    pub low: f32,
    pub high: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Backend identifier: "airspy", "file" or "mock".
    pub device: String,
    /// Backend-specific `key=value` options.
    pub device_options: String,
    pub sample_rate: f32,
    /// Hardware center frequency in Hz.
    pub frequency: u64,
    /// Tuned signal offset from center in Hz.
    pub tuning_offset: f32,
    /// Demodulator: "am", "ssb", "nfm" or "cw".
    pub mode: String,
    /// Filter cuts keyed by mode name.
    pub filters: BTreeMap<String, FilterCuts>,
    pub cw_offset: f32,
    /// Linearity gain, 0-100.
    pub gain: u8,
    pub agc_threshold_db: i32,
    pub agc_slope_percent: i32,
    pub agc_decay_ms: i32,
    /// Squelch threshold in dBFS; -170 disables.
    pub sql_db: f32,
    pub audio_rate: f32,
}

impl Default for Settings {
    fn default() -> Self {
        let filters = [
            ("am", FilterCuts { low: -5_000.0, high: 5_000.0 }),
            ("ssb", FilterCuts { low: 200.0, high: 2_800.0 }),
            ("nfm", FilterCuts { low: -8_000.0, high: 8_000.0 }),
            ("cw", FilterCuts { low: -250.0, high: 250.0 }),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            device: "airspy".into(),
            device_options: String::new(),
            sample_rate: 2_500_000.0,
            frequency: 100_000_000,
            tuning_offset: 0.0,
            mode: "am".into(),
            filters,
            cw_offset: 700.0,
            gain: 15,
            agc_threshold_db: 0,
            agc_slope_percent: 100,
            agc_decay_ms: 200,
            sql_db: -170.0,
            audio_rate: 48_000.0,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: {}", path.display(), e),
            )
        })
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(path, text)
    }

    /// Filter cuts for the active mode.
    pub fn active_filter(&self) -> FilterCuts {
        self.filters
            .get(&self.mode)
            .copied()
            .unwrap_or(FilterCuts { low: -5_000.0, high: 5_000.0 })
    }
}
