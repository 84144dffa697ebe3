//! Audio output sinks.

use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Consumer of demodulated audio. Samples are f32 in [-1, 1] at the
/// session's audio rate.
pub trait AudioSink: Send {
    fn write(&mut self, samples: &[f32]) -> io::Result<()>;

    /// Flush any buffered output. Called once at session shutdown.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Raw signed 16-bit little-endian PCM file, one channel.
pub struct PcmFileSink {
    writer: BufWriter<File>,
}

impl PcmFileSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }
}

impl AudioSink for PcmFileSink {
    fn write(&mut self, samples: &[f32]) -> io::Result<()> {
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
            self.writer.write_i16::<LittleEndian>(v)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        use std::io::Write;
        self.writer.flush()
    }
}

/// Discards audio. Used when only metering or spectrum output is wanted.
pub struct NullSink;

impl AudioSink for NullSink {
    fn write(&mut self, _samples: &[f32]) -> io::Result<()> {
        Ok(())
    }
}

/// Collects audio in memory behind a shared handle.
pub struct MemorySink {
    samples: Arc<Mutex<Vec<f32>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            samples: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn handle(&self) -> Arc<Mutex<Vec<f32>>> {
        Arc::clone(&self.samples)
    }
}

impl AudioSink for MemorySink {
    fn write(&mut self, samples: &[f32]) -> io::Result<()> {
        self.samples
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "sink poisoned"))?
            .extend_from_slice(samples);
        Ok(())
    }
}
