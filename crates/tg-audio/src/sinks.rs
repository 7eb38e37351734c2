//! Sinks that do not touch an audio device.

use std::io::Write;
use std::sync::{Arc, Mutex};

use tg_ir::PcmFormat;

use crate::pcm::{encode_be, encode_le};
use crate::traits::{AudioError, AudioSink};

/// Raw PCM written to any `Write`, in the format's byte order.
pub struct PcmWriterSink<W: Write> {
    writer: W,
    format: PcmFormat,
}

impl<W: Write> PcmWriterSink<W> {
    pub fn new(writer: W, format: PcmFormat) -> Self {
        Self { writer, format }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> AudioSink for PcmWriterSink<W> {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn write(&mut self, samples: &[i16]) -> Result<(), AudioError> {
        let bytes = if self.format.big_endian {
            encode_be(samples)
        } else {
            encode_le(samples)
        };
        self.writer.write_all(&bytes)?;
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Every chunk a [`MemorySink`] received, in order.
pub type SinkLog = Arc<Mutex<Vec<Vec<i16>>>>;

/// Records written chunks in memory.
#[derive(Clone, Debug)]
pub struct MemorySink {
    format: PcmFormat,
    log: SinkLog,
}

impl MemorySink {
    pub fn new(format: PcmFormat) -> Self {
        Self {
            format,
            log: SinkLog::default(),
        }
    }

    /// Shared handle to the recorded chunks; stays valid after the sink is
    /// dropped.
    pub fn log(&self) -> SinkLog {
        Arc::clone(&self.log)
    }
}

impl AudioSink for MemorySink {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn write(&mut self, samples: &[i16]) -> Result<(), AudioError> {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(samples.to_vec());
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_sink_uses_format_byte_order() {
        let mut be = PcmWriterSink::new(Vec::new(), PcmFormat::default());
        be.write(&[1, -1]).unwrap();
        assert_eq!(be.into_inner(), vec![0x00, 0x01, 0xFF, 0xFF]);

        let le_format = PcmFormat {
            sample_rate: 8000,
            big_endian: false,
        };
        let mut le = PcmWriterSink::new(Vec::new(), le_format);
        le.write(&[1]).unwrap();
        assert_eq!(le.format(), le_format);
        assert_eq!(le.into_inner(), vec![0x01, 0x00]);
    }

    #[test]
    fn memory_sink_log_outlives_sink() {
        let mut sink = MemorySink::new(PcmFormat::default());
        let log = sink.log();
        sink.write(&[1, 2]).unwrap();
        sink.write(&[3]).unwrap();
        drop(sink);
        assert_eq!(*log.lock().unwrap(), vec![vec![1, 2], vec![3]]);
    }
}
