//! CPAL-based audio sink.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tg_ir::PcmFormat;
use tracing::{debug, error};

use crate::traits::{AudioError, AudioSink};

const WRITE_POLL: Duration = Duration::from_millis(1);

/// Mono PCM played through the default output device. Every device
/// channel carries the same signal.
pub struct CpalSink {
    format: PcmFormat,
    stream: Stream,
    producer: HeapProd<i16>,
    running: Arc<AtomicBool>,
}

impl CpalSink {
    /// Open the default device at `format.sample_rate` and build a paused
    /// stream.
    pub fn open(format: PcmFormat) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;

        let config = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceInit(e.to_string()))?;
        let mut config: StreamConfig = config.into();
        config.sample_rate = SampleRate(format.sample_rate);

        // About 100ms of queued audio
        let rb = HeapRb::<i16>::new((format.sample_rate as usize / 10).max(1));
        let (producer, consumer) = rb.split();
        let running = Arc::new(AtomicBool::new(false));

        let stream = build_stream(&device, &config, consumer, running.clone())?;
        debug!(
            sample_rate = format.sample_rate,
            channels = config.channels,
            "opened output stream"
        );

        Ok(Self {
            format,
            stream,
            producer,
            running,
        })
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: HeapCons<i16>,
    running: Arc<AtomicBool>,
) -> Result<Stream, AudioError> {
    let channels = config.channels as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    data.fill(0.0);
                    return;
                }
                for chunk in data.chunks_mut(channels) {
                    let value = consumer.try_pop().map_or(0.0, |s| s as f32 / 32768.0);
                    chunk.fill(value);
                }
            },
            |err| error!(%err, "audio stream error"),
            None,
        )
        .map_err(|e| AudioError::StreamCreate(e.to_string()))
}

impl AudioSink for CpalSink {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn write(&mut self, samples: &[i16]) -> Result<(), AudioError> {
        let mut rest = samples;
        while !rest.is_empty() {
            let pushed = self.producer.push_slice(rest);
            rest = &rest[pushed..];
            if rest.is_empty() {
                break;
            }
            if !self.running.load(Ordering::Relaxed) && self.producer.is_full() {
                return Err(AudioError::Playback("write to a stopped stream".into()));
            }
            std::thread::sleep(WRITE_POLL);
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        self.running.store(true, Ordering::Relaxed);
        self.stream
            .play()
            .map_err(|e| AudioError::Playback(e.to_string()))
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        self.running.store(false, Ordering::Relaxed);
        self.stream
            .pause()
            .map_err(|e| AudioError::Playback(e.to_string()))
    }
}
