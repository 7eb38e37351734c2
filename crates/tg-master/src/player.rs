//! Double-buffered realtime player.
//!
//! The render thread owns the sink. A producer thread owns the source and
//! renders one buffer per job. While buffer `k` is encoded and written,
//! buffer `k + 1` is already being rendered. The render thread waits at
//! most one buffer period (plus slack) for each buffer; when the wait runs
//! out it writes silence and keeps waiting for the same buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tg_audio::{AudioError, AudioSink, PcmEncoder};
use tg_engine::{BufferSource, EvalError};
use tg_ir::{MetaSamples, PcmFormat, PlayerConfig};
use tracing::{debug, error, info, warn};

use crate::error::PlayerError;

/// What one playback pass did.
#[derive(Debug, Default)]
pub struct PlayerReport {
    /// Rendered buffers written to the sink.
    pub buffers: u64,
    /// Silent buffers written because rendering fell behind.
    pub underruns: u64,
    /// Why the pass ended early, if it did.
    pub error: Option<PlayerError>,
}

struct Rendered {
    buffer: MetaSamples,
    finished: bool,
}

/// Handle to a running playback pass.
pub struct RealtimePlayer {
    continue_playback: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    thread: Option<JoinHandle<PlayerReport>>,
}

impl RealtimePlayer {
    /// Start playing `source` from `config.start_seconds`. The sink is
    /// opened on the render thread by `open_sink`.
    pub fn start<S, F>(source: S, config: PlayerConfig, open_sink: F) -> Self
    where
        S: BufferSource + 'static,
        F: FnOnce(PcmFormat) -> Result<Box<dyn AudioSink>, AudioError> + Send + 'static,
    {
        let continue_playback = Arc::new(AtomicBool::new(true));
        let finished = Arc::new(AtomicBool::new(false));

        let cont = continue_playback.clone();
        let done = finished.clone();
        let thread = std::thread::spawn(move || {
            let report = render_thread(source, config, open_sink, &cont);
            done.store(true, Ordering::Relaxed);
            report
        });

        Self {
            continue_playback,
            finished,
            thread: Some(thread),
        }
    }

    /// Ask the render loop to stop at the next buffer boundary.
    pub fn stop(&self) {
        self.continue_playback.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        !self.finished.load(Ordering::Relaxed)
    }

    /// Wait for the pass to end.
    pub fn join(mut self) -> PlayerReport {
        self.wait()
    }

    fn wait(&mut self) -> PlayerReport {
        match self.thread.take().map(JoinHandle::join) {
            Some(Ok(report)) => report,
            Some(Err(_)) => PlayerReport {
                error: Some(PlayerError::ProducerLost),
                ..PlayerReport::default()
            },
            None => PlayerReport::default(),
        }
    }
}

impl Drop for RealtimePlayer {
    fn drop(&mut self) {
        self.stop();
        let _ = self.wait();
    }
}

fn render_thread<S, F>(
    source: S,
    config: PlayerConfig,
    open_sink: F,
    continue_playback: &AtomicBool,
) -> PlayerReport
where
    S: BufferSource + 'static,
    F: FnOnce(PcmFormat) -> Result<Box<dyn AudioSink>, AudioError>,
{
    let mut report = PlayerReport::default();
    let mut sink = match open_sink(config.pcm_format()).and_then(|mut sink| {
        sink.start()?;
        Ok(sink)
    }) {
        Ok(sink) => sink,
        Err(e) => {
            error!(%e, "audio sink unavailable, playback not started");
            report.error = Some(e.into());
            return report;
        }
    };

    let sample_rate = config.sample_rate;
    let size = config.buffer_size.max(1);
    let start = config.start_sample();
    let speed = source.speed();

    let (job_tx, job_rx) = bounded::<MetaSamples>(1);
    let (done_tx, done_rx) = bounded::<Result<Rendered, EvalError>>(1);
    let producer = std::thread::spawn(move || produce(source, start, job_rx, done_tx));

    info!(sample_rate, buffer_size = size, start, "playback started");
    if let Err(e) = stream(
        &mut *sink,
        &config,
        MetaSamples::new(sample_rate, start, size, speed),
        &job_tx,
        &done_rx,
        continue_playback,
        &mut report,
    ) {
        error!(%e, "playback ended early");
        report.error = Some(e);
    }

    drop(job_tx);
    drop(done_rx);
    if producer.join().is_err() && report.error.is_none() {
        report.error = Some(PlayerError::ProducerLost);
    }
    if let Err(e) = sink.stop() {
        warn!(%e, "failed to stop sink");
    }
    info!(
        buffers = report.buffers,
        underruns = report.underruns,
        "playback stopped"
    );
    report
}

fn stream(
    sink: &mut dyn AudioSink,
    config: &PlayerConfig,
    first: MetaSamples,
    jobs: &Sender<MetaSamples>,
    done: &Receiver<Result<Rendered, EvalError>>,
    continue_playback: &AtomicBool,
    report: &mut PlayerReport,
) -> Result<(), PlayerError> {
    let period =
        Duration::from_secs_f64(config.buffer_seconds() * (1.0 + config.underrun_slack.max(0.0)));
    let mut encoder = PcmEncoder::new(config.target_amplitude);
    let silence = vec![0i16; first.length];
    let mut pcm = Vec::with_capacity(first.length);

    let mut spare = Some(first.shaped_like());
    jobs.send(first).map_err(|_| PlayerError::ProducerLost)?;

    while continue_playback.load(Ordering::Relaxed) {
        let rendered = match done.recv_timeout(period) {
            Ok(result) => result.map_err(PlayerError::Render)?,
            Err(RecvTimeoutError::Timeout) => {
                report.underruns += 1;
                warn!(underruns = report.underruns, "buffer underrun");
                sink.write(&silence)?;
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => return Err(PlayerError::ProducerLost),
        };

        if !rendered.finished {
            if let Some(mut next) = spare.take() {
                next.reposition(rendered.buffer.end_pos);
                jobs.send(next).map_err(|_| PlayerError::ProducerLost)?;
            }
        }

        pcm.clear();
        encoder.encode_into(rendered.buffer.samples.data(), &mut pcm);
        sink.write(&pcm)?;
        report.buffers += 1;

        if rendered.finished {
            debug!(end = rendered.buffer.end_pos, "source finished");
            // let the device drain what is queued
            sink.write(&silence)?;
            return Ok(());
        }
        spare = Some(rendered.buffer);
    }
    Ok(())
}

fn produce<S: BufferSource>(
    mut source: S,
    start: i64,
    jobs: Receiver<MetaSamples>,
    done: Sender<Result<Rendered, EvalError>>,
) {
    source.begin(start);
    for mut buffer in jobs.iter() {
        let result = source.render(&mut buffer).map(|()| {
            let finished = source.is_finished(buffer.end_pos, buffer.sample_rate());
            Rendered { buffer, finished }
        });
        let failed = result.is_err();
        if done.send(result).is_err() || failed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_audio::{quantize, MemorySink, SinkLog};
    use tg_engine::Composition;
    use tg_ir::{
        CompositionState, NodeDef, NoteSpan, PatternState, PlacementState, SynthState, TrackState,
    };

    fn memory_sink(
        log: &mut Option<SinkLog>,
    ) -> impl FnOnce(PcmFormat) -> Result<Box<dyn AudioSink>, AudioError> + Send + 'static {
        let sink = MemorySink::new(PcmFormat::default());
        *log = Some(sink.log());
        move |_| Ok(Box::new(sink) as Box<dyn AudioSink>)
    }

    fn composition() -> Composition {
        let mut pattern = PatternState::new("loop", 4, "tone");
        pattern.add_note(NoteSpan::new(0, 2, 0.0));
        pattern.add_note(NoteSpan::new(1, 2, 7.0));
        pattern.add_note(NoteSpan::new(3, 1, -5.0));
        let state = CompositionState {
            base_speed: 0.5,
            globals: Default::default(),
            synths: vec![SynthState {
                name: "tone".into(),
                nodes: ["frequency;relay;f", "f;input;freq", "s;sinf;phase", "output;*;s;0.3"]
                    .iter()
                    .map(|l| NodeDef::parse_line(l).unwrap())
                    .collect(),
                curves: Vec::new(),
            }],
            patterns: vec![pattern],
            root: TrackState::Compound {
                children: vec![TrackState::Simple {
                    placements: vec![PlacementState {
                        pattern: "loop".into(),
                        delays: [0, 1, 2].into_iter().collect(),
                    }],
                }],
            },
        };
        Composition::from_state(&state).unwrap()
    }

    fn concat(log: &SinkLog) -> Vec<i16> {
        log.lock().unwrap().iter().flatten().copied().collect()
    }

    #[test]
    fn streamed_buffers_match_single_render() {
        let config = PlayerConfig {
            sample_rate: 2000,
            buffer_size: 480,
            target_amplitude: 0.0,
            ..PlayerConfig::default()
        };

        let mut reference_source = composition();
        let end = reference_source.end_sample(config.sample_rate).unwrap();
        reference_source.begin(0);
        let mut whole = MetaSamples::new(config.sample_rate, 0, end as usize, 0.5);
        reference_source.render(&mut whole).unwrap();
        let reference: Vec<i16> = whole.samples.data().iter().map(|&x| quantize(x, 1.0)).collect();

        let mut log = None;
        let player = RealtimePlayer::start(composition(), config, memory_sink(&mut log));
        let report = player.join();
        assert!(report.error.is_none());
        assert_eq!(report.underruns, 0);
        assert_eq!(report.buffers, (end as u64).div_ceil(480));

        let streamed = concat(&log.unwrap());
        assert!(streamed.len() >= reference.len());
        assert_eq!(&streamed[..reference.len()], &reference[..]);
        assert!(streamed[reference.len()..].iter().all(|&s| s == 0));
    }

    struct SlowSource {
        delay: Duration,
        rendered: usize,
        total: usize,
    }

    impl BufferSource for SlowSource {
        fn begin(&mut self, _start_pos: i64) {
            self.rendered = 0;
        }

        fn render(&mut self, buffer: &mut MetaSamples) -> Result<(), EvalError> {
            std::thread::sleep(self.delay);
            buffer.samples.data_mut().fill(0.5);
            self.rendered += 1;
            Ok(())
        }

        fn speed(&self) -> f64 {
            1.0
        }

        fn is_finished(&self, _position: i64, _sample_rate: u32) -> bool {
            self.rendered >= self.total
        }
    }

    #[test]
    fn slow_render_writes_silence_and_recovers() {
        let config = PlayerConfig {
            sample_rate: 1000,
            buffer_size: 10,
            target_amplitude: 0.0,
            ..PlayerConfig::default()
        };
        let source = SlowSource {
            delay: Duration::from_millis(60),
            rendered: 0,
            total: 3,
        };
        let mut log = None;
        let report = RealtimePlayer::start(source, config, memory_sink(&mut log)).join();
        assert!(report.error.is_none());
        assert_eq!(report.buffers, 3);
        assert!(report.underruns >= 3);

        let chunks = log.unwrap().lock().unwrap().clone();
        assert_eq!(chunks.len() as u64, report.buffers + report.underruns + 1);
        let loud = chunks.iter().filter(|c| c.iter().all(|&s| s == 16384)).count();
        assert_eq!(loud, 3);
    }

    #[test]
    fn stop_ends_an_endless_source() {
        struct Endless;
        impl BufferSource for Endless {
            fn begin(&mut self, _start_pos: i64) {}
            fn render(&mut self, _buffer: &mut MetaSamples) -> Result<(), EvalError> {
                std::thread::sleep(Duration::from_millis(2));
                Ok(())
            }
            fn speed(&self) -> f64 {
                1.0
            }
            fn is_finished(&self, _position: i64, _sample_rate: u32) -> bool {
                false
            }
        }

        let config = PlayerConfig {
            sample_rate: 1000,
            buffer_size: 10,
            ..PlayerConfig::default()
        };
        let mut log = None;
        let player = RealtimePlayer::start(Endless, config, memory_sink(&mut log));
        std::thread::sleep(Duration::from_millis(50));
        assert!(player.is_running());
        player.stop();
        let report = player.join();
        assert!(report.error.is_none());
        assert!(report.buffers > 0);
    }

    #[test]
    fn missing_sink_does_not_start() {
        let report = RealtimePlayer::start(composition(), PlayerConfig::default(), |_| {
            Err(AudioError::NoDevice)
        })
        .join();
        assert!(matches!(
            report.error,
            Some(PlayerError::Audio(AudioError::NoDevice))
        ));
        assert_eq!(report.buffers, 0);
    }

    #[test]
    fn render_errors_end_playback() {
        let state = CompositionState {
            synths: vec![SynthState {
                name: "bad".into(),
                nodes: vec![NodeDef::parse_line("output;+;ghost;1").unwrap()],
                curves: Vec::new(),
            }],
            patterns: vec![{
                let mut p = PatternState::new("p", 1, "bad");
                p.add_note(NoteSpan::new(0, 1, 0.0));
                p
            }],
            root: TrackState::Simple {
                placements: vec![PlacementState {
                    pattern: "p".into(),
                    delays: [0].into_iter().collect(),
                }],
            },
            ..CompositionState::default()
        };
        let comp = Composition::from_state(&state).unwrap();
        let config = PlayerConfig {
            sample_rate: 100,
            buffer_size: 10,
            ..PlayerConfig::default()
        };
        let mut log = None;
        let report = RealtimePlayer::start(comp, config, memory_sink(&mut log)).join();
        assert!(matches!(
            report.error,
            Some(PlayerError::Render(EvalError::KeyNotFound(_)))
        ));
    }
}
