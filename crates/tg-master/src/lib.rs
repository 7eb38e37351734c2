//! Headless controller for tonegraph.
//!
//! Provides a unified API for loading projects, realtime playback and
//! offline rendering.

mod error;
mod player;
mod wav;

use std::path::Path;

use tg_audio::{AudioError, AudioSink, CpalSink, PcmEncoder};
use tg_engine::{BufferSource, Composition, GlobalsHandle};
use tg_formats::ProjectFile;
use tracing::{info, warn};

// Re-export common types so callers don't need tg-ir/tg-engine directly.
pub use error::{ControllerError, PlayerError};
pub use player::{PlayerReport, RealtimePlayer};
pub use tg_formats::FormatError;
pub use tg_ir::{CompositionState, PcmFormat, PlayerConfig};

pub use wav::{samples_to_wav, write_wav};

/// Owns a composition and manages playback.
pub struct Controller {
    state: CompositionState,
    config: PlayerConfig,
    playback: Option<Playback>,
}

struct Playback {
    player: RealtimePlayer,
    globals: GlobalsHandle,
}

/// Opens the default output device.
pub fn open_default_sink(format: PcmFormat) -> Result<Box<dyn AudioSink>, AudioError> {
    Ok(Box::new(CpalSink::open(format)?))
}

impl Controller {
    pub fn new() -> Self {
        Self {
            state: CompositionState::default(),
            config: PlayerConfig::default(),
            playback: None,
        }
    }

    // --- Project management ---

    pub fn state(&self) -> &CompositionState {
        &self.state
    }

    pub fn set_state(&mut self, state: CompositionState) {
        self.stop();
        self.state = state;
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: PlayerConfig) {
        self.config = config;
    }

    pub fn load_project(&mut self, path: &Path) -> Result<(), ControllerError> {
        let project = ProjectFile::load(path)?;
        self.stop();
        self.state = project.composition_state();
        self.config = project.player;
        info!(path = %path.display(), "project loaded");
        Ok(())
    }

    pub fn save_project(&self, path: &Path) -> Result<(), ControllerError> {
        ProjectFile::from_state(&self.state, self.config).save(path)?;
        Ok(())
    }

    /// Set a global variable. A running playback picks it up on its next
    /// pass.
    pub fn set_global(&mut self, name: &str, value: f64) {
        self.state.globals.insert(name.to_string(), value);
        if let Some(pb) = &self.playback {
            pb.globals
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(name.to_string(), value);
        }
    }

    // --- Real-time playback ---

    /// Play on the default output device.
    pub fn play(&mut self) -> Result<(), ControllerError> {
        self.play_with(open_default_sink)
    }

    /// Play into a sink opened by `open_sink` on the render thread.
    pub fn play_with<F>(&mut self, open_sink: F) -> Result<(), ControllerError>
    where
        F: FnOnce(PcmFormat) -> Result<Box<dyn AudioSink>, AudioError> + Send + 'static,
    {
        self.stop();
        let composition = Composition::from_state(&self.state)?;
        let globals = composition.globals();
        let player = RealtimePlayer::start(composition, self.config, open_sink);
        self.playback = Some(Playback { player, globals });
        Ok(())
    }

    /// Stop playback and wait for the player to wind down.
    pub fn stop(&mut self) -> Option<PlayerReport> {
        let pb = self.playback.take()?;
        pb.player.stop();
        let report = pb.player.join();
        if let Some(e) = &report.error {
            warn!(%e, "playback ended with an error");
        }
        Some(report)
    }

    /// Wait for the current playback to finish on its own.
    pub fn wait(&mut self) -> Option<PlayerReport> {
        self.playback.take().map(|pb| pb.player.join())
    }

    pub fn is_playing(&self) -> bool {
        self.playback.as_ref().is_some_and(|p| p.player.is_running())
    }

    pub fn is_finished(&self) -> bool {
        self.playback.as_ref().is_some_and(|p| !p.player.is_running())
    }

    // --- Offline rendering ---

    /// Render from `start_seconds` until the composition falls silent or
    /// `max_seconds` of audio exist, through the same buffer path the
    /// player uses.
    pub fn render_offline(&self, max_seconds: f64) -> Result<Vec<f64>, ControllerError> {
        let mut composition = Composition::from_state(&self.state)?;
        let sample_rate = self.config.sample_rate;
        let size = self.config.buffer_size.max(1);
        let max_samples = (max_seconds.max(0.0) * sample_rate as f64).round() as usize;
        let start = self.config.start_sample();

        composition.begin(start);
        let mut buffer = tg_ir::MetaSamples::new(sample_rate, start, size, composition.speed());
        let mut out = Vec::with_capacity(max_samples);
        while out.len() < max_samples {
            composition.render(&mut buffer)?;
            out.extend_from_slice(buffer.samples.data());
            if composition.is_finished(buffer.end_pos, sample_rate) {
                break;
            }
            buffer.reposition(buffer.end_pos);
        }
        out.truncate(max_samples);
        Ok(out)
    }

    /// Offline render encoded as a 16-bit mono WAV file.
    pub fn render_to_wav(&self, max_seconds: f64) -> Result<Vec<u8>, ControllerError> {
        let samples = self.render_offline(max_seconds)?;
        let pcm = PcmEncoder::new(self.config.target_amplitude).encode(&samples);
        Ok(samples_to_wav(&pcm, self.config.sample_rate)?)
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}
