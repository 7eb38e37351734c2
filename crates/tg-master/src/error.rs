//! Errors surfaced by the player and controller.

use tg_audio::AudioError;
use tg_engine::{BuildError, EvalError};
use tg_formats::FormatError;

/// Why a playback pass ended early.
#[derive(Debug)]
pub enum PlayerError {
    /// The sink could not be opened, started or written.
    Audio(AudioError),
    /// Rendering a buffer failed.
    Render(EvalError),
    /// A playback thread exited without answering.
    ProducerLost,
}

impl std::fmt::Display for PlayerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerError::Audio(e) => write!(f, "audio error: {}", e),
            PlayerError::Render(e) => write!(f, "render error: {}", e),
            PlayerError::ProducerLost => write!(f, "playback thread exited unexpectedly"),
        }
    }
}

impl std::error::Error for PlayerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PlayerError::Audio(e) => Some(e),
            PlayerError::Render(e) => Some(e),
            PlayerError::ProducerLost => None,
        }
    }
}

impl From<AudioError> for PlayerError {
    fn from(e: AudioError) -> Self {
        PlayerError::Audio(e)
    }
}

/// Error type for controller operations.
#[derive(Debug)]
pub enum ControllerError {
    Format(FormatError),
    Build(BuildError),
    Render(EvalError),
    Io(std::io::Error),
}

impl std::fmt::Display for ControllerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerError::Format(e) => write!(f, "{}", e),
            ControllerError::Build(e) => write!(f, "{}", e),
            ControllerError::Render(e) => write!(f, "{}", e),
            ControllerError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ControllerError::Format(e) => Some(e),
            ControllerError::Build(e) => Some(e),
            ControllerError::Render(e) => Some(e),
            ControllerError::Io(e) => Some(e),
        }
    }
}

impl From<FormatError> for ControllerError {
    fn from(e: FormatError) -> Self {
        ControllerError::Format(e)
    }
}

impl From<BuildError> for ControllerError {
    fn from(e: BuildError) -> Self {
        ControllerError::Build(e)
    }
}

impl From<EvalError> for ControllerError {
    fn from(e: EvalError) -> Self {
        ControllerError::Render(e)
    }
}

impl From<std::io::Error> for ControllerError {
    fn from(e: std::io::Error) -> Self {
        ControllerError::Io(e)
    }
}
