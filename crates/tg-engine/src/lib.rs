//! Rendering engine for tonegraph.
//!
//! Evaluates node graphs per sample, renders clips, and schedules voices
//! through the composition tree.

mod clip;
mod composition;
mod error;
mod graph;
pub mod ops;
mod synth;
mod track;
mod voice;

pub use clip::{Clip, ClipCursor, FREQUENCY_NODE, OUTPUT_NODE};
pub use composition::{BufferSource, Composition, GlobalsHandle};
pub use error::{BuildError, EvalError};
pub use graph::{Frame, NodeGraph, UserInputs};
pub use synth::{ClipVoice, GraphSynth, KILL_FADE_SECONDS, LIVE_HOLD_SECONDS};
pub use track::{
    Parent, Pattern, Placement, TimeBounds, Track, TrackKey, TrackLayerCompound, TrackLayerSimple,
    TrackTree,
};
pub use voice::{NoteEvent, Synthesizer, Voice, VoiceKey, VoiceSet};
