//! Core IR types for tonegraph.
//!
//! This crate defines the data shared by every other crate: the FFT
//! engine, sample buffers with their cached spectra, control curves,
//! patterns, node-script definitions and the serializable composition
//! state. The engine compiles these into runtime structures.
//!
//! Designed to be `no_std` compatible with the `alloc` crate.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod bluestein;
mod config;
mod curve;
mod fft;
mod fft_cache;
mod node_def;
mod pattern;
mod samples;
pub mod state;

pub use bluestein::BluesteinFft;
pub use config::{PcmFormat, PlayerConfig};
pub use curve::{bezier, sine_bezier, Curve, CurveError, CurveMode, CurvePoint};
pub use fft::{Radix2Fft, MAX_LOG2};
pub use fft_cache::{FftCache, BLUESTEIN_CAPACITY};
pub use node_def::{Coded, NodeDef, OpTag, ScriptError, HARMONICS_ARGS};
pub use pattern::{pitch_to_freq, DelayOutOfRange, DelaySet, NoteSpan, PatternState, MAX_DELAY};
pub use samples::{content_hash, Interpolation, MetaSamples, SampleBuffer, SpectrumMode};
#[cfg(feature = "std")]
pub use samples::SharedSamples;
pub use state::{CompositionState, CurveState, PlacementState, SynthState, TrackState};
