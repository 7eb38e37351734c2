//! Audio output backends for tonegraph.
//!
//! Sinks accept mono 16-bit PCM in buffer-sized chunks. [`PcmEncoder`]
//! turns rendered `f64` buffers into that format.

mod cpal_backend;
mod pcm;
mod sinks;
mod traits;

pub use cpal_backend::CpalSink;
pub use pcm::{
    encode_be, encode_le, quantize, recursive_abs_average, AmplitudeEstimator, PcmEncoder,
};
pub use sinks::{MemorySink, PcmWriterSink, SinkLog};
pub use traits::{AudioError, AudioSink};
