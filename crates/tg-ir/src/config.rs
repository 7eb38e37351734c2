//! Playback configuration.

use serde::{Deserialize, Serialize};

/// Realtime player settings, loadable from a project's `[player]` table.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per streamed buffer.
    pub buffer_size: usize,
    /// Average absolute amplitude the PCM converter normalises toward.
    pub target_amplitude: f64,
    /// Extra fraction of a buffer period the render loop waits for the
    /// next buffer before declaring an underrun.
    pub underrun_slack: f64,
    /// Song position playback starts from, in seconds.
    pub start_seconds: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            buffer_size: 4096,
            target_amplitude: 0.25,
            underrun_slack: 0.5,
            start_seconds: 0.0,
        }
    }
}

impl PlayerConfig {
    /// Playback duration of one buffer, in seconds.
    pub fn buffer_seconds(&self) -> f64 {
        self.buffer_size as f64 / self.sample_rate.max(1) as f64
    }

    /// First absolute sample index played.
    pub fn start_sample(&self) -> i64 {
        libm::round(self.start_seconds * self.sample_rate as f64) as i64
    }

    /// PCM format the player hands to its sink.
    pub fn pcm_format(&self) -> PcmFormat {
        PcmFormat {
            sample_rate: self.sample_rate,
            big_endian: true,
        }
    }
}

/// Mono 16-bit signed PCM format description.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub big_endian: bool,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            big_endian: true,
        }
    }
}
