//! Conversion from rendered `f64` samples to 16-bit PCM.
//!
//! The encoder normalises toward a target average absolute amplitude. The
//! estimate is a running mean over everything encoded so far, and the gain
//! moves linearly across each buffer so a change never lands as a step.

/// Running mean of `|x|` over every finite sample observed.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AmplitudeEstimator {
    mean: f64,
    count: u64,
}

impl AmplitudeEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `samples` into the estimate. NaN and infinities are skipped.
    pub fn observe(&mut self, samples: &[f64]) {
        for &x in samples {
            if !x.is_finite() {
                continue;
            }
            self.count += 1;
            self.mean += (x.abs() - self.mean) / self.count as f64;
        }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Mean absolute amplitude of `samples`, computed recursively.
pub fn recursive_abs_average(samples: &[f64]) -> f64 {
    let mut estimator = AmplitudeEstimator::new();
    estimator.observe(samples);
    estimator.mean()
}

/// Scale to the i16 range, round and clamp. Non-finite input becomes 0.
pub fn quantize(sample: f64, gain: f64) -> i16 {
    let v = sample * gain * i16::MAX as f64;
    if !v.is_finite() {
        return 0;
    }
    v.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// Stateful `f64` to `i16` converter.
#[derive(Clone, Debug)]
pub struct PcmEncoder {
    target: f64,
    estimator: AmplitudeEstimator,
    gain: f64,
}

impl PcmEncoder {
    /// `target_amplitude <= 0` disables normalisation (unity gain).
    pub fn new(target_amplitude: f64) -> Self {
        Self {
            target: target_amplitude,
            estimator: AmplitudeEstimator::new(),
            gain: 1.0,
        }
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    /// Gain applied to the last sample encoded.
    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Forget the amplitude history.
    pub fn reset(&mut self) {
        self.estimator.reset();
        self.gain = 1.0;
    }

    fn next_gain(&mut self, samples: &[f64]) -> f64 {
        if self.target <= 0.0 {
            return 1.0;
        }
        self.estimator.observe(samples);
        let mean = self.estimator.mean();
        if mean > 0.0 {
            self.target / mean
        } else {
            1.0
        }
    }

    /// Convert one buffer, appending to `out`.
    pub fn encode_into(&mut self, samples: &[f64], out: &mut Vec<i16>) {
        let from = self.gain;
        let to = self.next_gain(samples);
        let n = samples.len() as f64;
        out.reserve(samples.len());
        for (i, &x) in samples.iter().enumerate() {
            let gain = from + (to - from) * (i + 1) as f64 / n;
            out.push(quantize(x, gain));
        }
        self.gain = to;
    }

    pub fn encode(&mut self, samples: &[f64]) -> Vec<i16> {
        let mut out = Vec::with_capacity(samples.len());
        self.encode_into(samples, &mut out);
        out
    }
}

/// Big-endian byte encoding.
pub fn encode_be(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_be_bytes()).collect()
}

/// Little-endian byte encoding, as WAV expects.
pub fn encode_le(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}
