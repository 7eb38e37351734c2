//! Mono f64 sample buffers with a lazily computed spectrum.
//!
//! `SampleBuffer` holds time-domain data plus a frequency-domain twin.
//! Each side is guarded by a content hash recorded at the last `fft`/`ifft`
//! so staleness is detected without dirty flags on every write.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::fft_cache::FftCache;

/// How `value_at_position` blends between samples.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    /// Two-point linear blend.
    #[default]
    Linear,
    /// Four-point Catmull-Rom blend.
    Cubic,
}

/// How spectra are computed for lengths that are not a power of two.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpectrumMode {
    /// Two overlapping power-of-two windows blended across the overlap.
    #[default]
    SplitWindow,
    /// Exact transform of the whole buffer (Bluestein).
    Exact,
}

/// A mono sample buffer.
#[derive(Clone, Debug)]
pub struct SampleBuffer {
    sample_rate: u32,
    data: Vec<f64>,
    interpolation: Interpolation,
    spectrum_mode: SpectrumMode,
    spectrum_re: Vec<f64>,
    spectrum_im: Vec<f64>,
    has_spectrum: bool,
    sample_hash: u64,
    spectrum_hash: u64,
}

impl SampleBuffer {
    /// Create a silent buffer of `len` samples.
    pub fn new(sample_rate: u32, len: usize) -> Self {
        Self::from_vec(sample_rate, vec![0.0; len])
    }

    /// Wrap existing sample data.
    pub fn from_vec(sample_rate: u32, data: Vec<f64>) -> Self {
        Self {
            sample_rate,
            data,
            interpolation: Interpolation::default(),
            spectrum_mode: SpectrumMode::default(),
            spectrum_re: Vec::new(),
            spectrum_im: Vec::new(),
            has_spectrum: false,
            sample_hash: 0,
            spectrum_hash: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Mutable sample access. Writes are picked up by the hash check on
    /// the next spectrum read.
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    pub fn set_interpolation(&mut self, interpolation: Interpolation) {
        self.interpolation = interpolation;
    }

    pub fn spectrum_mode(&self) -> SpectrumMode {
        self.spectrum_mode
    }

    pub fn set_spectrum_mode(&mut self, mode: SpectrumMode) {
        self.spectrum_mode = mode;
        self.has_spectrum = false;
    }

    /// Fill all samples with zero.
    pub fn silence(&mut self) {
        self.data.fill(0.0);
    }

    /// Sample at integer index; zero outside the buffer.
    pub fn sample(&self, index: i64) -> f64 {
        if index < 0 {
            return 0.0;
        }
        self.data.get(index as usize).copied().unwrap_or(0.0)
    }

    /// Interpolated value at a fractional sample position.
    pub fn value_at_position(&self, position: f64) -> f64 {
        let base = libm::floor(position);
        let idx = base as i64;
        let t = position - base;
        let p1 = self.sample(idx);
        if t == 0.0 {
            return p1;
        }
        let p2 = self.sample(idx + 1);
        match self.interpolation {
            Interpolation::Linear => p1 + (p2 - p1) * t,
            Interpolation::Cubic => {
                let p0 = self.sample(idx - 1);
                let p3 = self.sample(idx + 2);
                p1 + 0.5
                    * t
                    * (p2 - p0
                        + t * (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3
                            + t * (3.0 * (p1 - p2) + p3 - p0)))
            }
        }
    }

    /// Add this buffer onto `target` in place.
    ///
    /// Sample `offset_self + k` of this buffer lands on sample
    /// `offset_other + k` of the target. When sample rates differ, this
    /// buffer is read at fractional positions via `value_at_position`.
    pub fn layer_onto(&self, target: &mut SampleBuffer, offset_self: i64, offset_other: i64) {
        let self_len = self.data.len() as i64;
        let target_len = target.data.len() as i64;

        if self.sample_rate == target.sample_rate {
            let skip = 0i64.max(-offset_self).max(-offset_other);
            let count = (self_len - offset_self).min(target_len - offset_other);
            for k in skip..count {
                target.data[(offset_other + k) as usize] += self.data[(offset_self + k) as usize];
            }
            return;
        }

        let ratio = self.sample_rate as f64 / target.sample_rate as f64;
        for t in offset_other.max(0)..target_len {
            let position = offset_self as f64 + (t - offset_other) as f64 * ratio;
            if position >= self_len as f64 {
                break;
            }
            target.data[t as usize] += self.value_at_position(position);
        }
    }

    /// Cached spectrum, recomputed when the sample data changed since the
    /// last transform.
    pub fn spectrum(&mut self, cache: &mut FftCache) -> (&[f64], &[f64]) {
        if !self.has_spectrum || content_hash(&self.data) != self.sample_hash {
            self.fft(cache);
        }
        (&self.spectrum_re, &self.spectrum_im)
    }

    /// Mutable spectrum access for frequency-domain edits; follow with
    /// `ifft` or `auto_update`.
    pub fn spectrum_mut(&mut self, cache: &mut FftCache) -> (&mut [f64], &mut [f64]) {
        if !self.has_spectrum || content_hash(&self.data) != self.sample_hash {
            self.fft(cache);
        }
        (&mut self.spectrum_re, &mut self.spectrum_im)
    }

    /// Replace the spectrum outright. Lengths must match the buffer.
    pub fn set_spectrum(&mut self, re: Vec<f64>, im: Vec<f64>) {
        debug_assert_eq!(re.len(), self.data.len());
        debug_assert_eq!(im.len(), self.data.len());
        self.spectrum_re = re;
        self.spectrum_im = im;
        if !self.has_spectrum {
            // Nothing materialized yet: treat the samples as current so
            // auto_update picks the inverse direction.
            self.sample_hash = content_hash(&self.data);
            self.spectrum_hash = !spectrum_hash(&self.spectrum_re, &self.spectrum_im);
        }
        self.has_spectrum = true;
    }

    /// Recompute the spectrum from the sample data.
    pub fn fft(&mut self, cache: &mut FftCache) {
        let mut re = self.data.clone();
        let mut im = vec![0.0; re.len()];
        self.transform(cache, &mut re, &mut im, false);
        self.spectrum_re = re;
        self.spectrum_im = im;
        self.has_spectrum = true;
        self.sample_hash = content_hash(&self.data);
        self.spectrum_hash = spectrum_hash(&self.spectrum_re, &self.spectrum_im);
    }

    /// Recompute the sample data from the spectrum (real part kept).
    pub fn ifft(&mut self, cache: &mut FftCache) {
        if !self.has_spectrum {
            return;
        }
        let mut re = self.spectrum_re.clone();
        let mut im = self.spectrum_im.clone();
        self.transform(cache, &mut re, &mut im, true);
        self.data = re;
        self.sample_hash = content_hash(&self.data);
        self.spectrum_hash = spectrum_hash(&self.spectrum_re, &self.spectrum_im);
    }

    /// Bring whichever side is stale up to date: samples changed → `fft`,
    /// otherwise spectrum changed → `ifft`.
    pub fn auto_update(&mut self, cache: &mut FftCache) {
        if !self.has_spectrum || content_hash(&self.data) != self.sample_hash {
            self.fft(cache);
        } else if spectrum_hash(&self.spectrum_re, &self.spectrum_im) != self.spectrum_hash {
            self.ifft(cache);
        }
    }

    fn transform(&self, cache: &mut FftCache, re: &mut [f64], im: &mut [f64], inverse: bool) {
        let len = re.len();
        if len == 0 {
            return;
        }
        if len.is_power_of_two() || self.spectrum_mode == SpectrumMode::Exact {
            if inverse {
                cache.inverse(re, im);
            } else {
                cache.forward(re, im);
            }
            return;
        }
        split_window_transform(cache, re, im, inverse);
    }
}

/// Transform a non-power-of-two signal with two power-of-two windows:
/// `[0, p)` and `[len - p, len)`, where `p` is the largest power of two
/// below `len`. Tails are copied from their own window; the overlap is a
/// linear crossfade between the two.
fn split_window_transform(cache: &mut FftCache, re: &mut [f64], im: &mut [f64], inverse: bool) {
    let len = re.len();
    let p = 1usize << (usize::BITS - 1 - len.leading_zeros());
    let offset = len - p;
    let engine = cache.radix2(p.trailing_zeros());

    let (mut r1, mut i1) = (re[..p].to_vec(), im[..p].to_vec());
    let (mut r2, mut i2) = (re[offset..].to_vec(), im[offset..].to_vec());
    if inverse {
        engine.inverse(&mut r1, &mut i1);
        engine.inverse(&mut r2, &mut i2);
    } else {
        engine.forward(&mut r1, &mut i1);
        engine.forward(&mut r2, &mut i2);
    }

    let overlap = (p - offset) as f64;
    for i in 0..len {
        let (r, m) = if i < offset {
            (r1[i], i1[i])
        } else if i >= p {
            (r2[i - offset], i2[i - offset])
        } else {
            let w = (i - offset) as f64 / overlap;
            (
                r1[i] * (1.0 - w) + r2[i - offset] * w,
                i1[i] * (1.0 - w) + i2[i - offset] * w,
            )
        };
        re[i] = r;
        im[i] = m;
    }
}

/// FNV-1a hash over the bit patterns of `values`.
pub fn content_hash(values: &[f64]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET ^ values.len() as u64;
    for v in values {
        for byte in v.to_bits().to_le_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(PRIME);
        }
    }
    hash
}

fn spectrum_hash(re: &[f64], im: &[f64]) -> u64 {
    content_hash(re).rotate_left(17) ^ content_hash(im)
}

/// A sample buffer shared between the render path and a preview/caching
/// path. Layering onto it takes the lock for the whole operation.
#[cfg(feature = "std")]
pub type SharedSamples = std::sync::Arc<std::sync::Mutex<SampleBuffer>>;

#[cfg(feature = "std")]
impl SampleBuffer {
    /// `layer_onto` against a shared target, mutually exclusive with any
    /// other writer of that target.
    pub fn layer_onto_shared(
        &self,
        target: &std::sync::Mutex<SampleBuffer>,
        offset_self: i64,
        offset_other: i64,
    ) {
        let mut guard = target.lock().unwrap_or_else(|e| e.into_inner());
        self.layer_onto(&mut guard, offset_self, offset_other);
    }
}

/// A sample buffer annotated with its place in the song for one render
/// pass, plus a snapshot of the composition's variables.
#[derive(Clone, Debug)]
pub struct MetaSamples {
    pub samples: SampleBuffer,
    /// First absolute sample index covered (inclusive).
    pub start_pos: i64,
    /// Last absolute sample index covered (exclusive).
    pub end_pos: i64,
    /// `end_pos - start_pos`
    pub length: usize,
    /// Seconds per measure.
    pub speed_mult: f64,
    /// Global variables copied from the composition.
    pub variables: BTreeMap<String, f64>,
}

impl MetaSamples {
    /// Silent window of `length` samples starting at `start_pos`.
    pub fn new(sample_rate: u32, start_pos: i64, length: usize, speed_mult: f64) -> Self {
        Self {
            samples: SampleBuffer::new(sample_rate, length),
            start_pos,
            end_pos: start_pos + length as i64,
            length,
            speed_mult,
            variables: BTreeMap::new(),
        }
    }

    /// A silent buffer with the same window, speed and variables.
    pub fn shaped_like(&self) -> Self {
        Self {
            samples: SampleBuffer::new(self.samples.sample_rate(), self.length),
            start_pos: self.start_pos,
            end_pos: self.end_pos,
            length: self.length,
            speed_mult: self.speed_mult,
            variables: self.variables.clone(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.samples.sample_rate()
    }

    /// Samples per measure at this buffer's rate and speed.
    pub fn samples_per_measure(&self) -> f64 {
        self.speed_mult * self.sample_rate() as f64
    }

    /// Window start in measures.
    pub fn start_measure(&self) -> f64 {
        self.start_pos as f64 / self.samples_per_measure()
    }

    /// Window end in measures.
    pub fn end_measure(&self) -> f64 {
        self.end_pos as f64 / self.samples_per_measure()
    }

    /// Absolute sample index of a measure position.
    pub fn measure_to_sample(&self, measure: f64) -> i64 {
        libm::round(measure * self.samples_per_measure()) as i64
    }

    /// Move the window to start at `start_pos` and clear the samples.
    pub fn reposition(&mut self, start_pos: i64) {
        self.start_pos = start_pos;
        self.end_pos = start_pos + self.length as i64;
        self.samples.silence();
    }

    /// Add this buffer onto `target`, aligned by absolute position.
    pub fn layer_onto(&self, target: &mut MetaSamples) {
        let offset = self.start_pos - target.start_pos;
        self.samples.layer_onto(&mut target.samples, 0, offset);
    }
}
