//! Owned cache of FFT engines.
//!
//! Radix-2 engines are kept per exponent; Bluestein engines are kept in a
//! bounded pool evicted by least-recent use. Callers own the cache and
//! pass it to whatever needs a transform.

use alloc::sync::Arc;
use arrayvec::ArrayVec;

use crate::bluestein::BluesteinFft;
use crate::fft::{Radix2Fft, MAX_LOG2};

/// Maximum number of Bluestein engines kept alive.
pub const BLUESTEIN_CAPACITY: usize = 64;

const RADIX2_SLOTS: usize = MAX_LOG2 as usize + 1;

#[derive(Clone, Debug)]
struct BluesteinEntry {
    len: usize,
    last_used: u64,
    engine: Arc<BluesteinFft>,
}

/// Cache of radix-2 and Bluestein FFT engines.
#[derive(Clone, Debug)]
pub struct FftCache {
    radix2: [Option<Arc<Radix2Fft>>; RADIX2_SLOTS],
    bluestein: ArrayVec<BluesteinEntry, BLUESTEIN_CAPACITY>,
    clock: u64,
}

impl Default for FftCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FftCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            radix2: core::array::from_fn(|_| None),
            bluestein: ArrayVec::new(),
            clock: 0,
        }
    }

    /// Radix-2 engine for length `2^log2`, built on first use.
    pub fn radix2(&mut self, log2: u32) -> Arc<Radix2Fft> {
        self.radix2[log2 as usize]
            .get_or_insert_with(|| Arc::new(Radix2Fft::new(log2)))
            .clone()
    }

    /// Bluestein engine for `len`, reusing a cached one when possible.
    pub fn bluestein(&mut self, len: usize) -> Arc<BluesteinFft> {
        self.clock += 1;
        let now = self.clock;

        if let Some(entry) = self.bluestein.iter_mut().find(|e| e.len == len) {
            entry.last_used = now;
            return entry.engine.clone();
        }

        let radix2 = self.radix2(BluesteinFft::radix2_log2_for(len));
        let engine = Arc::new(BluesteinFft::new(len, radix2));

        if self.bluestein.is_full() {
            if let Some(oldest) = self
                .bluestein
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(i, _)| i)
            {
                self.bluestein.swap_remove(oldest);
            }
        }
        self.bluestein.push(BluesteinEntry {
            len,
            last_used: now,
            engine: engine.clone(),
        });
        engine
    }

    /// Lengths currently held in the Bluestein pool.
    pub fn bluestein_lengths(&self) -> impl Iterator<Item = usize> + '_ {
        self.bluestein.iter().map(|e| e.len)
    }

    /// Forward transform of any length, picking the engine by length.
    pub fn forward(&mut self, re: &mut [f64], im: &mut [f64]) {
        let len = re.len();
        if len == 0 {
            return;
        }
        if len.is_power_of_two() {
            self.radix2(len.trailing_zeros()).forward(re, im);
        } else {
            self.bluestein(len).forward(re, im);
        }
    }

    /// Inverse transform of any length.
    pub fn inverse(&mut self, re: &mut [f64], im: &mut [f64]) {
        let len = re.len();
        if len == 0 {
            return;
        }
        if len.is_power_of_two() {
            self.radix2(len.trailing_zeros()).inverse(re, im);
        } else {
            self.bluestein(len).inverse(re, im);
        }
    }
}
