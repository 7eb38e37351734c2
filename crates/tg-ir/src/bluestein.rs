//! Arbitrary-length FFT by chirp convolution (Bluestein's algorithm).

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::f64::consts::PI;

use crate::fft::Radix2Fft;

/// FFT for any length `n`, computed as a circular convolution against a
/// chirp kernel using a radix-2 engine of length `m >= 2n - 1`.
///
/// Unitary like [`Radix2Fft`].
#[derive(Clone, Debug)]
pub struct BluesteinFft {
    len: usize,
    radix2: Arc<Radix2Fft>,
    /// `cos(pi*i^2/n)`
    cos: Vec<f64>,
    /// `sin(pi*i^2/n)`
    sin: Vec<f64>,
    /// Radix-2 spectrum of the conjugate chirp, wrapped to length `m`.
    kernel_re: Vec<f64>,
    kernel_im: Vec<f64>,
    /// `sqrt(m/n)`
    scale: f64,
}

impl BluesteinFft {
    /// Smallest radix-2 exponent that can host a length-`len` transform.
    pub fn radix2_log2_for(len: usize) -> u32 {
        let span = (2 * len).saturating_sub(1).max(1);
        span.next_power_of_two().trailing_zeros()
    }

    /// Build the chirp tables and kernel spectrum for length `len`.
    ///
    /// `radix2` must have length `2^radix2_log2_for(len)`.
    pub fn new(len: usize, radix2: Arc<Radix2Fft>) -> Self {
        debug_assert!(len > 0);
        debug_assert_eq!(radix2.log2(), Self::radix2_log2_for(len));
        let m = radix2.len();

        // i^2 mod 2n, advanced incrementally so the angle never loses
        // precision for large i.
        let modulus = 2 * len as u64;
        let mut residue: u64 = 0;
        let mut cos = Vec::with_capacity(len);
        let mut sin = Vec::with_capacity(len);
        for i in 0..len as u64 {
            let angle = PI * residue as f64 / len as f64;
            cos.push(libm::cos(angle));
            sin.push(libm::sin(angle));
            residue = (residue + 2 * i + 1) % modulus;
        }

        let mut kernel_re = vec![0.0; m];
        let mut kernel_im = vec![0.0; m];
        kernel_re[0] = cos[0];
        kernel_im[0] = sin[0];
        for i in 1..len {
            kernel_re[i] = cos[i];
            kernel_im[i] = sin[i];
            kernel_re[m - i] = cos[i];
            kernel_im[m - i] = sin[i];
        }
        radix2.forward(&mut kernel_re, &mut kernel_im);

        Self {
            len,
            scale: libm::sqrt(m as f64 / len as f64),
            radix2,
            cos,
            sin,
            kernel_re,
            kernel_im,
        }
    }

    /// Transform length.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; zero-length engines are never built.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Forward transform in place.
    pub fn forward(&self, re: &mut [f64], im: &mut [f64]) {
        self.transform(re, im);
    }

    /// Inverse transform in place.
    pub fn inverse(&self, re: &mut [f64], im: &mut [f64]) {
        self.transform(im, re);
    }

    fn transform(&self, re: &mut [f64], im: &mut [f64]) {
        debug_assert_eq!(re.len(), self.len);
        debug_assert_eq!(im.len(), self.len);
        let m = self.radix2.len();
        let mut ar = vec![0.0; m];
        let mut ai = vec![0.0; m];

        // a = x * conj-chirp, chirp w = cos - i*sin
        for i in 0..self.len {
            let (c, s) = (self.cos[i], self.sin[i]);
            ar[i] = re[i] * c + im[i] * s;
            ai[i] = im[i] * c - re[i] * s;
        }

        self.radix2.forward(&mut ar, &mut ai);
        for k in 0..m {
            let (kr, ki) = (self.kernel_re[k], self.kernel_im[k]);
            let r = ar[k] * kr - ai[k] * ki;
            let i = ar[k] * ki + ai[k] * kr;
            ar[k] = r;
            ai[k] = i;
        }
        self.radix2.inverse(&mut ar, &mut ai);

        for k in 0..self.len {
            let (c, s) = (self.cos[k], self.sin[k]);
            re[k] = (ar[k] * c + ai[k] * s) * self.scale;
            im[k] = (ai[k] * c - ar[k] * s) * self.scale;
        }
    }
}
