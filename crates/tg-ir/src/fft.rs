//! Power-of-two radix-2 FFT.

use alloc::vec::Vec;
use core::f64::consts::PI;

/// Largest supported exponent: lengths run from `2^0` to `2^MAX_LOG2`.
pub const MAX_LOG2: u32 = 30;

/// In-place iterative Cooley-Tukey FFT for a fixed length `n = 2^m`.
///
/// Twiddle tables and the bit-reversal permutation are built once at
/// construction. Both directions are unitary (scaled by `1/sqrt(n)`),
/// so `inverse(forward(x)) == x` up to rounding.
#[derive(Clone, Debug)]
pub struct Radix2Fft {
    log2: u32,
    len: usize,
    /// `cos(2*pi*i/n)` for `i < n/2`
    cos: Vec<f64>,
    /// `sin(2*pi*i/n)` for `i < n/2`
    sin: Vec<f64>,
    /// Index pairs swapped by the bit-reversal permutation (`i < j`).
    swaps: Vec<(u32, u32)>,
    scale: f64,
}

impl Radix2Fft {
    /// Build the tables for length `2^log2`.
    ///
    /// # Panics
    /// If `log2 > MAX_LOG2`.
    pub fn new(log2: u32) -> Self {
        assert!(log2 <= MAX_LOG2, "radix-2 FFT exponent {} out of range", log2);
        let len = 1usize << log2;
        let half = len / 2;

        let mut cos = Vec::with_capacity(half);
        let mut sin = Vec::with_capacity(half);
        for i in 0..half {
            let angle = 2.0 * PI * i as f64 / len as f64;
            cos.push(libm::cos(angle));
            sin.push(libm::sin(angle));
        }

        let mut swaps = Vec::new();
        for i in 0..len {
            let j = reverse_bits(i, log2);
            if j > i {
                swaps.push((i as u32, j as u32));
            }
        }

        Self {
            log2,
            len,
            cos,
            sin,
            swaps,
            scale: 1.0 / libm::sqrt(len as f64),
        }
    }

    /// Transform length.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; the smallest engine has length 1.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// `m` such that `len == 2^m`.
    pub fn log2(&self) -> u32 {
        self.log2
    }

    /// Forward transform in place.
    pub fn forward(&self, re: &mut [f64], im: &mut [f64]) {
        self.transform(re, im);
    }

    /// Inverse transform in place (forward transform with real and
    /// imaginary roles swapped).
    pub fn inverse(&self, re: &mut [f64], im: &mut [f64]) {
        self.transform(im, re);
    }

    fn transform(&self, re: &mut [f64], im: &mut [f64]) {
        debug_assert_eq!(re.len(), self.len);
        debug_assert_eq!(im.len(), self.len);
        let n = self.len;

        for &(i, j) in &self.swaps {
            re.swap(i as usize, j as usize);
            im.swap(i as usize, j as usize);
        }

        let mut n2 = 1;
        for _ in 0..self.log2 {
            let n1 = n2;
            n2 <<= 1;
            let stride = n / n2;
            let mut a = 0;
            for j in 0..n1 {
                // w = cos - i*sin
                let c = self.cos[a];
                let s = self.sin[a];
                a += stride;

                let mut k = j;
                while k < n {
                    let l = k + n1;
                    let tr = c * re[l] + s * im[l];
                    let ti = c * im[l] - s * re[l];
                    re[l] = re[k] - tr;
                    im[l] = im[k] - ti;
                    re[k] += tr;
                    im[k] += ti;
                    k += n2;
                }
            }
        }

        for v in re.iter_mut().chain(im.iter_mut()) {
            *v *= self.scale;
        }
    }
}

fn reverse_bits(i: usize, bits: u32) -> usize {
    if bits == 0 {
        return i;
    }
    i.reverse_bits() >> (usize::BITS - bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_dft(re: &[f64], im: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let n = re.len();
        let scale = 1.0 / (n as f64).sqrt();
        let mut out_re = vec![0.0; n];
        let mut out_im = vec![0.0; n];
        for k in 0..n {
            for j in 0..n {
                let angle = -2.0 * PI * (j * k) as f64 / n as f64;
                out_re[k] += re[j] * angle.cos() - im[j] * angle.sin();
                out_im[k] += re[j] * angle.sin() + im[j] * angle.cos();
            }
            out_re[k] *= scale;
            out_im[k] *= scale;
        }
        (out_re, out_im)
    }

    #[test]
    fn bit_reversal_swaps_pairs_once() {
        let fft = Radix2Fft::new(3);
        // 8 points: 1<->4, 3<->6
        assert_eq!(fft.swaps, vec![(1, 4), (3, 6)]);
    }

    #[test]
    fn length_one_is_identity() {
        let fft = Radix2Fft::new(0);
        let mut re = [3.5];
        let mut im = [-1.0];
        fft.forward(&mut re, &mut im);
        assert_eq!(re, [3.5]);
        assert_eq!(im, [-1.0]);
    }

    #[test]
    fn impulse_has_flat_spectrum() {
        let fft = Radix2Fft::new(4);
        let mut re = vec![0.0; 16];
        let mut im = vec![0.0; 16];
        re[0] = 4.0;
        fft.forward(&mut re, &mut im);
        for k in 0..16 {
            assert!((re[k] - 1.0).abs() < 1e-12);
            assert!(im[k].abs() < 1e-12);
        }
    }

    #[test]
    fn matches_direct_dft() {
        let fft = Radix2Fft::new(5);
        let re: Vec<f64> = (0..32).map(|i| ((i * 7) % 11) as f64 - 5.0).collect();
        let im: Vec<f64> = (0..32).map(|i| ((i * 3) % 5) as f64 * 0.25).collect();
        let (want_re, want_im) = naive_dft(&re, &im);

        let mut got_re = re.clone();
        let mut got_im = im.clone();
        fft.forward(&mut got_re, &mut got_im);
        for k in 0..32 {
            assert!((got_re[k] - want_re[k]).abs() < 1e-9, "re[{}]", k);
            assert!((got_im[k] - want_im[k]).abs() < 1e-9, "im[{}]", k);
        }
    }

    #[test]
    fn inverse_undoes_forward() {
        let fft = Radix2Fft::new(6);
        let re: Vec<f64> = (0..64).map(|i| (i as f64 * 0.37).sin()).collect();
        let mut r = re.clone();
        let mut m = vec![0.0; 64];
        fft.forward(&mut r, &mut m);
        fft.inverse(&mut r, &mut m);
        for i in 0..64 {
            assert!((r[i] - re[i]).abs() < 1e-12);
            assert!(m[i].abs() < 1e-12);
        }
    }
}
