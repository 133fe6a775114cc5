//! Generic tapped filters shared by the chroma decoder, the composite encoder, and the VBI
//! decoders: a symmetric-capable FIR with both a batch `apply` and a streaming `feed`, and a
//! direct-form biquad-chain IIR.

use std::collections::VecDeque;

/// A FIR filter with an arbitrary odd-length coefficient vector.
///
/// Samples outside the range of the input are treated as zero.  `Fir` owns no history by default;
/// [`Fir::feed`] keeps one internally for streaming use, separate from [`Fir::apply`]'s one-shot
/// batch mode.
#[derive(Debug, Clone)]
pub struct Fir {
    coeffs: Vec<f64>,
    history: VecDeque<f64>,
}

impl Fir {
    /// Construct a filter from its (odd-length) coefficient vector.
    pub fn new(coeffs: Vec<f64>) -> Fir {
        debug_assert!(coeffs.len() % 2 == 1, "FIR filter must have an odd number of taps");
        let num_taps = coeffs.len();
        Fir { coeffs, history: VecDeque::from(vec![0.0; num_taps]) }
    }

    /// Number of taps in this filter.
    pub fn num_taps(&self) -> usize {
        self.coeffs.len()
    }

    /// Apply the filter to `input`, writing `input.len()` samples to `output`.
    ///
    /// `output[i] = Σⱼ coeffs[j] · input[i - (N/2) + j]`, treating out-of-range reads as zero.
    /// Safe to call with `output` aliasing `input`'s storage (an internal scratch buffer is used).
    pub fn apply(&self, input: &[f64], output: &mut [f64]) {
        assert_eq!(input.len(), output.len());
        let num_taps = self.coeffs.len() as isize;
        let half = num_taps / 2;
        let n = input.len() as isize;
        let mut scratch = vec![0.0; input.len()];
        for i in 0..n {
            let mut v = 0.0;
            for (j, &coeff) in self.coeffs.iter().enumerate() {
                let k = i - half + j as isize;
                if k >= 0 && k < n {
                    v += coeff * input[k as usize];
                }
            }
            scratch[i as usize] = v;
        }
        output.copy_from_slice(&scratch);
    }

    /// Feed one sample into the filter's tapped delay line, returning the output centered on the
    /// sample `N/2` feeds ago.
    ///
    /// Callers that need the output aligned with a particular input sample (the chroma/luma NR
    /// coring paths) must offset their read index by `num_taps() / 2` to account for this delay.
    pub fn feed(&mut self, x: f64) -> f64 {
        self.history.pop_front();
        self.history.push_back(x);
        self.coeffs.iter().zip(self.history.iter()).map(|(c, h)| c * h).sum()
    }

    /// Reset the streaming history to all-zero.
    pub fn clear(&mut self) {
        let num_taps = self.history.len();
        self.history = VecDeque::from(vec![0.0; num_taps]);
    }
}

/// A general IIR/FIR biquad-chain filter: `b` is feedforward (input), `a` is feedback (output; a
/// pure FIR filter sets `a = [1.0]`).
///
/// Coefficients are normalised against `a[0]` at construction, matching direct-form-I structure.
#[derive(Debug, Clone)]
pub struct Iir {
    b: Vec<f64>,
    a: Vec<f64>,
    x: Vec<f64>,
    y: Vec<f64>,
}

impl Iir {
    /// Construct a filter from feedforward coefficients `b` and feedback coefficients `a`.
    pub fn new(b: &[f64], a: &[f64]) -> Iir {
        let a0 = a[0];
        let b: Vec<f64> = b.iter().map(|v| v / a0).collect();
        let a: Vec<f64> = a.iter().map(|v| v / a0).collect();
        let x = vec![0.0; b.len()];
        let y = vec![0.0; a.len()];
        Iir { b, a, x, y }
    }

    /// Reset input/output history to `val` (default 0 via [`Iir::new`]).
    pub fn clear(&mut self, val: f64) {
        self.x.iter_mut().for_each(|v| *v = val);
        self.y.iter_mut().for_each(|v| *v = val);
    }

    /// Feed one input sample, returning the new output sample.
    pub fn feed(&mut self, val: f64) -> f64 {
        let mut y0 = self.b[0] * val;
        for i in (1..self.b.len()).rev() {
            self.x[i] = self.x[i - 1];
            y0 += self.b[i] * self.x[i];
        }
        self.x[0] = val;
        for i in (1..self.a.len()).rev() {
            self.y[i] = self.y[i - 1];
            y0 -= self.a[i] * self.y[i];
        }
        self.y[0] = y0;
        self.y[0]
    }
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;
    use rstest::rstest;

    use super::*;

    #[googletest::test]
    fn test_fir_apply_identity() {
        let fir = Fir::new(vec![0.0, 1.0, 0.0]);
        let input = vec![1.0, 2.0, 3.0, 4.0];
        let mut output = vec![0.0; 4];
        fir.apply(&input, &mut output);
        expect_that!(output, elements_are![eq(1.0), eq(2.0), eq(3.0), eq(4.0)]);
    }

    #[googletest::test]
    fn test_fir_apply_treats_out_of_range_as_zero() {
        let fir = Fir::new(vec![1.0, 1.0, 1.0]);
        let input = vec![1.0, 2.0, 3.0];
        let mut output = vec![0.0; 3];
        fir.apply(&input, &mut output);
        // output[0] = 0 + 1 + 2 = 3; output[1] = 1+2+3=6; output[2] = 2+3+0=5
        expect_that!(output, elements_are![eq(3.0), eq(6.0), eq(5.0)]);
    }

    #[googletest::test]
    fn test_fir_feed_matches_apply_after_warm_up() {
        let coeffs = vec![0.25, 0.5, 0.25];
        let fir_apply = Fir::new(coeffs.clone());
        let mut fir_feed = Fir::new(coeffs);
        let input = vec![1.0, 2.0, 3.0, 4.0, 0.0];
        let mut output = vec![0.0; input.len()];
        fir_apply.apply(&input, &mut output);

        let fed: Vec<f64> = input.iter().map(|&x| fir_feed.feed(x)).collect();
        // feed()'s output trails apply()'s by num_taps/2 samples.
        expect_that!(fed[1..], container_eq(output[..4].to_vec()));
    }

    #[rstest]
    #[case(vec![1.0], vec![1.0], 5.0, 5.0)]
    fn test_iir_as_fir_passthrough(
        #[case] b: Vec<f64>,
        #[case] a: Vec<f64>,
        #[case] input: f64,
        #[case] expected: f64,
    ) {
        let mut iir = Iir::new(&b, &a);
        expect_that!(iir.feed(input), eq(expected));
    }

    #[googletest::test]
    fn test_iir_clear_resets_history() {
        let mut iir = Iir::new(&[0.5, 0.5], &[1.0]);
        iir.feed(10.0);
        iir.clear(0.0);
        // With zeroed history, first feed only sees b[0] * val.
        expect_that!(iir.feed(4.0), eq(2.0));
    }
}
