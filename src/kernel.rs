//! Transform Kernel Boundary
//!
//! The orchestration layer owns windowing, hop scheduling, and overlap
//! bookkeeping; the raw transform arithmetic is delegated to a kernel behind
//! the [`TransformKernel`] trait. Each analysis/synthesis unit receives its
//! own kernel instance from a [`KernelBuilder`] at construction and whenever
//! its size changes. The default backend is a real-valued FFT planned by
//! `realfft`.

use num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use std::sync::Arc;

/// One transform engine of a fixed size
///
/// `forward` maps a frame of `size` time-domain samples to `size/2 + 1`
/// spectrum bins; `inverse` is its exact inverse, normalized so that
/// `inverse(forward(x)) == x` within floating tolerance.
pub trait TransformKernel: Send {
    /// Frame size this kernel was built for
    fn size(&self) -> usize;

    /// Forward transform; `real` and `imag` must each hold `size/2 + 1` bins
    fn forward(&mut self, frame: &[f64], real: &mut [f64], imag: &mut [f64]);

    /// Inverse transform; `frame` must hold `size` samples
    fn inverse(&mut self, real: &[f64], imag: &[f64], frame: &mut [f64]);
}

/// Factory constructing one kernel per bank unit
pub trait KernelBuilder: Send {
    fn build(&self, size: usize) -> Box<dyn TransformKernel>;
}

/// Default kernel backed by `realfft` planners
///
/// All working memory, including the planners' scratch space, is allocated
/// up front so transforms stay allocation-free on the tick path.
pub struct RealFftKernel {
    size: usize,
    forward: Arc<dyn RealToComplex<f64>>,
    inverse: Arc<dyn ComplexToReal<f64>>,
    time: Vec<f64>,
    spectrum: Vec<Complex<f64>>,
    fwd_scratch: Vec<Complex<f64>>,
    inv_scratch: Vec<Complex<f64>>,
}

impl RealFftKernel {
    pub fn new(size: usize) -> Self {
        let mut planner = RealFftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let fwd_scratch = forward.make_scratch_vec();
        let inv_scratch = inverse.make_scratch_vec();
        Self {
            size,
            forward,
            inverse,
            time: vec![0.0; size],
            spectrum: vec![Complex::new(0.0, 0.0); size / 2 + 1],
            fwd_scratch,
            inv_scratch,
        }
    }
}

impl TransformKernel for RealFftKernel {
    fn size(&self) -> usize {
        self.size
    }

    fn forward(&mut self, frame: &[f64], real: &mut [f64], imag: &mut [f64]) {
        self.time.copy_from_slice(frame);
        if self
            .forward
            .process_with_scratch(&mut self.time, &mut self.spectrum, &mut self.fwd_scratch)
            .is_err()
        {
            real.fill(0.0);
            imag.fill(0.0);
            return;
        }
        for (k, bin) in self.spectrum.iter().enumerate() {
            real[k] = bin.re;
            imag[k] = bin.im;
        }
    }

    fn inverse(&mut self, real: &[f64], imag: &[f64], frame: &mut [f64]) {
        let half = self.size / 2;
        for k in 0..=half {
            self.spectrum[k] = Complex::new(real[k], imag[k]);
        }
        // DC and Nyquist bins of a real signal carry no imaginary part;
        // processed spectra may have picked up rounding residue there.
        self.spectrum[0].im = 0.0;
        self.spectrum[half].im = 0.0;
        if self
            .inverse
            .process_with_scratch(&mut self.spectrum, frame, &mut self.inv_scratch)
            .is_err()
        {
            frame.fill(0.0);
            return;
        }
        // realfft's inverse is unnormalized (scales by size)
        let scale = 1.0 / self.size as f64;
        for v in frame.iter_mut() {
            *v *= scale;
        }
    }
}

/// Builder for the default `realfft` backend
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFftBuilder;

impl KernelBuilder for RealFftBuilder {
    fn build(&self, size: usize) -> Box<dyn TransformKernel> {
        Box::new(RealFftKernel::new(size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    #[test]
    fn test_forward_inverse_round_trip() {
        let size = 64;
        let mut kernel = RealFftKernel::new(size);
        let frame: Vec<f64> = (0..size)
            .map(|n| (TAU * 3.0 * n as f64 / size as f64).sin() + 0.25)
            .collect();
        let mut real = vec![0.0; size / 2 + 1];
        let mut imag = vec![0.0; size / 2 + 1];
        let mut back = vec![0.0; size];

        kernel.forward(&frame, &mut real, &mut imag);
        kernel.inverse(&real, &imag, &mut back);

        for (a, b) in frame.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-9, "round trip diverged: {} vs {}", a, b);
        }
    }

    #[test]
    fn test_pure_tone_lands_in_one_bin() {
        let size = 128;
        let mut kernel = RealFftKernel::new(size);
        let frame: Vec<f64> = (0..size)
            .map(|n| (TAU * 5.0 * n as f64 / size as f64).cos())
            .collect();
        let mut real = vec![0.0; size / 2 + 1];
        let mut imag = vec![0.0; size / 2 + 1];
        kernel.forward(&frame, &mut real, &mut imag);

        // cos at bin 5 concentrates all energy there (amplitude size/2)
        assert!((real[5] - size as f64 / 2.0).abs() < 1e-6);
        for (k, r) in real.iter().enumerate() {
            if k != 5 {
                assert!(r.abs() < 1e-6, "leakage at bin {}", k);
            }
        }
    }

    #[test]
    fn test_builder_respects_size() {
        let kernel = RealFftBuilder.build(256);
        assert_eq!(kernel.size(), 256);
    }

    #[test]
    fn test_scratch_preallocated_to_planner_requirement() {
        // Transforms must not allocate once the kernel is built, so the
        // scratch vectors have to satisfy the planners up front.
        let kernel = RealFftKernel::new(512);
        assert_eq!(kernel.fwd_scratch.len(), kernel.forward.get_scratch_len());
        assert_eq!(kernel.inv_scratch.len(), kernel.inverse.get_scratch_len());
    }
}
