//! Window Functions
//!
//! Envelope shapes applied to each frame before (analysis) and after
//! (synthesis) the transform to reduce spectral leakage. The enumerated set
//! and its integer indices form part of the configuration surface: `wintype`
//! is accepted as an index in `0..=8`.

use crate::stream::SpectralError;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Enumerated window shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WindowKind {
    /// No windowing
    Rectangular,
    Hamming,
    /// Hann window (the historical default)
    #[default]
    Hanning,
    /// Triangular
    Bartlett,
    /// Blackman 3-term
    Blackman3,
    /// Blackman-Harris 4-term
    BlackmanHarris4,
    /// Blackman-Harris 7-term
    BlackmanHarris7,
    /// Tukey, alpha = 0.66
    Tukey,
    /// Half-sine
    HalfSine,
}

impl WindowKind {
    /// All shapes in index order
    pub const ALL: [WindowKind; 9] = [
        WindowKind::Rectangular,
        WindowKind::Hamming,
        WindowKind::Hanning,
        WindowKind::Bartlett,
        WindowKind::Blackman3,
        WindowKind::BlackmanHarris4,
        WindowKind::BlackmanHarris7,
        WindowKind::Tukey,
        WindowKind::HalfSine,
    ];

    /// Shape for a configuration index in `0..=8`
    pub fn from_index(index: usize) -> Result<Self, SpectralError> {
        Self::ALL.get(index).copied().ok_or_else(|| {
            SpectralError::InvalidParameter(format!(
                "window type index must be in 0..=8, got {}",
                index
            ))
        })
    }

    /// Configuration index of this shape
    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|k| k == self).unwrap_or(0)
    }

    /// Generate the coefficient table for a frame of `size` samples
    pub fn table(&self, size: usize) -> Vec<f64> {
        let mut w = vec![0.0; size];
        if size == 0 {
            return w;
        }
        if size == 1 {
            w[0] = 1.0;
            return w;
        }
        let m = (size - 1) as f64;
        match self {
            WindowKind::Rectangular => w.fill(1.0),
            WindowKind::Hamming => {
                for (n, v) in w.iter_mut().enumerate() {
                    *v = 0.54 - 0.46 * (2.0 * PI * n as f64 / m).cos();
                }
            }
            WindowKind::Hanning => {
                for (n, v) in w.iter_mut().enumerate() {
                    *v = 0.5 - 0.5 * (2.0 * PI * n as f64 / m).cos();
                }
            }
            WindowKind::Bartlett => {
                for (n, v) in w.iter_mut().enumerate() {
                    *v = 1.0 - (2.0 * n as f64 / m - 1.0).abs();
                }
            }
            WindowKind::Blackman3 => {
                for (n, v) in w.iter_mut().enumerate() {
                    let t = 2.0 * PI * n as f64 / m;
                    *v = 0.42 - 0.5 * t.cos() + 0.08 * (2.0 * t).cos();
                }
            }
            WindowKind::BlackmanHarris4 => {
                for (n, v) in w.iter_mut().enumerate() {
                    let t = 2.0 * PI * n as f64 / m;
                    *v = 0.35875 - 0.48829 * t.cos() + 0.14128 * (2.0 * t).cos()
                        - 0.01168 * (3.0 * t).cos();
                }
            }
            WindowKind::BlackmanHarris7 => {
                const A: [f64; 7] = [
                    0.271_220_360_585_039_3,
                    0.433_444_612_327_442_7,
                    0.218_004_122_892_930_13,
                    0.065_785_343_295_606_99,
                    0.010_761_867_305_342_48,
                    0.000_770_012_710_581_225_5,
                    0.000_013_680_883_636_98,
                ];
                for (n, v) in w.iter_mut().enumerate() {
                    let t = 2.0 * PI * n as f64 / m;
                    let mut acc = 0.0;
                    for (k, a) in A.iter().enumerate() {
                        let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
                        acc += sign * a * (k as f64 * t).cos();
                    }
                    *v = acc;
                }
            }
            WindowKind::Tukey => {
                let alpha = 0.66;
                let edge = alpha * m / 2.0;
                for (n, v) in w.iter_mut().enumerate() {
                    let x = n as f64;
                    *v = if x < edge {
                        0.5 * (1.0 + (PI * (x / edge - 1.0)).cos())
                    } else if x > m - edge {
                        0.5 * (1.0 + (PI * ((x - m + edge) / edge)).cos())
                    } else {
                        1.0
                    };
                }
            }
            WindowKind::HalfSine => {
                for (n, v) in w.iter_mut().enumerate() {
                    *v = (PI * n as f64 / m).sin();
                }
            }
        }
        w
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_round_trip() {
        for (i, kind) in WindowKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
            assert_eq!(WindowKind::from_index(i).unwrap(), *kind);
        }
        assert!(WindowKind::from_index(9).is_err());
    }

    #[test]
    fn test_rectangular_is_flat() {
        let w = WindowKind::Rectangular.table(64);
        assert!(w.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_tables_are_symmetric_and_bounded() {
        for kind in WindowKind::ALL {
            let w = kind.table(128);
            assert_eq!(w.len(), 128);
            for n in 0..128 {
                assert!(
                    (w[n] - w[127 - n]).abs() < 1e-9,
                    "{:?} not symmetric at {}",
                    kind,
                    n
                );
                assert!(w[n] <= 1.0 + 1e-9 && w[n] >= -1e-9);
            }
        }
    }

    #[test]
    fn test_tapered_windows_vanish_at_edges() {
        for kind in [
            WindowKind::Hanning,
            WindowKind::Bartlett,
            WindowKind::HalfSine,
        ] {
            let w = kind.table(64);
            assert!(w[0].abs() < 1e-9, "{:?} edge not zero", kind);
            assert!(w[63].abs() < 1e-9, "{:?} edge not zero", kind);
        }
        // Hamming and Blackman-Harris have small non-zero pedestals
        let hamming = WindowKind::Hamming.table(64);
        assert!((hamming[0] - 0.08).abs() < 1e-9);
    }

    #[test]
    fn test_tukey_has_flat_top() {
        let w = WindowKind::Tukey.table(100);
        assert!((w[50] - 1.0).abs() < 1e-9);
        assert!(w[0].abs() < 1e-9);
        assert!(w[2] < 0.5);
    }

    #[test]
    fn test_degenerate_sizes() {
        assert!(WindowKind::Hanning.table(0).is_empty());
        assert_eq!(WindowKind::Hanning.table(1), vec![1.0]);
    }
}
