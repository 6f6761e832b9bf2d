//! Polyphonic Parameter Expansion
//!
//! Construction parameters may be given either as a scalar or as an ordered
//! sequence. A component expands itself into `lmax` parallel processing
//! units, where `lmax` is the maximum length among all of its sequence-valued
//! parameters (scalars broadcast). Unit `i` reads sequence parameters with
//! modulo wrap-around: `param[i % len]`.

use crate::stream::SpectralError;
use serde::{Deserialize, Serialize};

/// A construction parameter that is either a single value broadcast to every
/// unit, or a list wrapped modulo its length
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PolyParam<T> {
    Scalar(T),
    List(Vec<T>),
}

impl<T: Clone> PolyParam<T> {
    /// Expansion length this parameter contributes to `lmax`
    pub fn len(&self) -> usize {
        match self {
            PolyParam::Scalar(_) => 1,
            PolyParam::List(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value for unit `i`: the scalar unchanged, or `list[i % len]`
    ///
    /// Callers must have run [`validate`](Self::validate) first; a degenerate
    /// empty list would otherwise wrap with a zero modulus.
    pub fn wrap(&self, i: usize) -> T {
        match self {
            PolyParam::Scalar(value) => value.clone(),
            PolyParam::List(values) => values[i % values.len()].clone(),
        }
    }

    /// Reject the degenerate empty-sequence case
    pub fn validate(&self) -> Result<(), SpectralError> {
        match self {
            PolyParam::List(values) if values.is_empty() => Err(SpectralError::InvalidParameter(
                "sequence parameter must not be empty".into(),
            )),
            _ => Ok(()),
        }
    }
}

impl<T> From<T> for PolyParam<T> {
    fn from(value: T) -> Self {
        PolyParam::Scalar(value)
    }
}

impl<T> From<Vec<T>> for PolyParam<T> {
    fn from(values: Vec<T>) -> Self {
        PolyParam::List(values)
    }
}

/// Maximum expansion length of a set of parameter lengths, minimum 1
pub fn lmax(lengths: &[usize]) -> usize {
    lengths.iter().copied().max().unwrap_or(1).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lmax_is_max_length() {
        assert_eq!(lmax(&[3, 1, 5]), 5);
        assert_eq!(lmax(&[1, 1]), 1);
        assert_eq!(lmax(&[]), 1);
        assert_eq!(lmax(&[0]), 1);
    }

    #[test]
    fn test_scalar_broadcasts() {
        let p: PolyParam<f64> = 0.5.into();
        assert_eq!(p.len(), 1);
        for i in 0..8 {
            assert_eq!(p.wrap(i), 0.5);
        }
    }

    #[test]
    fn test_list_wraps_modulo_length() {
        // Sequence lengths [3, 1, 5] give lmax = 5; unit 4 of the length-3
        // parameter reads list[4 % 3] = list[1].
        let sizes: PolyParam<usize> = vec![256, 512, 1024].into();
        let win: PolyParam<usize> = 2.into();
        let chans: PolyParam<usize> = vec![0, 1, 2, 3, 4].into();
        let n = lmax(&[sizes.len(), win.len(), chans.len()]);
        assert_eq!(n, 5);
        assert_eq!(sizes.wrap(4), 512);
        assert_eq!(sizes.wrap(3), 256);
        assert_eq!(sizes.wrap(5), 1024);
        assert_eq!(sizes.wrap(6), 256);
    }

    #[test]
    fn test_empty_list_rejected() {
        let p: PolyParam<usize> = Vec::new().into();
        assert!(p.validate().is_err());
        let ok: PolyParam<usize> = vec![1].into();
        assert!(ok.validate().is_ok());
    }
}
