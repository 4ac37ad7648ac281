//! Checking a run against a sequential recomputation.

use log::{debug, error};

use crate::error::{Error, Result};
use crate::kernel::scale_block;

/// Default per-element tolerance.  Both paths perform the same single
/// multiplication, so results are expected to match exactly.
pub const DEFAULT_TOLERANCE: f32 = 1e-10;

/// Compute `scale * input[i]` for every element on the calling thread.
pub fn reference(input: &[f32], scale: f32) -> Vec<f32> {
    let mut out = vec![0.0; input.len()];
    scale_block(input, &mut out, input.len(), scale);
    out
}

/// `true` if `candidate` matches the reference within `tolerance`
/// everywhere.
pub fn verify(input: &[f32], scale: f32, candidate: &[f32], tolerance: f32) -> bool {
    check(input, scale, candidate, tolerance).is_ok()
}

/// Like [`verify`], but describes the first mismatch.
pub fn check(input: &[f32], scale: f32, candidate: &[f32], tolerance: f32) -> Result<()> {
    if input.len() != candidate.len() {
        return Err(Error::VerificationLength {
            input: input.len(),
            candidate: candidate.len(),
        });
    }
    let expected = reference(input, scale);
    let mut first = None;
    let mut mismatches = 0;
    for (index, (want, got)) in expected.iter().zip(candidate).enumerate() {
        // NaN never compares within tolerance.
        if !((want - got).abs() <= tolerance) {
            mismatches += 1;
            first.get_or_insert((index, *want, *got));
            debug!("mismatch at {index}: expected {want}, got {got}");
        }
    }
    match first {
        None => Ok(()),
        Some((index, expected, actual)) => {
            error!("equivalence check failed at {mismatches} of {} elements", input.len());
            Err(Error::Verification {
                index,
                expected,
                actual,
                mismatches,
                len: input.len(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_result_passes() {
        let input = [1.0, -2.0, 3.5];
        let candidate = reference(&input, 4.0);
        assert_eq!(candidate, vec![4.0, -8.0, 14.0]);
        assert!(verify(&input, 4.0, &candidate, DEFAULT_TOLERANCE));
    }

    #[test]
    fn reports_first_mismatch() {
        let input = [1.0, 2.0, 3.0, 4.0];
        let candidate = [2.0, 4.0, 0.0, 9.0];
        match check(&input, 2.0, &candidate, DEFAULT_TOLERANCE) {
            Err(Error::Verification {
                index,
                expected,
                actual,
                mismatches,
                len,
            }) => {
                assert_eq!((index, mismatches, len), (2, 2, 4));
                assert_eq!((expected, actual), (6.0, 0.0));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn tolerance_is_inclusive() {
        assert!(verify(&[1.0], 1.0, &[1.5], 0.5));
        assert!(!verify(&[1.0], 1.0, &[1.5], 0.25));
    }

    #[test]
    fn nan_never_matches() {
        assert!(!verify(&[1.0], 1.0, &[f32::NAN], f32::INFINITY));
    }

    #[test]
    fn length_mismatch_fails() {
        assert!(matches!(
            check(&[1.0, 2.0], 1.0, &[1.0], DEFAULT_TOLERANCE),
            Err(Error::VerificationLength { input: 2, candidate: 1 })
        ));
    }
}
