//! Miscellaneous integer utilities.

use crate::error::{MsrError, Result};

/// Computes `ceil(a / b)` for `b > 0`.
pub const fn ceil_div(a: usize, b: usize) -> usize {
    assert!(b > 0);
    (a + b - 1) / b
}

///
/// Validates a rotation distance against a slot count `len`. The distance must be integral and
/// `|by| < len`; nothing is wrapped or truncated.
///
pub fn checked_distance(by: f64, len: usize) -> Result<i64> {
    if !by.is_finite() || by.fract() != 0.0 {
        return Err(MsrError::TypeOrRange {
            by,
            len,
            reason: "distance must be an integer",
        });
    }
    if by.abs() >= len as f64 {
        return Err(MsrError::TypeOrRange {
            by,
            len,
            reason: "distance must be smaller than the slot count",
        });
    }
    Ok(by as i64)
}

///
/// Maps a validated signed rotation `by` to the equivalent left rotation in `[0, len)`.
///
pub fn left_rotation(by: i64, len: usize) -> Result<usize> {
    if by.unsigned_abs() >= len as u64 {
        return Err(MsrError::TypeOrRange {
            by: by as f64,
            len,
            reason: "distance must be smaller than the slot count",
        });
    }
    Ok(by.rem_euclid(len as i64) as usize)
}
