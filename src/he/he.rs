//! The encryption context interface the statistics engine is written against.

use crate::error::{MsrError, Result};
use crate::math::utils::left_rotation;

/// Scales closer than this (in bits) are considered equal when adding ciphertexts.
pub const SCALE_TOLERANCE_BITS: f64 = 1e-6;

///
/// An approximate-arithmetic (CKKS-style) homomorphic encryption context. Ciphertexts hold
/// `slot_capacity()` real slots. The context is shared read-only between concurrent
/// computations, so every operation takes `&self` and returns a new ciphertext.
///
/// Levels count the rescales (or level drops) a ciphertext still has room for: fresh
/// ciphertexts sit at `max_level()`, and each `rescale` or `mod_switch` lowers the level by one.
///
pub trait HeContext: Sync {
    type Ciphertext: Clone + Send + Sync;

    fn print_summary(&self);

    /// Number of real slots in one ciphertext.
    fn slot_capacity(&self) -> usize;
    /// Level of freshly encrypted ciphertexts.
    fn max_level(&self) -> usize;
    /// Scale, in bits, of fresh ciphertexts and of encoded plaintexts.
    fn base_scale_bits(&self) -> f64;

    /// Encrypts `values` into the first slots; remaining slots are zero.
    fn encrypt(&self, values: &[f64]) -> Result<Self::Ciphertext>;
    /// Decrypts all `slot_capacity()` slots.
    fn decrypt(&self, ct: &Self::Ciphertext) -> Result<Vec<f64>>;

    /// Slot-wise sum. Both operands must share level and scale.
    fn add(&self, lhs: &Self::Ciphertext, rhs: &Self::Ciphertext) -> Result<Self::Ciphertext>;
    /// Slot-wise difference. Both operands must share level and scale.
    fn sub(&self, lhs: &Self::Ciphertext, rhs: &Self::Ciphertext) -> Result<Self::Ciphertext>;
    /// Slot-wise product with a plaintext vector (zero-padded). The scale grows by the encoding
    /// scale, so a rescale is due afterwards.
    fn mul_plain(&self, ct: &Self::Ciphertext, plain: &[f64]) -> Result<Self::Ciphertext>;
    /// Slot-wise product of two ciphertexts at the same level (relinearized).
    fn mul(&self, lhs: &Self::Ciphertext, rhs: &Self::Ciphertext) -> Result<Self::Ciphertext>;
    /// Cyclic rotation: slot `i` of the result holds slot `i + by` of `ct`. Requires
    /// `|by| < slot_capacity()`.
    fn rotate(&self, ct: &Self::Ciphertext, by: i64) -> Result<Self::Ciphertext>;
    /// Divides the scale by one prime and drops one level.
    fn rescale(&self, ct: &Self::Ciphertext) -> Result<Self::Ciphertext>;
    /// Drops one level without touching the scale.
    fn mod_switch(&self, ct: &Self::Ciphertext) -> Result<Self::Ciphertext>;

    fn level(&self, ct: &Self::Ciphertext) -> usize;
    fn scale_bits(&self, ct: &Self::Ciphertext) -> f64;

    /// Native sum of all slots, replicated into every slot. `None` when the scheme has no
    /// such operation.
    fn cumulative_add(&self, _ct: &Self::Ciphertext) -> Option<Result<Self::Ciphertext>> {
        None
    }

    /// Estimated noise standard deviation in slot units, if the context tracks it.
    fn noise_estimate(&self, _ct: &Self::Ciphertext) -> Option<f64> {
        None
    }
}

///
/// Level and scale bookkeeping shared by the contexts in this crate. Follows the usual CKKS
/// discipline: additions need matching level and scale, multiplications add scales, rescales
/// subtract one prime's worth of bits and consume a level.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelScale {
    pub level: usize,
    pub scale_bits: f64,
}

impl LevelScale {
    pub fn fresh(level: usize, scale_bits: f64) -> Self {
        LevelScale { level, scale_bits }
    }

    pub fn after_add(&self, other: &LevelScale) -> Result<Self> {
        if self.level != other.level {
            return Err(MsrError::invariant(format!(
                "adding ciphertexts at levels {} and {}",
                self.level, other.level
            )));
        }
        if (self.scale_bits - other.scale_bits).abs() > SCALE_TOLERANCE_BITS {
            return Err(MsrError::invariant(format!(
                "adding ciphertexts at scales 2^{} and 2^{}",
                self.scale_bits, other.scale_bits
            )));
        }
        Ok(*self)
    }

    pub fn after_mul_plain(&self, plain_scale_bits: f64) -> Self {
        LevelScale {
            level: self.level,
            scale_bits: self.scale_bits + plain_scale_bits,
        }
    }

    pub fn after_mul(&self, other: &LevelScale) -> Result<Self> {
        if self.level != other.level {
            return Err(MsrError::invariant(format!(
                "multiplying ciphertexts at levels {} and {}",
                self.level, other.level
            )));
        }
        Ok(LevelScale {
            level: self.level,
            scale_bits: self.scale_bits + other.scale_bits,
        })
    }

    pub fn after_rescale(&self, prime_bits: f64) -> Result<Self> {
        if self.level == 0 {
            return Err(MsrError::LevelExhausted {
                operation: "rescale",
                level: self.level,
            });
        }
        Ok(LevelScale {
            level: self.level - 1,
            scale_bits: self.scale_bits - prime_bits,
        })
    }

    pub fn after_mod_switch(&self) -> Result<Self> {
        if self.level == 0 {
            return Err(MsrError::LevelExhausted {
                operation: "mod switch",
                level: self.level,
            });
        }
        Ok(LevelScale {
            level: self.level - 1,
            scale_bits: self.scale_bits,
        })
    }
}

/// Left-rotates `values` by `by` positions, validating the distance first.
pub fn rotate_slots(values: &[f64], by: i64) -> Result<Vec<f64>> {
    let shift = left_rotation(by, values.len())?;
    let mut out = Vec::with_capacity(values.len());
    out.extend_from_slice(&values[shift..]);
    out.extend_from_slice(&values[..shift]);
    Ok(out)
}

/// Zero-pads `values` to `slot_capacity` slots.
pub fn pad_slots(values: &[f64], slot_capacity: usize) -> Result<Vec<f64>> {
    if values.len() > slot_capacity {
        return Err(MsrError::Capacity {
            len: values.len(),
            slot_capacity,
        });
    }
    let mut out = Vec::with_capacity(slot_capacity);
    out.extend_from_slice(values);
    out.resize(slot_capacity, 0_f64);
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rotate_slots() {
        let v = [0_f64, 1_f64, 2_f64, 3_f64];
        assert_eq!(
            rotate_slots(&v, 1).unwrap(),
            vec![1_f64, 2_f64, 3_f64, 0_f64]
        );
        assert_eq!(
            rotate_slots(&v, -1).unwrap(),
            vec![3_f64, 0_f64, 1_f64, 2_f64]
        );
        assert_eq!(rotate_slots(&v, 0).unwrap(), v.to_vec());
        assert!(matches!(
            rotate_slots(&v, 4),
            Err(MsrError::TypeOrRange { .. })
        ));
    }

    #[test]
    fn test_pad_slots() {
        assert_eq!(pad_slots(&[1_f64], 3).unwrap(), vec![1_f64, 0_f64, 0_f64]);
        assert!(matches!(
            pad_slots(&[1_f64; 4], 3),
            Err(MsrError::Capacity { .. })
        ));
    }

    #[test]
    fn test_level_scale_discipline() {
        let fresh = LevelScale::fresh(2, 30_f64);
        let prod = fresh.after_mul_plain(30_f64);
        assert_eq!(prod.scale_bits, 60_f64);
        assert!(fresh.after_add(&prod).is_err());

        let rescaled = prod.after_rescale(30_f64).unwrap();
        assert_eq!(rescaled, LevelScale::fresh(1, 30_f64));
        assert!(fresh.after_add(&rescaled).is_err());

        let switched = fresh.after_mod_switch().unwrap();
        assert!(switched.after_add(&rescaled).is_ok());

        let bottom = LevelScale::fresh(0, 60_f64);
        assert!(matches!(
            bottom.after_rescale(30_f64),
            Err(MsrError::LevelExhausted { .. })
        ));
        assert!(matches!(
            bottom.after_mod_switch(),
            Err(MsrError::LevelExhausted { .. })
        ));
    }
}
