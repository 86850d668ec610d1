//! A trivial (insecure) context that keeps slots in the clear, useful for testing.
//!
//! Arithmetic is exact, but level and scale are tracked with the same rules as a real scheme, so
//! depth exhaustion and scale mismatches surface here exactly as they would under encryption.

use crate::error::{MsrError, Result};
use crate::he::he::{pad_slots, rotate_slots, HeContext, LevelScale};

pub const INSECURE_DEFAULT_MAX_LEVEL: usize = 6;
pub const INSECURE_SCALE_BITS: f64 = 40_f64;

#[derive(Clone, Debug)]
pub struct InsecureContext {
    slot_capacity: usize,
    max_level: usize,
    native_cumulative_add: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InsecureCiphertext {
    slots: Vec<f64>,
    meta: LevelScale,
}

impl InsecureCiphertext {
    /// The raw slots. Only meaningful because nothing is encrypted.
    pub fn slots(&self) -> &[f64] {
        &self.slots
    }
}

impl InsecureContext {
    pub fn new(slot_capacity: usize) -> Self {
        InsecureContext {
            slot_capacity,
            max_level: INSECURE_DEFAULT_MAX_LEVEL,
            native_cumulative_add: true,
        }
    }

    pub fn with_max_level(mut self, max_level: usize) -> Self {
        self.max_level = max_level;
        self
    }

    /// Hides the native cumulative add, forcing callers onto rotation-based total sums.
    pub fn without_cumulative_add(mut self) -> Self {
        self.native_cumulative_add = false;
        self
    }

    fn check_len(&self, ct: &InsecureCiphertext) -> Result<()> {
        if ct.slots.len() != self.slot_capacity {
            return Err(MsrError::invariant(format!(
                "ciphertext has {} slots, context has {}",
                ct.slots.len(),
                self.slot_capacity
            )));
        }
        Ok(())
    }

    fn zip_with<F: Fn(f64, f64) -> f64>(
        &self,
        lhs: &InsecureCiphertext,
        rhs: &InsecureCiphertext,
        meta: LevelScale,
        f: F,
    ) -> Result<InsecureCiphertext> {
        self.check_len(lhs)?;
        self.check_len(rhs)?;
        Ok(InsecureCiphertext {
            slots: lhs
                .slots
                .iter()
                .zip(rhs.slots.iter())
                .map(|(a, b)| f(*a, *b))
                .collect(),
            meta,
        })
    }
}

impl HeContext for InsecureContext {
    type Ciphertext = InsecureCiphertext;

    fn print_summary(&self) {
        eprintln!(
            "Insecure context with {} slots, {} levels, native cumulative add {}",
            self.slot_capacity,
            self.max_level,
            if self.native_cumulative_add {
                "enabled"
            } else {
                "disabled"
            }
        );
    }

    fn slot_capacity(&self) -> usize {
        self.slot_capacity
    }

    fn max_level(&self) -> usize {
        self.max_level
    }

    fn base_scale_bits(&self) -> f64 {
        INSECURE_SCALE_BITS
    }

    fn encrypt(&self, values: &[f64]) -> Result<Self::Ciphertext> {
        Ok(InsecureCiphertext {
            slots: pad_slots(values, self.slot_capacity)?,
            meta: LevelScale::fresh(self.max_level, INSECURE_SCALE_BITS),
        })
    }

    fn decrypt(&self, ct: &Self::Ciphertext) -> Result<Vec<f64>> {
        self.check_len(ct)?;
        Ok(ct.slots.clone())
    }

    fn add(&self, lhs: &Self::Ciphertext, rhs: &Self::Ciphertext) -> Result<Self::Ciphertext> {
        let meta = lhs.meta.after_add(&rhs.meta)?;
        self.zip_with(lhs, rhs, meta, |a, b| a + b)
    }

    fn sub(&self, lhs: &Self::Ciphertext, rhs: &Self::Ciphertext) -> Result<Self::Ciphertext> {
        let meta = lhs.meta.after_add(&rhs.meta)?;
        self.zip_with(lhs, rhs, meta, |a, b| a - b)
    }

    fn mul_plain(&self, ct: &Self::Ciphertext, plain: &[f64]) -> Result<Self::Ciphertext> {
        self.check_len(ct)?;
        let plain = pad_slots(plain, self.slot_capacity)?;
        Ok(InsecureCiphertext {
            slots: ct
                .slots
                .iter()
                .zip(plain.iter())
                .map(|(a, p)| a * p)
                .collect(),
            meta: ct.meta.after_mul_plain(INSECURE_SCALE_BITS),
        })
    }

    fn mul(&self, lhs: &Self::Ciphertext, rhs: &Self::Ciphertext) -> Result<Self::Ciphertext> {
        let meta = lhs.meta.after_mul(&rhs.meta)?;
        self.zip_with(lhs, rhs, meta, |a, b| a * b)
    }

    fn rotate(&self, ct: &Self::Ciphertext, by: i64) -> Result<Self::Ciphertext> {
        self.check_len(ct)?;
        Ok(InsecureCiphertext {
            slots: rotate_slots(&ct.slots, by)?,
            meta: ct.meta,
        })
    }

    fn rescale(&self, ct: &Self::Ciphertext) -> Result<Self::Ciphertext> {
        Ok(InsecureCiphertext {
            slots: ct.slots.clone(),
            meta: ct.meta.after_rescale(INSECURE_SCALE_BITS)?,
        })
    }

    fn mod_switch(&self, ct: &Self::Ciphertext) -> Result<Self::Ciphertext> {
        Ok(InsecureCiphertext {
            slots: ct.slots.clone(),
            meta: ct.meta.after_mod_switch()?,
        })
    }

    fn level(&self, ct: &Self::Ciphertext) -> usize {
        ct.meta.level
    }

    fn scale_bits(&self, ct: &Self::Ciphertext) -> f64 {
        ct.meta.scale_bits
    }

    fn cumulative_add(&self, ct: &Self::Ciphertext) -> Option<Result<Self::Ciphertext>> {
        if !self.native_cumulative_add {
            return None;
        }
        let sum: f64 = ct.slots.iter().sum();
        Some(Ok(InsecureCiphertext {
            slots: vec![sum; ct.slots.len()],
            meta: ct.meta,
        }))
    }

    fn noise_estimate(&self, _ct: &Self::Ciphertext) -> Option<f64> {
        Some(0_f64)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let ctx = InsecureContext::new(8);
        let ct = ctx.encrypt(&[1_f64, 2_f64, 3_f64]).unwrap();
        assert_eq!(
            ctx.decrypt(&ct).unwrap(),
            vec![1_f64, 2_f64, 3_f64, 0_f64, 0_f64, 0_f64, 0_f64, 0_f64]
        );
        assert_eq!(ctx.level(&ct), INSECURE_DEFAULT_MAX_LEVEL);
        assert!(matches!(
            ctx.encrypt(&[0_f64; 9]),
            Err(MsrError::Capacity { .. })
        ));
    }

    #[test]
    fn test_rotate() {
        let ctx = InsecureContext::new(4);
        let ct = ctx.encrypt(&[1_f64, 2_f64, 3_f64, 4_f64]).unwrap();
        let left = ctx.rotate(&ct, 1).unwrap();
        assert_eq!(left.slots(), &[2_f64, 3_f64, 4_f64, 1_f64]);
        let right = ctx.rotate(&ct, -1).unwrap();
        assert_eq!(right.slots(), &[4_f64, 1_f64, 2_f64, 3_f64]);
        assert!(matches!(
            ctx.rotate(&ct, 4),
            Err(MsrError::TypeOrRange { .. })
        ));
        assert!(matches!(
            ctx.rotate(&ct, -4),
            Err(MsrError::TypeOrRange { .. })
        ));
    }

    #[test]
    fn test_scale_discipline() {
        let ctx = InsecureContext::new(4).with_max_level(1);
        let ct = ctx.encrypt(&[2_f64, 4_f64]).unwrap();
        let half = ctx.mul_plain(&ct, &[0.5, 0.5]).unwrap();
        assert!(ctx.add(&ct, &half).is_err());

        let half = ctx.rescale(&half).unwrap();
        assert_eq!(ctx.level(&half), 0);
        assert_eq!(ctx.scale_bits(&half), INSECURE_SCALE_BITS);
        assert!(ctx.add(&ct, &half).is_err());

        let ct = ctx.mod_switch(&ct).unwrap();
        let sum = ctx.add(&ct, &half).unwrap();
        assert_eq!(&sum.slots()[..2], &[3_f64, 6_f64]);

        assert!(matches!(
            ctx.rescale(&sum),
            Err(MsrError::LevelExhausted { .. })
        ));
    }

    #[test]
    fn test_cumulative_add() {
        let ctx = InsecureContext::new(4);
        let ct = ctx.encrypt(&[1_f64, 2_f64, 3_f64]).unwrap();
        let total = ctx.cumulative_add(&ct).unwrap().unwrap();
        assert_eq!(total.slots(), &[6_f64; 4]);

        let ctx = ctx.without_cumulative_add();
        assert!(ctx.cumulative_add(&ct).is_none());
    }
}
