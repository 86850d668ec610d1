//! A CKKS simulator: slots stay in the clear, but every operation injects the noise the real
//! scheme would (fresh encryption error, key-switching error on rotations and relinearization,
//! rounding error on rescale) and the level/scale/modulus discipline is enforced.
//!
//! Noise is sampled in "raw" units (coefficient domain, scaled by `sqrt(N)` for the canonical
//! embedding) and divided by the ciphertext's current scale, so it shrinks relative to the
//! message while the scale is `2^(2 * SCALE_BITS)` and grows back after a rescale.

use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::error::{MsrError, Result};
use crate::he::he::{pad_slots, rotate_slots, HeContext, LevelScale};
use crate::math::rand_sampled::{add_gaussian_noise, width_to_std_dev};
use crate::math::utils::left_rotation;

#[allow(non_snake_case)]
#[derive(Clone, Debug)]
pub struct NoiseTrackerParams {
    pub LOG_SLOTS: usize,
    pub MAX_LEVEL: usize,
    pub SCALE_BITS: u32,
    pub FIRST_PRIME_BITS: u32,
    pub ERROR_WIDTH_MILLIONTHS: u64,
    pub KEY_SWITCH_WIDTH_MILLIONTHS: u64,
}

impl NoiseTrackerParams {
    /// 64 slots; quick to run in tests.
    pub const TEST: NoiseTrackerParams = NoiseTrackerParams {
        LOG_SLOTS: 6,
        MAX_LEVEL: 4,
        SCALE_BITS: 40,
        FIRST_PRIME_BITS: 60,
        ERROR_WIDTH_MILLIONTHS: 8_000_000,
        KEY_SWITCH_WIDTH_MILLIONTHS: 8_000_000_000,
    };

    /// Ring degree 8192 (4096 slots), modulus chain [60, 40 x 4] bits.
    pub const N8192: NoiseTrackerParams = NoiseTrackerParams {
        LOG_SLOTS: 12,
        MAX_LEVEL: 4,
        SCALE_BITS: 40,
        FIRST_PRIME_BITS: 60,
        ERROR_WIDTH_MILLIONTHS: 8_000_000,
        KEY_SWITCH_WIDTH_MILLIONTHS: 8_000_000_000,
    };

    /// Ring degree 16384 (8192 slots), modulus chain [60, 40 x 6] bits.
    pub const N16384: NoiseTrackerParams = NoiseTrackerParams {
        LOG_SLOTS: 13,
        MAX_LEVEL: 6,
        SCALE_BITS: 40,
        FIRST_PRIME_BITS: 60,
        ERROR_WIDTH_MILLIONTHS: 8_000_000,
        KEY_SWITCH_WIDTH_MILLIONTHS: 8_000_000_000,
    };

    pub const fn with_max_level(&self, max_level: usize) -> Self {
        NoiseTrackerParams {
            LOG_SLOTS: self.LOG_SLOTS,
            MAX_LEVEL: max_level,
            SCALE_BITS: self.SCALE_BITS,
            FIRST_PRIME_BITS: self.FIRST_PRIME_BITS,
            ERROR_WIDTH_MILLIONTHS: self.ERROR_WIDTH_MILLIONTHS,
            KEY_SWITCH_WIDTH_MILLIONTHS: self.KEY_SWITCH_WIDTH_MILLIONTHS,
        }
    }

    pub const fn with_log_slots(&self, log_slots: usize) -> Self {
        NoiseTrackerParams {
            LOG_SLOTS: log_slots,
            MAX_LEVEL: self.MAX_LEVEL,
            SCALE_BITS: self.SCALE_BITS,
            FIRST_PRIME_BITS: self.FIRST_PRIME_BITS,
            ERROR_WIDTH_MILLIONTHS: self.ERROR_WIDTH_MILLIONTHS,
            KEY_SWITCH_WIDTH_MILLIONTHS: self.KEY_SWITCH_WIDTH_MILLIONTHS,
        }
    }

    pub fn expand(&self) -> Result<NoiseTrackerParamsExpanded> {
        if self.LOG_SLOTS == 0 || self.LOG_SLOTS > 16 {
            return Err(MsrError::InvalidParameter {
                param: "LOG_SLOTS",
                constraint: format!("must be in 1..=16, got {}", self.LOG_SLOTS),
            });
        }
        if self.SCALE_BITS == 0 || self.FIRST_PRIME_BITS <= self.SCALE_BITS {
            return Err(MsrError::InvalidParameter {
                param: "FIRST_PRIME_BITS",
                constraint: format!(
                    "must exceed SCALE_BITS ({}), got {}",
                    self.SCALE_BITS, self.FIRST_PRIME_BITS
                ),
            });
        }
        let slots = 1_usize << self.LOG_SLOTS;
        let degree = 2 * slots;
        let embed = (degree as f64).sqrt();
        Ok(NoiseTrackerParamsExpanded {
            SLOTS: slots,
            DEGREE: degree,
            MAX_LEVEL: self.MAX_LEVEL,
            SCALE_BITS: self.SCALE_BITS as f64,
            FIRST_PRIME_BITS: self.FIRST_PRIME_BITS as f64,
            MODULUS_BITS: self.FIRST_PRIME_BITS as usize
                + self.MAX_LEVEL * self.SCALE_BITS as usize,
            FRESH_RAW_STD: width_to_std_dev(self.ERROR_WIDTH_MILLIONTHS) * embed,
            KEY_SWITCH_RAW_STD: width_to_std_dev(self.KEY_SWITCH_WIDTH_MILLIONTHS) * embed,
            // Rounding to the nearest integer is uniform on [-1/2, 1/2).
            ROUNDING_RAW_STD: (degree as f64 / 12_f64).sqrt(),
        })
    }
}

#[allow(non_snake_case)]
#[derive(Clone, Debug)]
pub struct NoiseTrackerParamsExpanded {
    pub SLOTS: usize,
    pub DEGREE: usize,
    pub MAX_LEVEL: usize,
    pub SCALE_BITS: f64,
    pub FIRST_PRIME_BITS: f64,
    pub MODULUS_BITS: usize,
    pub FRESH_RAW_STD: f64,
    pub KEY_SWITCH_RAW_STD: f64,
    pub ROUNDING_RAW_STD: f64,
}

impl NoiseTrackerParamsExpanded {
    /// Bits of ciphertext modulus left at `level`.
    pub fn modulus_bits(&self, level: usize) -> f64 {
        self.FIRST_PRIME_BITS + level as f64 * self.SCALE_BITS
    }
}

#[derive(Clone, Debug)]
pub struct TrackedCiphertext {
    slots: Vec<f64>,
    meta: LevelScale,
    /// Estimated noise standard deviation, in slot units.
    noise: f64,
}

pub struct NoiseTracker {
    params: NoiseTrackerParamsExpanded,
    seed: u64,
    stream: AtomicU64,
}

impl NoiseTracker {
    pub fn with_seed(params: &NoiseTrackerParams, seed: u64) -> Result<Self> {
        Ok(NoiseTracker {
            params: params.expand()?,
            seed,
            stream: AtomicU64::new(0),
        })
    }

    /// A fresh generator per operation, so the context can be shared without locking.
    fn op_rng(&self) -> ChaCha20Rng {
        let mut rng = ChaCha20Rng::seed_from_u64(self.seed);
        rng.set_stream(self.stream.fetch_add(1, Ordering::Relaxed));
        rng
    }

    /// Noise of raw deviation `raw_std` at `scale_bits`, expressed in slot units.
    fn slot_std(raw_std: f64, scale_bits: f64) -> f64 {
        raw_std / scale_bits.exp2()
    }

    fn inject(&self, slots: &mut [f64], std_dev: f64) {
        let mut rng = self.op_rng();
        add_gaussian_noise(&mut rng, slots, std_dev);
    }

    fn check_len(&self, ct: &TrackedCiphertext) -> Result<()> {
        if ct.slots.len() != self.params.SLOTS {
            return Err(MsrError::invariant(format!(
                "ciphertext has {} slots, context has {}",
                ct.slots.len(),
                self.params.SLOTS
            )));
        }
        Ok(())
    }

    /// The scaled message must stay below the modulus left at its level.
    fn check_modulus(&self, slots: &[f64], meta: &LevelScale) -> Result<()> {
        let max_abs = slots.iter().fold(0_f64, |acc, x| acc.max(x.abs()));
        let needed = meta.scale_bits + (max_abs + 1_f64).log2() + 1_f64;
        let available = self.params.modulus_bits(meta.level);
        if needed >= available {
            return Err(MsrError::invariant(format!(
                "message needs {needed:.1} bits but only {available:.1} remain at level {}",
                meta.level
            )));
        }
        Ok(())
    }

    fn finish(&self, slots: Vec<f64>, meta: LevelScale, noise: f64) -> Result<TrackedCiphertext> {
        self.check_modulus(&slots, &meta)?;
        Ok(TrackedCiphertext { slots, meta, noise })
    }

    /// Number of power-of-two rotation keys needed for a left rotation of `shift`.
    fn key_switch_hops(&self, shift: usize) -> u32 {
        if shift == 0 {
            return 0;
        }
        let forward = shift.count_ones();
        let backward = (self.params.SLOTS - shift).count_ones();
        forward.min(backward)
    }
}

impl HeContext for NoiseTracker {
    type Ciphertext = TrackedCiphertext;

    fn print_summary(&self) {
        eprintln!(
            "CKKS noise tracker: N = {}, {} slots",
            self.params.DEGREE, self.params.SLOTS
        );
        eprintln!("Parameters: {:#?}", self.params);
        eprintln!(
            "Modulus chain: {} bits ({} levels of {} bits)",
            self.params.MODULUS_BITS, self.params.MAX_LEVEL, self.params.SCALE_BITS
        );
    }

    fn slot_capacity(&self) -> usize {
        self.params.SLOTS
    }

    fn max_level(&self) -> usize {
        self.params.MAX_LEVEL
    }

    fn base_scale_bits(&self) -> f64 {
        self.params.SCALE_BITS
    }

    fn encrypt(&self, values: &[f64]) -> Result<Self::Ciphertext> {
        let mut slots = pad_slots(values, self.params.SLOTS)?;
        let meta = LevelScale::fresh(self.params.MAX_LEVEL, self.params.SCALE_BITS);
        let noise = Self::slot_std(self.params.FRESH_RAW_STD, meta.scale_bits);
        self.inject(&mut slots, noise);
        self.finish(slots, meta, noise)
    }

    fn decrypt(&self, ct: &Self::Ciphertext) -> Result<Vec<f64>> {
        self.check_len(ct)?;
        self.check_modulus(&ct.slots, &ct.meta)?;
        debug!(
            "decrypt at level {}, scale 2^{}, noise ~ 2^({:.1})",
            ct.meta.level,
            ct.meta.scale_bits,
            ct.noise.log2()
        );
        Ok(ct.slots.clone())
    }

    fn add(&self, lhs: &Self::Ciphertext, rhs: &Self::Ciphertext) -> Result<Self::Ciphertext> {
        self.check_len(lhs)?;
        self.check_len(rhs)?;
        let meta = lhs.meta.after_add(&rhs.meta)?;
        let slots = lhs
            .slots
            .iter()
            .zip(rhs.slots.iter())
            .map(|(a, b)| a + b)
            .collect();
        self.finish(slots, meta, lhs.noise.hypot(rhs.noise))
    }

    fn sub(&self, lhs: &Self::Ciphertext, rhs: &Self::Ciphertext) -> Result<Self::Ciphertext> {
        self.check_len(lhs)?;
        self.check_len(rhs)?;
        let meta = lhs.meta.after_add(&rhs.meta)?;
        let slots = lhs
            .slots
            .iter()
            .zip(rhs.slots.iter())
            .map(|(a, b)| a - b)
            .collect();
        self.finish(slots, meta, lhs.noise.hypot(rhs.noise))
    }

    fn mul_plain(&self, ct: &Self::Ciphertext, plain: &[f64]) -> Result<Self::Ciphertext> {
        self.check_len(ct)?;
        let plain = pad_slots(plain, self.params.SLOTS)?;
        let meta = ct.meta.after_mul_plain(self.params.SCALE_BITS);
        let mut slots: Vec<f64> = ct
            .slots
            .iter()
            .zip(plain.iter())
            .map(|(a, p)| a * p)
            .collect();
        // Encoding the plaintext rounds it at the base scale.
        let encode = Self::slot_std(self.params.ROUNDING_RAW_STD, self.params.SCALE_BITS);
        let max_msg = ct.slots.iter().fold(0_f64, |acc, x| acc.max(x.abs()));
        let max_plain = plain.iter().fold(0_f64, |acc, x| acc.max(x.abs()));
        let fresh = encode * max_msg;
        self.inject(&mut slots, fresh);
        self.finish(slots, meta, (ct.noise * max_plain).hypot(fresh))
    }

    fn mul(&self, lhs: &Self::Ciphertext, rhs: &Self::Ciphertext) -> Result<Self::Ciphertext> {
        self.check_len(lhs)?;
        self.check_len(rhs)?;
        let meta = lhs.meta.after_mul(&rhs.meta)?;
        let mut slots: Vec<f64> = lhs
            .slots
            .iter()
            .zip(rhs.slots.iter())
            .map(|(a, b)| a * b)
            .collect();
        // Relinearization is one key switch at the product's scale.
        let relin = Self::slot_std(self.params.KEY_SWITCH_RAW_STD, meta.scale_bits);
        self.inject(&mut slots, relin);
        let max_l = lhs.slots.iter().fold(0_f64, |acc, x| acc.max(x.abs()));
        let max_r = rhs.slots.iter().fold(0_f64, |acc, x| acc.max(x.abs()));
        let noise = (max_l * rhs.noise).hypot(max_r * lhs.noise).hypot(relin);
        self.finish(slots, meta, noise)
    }

    fn rotate(&self, ct: &Self::Ciphertext, by: i64) -> Result<Self::Ciphertext> {
        self.check_len(ct)?;
        let shift = left_rotation(by, self.params.SLOTS)?;
        let mut slots = rotate_slots(&ct.slots, by)?;
        let hops = self.key_switch_hops(shift);
        let fresh = Self::slot_std(self.params.KEY_SWITCH_RAW_STD, ct.meta.scale_bits)
            * (hops as f64).sqrt();
        self.inject(&mut slots, fresh);
        self.finish(slots, ct.meta, ct.noise.hypot(fresh))
    }

    fn rescale(&self, ct: &Self::Ciphertext) -> Result<Self::Ciphertext> {
        self.check_len(ct)?;
        let meta = ct.meta.after_rescale(self.params.SCALE_BITS)?;
        let mut slots = ct.slots.clone();
        let fresh = Self::slot_std(self.params.ROUNDING_RAW_STD, meta.scale_bits);
        self.inject(&mut slots, fresh);
        self.finish(slots, meta, ct.noise.hypot(fresh))
    }

    fn mod_switch(&self, ct: &Self::Ciphertext) -> Result<Self::Ciphertext> {
        self.check_len(ct)?;
        let meta = ct.meta.after_mod_switch()?;
        self.finish(ct.slots.clone(), meta, ct.noise)
    }

    fn level(&self, ct: &Self::Ciphertext) -> usize {
        ct.meta.level
    }

    fn scale_bits(&self, ct: &Self::Ciphertext) -> f64 {
        ct.meta.scale_bits
    }

    /// Rotate-and-add over `log2(slots)` power-of-two distances.
    fn cumulative_add(&self, ct: &Self::Ciphertext) -> Option<Result<Self::Ciphertext>> {
        let sum = (0..self.params.SLOTS.trailing_zeros()).try_fold(ct.clone(), |acc, i| {
            let rotated = self.rotate(&acc, 1_i64 << i)?;
            self.add(&acc, &rotated)
        });
        Some(sum)
    }

    fn noise_estimate(&self, ct: &Self::Ciphertext) -> Option<f64> {
        Some(ct.noise)
    }
}
