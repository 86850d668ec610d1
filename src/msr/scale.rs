//! Rescaling and level alignment on top of an [`HeContext`].

use log::debug;

use crate::error::{MsrError, Result};
use crate::he::he::{HeContext, SCALE_TOLERANCE_BITS};
use crate::msr::packing::ShardedCiphertext;

/// Typed level/scale bookkeeping for the ciphertexts of one computation.
pub struct ScaleManager<'a, C: HeContext> {
    ctx: &'a C,
}

impl<'a, C: HeContext> ScaleManager<'a, C> {
    pub fn new(ctx: &'a C) -> Self {
        ScaleManager { ctx }
    }

    pub fn query_level(&self, ct: &C::Ciphertext) -> usize {
        self.ctx.level(ct)
    }

    pub fn query_scale_bits(&self, ct: &C::Ciphertext) -> f64 {
        self.ctx.scale_bits(ct)
    }

    /// Brings a product back to the base scale, consuming one level.
    pub fn rescale(&self, ct: &C::Ciphertext) -> Result<C::Ciphertext> {
        let level = self.ctx.level(ct);
        if level == 0 {
            return Err(MsrError::LevelExhausted {
                operation: "rescale",
                level,
            });
        }
        let excess = self.ctx.scale_bits(ct) - self.ctx.base_scale_bits();
        if excess <= SCALE_TOLERANCE_BITS {
            return Err(MsrError::invariant(format!(
                "rescaling a ciphertext already at the base scale 2^{}",
                self.ctx.base_scale_bits()
            )));
        }
        self.ctx.rescale(ct)
    }

    /// Drops `ct` to `level` without changing its scale.
    pub fn align_to(&self, ct: &C::Ciphertext, level: usize) -> Result<C::Ciphertext> {
        let current = self.ctx.level(ct);
        if current < level {
            return Err(MsrError::invariant(format!(
                "cannot raise a ciphertext from level {current} to {level}"
            )));
        }
        let mut out = ct.clone();
        for _ in level..current {
            out = self.ctx.mod_switch(&out)?;
        }
        Ok(out)
    }

    /// Rescales every shard.
    pub fn rescale_all(
        &self,
        x: &ShardedCiphertext<C::Ciphertext>,
        parallel: bool,
    ) -> Result<ShardedCiphertext<C::Ciphertext>> {
        x.try_map(parallel, |ct| self.rescale(ct))
    }

    pub fn align_all(
        &self,
        x: &ShardedCiphertext<C::Ciphertext>,
        level: usize,
        parallel: bool,
    ) -> Result<ShardedCiphertext<C::Ciphertext>> {
        x.try_map(parallel, |ct| self.align_to(ct, level))
    }

    /// Checks that every shard shares one level and scale, returning them.
    pub fn check_uniform(&self, x: &ShardedCiphertext<C::Ciphertext>) -> Result<(usize, f64)> {
        let first = x
            .shards()
            .first()
            .ok_or_else(|| MsrError::invariant("sharded ciphertext without shards"))?;
        let level = self.ctx.level(first);
        let scale_bits = self.ctx.scale_bits(first);
        for (i, ct) in x.shards().iter().enumerate().skip(1) {
            let (l, s) = (self.ctx.level(ct), self.ctx.scale_bits(ct));
            if l != level || (s - scale_bits).abs() > SCALE_TOLERANCE_BITS {
                return Err(MsrError::invariant(format!(
                    "shard {i} at level {l}, scale 2^{s}, differs from shard 0"
                )));
            }
        }
        debug!(
            "{} shard(s) at level {level}, scale 2^{scale_bits}",
            x.len()
        );
        Ok((level, scale_bits))
    }
}
