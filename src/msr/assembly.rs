//! Decryption and recombination of per-shard results.
//!
//! Row results are concatenated across shards and stripped of padding rows. Column and global
//! results computed with [`ShardCombine::Homomorphic`] are already global in every shard; those
//! computed with [`ShardCombine::PerShard`] are partials that are summed here, after decryption.
//! The decrypting party therefore sees each shard's contribution to the column and global MSR,
//! not only the totals. The row, column and data means feeding the residue never leave the
//! encrypted domain.

use log::debug;

use crate::error::{MsrError, Result};
use crate::he::he::HeContext;
use crate::math::matrix::PlainMatrix;
use crate::msr::broadcast::ShardCombine;
use crate::msr::msr::{MeanStatistics, ResidueStatistics};
use crate::msr::packing::{map_indexed, Shape, ShardedCiphertext};

/// Decrypted slots of every shard, checked against `shape`.
pub struct DecryptedShards<'a> {
    shape: &'a Shape,
    shards: Vec<Vec<f64>>,
}

impl<'a> DecryptedShards<'a> {
    pub fn decrypt<C: HeContext>(
        ctx: &C,
        x: &ShardedCiphertext<C::Ciphertext>,
        shape: &'a Shape,
        parallel: bool,
    ) -> Result<Self> {
        if x.len() != shape.shard_count {
            return Err(MsrError::invariant(format!(
                "{} shards to assemble, layout has {}",
                x.len(),
                shape.shard_count
            )));
        }
        if log::log_enabled!(log::Level::Debug) {
            for (i, ct) in x.shards().iter().enumerate() {
                if let Some(noise) = ctx.noise_estimate(ct) {
                    debug!(
                        "shard {i}: level {}, scale 2^{}, noise ~ {noise:e}",
                        ctx.level(ct),
                        ctx.scale_bits(ct)
                    );
                }
            }
        }
        let shards = map_indexed(x.shards(), parallel, |_, ct| ctx.decrypt(ct))?;
        Self::from_slots(shards, shape)
    }

    pub fn from_slots(shards: Vec<Vec<f64>>, shape: &'a Shape) -> Result<Self> {
        if shape.shard_count == 0 {
            return Err(MsrError::invariant("layout has no shards"));
        }
        if shards.len() != shape.shard_count {
            return Err(MsrError::invariant(format!(
                "{} shards to assemble, layout has {}",
                shards.len(),
                shape.shard_count
            )));
        }
        for (s, slots) in shards.iter().enumerate() {
            let valid = shape.valid_rows(s);
            if valid == 0 {
                return Err(MsrError::invariant(format!("shard {s} holds only padding")));
            }
            if slots.len() < valid * shape.cols {
                return Err(MsrError::invariant(format!(
                    "shard {s} decrypted to {} slots, needs {}",
                    slots.len(),
                    valid * shape.cols
                )));
            }
        }
        Ok(DecryptedShards { shape, shards })
    }

    /// Slot `r * cols` of every real row, in matrix row order.
    pub fn rows(&self) -> Result<Vec<f64>> {
        let cols = self.shape.cols;
        let mut values = Vec::with_capacity(self.shape.rows);
        for (s, slots) in self.shards.iter().enumerate() {
            values.extend((0..self.shape.valid_rows(s)).map(|r| slots[r * cols]));
        }
        if values.len() != self.shape.rows {
            return Err(MsrError::invariant(format!(
                "assembled {} row values for {} rows",
                values.len(),
                self.shape.rows
            )));
        }
        Ok(values)
    }

    /// The first `cols` slots, taken from shard 0 or summed over shards.
    pub fn cols(&self, combine: ShardCombine) -> Vec<f64> {
        let cols = self.shape.cols;
        match combine {
            ShardCombine::Homomorphic => self.shards[0][..cols].to_vec(),
            ShardCombine::PerShard => {
                let mut out = vec![0_f64; cols];
                for slots in &self.shards {
                    for (o, v) in out.iter_mut().zip(&slots[..cols]) {
                        *o += v;
                    }
                }
                out
            }
        }
    }

    /// Slot 0, taken from shard 0 or summed over shards.
    pub fn scalar(&self, combine: ShardCombine) -> f64 {
        match combine {
            ShardCombine::Homomorphic => self.shards[0][0],
            ShardCombine::PerShard => self.shards.iter().map(|slots| slots[0]).sum(),
        }
    }

    /// All real slots as a `rows x cols` matrix.
    pub fn matrix(&self) -> Result<PlainMatrix> {
        let cols = self.shape.cols;
        let mut data = Vec::with_capacity(self.shape.len());
        for (s, slots) in self.shards.iter().enumerate() {
            data.extend_from_slice(&slots[..self.shape.valid_rows(s) * cols]);
        }
        PlainMatrix::from_flat(self.shape.rows, cols, data)
    }
}

/// Row, column and data means, all three combined homomorphically.
pub fn assemble_means<C: HeContext>(
    ctx: &C,
    shape: &Shape,
    row_mean: &ShardedCiphertext<C::Ciphertext>,
    col_mean: &ShardedCiphertext<C::Ciphertext>,
    data_mean: &ShardedCiphertext<C::Ciphertext>,
    parallel: bool,
) -> Result<MeanStatistics> {
    let data = DecryptedShards::decrypt(ctx, data_mean, shape, parallel)?;
    let rows = DecryptedShards::decrypt(ctx, row_mean, shape, parallel)?;
    let cols = DecryptedShards::decrypt(ctx, col_mean, shape, parallel)?;
    Ok(MeanStatistics {
        data_mean: data.scalar(ShardCombine::Homomorphic),
        row_means: rows.rows()?,
        col_means: cols.cols(ShardCombine::Homomorphic),
    })
}

/// Row, column and global MSR, with column and global values combined as `combine` says.
pub fn assemble_statistics<C: HeContext>(
    ctx: &C,
    shape: &Shape,
    row_msr: &ShardedCiphertext<C::Ciphertext>,
    col_msr: &ShardedCiphertext<C::Ciphertext>,
    global_msr: &ShardedCiphertext<C::Ciphertext>,
    combine: ShardCombine,
    parallel: bool,
) -> Result<ResidueStatistics> {
    let global = DecryptedShards::decrypt(ctx, global_msr, shape, parallel)?;
    let rows = DecryptedShards::decrypt(ctx, row_msr, shape, parallel)?;
    let cols = DecryptedShards::decrypt(ctx, col_msr, shape, parallel)?;
    Ok(ResidueStatistics {
        global_msr: global.scalar(combine),
        row_msr: rows.rows()?,
        col_msr: cols.cols(combine),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rows_and_matrix() {
        // 3x2 in shards of 2 rows.
        let shape = Shape::new(3, 2, 4).unwrap();
        assert_eq!(shape.shard_count, 2);
        let shards = vec![
            vec![1_f64, 2_f64, 3_f64, 4_f64, 0_f64, 0_f64],
            vec![5_f64, 6_f64, 0_f64, 0_f64, 0_f64, 0_f64],
        ];
        let d = DecryptedShards::from_slots(shards, &shape).unwrap();
        assert_eq!(d.rows().unwrap(), vec![1_f64, 3_f64, 5_f64]);
        assert_eq!(
            d.matrix().unwrap().as_slice(),
            &[1_f64, 2_f64, 3_f64, 4_f64, 5_f64, 6_f64]
        );
    }

    #[test]
    fn test_combine() {
        let shape = Shape::new(3, 2, 4).unwrap();
        let shards = vec![
            vec![0.5, 1_f64, 9_f64, 9_f64],
            vec![0.25, 2_f64, 0_f64, 0_f64],
        ];
        let d = DecryptedShards::from_slots(shards, &shape).unwrap();
        assert_eq!(d.cols(ShardCombine::Homomorphic), vec![0.5, 1_f64]);
        assert_eq!(d.cols(ShardCombine::PerShard), vec![0.75, 3_f64]);
        assert_eq!(d.scalar(ShardCombine::Homomorphic), 0.5);
        assert_eq!(d.scalar(ShardCombine::PerShard), 0.75);
    }

    #[test]
    fn test_invariants() {
        let shape = Shape::new(3, 2, 4).unwrap();
        assert!(matches!(
            DecryptedShards::from_slots(vec![vec![0_f64; 4]], &shape),
            Err(MsrError::InvariantViolation(_))
        ));
        assert!(matches!(
            DecryptedShards::from_slots(vec![vec![0_f64; 4], vec![0_f64; 1]], &shape),
            Err(MsrError::InvariantViolation(_))
        ));

        // A layout claiming a third shard past the last row.
        let bad = Shape {
            shard_count: 3,
            ..shape
        };
        assert!(matches!(
            DecryptedShards::from_slots(vec![vec![0_f64; 4]; 3], &bad),
            Err(MsrError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_layout_without_shards() {
        let shape = Shape::new(3, 2, 4).unwrap();
        let empty = Shape {
            shard_count: 0,
            ..shape
        };
        assert!(matches!(
            DecryptedShards::from_slots(Vec::new(), &empty),
            Err(MsrError::InvariantViolation(_))
        ));
    }
}
