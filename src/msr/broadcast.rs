//! Means broadcast back onto the packed layout.
//!
//! A reduction is multiplied by a plaintext mask holding the reciprocal count at its meaningful
//! slots (this also clears the partial sums everywhere else), rescaled, and then spread with
//! [`broadcast_fold`] so that the mean sits in every slot of its row, column or the whole
//! matrix. Padding slots end up zero. Divisors are always the counts of the whole matrix, never
//! of a single shard.

use crate::error::{MsrError, Result};
use crate::he::he::HeContext;
use crate::msr::packing::{Shape, ShardedCiphertext};
use crate::msr::reduction::{
    col_sum, fold_shards, reduce_shards, row_sum, total_sum, TotalSumLayout, TotalSumStrategy,
};
use crate::msr::scale::ScaleManager;

/// How per-shard sums are combined before normalizing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShardCombine {
    /// Shard sums are added under encryption, so every shard carries the global mean.
    Homomorphic,
    /// Every shard carries its own sum divided by the global count. The partials add up to the
    /// global mean once decrypted.
    PerShard,
}

///
/// Computes `m + rot(m, -step) + rot(m, -2 step) + ...` with `copies` terms, i.e. copies the
/// content of `m` to `copies` positions `step` slots apart (towards higher slots).
///
pub fn broadcast_fold<C: HeContext>(
    ctx: &C,
    m: &C::Ciphertext,
    step: i64,
    copies: usize,
) -> Result<C::Ciphertext> {
    let mut acc = m.clone();
    for _ in 1..copies {
        acc = ctx.add(m, &ctx.rotate(&acc, -step)?)?;
    }
    Ok(acc)
}

/// `1 / cols` at the first slot of each real row of `shard`.
pub fn row_mask(shape: &Shape, shard: usize) -> Vec<f64> {
    let mut mask = vec![0_f64; shape.valid_rows(shard) * shape.cols];
    for r in 0..shape.valid_rows(shard) {
        mask[r * shape.cols] = 1_f64 / shape.cols as f64;
    }
    mask
}

/// `1 / rows` at the first `cols` slots.
pub fn col_mask(shape: &Shape) -> Vec<f64> {
    vec![1_f64 / shape.rows as f64; shape.cols]
}

/// `1 / (rows * cols)` at every real slot of `shard`.
pub fn data_mask(shape: &Shape, shard: usize) -> Vec<f64> {
    let len = shape.valid_rows(shard) * shape.cols;
    vec![1_f64 / shape.len() as f64; len]
}

/// Applies `finish` per shard, to the global sum or to each shard's own sum.
fn combine_shards<C, F>(
    ctx: &C,
    sums: &ShardedCiphertext<C::Ciphertext>,
    combine: ShardCombine,
    parallel: bool,
    finish: F,
) -> Result<ShardedCiphertext<C::Ciphertext>>
where
    C: HeContext,
    F: Fn(usize, &C::Ciphertext) -> Result<C::Ciphertext> + Sync + Send,
{
    match combine {
        ShardCombine::Homomorphic => {
            let total = fold_shards(ctx, sums)?;
            sums.try_map_indexed(parallel, |shard, _| finish(shard, &total))
        }
        ShardCombine::PerShard => sums.try_map_indexed(parallel, finish),
    }
}

/// Every slot of row `r` holds the mean of row `r`.
pub fn row_mean<C: HeContext>(
    ctx: &C,
    x: &ShardedCiphertext<C::Ciphertext>,
    shape: &Shape,
    parallel: bool,
) -> Result<ShardedCiphertext<C::Ciphertext>> {
    let sm = ScaleManager::new(ctx);
    x.try_map_indexed(parallel, |shard, ct| {
        let sums = row_sum(ctx, ct, shape)?;
        let means = sm.rescale(&ctx.mul_plain(&sums, &row_mask(shape, shard))?)?;
        broadcast_fold(ctx, &means, 1, shape.cols)
    })
}

/// Every slot of column `j` (within the real rows) holds the mean of column `j`.
pub fn col_mean<C: HeContext>(
    ctx: &C,
    x: &ShardedCiphertext<C::Ciphertext>,
    shape: &Shape,
    combine: ShardCombine,
    parallel: bool,
) -> Result<ShardedCiphertext<C::Ciphertext>> {
    let sm = ScaleManager::new(ctx);
    let sums = reduce_shards::<C, _>(x, parallel, |ct| col_sum(ctx, ct, shape))?;
    let mask = col_mask(shape);
    combine_shards(ctx, &sums, combine, parallel, |shard, sum| {
        let means = sm.rescale(&ctx.mul_plain(sum, &mask)?)?;
        broadcast_fold(ctx, &means, shape.cols as i64, shape.valid_rows(shard))
    })
}

/// Every real slot holds the mean of the whole matrix.
pub fn data_mean<C: HeContext>(
    ctx: &C,
    x: &ShardedCiphertext<C::Ciphertext>,
    shape: &Shape,
    combine: ShardCombine,
    strategy: TotalSumStrategy,
    parallel: bool,
) -> Result<ShardedCiphertext<C::Ciphertext>> {
    let sm = ScaleManager::new(ctx);
    let reduced = x
        .try_map(parallel, |ct| total_sum(ctx, ct, shape, strategy))?
        .into_shards();
    let layout = reduced
        .first()
        .map(|(_, layout)| *layout)
        .ok_or_else(|| MsrError::invariant("data mean of zero shards"))?;
    if reduced.iter().any(|(_, l)| *l != layout) {
        return Err(MsrError::invariant("shards reduced to mixed sum layouts"));
    }
    let sums = ShardedCiphertext::from_shards(reduced.into_iter().map(|(ct, _)| ct).collect());

    match layout {
        TotalSumLayout::Replicated => {
            combine_shards(ctx, &sums, combine, parallel, |shard, sum| {
                sm.rescale(&ctx.mul_plain(sum, &data_mask(shape, shard))?)
            })
        }
        TotalSumLayout::SlotZero => {
            let mask = [1_f64 / shape.len() as f64];
            combine_shards(ctx, &sums, combine, parallel, |shard, sum| {
                let mean = sm.rescale(&ctx.mul_plain(sum, &mask)?)?;
                let row = broadcast_fold(ctx, &mean, 1, shape.cols)?;
                broadcast_fold(ctx, &row, shape.cols as i64, shape.valid_rows(shard))
            })
        }
    }
}
