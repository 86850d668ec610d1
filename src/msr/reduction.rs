//! Sums along rows, columns and the whole matrix using only rotations and additions.
//!
//! Every reduction works shard by shard on the packed layout (see
//! [`Shape`](crate::msr::packing::Shape)). Only a few slots of each result are meaningful:
//!
//! * [`row_sum`]: slot `r * cols` holds the sum of row `r` of the shard.
//! * [`col_sum`]: slot `j < cols` holds the sum of column `j` over the shard's rows.
//! * [`total_sum`]: see [`TotalSumLayout`].
//!
//! The remaining slots hold partial sums and must be masked out by the caller.

use crate::error::{MsrError, Result};
use crate::he::he::HeContext;
use crate::msr::packing::{Shape, ShardedCiphertext};

/// How the full sum is computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TotalSumStrategy {
    /// The context's cumulative add if it has one, otherwise [`TotalSumStrategy::Composed`].
    Native,
    /// Row sum followed by column sum.
    Composed,
}

/// Where the full sum lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TotalSumLayout {
    /// Every slot holds the sum.
    Replicated,
    /// Only slot 0 holds the sum.
    SlotZero,
}

/// `x + rot(x, step) + rot(x, 2 step) + ... ` with `terms` terms in total.
fn rotate_accumulate<C: HeContext>(
    ctx: &C,
    ct: &C::Ciphertext,
    step: i64,
    terms: usize,
) -> Result<C::Ciphertext> {
    let mut acc = ct.clone();
    let mut rotated = ct.clone();
    for _ in 1..terms {
        rotated = ctx.rotate(&rotated, step)?;
        acc = ctx.add(&acc, &rotated)?;
    }
    Ok(acc)
}

pub fn row_sum<C: HeContext>(ctx: &C, ct: &C::Ciphertext, shape: &Shape) -> Result<C::Ciphertext> {
    rotate_accumulate(ctx, ct, 1, shape.cols)
}

pub fn col_sum<C: HeContext>(ctx: &C, ct: &C::Ciphertext, shape: &Shape) -> Result<C::Ciphertext> {
    rotate_accumulate(ctx, ct, shape.cols as i64, shape.rows_per_shard)
}

pub fn total_sum<C: HeContext>(
    ctx: &C,
    ct: &C::Ciphertext,
    shape: &Shape,
    strategy: TotalSumStrategy,
) -> Result<(C::Ciphertext, TotalSumLayout)> {
    if strategy == TotalSumStrategy::Native {
        if let Some(sum) = ctx.cumulative_add(ct) {
            return Ok((sum?, TotalSumLayout::Replicated));
        }
    }
    let rows = row_sum(ctx, ct, shape)?;
    Ok((col_sum(ctx, &rows, shape)?, TotalSumLayout::SlotZero))
}

/// Applies `reduce` to every shard.
pub fn reduce_shards<C, F>(
    x: &ShardedCiphertext<C::Ciphertext>,
    parallel: bool,
    reduce: F,
) -> Result<ShardedCiphertext<C::Ciphertext>>
where
    C: HeContext,
    F: Fn(&C::Ciphertext) -> Result<C::Ciphertext> + Sync + Send,
{
    x.try_map(parallel, reduce)
}

/// Homomorphic sum of one ciphertext per shard.
pub fn fold_shards<C: HeContext>(
    ctx: &C,
    x: &ShardedCiphertext<C::Ciphertext>,
) -> Result<C::Ciphertext> {
    let (first, rest) = x
        .shards()
        .split_first()
        .ok_or_else(|| MsrError::invariant("folding zero shards"))?;
    rest.iter()
        .try_fold(first.clone(), |acc, ct| ctx.add(&acc, ct))
}
