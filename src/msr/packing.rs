//! Packing a row-major matrix into one or more ciphertexts.

use std::ops::Range;

use log::debug;
use rayon::prelude::*;

use crate::error::{MsrError, Result};
use crate::he::he::HeContext;
use crate::math::matrix::PlainMatrix;
use crate::math::utils::ceil_div;

///
/// Layout of a matrix across shards. Shard `s` holds rows `s * rows_per_shard ..` in row-major
/// order starting at slot 0, zero-padded up to the slot capacity. Only the last shard may hold
/// fewer than `rows_per_shard` rows, and no shard is entirely padding.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shape {
    pub rows: usize,
    pub cols: usize,
    pub shard_count: usize,
    pub rows_per_shard: usize,
    pub slot_capacity: usize,
}

impl Shape {
    pub fn new(rows: usize, cols: usize, slot_capacity: usize) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(MsrError::EmptyInput { rows, cols });
        }
        if slot_capacity == 0 {
            return Err(MsrError::InvalidParameter {
                param: "slot_capacity",
                constraint: "must be positive".to_string(),
            });
        }
        if cols > slot_capacity {
            return Err(MsrError::Capacity {
                len: cols,
                slot_capacity,
            });
        }

        // Start from the volume bound and add shards until whole rows fit. Terminates at
        // `rows` shards at the latest since one row fits.
        let mut shard_count = ceil_div(rows * cols, slot_capacity);
        while ceil_div(rows, shard_count) * cols > slot_capacity {
            shard_count += 1;
        }
        let rows_per_shard = ceil_div(rows, shard_count);
        let shard_count = ceil_div(rows, rows_per_shard);

        Ok(Shape {
            rows,
            cols,
            shard_count,
            rows_per_shard,
            slot_capacity,
        })
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_sharded(&self) -> bool {
        self.shard_count > 1
    }

    /// Matrix rows held by `shard`.
    pub fn shard_rows(&self, shard: usize) -> Range<usize> {
        let start = (shard * self.rows_per_shard).min(self.rows);
        let end = (start + self.rows_per_shard).min(self.rows);
        start..end
    }

    /// Number of real (non-padding) rows in `shard`.
    pub fn valid_rows(&self, shard: usize) -> usize {
        self.shard_rows(shard).len()
    }
}

/// One ciphertext per shard, in row order.
#[derive(Clone, Debug)]
pub struct ShardedCiphertext<Ct> {
    shards: Vec<Ct>,
}

impl<Ct: Send + Sync> ShardedCiphertext<Ct> {
    pub fn from_shards(shards: Vec<Ct>) -> Self {
        ShardedCiphertext { shards }
    }

    pub fn shards(&self) -> &[Ct] {
        &self.shards
    }

    pub fn into_shards(self) -> Vec<Ct> {
        self.shards
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Applies `f(shard_index, shard)` to every shard, in parallel if requested.
    pub fn try_map_indexed<U, F>(&self, parallel: bool, f: F) -> Result<ShardedCiphertext<U>>
    where
        U: Send + Sync,
        F: Fn(usize, &Ct) -> Result<U> + Sync + Send,
    {
        Ok(ShardedCiphertext {
            shards: map_indexed(&self.shards, parallel, f)?,
        })
    }

    pub fn try_map<U, F>(&self, parallel: bool, f: F) -> Result<ShardedCiphertext<U>>
    where
        U: Send + Sync,
        F: Fn(&Ct) -> Result<U> + Sync + Send,
    {
        self.try_map_indexed(parallel, |_, ct| f(ct))
    }

    /// Combines matching shards of `self` and `other`.
    pub fn try_zip_map<U, F>(
        &self,
        other: &ShardedCiphertext<Ct>,
        parallel: bool,
        f: F,
    ) -> Result<ShardedCiphertext<U>>
    where
        U: Send + Sync,
        F: Fn(&Ct, &Ct) -> Result<U> + Sync + Send,
    {
        if self.len() != other.len() {
            return Err(MsrError::invariant(format!(
                "combining {} shards with {} shards",
                self.len(),
                other.len()
            )));
        }
        self.try_map_indexed(parallel, |i, ct| f(ct, &other.shards[i]))
    }
}

/// Maps `f` over `items` with their indices, collecting the first error.
pub(crate) fn map_indexed<T, U, F>(items: &[T], parallel: bool, f: F) -> Result<Vec<U>>
where
    T: Sync,
    U: Send,
    F: Fn(usize, &T) -> Result<U> + Sync + Send,
{
    if parallel {
        items
            .par_iter()
            .enumerate()
            .map(|(i, item)| f(i, item))
            .collect()
    } else {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| f(i, item))
            .collect()
    }
}

///
/// Encrypts `matrix` into as few ciphertexts as possible, each using at most `slot_capacity`
/// slots. `slot_capacity` may be smaller than the context's to force sharding.
///
pub fn pack<C: HeContext>(
    ctx: &C,
    matrix: &PlainMatrix,
    slot_capacity: usize,
    parallel: bool,
) -> Result<(ShardedCiphertext<C::Ciphertext>, Shape)> {
    if slot_capacity > ctx.slot_capacity() {
        return Err(MsrError::InvalidParameter {
            param: "slot_capacity",
            constraint: format!(
                "at most the context's {} slots, got {slot_capacity}",
                ctx.slot_capacity()
            ),
        });
    }
    let shape = Shape::new(matrix.rows(), matrix.cols(), slot_capacity)?;
    debug!(
        "packing {}x{} into {} shard(s) of {} rows",
        shape.rows, shape.cols, shape.shard_count, shape.rows_per_shard
    );

    let shard_ids: Vec<usize> = (0..shape.shard_count).collect();
    let shards = map_indexed(&shard_ids, parallel, |_, &shard| {
        let rows = shape.shard_rows(shard);
        ctx.encrypt(matrix.row_block(rows.start, rows.end))
    })?;
    Ok((ShardedCiphertext::from_shards(shards), shape))
}
