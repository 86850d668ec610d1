//! Error type shared by the contexts and the statistics engine.
//!
//! Every error is fatal to the call that raised it. They are all determined by the input shape,
//! the slot capacity and the depth budget, so nothing here is worth retrying.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MsrError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MsrError {
    /// A row (or a plaintext vector) does not fit into one ciphertext.
    #[error("{len} values do not fit into {slot_capacity} slots")]
    Capacity { len: usize, slot_capacity: usize },

    /// Degenerate matrix shape.
    #[error("matrix must have at least one row and one column, got {rows}x{cols}")]
    EmptyInput { rows: usize, cols: usize },

    /// The depth budget ran out before a required rescale or level drop.
    #[error("no level left for {operation} (ciphertext is at level {level})")]
    LevelExhausted {
        operation: &'static str,
        level: usize,
    },

    /// Shard or shape bookkeeping went inconsistent. Always a defect.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Rotation or shift distance that is not an integer or not smaller than the slot count.
    #[error("invalid distance {by} for {len} slots: {reason}")]
    TypeOrRange {
        by: f64,
        len: usize,
        reason: &'static str,
    },

    /// Ragged input rows or a selection that does not match the data.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// Unusable parameter value.
    #[error("invalid parameter {param}: {constraint}")]
    InvalidParameter {
        param: &'static str,
        constraint: String,
    },
}

impl MsrError {
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        MsrError::InvariantViolation(message.into())
    }
}
