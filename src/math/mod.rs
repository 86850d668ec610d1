//! Math-related constructs.
pub mod matrix;
pub mod rand_sampled;
pub mod utils;
