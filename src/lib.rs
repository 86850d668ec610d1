//! Mean squared residue statistics of a matrix kept under approximate homomorphic encryption.
//!
//! The engine in [`msr`] only uses the operations an [`he::he::HeContext`] exposes: addition,
//! plaintext multiplication, cyclic rotation and rescaling. Matrices larger than one ciphertext
//! are split into row shards.
pub mod error;
pub mod he;
pub mod math;
pub mod msr;
