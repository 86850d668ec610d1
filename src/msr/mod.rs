//! Encrypted mean squared residue (MSR) computation.
pub mod assembly;
pub mod broadcast;
pub mod engine;
pub mod harness;
pub mod msr;
pub mod oracle;
pub mod packing;
pub mod reduction;
pub mod scale;
