//! Homomorphic encryption contexts the statistics engine runs against.
pub mod he;
pub mod insecure;
pub mod noise_tracker;
