//! Traits for randomly sampling noise terms.
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;

/// Used for sampling elements with a centered gaussian distribution.
pub trait RandGaussianSampled: Sized {
    /// Sample an element with standard deviation `std_dev`.
    fn rand_gaussian<T: Rng>(rng: &mut T, std_dev: f64) -> Self;
}

impl RandGaussianSampled for f64 {
    fn rand_gaussian<T: Rng>(rng: &mut T, std_dev: f64) -> Self {
        debug_assert!(std_dev >= 0_f64, "invalid standard deviation {std_dev}");
        match Normal::new(0_f64, std_dev) {
            Ok(normal) => normal.sample(rng),
            // Only reachable with a non-finite deviation, which params reject.
            Err(_) => 0_f64,
        }
    }
}

/// Converts a gaussian width `s` given in millionths to the standard deviation `s / sqrt(2 pi)`.
pub fn width_to_std_dev(width_millionths: u64) -> f64 {
    width_millionths as f64 / 1_000_000_f64 / (2_f64 * PI).sqrt()
}

/// Adds independent gaussian noise of deviation `std_dev` to every entry of `values`.
pub fn add_gaussian_noise<T: Rng>(rng: &mut T, values: &mut [f64], std_dev: f64) {
    if std_dev == 0_f64 {
        return;
    }
    for v in values.iter_mut() {
        *v += f64::rand_gaussian(rng, std_dev);
    }
}
