// src/rng.rs
//! Seeded random vectors for numerical estimates
//!
//! Spectral estimates (power iteration on M⁻¹K) start from a random vector
//! so that the dominant mode almost surely has a non-zero component. The
//! seed is part of the configuration: the same seed gives the same start
//! vector, so estimates and therefore accepted/rejected time steps are
//! reproducible across runs and thread counts.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};

pub fn seed_rng_from_u64(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn get_normal_draw<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    StandardNormal.sample(rng)
}

/// Vector of `n` independent standard normal draws, normalized to unit length.
pub fn unit_normal_vector(seed: u64, n: usize) -> Vec<f64> {
    let mut rng = seed_rng_from_u64(seed);
    let mut v: Vec<f64> = (0..n).map(|_| get_normal_draw(&mut rng)).collect();
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_normal_vector_reproducible() {
        let a = unit_normal_vector(42, 100);
        let b = unit_normal_vector(42, 100);
        assert_eq!(a, b);
        assert_ne!(a, unit_normal_vector(43, 100));
        let norm: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-14);
    }

    #[test]
    fn test_normal_distribution() {
        let mut rng = seed_rng_from_u64(42);
        let samples: Vec<f64> = (0..10000).map(|_| get_normal_draw(&mut rng)).collect();

        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let variance =
            samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / samples.len() as f64;

        assert!(mean.abs() < 0.05, "Mean should be close to 0, got {}", mean);
        assert!((variance - 1.0).abs() < 0.05, "Variance should be close to 1, got {}", variance);
    }
}
