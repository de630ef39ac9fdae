//! Thompson sampling over Beta posteriors
//!
//! ## Algorithm Overview
//!
//! 1. Each arm keeps a Beta(α, β) posterior over its success probability
//! 2. Sample θ ~ Beta(α, β) for every arm
//! 3. Pick the arm with the highest sample
//! 4. On a success α += 1, on a failure β += 1
//!
//! Uncertain arms produce widely spread samples and so keep getting explored;
//! arms with a high posterior mean win most draws.

use rand::prelude::*;
use rand_distr::{Beta, Distribution};

/// Posterior parameters of one candidate arm
#[derive(Debug, Clone, PartialEq)]
pub struct ArmPosterior {
    pub id: String,
    pub alpha: f64,
    pub beta: f64,
}

/// Seedable Thompson sampler
#[derive(Debug)]
pub struct ThompsonSampler {
    rng: StdRng,
}

impl Default for ThompsonSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ThompsonSampler {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Fixed seed for reproducible draws
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::with_seed(seed),
            None => Self::new(),
        }
    }

    /// Draw θ ~ Beta(α, β); `None` when the parameters are invalid
    pub fn sample_beta(&mut self, alpha: f64, beta: f64) -> Option<f64> {
        if !(alpha > 0.0 && beta > 0.0) {
            return None;
        }
        Beta::new(alpha, beta)
            .ok()
            .map(|dist| dist.sample(&mut self.rng))
            .filter(|v| v.is_finite())
    }

    /// Uniform draw in [0, 1), used for rollout traffic splitting
    pub fn uniform(&mut self) -> f64 {
        self.rng.gen_range(0.0..1.0)
    }

    /// Sample every arm and return the winner with its sampled value.
    ///
    /// Arms whose posterior cannot be sampled are skipped. Exact ties keep
    /// the earlier arm, so callers pass arms in a stable order.
    pub fn select(&mut self, arms: &[ArmPosterior]) -> Option<(String, f64)> {
        let mut best: Option<(&ArmPosterior, f64)> = None;
        for arm in arms {
            let Some(sample) = self.sample_beta(arm.alpha, arm.beta) else {
                continue;
            };
            match best {
                Some((_, best_sample)) if sample <= best_sample => {}
                _ => best = Some((arm, sample)),
            }
        }
        best.map(|(arm, sample)| (arm.id.clone(), sample))
    }
}
