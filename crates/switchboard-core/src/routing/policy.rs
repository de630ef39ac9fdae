//! Online bandit policy serving prompt genomes
//!
//! All arm state lives in one owned [`OnlineBanditPolicy`]. The arm table is
//! behind a read-write lock that is only written when arms are promoted or
//! retired; posterior updates take the per-arm mutex, so concurrent outcome
//! reports for different arms never contend and reports for the same arm are
//! applied one at a time.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::bandit::{ArmPosterior, ThompsonSampler};
use super::types::{
    ArmSelection, ArmStats, BanditArm, BanditConfig, Outcome, RewardUpdate, SelectionReason,
};
use crate::error::{Error, Result};

/// Thompson-sampling policy over live genomes
#[derive(Debug)]
pub struct OnlineBanditPolicy {
    config: BanditConfig,
    arms: RwLock<HashMap<String, Arc<Mutex<BanditArm>>>>,
    default_genome: RwLock<Option<String>>,
    sampler: Mutex<ThompsonSampler>,
}

impl OnlineBanditPolicy {
    pub fn new(config: BanditConfig) -> Self {
        let sampler = ThompsonSampler::from_seed(config.seed);
        Self {
            config,
            arms: RwLock::new(HashMap::new()),
            default_genome: RwLock::new(None),
            sampler: Mutex::new(sampler),
        }
    }

    pub fn config(&self) -> &BanditConfig {
        &self.config
    }

    pub async fn len(&self) -> usize {
        self.arms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.arms.read().await.is_empty()
    }

    pub async fn contains(&self, genome_id: &str) -> bool {
        self.arms.read().await.contains_key(genome_id)
    }

    pub async fn default_genome(&self) -> Option<String> {
        self.default_genome.read().await.clone()
    }

    /// Make a live arm the default genome
    pub async fn set_default(&self, genome_id: &str) -> Result<()> {
        let arms = self.arms.read().await;
        let arm = arms
            .get(genome_id)
            .ok_or_else(|| Error::GenomeNotFound(genome_id.to_string()))?;
        // the default always serves its full share
        arm.lock().await.traffic_fraction = 1.0;
        *self.default_genome.write().await = Some(genome_id.to_string());
        info!(genome = %genome_id, "Default genome set");
        Ok(())
    }

    /// Add a genome as a new arm with prior Beta(1, 1).
    ///
    /// The first arm becomes the default at full traffic; later arms start in
    /// rollout. At capacity the worst non-default arm is retired first.
    /// Returns `false` if the genome is already live.
    pub async fn promote(&self, genome_id: &str) -> Result<bool> {
        if genome_id.trim().is_empty() {
            return Err(Error::Validation("genome id is empty".to_string()));
        }

        let mut arms = self.arms.write().await;
        if arms.contains_key(genome_id) {
            return Ok(false);
        }

        let mut default = self.default_genome.write().await;

        if arms.len() >= self.config.max_arms {
            let victim = worst_arm(&arms, default.as_deref()).await;
            match victim {
                Some(victim) => {
                    arms.remove(&victim);
                    info!(genome = %victim, "Retired arm to make room for promotion");
                }
                None => {
                    return Err(Error::EvolutionFailed(format!(
                        "bandit is at capacity ({} arms) and no arm can be retired",
                        self.config.max_arms
                    )));
                }
            }
        }

        let fraction = if default.is_none() {
            1.0
        } else {
            self.config.rollout_initial_fraction
        };
        arms.insert(
            genome_id.to_string(),
            Arc::new(Mutex::new(BanditArm::new(genome_id, fraction))),
        );
        if default.is_none() {
            *default = Some(genome_id.to_string());
        }

        info!(
            genome = %genome_id,
            traffic_fraction = fraction,
            arms = arms.len(),
            "Promoted genome into bandit"
        );
        Ok(true)
    }

    /// Choose a genome for the next request
    pub async fn select(&self) -> Result<ArmSelection> {
        let default = self.default_genome().await;

        let posteriors = {
            let arms = self.arms.read().await;
            let mut ids: Vec<&String> = arms.keys().collect();
            ids.sort();
            let mut posteriors = Vec::with_capacity(ids.len());
            for id in ids {
                let arm = arms[id].lock().await;
                posteriors.push((
                    ArmPosterior {
                        id: id.clone(),
                        alpha: arm.alpha,
                        beta: arm.beta,
                    },
                    arm.traffic_fraction,
                ));
            }
            posteriors
        };

        let candidates: Vec<ArmPosterior> = posteriors.iter().map(|(p, _)| p.clone()).collect();

        let mut sampler = self.sampler.lock().await;
        let winner = sampler.select(&candidates);

        let Some((genome_id, sampled_value)) = winner else {
            drop(sampler);
            return match default {
                Some(default) => {
                    warn!(genome = %default, "Sampling produced no winner, serving default genome");
                    Ok(ArmSelection {
                        genome_id: default,
                        sampled_value: 0.0,
                        reason: SelectionReason::DefaultFallback,
                        fallback_used: true,
                    })
                }
                None => Err(Error::NoLiveArms),
            };
        };

        let fraction = posteriors
            .iter()
            .find(|(p, _)| p.id == genome_id)
            .map(|(_, f)| *f)
            .unwrap_or(1.0);

        if let Some(default) = default {
            if default != genome_id && fraction < 1.0 && sampler.uniform() >= fraction {
                debug!(
                    sampled = %genome_id,
                    served = %default,
                    traffic_fraction = fraction,
                    "Arm in rollout, diverting to default"
                );
                return Ok(ArmSelection {
                    genome_id: default,
                    sampled_value,
                    reason: SelectionReason::RolloutDiverted,
                    fallback_used: false,
                });
            }
        }

        debug!(genome = %genome_id, sample = sampled_value, "Selected arm");
        Ok(ArmSelection {
            genome_id,
            sampled_value,
            reason: SelectionReason::Sampled,
            fallback_used: false,
        })
    }

    /// Fold an observed outcome into the arm's posterior.
    ///
    /// Fallback outcomes are counted as discounted pulls but leave α/β
    /// untouched. After the update, an arm whose posterior mean fell under
    /// the floor is retired once it has enough pulls.
    pub async fn record_outcome(&self, outcome: &Outcome) -> Result<RewardUpdate> {
        let arm = {
            let arms = self.arms.read().await;
            arms.get(&outcome.genome_id)
                .cloned()
                .ok_or_else(|| Error::GenomeNotFound(outcome.genome_id.clone()))?
        };

        let reward = self.config.reward.compute_reward(outcome);
        let success = self.config.reward.is_success(reward);

        let should_retire = {
            let mut arm = arm.lock().await;
            arm.pulls += 1;

            if outcome.fallback_used {
                arm.discounted_pulls += 1;
            } else {
                arm.cumulative_reward += reward;
                if success {
                    arm.alpha += 1.0;
                } else {
                    arm.beta += 1.0;
                }
            }

            if arm.in_rollout() && arm.pulls % self.config.rollout_interval.max(1) == 0 {
                arm.traffic_fraction = (arm.traffic_fraction + self.config.rollout_step).min(1.0);
                debug!(
                    genome = %arm.genome_id,
                    traffic_fraction = arm.traffic_fraction,
                    "Rollout ramped"
                );
            }

            debug!(
                genome = %arm.genome_id,
                reward = reward,
                success = success,
                discounted = outcome.fallback_used,
                alpha = arm.alpha,
                beta = arm.beta,
                "Recorded outcome"
            );

            arm.pulls >= self.config.min_pulls_before_retire
                && arm.expected_value() < self.config.retire_floor
        };

        let retired = if should_retire {
            self.retire(&outcome.genome_id).await?
        } else {
            false
        };

        Ok(RewardUpdate {
            genome_id: outcome.genome_id.clone(),
            reward,
            success,
            counted: !outcome.fallback_used,
            retired,
        })
    }

    /// Remove an arm. The last arm is never removed; a retired default is
    /// replaced by the arm with the highest posterior mean.
    pub async fn retire(&self, genome_id: &str) -> Result<bool> {
        let mut arms = self.arms.write().await;
        if !arms.contains_key(genome_id) {
            return Err(Error::GenomeNotFound(genome_id.to_string()));
        }
        if arms.len() <= 1 {
            debug!(genome = %genome_id, "Not retiring the last live arm");
            return Ok(false);
        }

        arms.remove(genome_id);

        let mut default = self.default_genome.write().await;
        if default.as_deref() == Some(genome_id) {
            let replacement = best_arm(&arms).await;
            if let Some(id) = &replacement {
                if let Some(arm) = arms.get(id) {
                    arm.lock().await.traffic_fraction = 1.0;
                }
            }
            info!(
                retired = %genome_id,
                new_default = replacement.as_deref().unwrap_or("none"),
                "Default genome retired"
            );
            *default = replacement;
        } else {
            info!(genome = %genome_id, "Retired underperforming arm");
        }

        Ok(true)
    }

    /// Copy of every arm, sorted by genome id
    pub async fn arms_snapshot(&self) -> Vec<BanditArm> {
        let arms = self.arms.read().await;
        let mut snapshot = Vec::with_capacity(arms.len());
        for arm in arms.values() {
            snapshot.push(arm.lock().await.clone());
        }
        snapshot.sort_by(|a, b| a.genome_id.cmp(&b.genome_id));
        snapshot
    }

    /// Reporting projection of every arm
    pub async fn arm_stats(&self) -> Vec<ArmStats> {
        let default = self.default_genome().await;
        self.arms_snapshot()
            .await
            .iter()
            .map(|arm| ArmStats::from_arm(arm, default.as_deref() == Some(arm.genome_id.as_str())))
            .collect()
    }

    /// Replace the arm table, e.g. with state loaded from the store
    pub async fn import_arms(&self, arms: Vec<BanditArm>, default: Option<String>) {
        let mut table = self.arms.write().await;
        table.clear();
        for mut arm in arms {
            arm.enforce_prior_floor();
            table.insert(arm.genome_id.clone(), Arc::new(Mutex::new(arm)));
        }

        let default = match default {
            Some(id) if table.contains_key(&id) => Some(id),
            _ => best_arm(&table).await,
        };
        info!(
            arms = table.len(),
            default = default.as_deref().unwrap_or("none"),
            "Imported bandit arms"
        );
        *self.default_genome.write().await = default;
    }
}

/// Highest posterior mean, ties to the lowest id
async fn best_arm(arms: &HashMap<String, Arc<Mutex<BanditArm>>>) -> Option<String> {
    let mut best: Option<(String, f64)> = None;
    for (id, arm) in arms {
        let value = arm.lock().await.expected_value();
        let better = match &best {
            Some((best_id, best_value)) => {
                value > *best_value || (value == *best_value && id < best_id)
            }
            None => true,
        };
        if better {
            best = Some((id.clone(), value));
        }
    }
    best.map(|(id, _)| id)
}

/// Lowest posterior mean among non-default arms, ties to the highest id
async fn worst_arm(
    arms: &HashMap<String, Arc<Mutex<BanditArm>>>,
    default: Option<&str>,
) -> Option<String> {
    let mut worst: Option<(String, f64)> = None;
    for (id, arm) in arms {
        if Some(id.as_str()) == default {
            continue;
        }
        let value = arm.lock().await.expected_value();
        let worse = match &worst {
            Some((worst_id, worst_value)) => {
                value < *worst_value || (value == *worst_value && id > worst_id)
            }
            None => true,
        };
        if worse {
            worst = Some((id.clone(), value));
        }
    }
    worst.map(|(id, _)| id)
}
