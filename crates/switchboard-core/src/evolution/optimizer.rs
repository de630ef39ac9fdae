//! Generational prompt optimizer
//!
//! Each step scores the unscored part of the population, records the
//! generation's statistics, then breeds the next population: elites carry
//! over with their fitness and the rest are tournament-selected children
//! produced by crossover and mutation.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::evaluator::FitnessEvaluator;
use super::genome::{FitnessWeights, Genome, PromptTemplate, default_seed_templates};
use super::operators::{MutationLibrary, crossover, mutate, tournament_select};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    pub population_size: usize,
    pub tournament_size: usize,
    pub elite_count: usize,
    pub mutation_rate: f64,
    pub crossover_rate: f64,
    pub max_generations: u32,
    /// Generations without improvement before stopping early
    pub patience: u32,
    pub evaluation_concurrency: usize,
    pub latency_budget_ms: u64,
    pub cost_budget_usd: f64,
    pub weights: FitnessWeights,
    pub library: MutationLibrary,
    /// Generation-zero templates; built-in seeds when empty
    pub seed_templates: Vec<PromptTemplate>,
    /// Genomes promoted to the bandit after a run
    pub promote_top: usize,
    pub seed: Option<u64>,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: 12,
            tournament_size: 3,
            elite_count: 1,
            mutation_rate: 0.3,
            crossover_rate: 0.8,
            max_generations: 10,
            patience: 3,
            evaluation_concurrency: 4,
            latency_budget_ms: 2000,
            cost_budget_usd: 0.01,
            weights: FitnessWeights::default(),
            library: MutationLibrary::default(),
            seed_templates: Vec::new(),
            promote_top: 3,
            seed: None,
        }
    }
}

impl EvolutionConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.population_size < 2 {
            return Err("evolution.population_size must be at least 2".to_string());
        }
        if self.elite_count == 0 || self.elite_count >= self.population_size {
            return Err(format!(
                "evolution.elite_count must be between 1 and {}",
                self.population_size - 1
            ));
        }
        if self.tournament_size == 0 {
            return Err("evolution.tournament_size must be at least 1".to_string());
        }
        for (name, rate) in [
            ("mutation_rate", self.mutation_rate),
            ("crossover_rate", self.crossover_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(format!("evolution.{} must be within [0, 1]", name));
            }
        }
        if self.evaluation_concurrency == 0 {
            return Err("evolution.evaluation_concurrency must be at least 1".to_string());
        }
        self.weights.validate()?;
        self.library.validate()
    }
}

/// Statistics of one evaluated generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub generation: u32,
    pub best_fitness: f64,
    pub mean_fitness: f64,
    pub best_genome_id: String,
    /// Genomes scored this generation
    pub evaluated: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionSummary {
    pub generations_run: u32,
    pub best_fitness: f64,
    pub best_genome_id: Option<String>,
    pub reports: Vec<GenerationReport>,
    pub stopped_early: bool,
    pub cancelled: bool,
}

pub struct EvolutionaryOptimizer {
    config: EvolutionConfig,
    evaluator: FitnessEvaluator,
    population: Vec<Genome>,
    /// Last scored population, fittest first
    ranked: Vec<Genome>,
    generation: u32,
    best_history: Vec<f64>,
    stale_generations: u32,
    rng: StdRng,
}

impl EvolutionaryOptimizer {
    pub fn new(config: EvolutionConfig, evaluator: FitnessEvaluator) -> Result<Self> {
        config.validate().map_err(Error::ConfigError)?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            config,
            evaluator,
            population: Vec::new(),
            ranked: Vec::new(),
            generation: 0,
            best_history: Vec::new(),
            stale_generations: 0,
            rng,
        })
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    /// Index of the next generation to be evaluated
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn population(&self) -> &[Genome] {
        &self.population
    }

    /// Best fitness after each evaluated generation; never decreases
    pub fn best_history(&self) -> &[f64] {
        &self.best_history
    }

    pub fn best_genome(&self) -> Option<&Genome> {
        self.ranked.first()
    }

    /// Mean scalar fitness of the last scored population
    pub fn mean_fitness(&self) -> Option<f64> {
        if self.ranked.is_empty() {
            return None;
        }
        let sum: f64 = self.ranked.iter().filter_map(|g| g.scalar_fitness).sum();
        Some(sum / self.ranked.len() as f64)
    }

    /// The `n` fittest scored genomes, best first
    pub fn top_genomes(&self, n: usize) -> Vec<Genome> {
        self.ranked.iter().take(n).cloned().collect()
    }

    /// Replace the population with generation zero
    pub fn seed_population(&mut self) {
        let seeds = if self.config.seed_templates.is_empty() {
            default_seed_templates()
        } else {
            self.config.seed_templates.clone()
        };

        let size = self.config.population_size;
        let mut population: Vec<Genome> = seeds
            .iter()
            .take(size)
            .cloned()
            .map(Genome::seed)
            .collect();

        let mut index = 0;
        while population.len() < size {
            let base = &seeds[index % seeds.len()];
            let (template, _) = mutate(base, &self.config.library, &mut self.rng);
            population.push(Genome::seed(template));
            index += 1;
        }

        debug!(size = population.len(), "Seeded population");
        self.population = population;
        self.ranked.clear();
        self.best_history.clear();
        self.generation = 0;
        self.stale_generations = 0;
    }

    /// Evaluate the current generation and breed the next one
    pub async fn step(&mut self, token: &CancellationToken) -> Result<GenerationReport> {
        if self.population.is_empty() {
            self.seed_population();
        }

        let evaluated = self
            .evaluator
            .evaluate_population(&mut self.population, token)
            .await?;

        let mut ranked = self.population.clone();
        ranked.sort_by(|a, b| {
            b.rank_key()
                .total_cmp(&a.rank_key())
                .then_with(|| a.genome_id.cmp(&b.genome_id))
        });

        let best = ranked
            .first()
            .ok_or_else(|| Error::EvolutionFailed("population is empty".to_string()))?;
        let best_fitness = best.rank_key().max(0.0);
        let mean_fitness =
            ranked.iter().filter_map(|g| g.scalar_fitness).sum::<f64>() / ranked.len() as f64;

        let previous = self.best_history.last().copied();
        match previous {
            Some(prev) if best_fitness <= prev + f64::EPSILON => self.stale_generations += 1,
            _ => self.stale_generations = 0,
        }
        self.best_history
            .push(previous.map_or(best_fitness, |prev| prev.max(best_fitness)));

        let report = GenerationReport {
            generation: self.generation,
            best_fitness,
            mean_fitness,
            best_genome_id: best.genome_id.clone(),
            evaluated,
        };

        info!(
            generation = report.generation,
            best = report.best_fitness,
            mean = report.mean_fitness,
            evaluated = report.evaluated,
            "Generation evaluated"
        );

        self.ranked = ranked;
        self.population = self.breed();
        self.generation += 1;

        Ok(report)
    }

    fn breed(&mut self) -> Vec<Genome> {
        let size = self.config.population_size;
        let next_generation = self.generation + 1;
        let mut next: Vec<Genome> = self
            .ranked
            .iter()
            .take(self.config.elite_count)
            .cloned()
            .collect();

        while next.len() < size {
            let Some(a) = tournament_select(&self.ranked, self.config.tournament_size, &mut self.rng)
            else {
                break;
            };

            let (mut template, mut parents) = if self.rng.gen_bool(self.config.crossover_rate) {
                match tournament_select(&self.ranked, self.config.tournament_size, &mut self.rng) {
                    Some(b) => (
                        crossover(&a.template, &b.template, &mut self.rng),
                        vec![a.genome_id.clone(), b.genome_id.clone()],
                    ),
                    None => (a.template.clone(), vec![a.genome_id.clone()]),
                }
            } else {
                (a.template.clone(), vec![a.genome_id.clone()])
            };
            parents.dedup();

            if self.rng.gen_bool(self.config.mutation_rate) {
                let (mutated, _) = mutate(&template, &self.config.library, &mut self.rng);
                template = mutated;
            }

            next.push(Genome::child(template, next_generation, parents));
        }

        next
    }

    /// Run up to `max_generations`, stopping early after `patience`
    /// generations without improvement or when `token` is cancelled
    pub async fn run(&mut self, token: &CancellationToken) -> Result<EvolutionSummary> {
        self.run_generations(self.config.max_generations, token).await
    }

    pub async fn run_generations(
        &mut self,
        generations: u32,
        token: &CancellationToken,
    ) -> Result<EvolutionSummary> {
        let mut reports = Vec::new();
        let mut stopped_early = false;
        let mut cancelled = false;

        for _ in 0..generations {
            if token.is_cancelled() {
                cancelled = true;
                break;
            }
            match self.step(token).await {
                Ok(report) => reports.push(report),
                Err(Error::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(e) => return Err(e),
            }
            if self.config.patience > 0 && self.stale_generations >= self.config.patience {
                info!(
                    generation = self.generation,
                    patience = self.config.patience,
                    "No improvement within patience, stopping early"
                );
                stopped_early = true;
                break;
            }
        }

        let best = self.best_genome();
        Ok(EvolutionSummary {
            generations_run: reports.len() as u32,
            best_fitness: best.map(Genome::rank_key).unwrap_or(0.0).max(0.0),
            best_genome_id: best.map(|g| g.genome_id.clone()),
            reports,
            stopped_early,
            cancelled,
        })
    }
}
