//! Fitness evaluation against the golden dataset

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::llm::{InferenceBackend, InferenceParams, RetryPolicy, call_with_retry};

use super::genome::{FitnessVector, FitnessWeights, Genome};
use super::golden::GoldenDataset;

/// Scores genomes by running every golden example through a backend
pub struct FitnessEvaluator {
    backend: Arc<dyn InferenceBackend>,
    dataset: Arc<GoldenDataset>,
    weights: FitnessWeights,
    retry: RetryPolicy,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    latency_budget_ms: u64,
    cost_budget_usd: f64,
    agent_id: String,
}

impl FitnessEvaluator {
    pub fn new(backend: Arc<dyn InferenceBackend>, dataset: GoldenDataset) -> Self {
        Self {
            backend,
            dataset: Arc::new(dataset),
            weights: FitnessWeights::default(),
            retry: RetryPolicy::default(),
            semaphore: Arc::new(Semaphore::new(4)),
            concurrency: 4,
            latency_budget_ms: 2000,
            cost_budget_usd: 0.01,
            agent_id: "generalist".to_string(),
        }
    }

    pub fn with_weights(mut self, weights: FitnessWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Maximum genomes evaluated at once
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        self.semaphore = Arc::new(Semaphore::new(concurrency));
        self.concurrency = concurrency;
        self
    }

    pub fn with_budgets(mut self, latency_budget_ms: u64, cost_budget_usd: f64) -> Self {
        self.latency_budget_ms = latency_budget_ms.max(1);
        self.cost_budget_usd = cost_budget_usd;
        self
    }

    /// Agent the evaluation calls are attributed to
    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    pub fn weights(&self) -> &FitnessWeights {
        &self.weights
    }

    pub fn dataset(&self) -> &GoldenDataset {
        &self.dataset
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn speed_score(&self, latency_ms: u64) -> f64 {
        1.0 / (1.0 + latency_ms as f64 / self.latency_budget_ms as f64)
    }

    fn cost_score(&self, cost_usd: f64) -> f64 {
        if self.cost_budget_usd <= 0.0 {
            return if cost_usd <= 0.0 { 1.0 } else { 0.0 };
        }
        1.0 / (1.0 + cost_usd.max(0.0) / self.cost_budget_usd)
    }

    /// Full pass of one genome over the dataset.
    ///
    /// A failing example contributes the worst-case vector; only
    /// cancellation aborts the pass.
    pub async fn evaluate_genome(
        &self,
        genome: &Genome,
        token: &CancellationToken,
    ) -> Result<FitnessVector> {
        if self.dataset.is_empty() {
            return Err(Error::EvolutionFailed(
                "golden dataset is empty".to_string(),
            ));
        }

        let params = InferenceParams::new(&self.agent_id);
        let mut scores = Vec::with_capacity(self.dataset.len());

        for example in &self.dataset.examples {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let prompt = genome.template.render(&example.input, &[]);
            let label = format!("evaluate:{}", example.id);
            let result = call_with_retry(&self.retry, token, &label, || {
                self.backend.execute(&prompt, &params)
            })
            .await;

            match result {
                Ok(output) => scores.push(FitnessVector {
                    quality: example.score(&output.text),
                    speed: self.speed_score(output.latency_ms),
                    cost: self.cost_score(output.cost_usd),
                }),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(
                        genome_id = %genome.short_id(),
                        example = %example.id,
                        error = %e,
                        "Golden example failed, scoring worst case"
                    );
                    scores.push(FitnessVector::WORST);
                }
            }
        }

        Ok(FitnessVector::mean(&scores))
    }

    /// Score every unscored genome in place, returning how many were scored.
    ///
    /// Genomes run concurrently up to the configured limit. Fitness is
    /// written only once a genome's full pass has completed.
    pub async fn evaluate_population(
        &self,
        population: &mut [Genome],
        token: &CancellationToken,
    ) -> Result<usize> {
        let pending: Vec<usize> = population
            .iter()
            .enumerate()
            .filter(|(_, g)| !g.is_scored())
            .map(|(i, _)| i)
            .collect();

        if pending.is_empty() {
            return Ok(0);
        }

        let passes = pending.iter().map(|&index| {
            let genome = &population[index];
            let semaphore = self.semaphore.clone();
            async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::EvolutionFailed(e.to_string()))?;
                let fitness = self.evaluate_genome(genome, token).await?;
                Ok::<_, Error>((index, fitness))
            }
        });

        let results = join_all(passes).await;

        let mut scored = Vec::with_capacity(results.len());
        for result in results {
            scored.push(result?);
        }

        for (index, fitness) in &scored {
            let genome = &mut population[*index];
            genome.set_fitness(*fitness, &self.weights);
            debug!(
                genome_id = %genome.short_id(),
                quality = fitness.quality,
                scalar = genome.scalar_fitness.unwrap_or_default(),
                "Genome evaluated"
            );
        }

        Ok(scored.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::genome::PromptTemplate;
    use crate::evolution::golden::GoldenExample;
    use crate::classify::TaskType;
    use crate::llm::{InferenceOutput, SimulatedBackend};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempt_timeout_ms: 1000,
            backoff_ms: 1,
            max_backoff_ms: 2,
            max_attempts: 2,
        }
    }

    /// Tracks the peak number of in-flight calls
    struct GaugeBackend {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl InferenceBackend for GaugeBackend {
        async fn execute(&self, prompt: &str, _params: &InferenceParams) -> Result<InferenceOutput> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(InferenceOutput {
                text: prompt.to_string(),
                latency_ms: 20,
                token_count: 10,
                cost_usd: 0.0,
                confidence: None,
            })
        }

        fn name(&self) -> &str {
            "gauge"
        }
    }

    fn population(n: usize) -> Vec<Genome> {
        (0..n).map(|_| Genome::seed(PromptTemplate::default())).collect()
    }

    #[tokio::test]
    async fn test_evaluates_only_unscored() {
        let evaluator = FitnessEvaluator::new(
            Arc::new(SimulatedBackend::new()),
            GoldenDataset::default(),
        )
        .with_retry(fast_retry());
        let token = CancellationToken::new();

        let mut genomes = population(3);
        genomes[0].set_fitness(FitnessVector::WORST, &FitnessWeights::default());

        let scored = evaluator.evaluate_population(&mut genomes, &token).await.unwrap();
        assert_eq!(scored, 2);
        assert_eq!(genomes[0].scalar_fitness, Some(0.0));
        assert!(genomes[1].scalar_fitness.unwrap() > 0.0);
        assert!(genomes.iter().all(|g| g.fitness.is_some()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let backend = Arc::new(GaugeBackend {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let evaluator = FitnessEvaluator::new(backend.clone(), GoldenDataset::default())
            .with_retry(fast_retry())
            .with_concurrency(2);
        let token = CancellationToken::new();

        let mut genomes = population(6);
        evaluator.evaluate_population(&mut genomes, &token).await.unwrap();

        assert!(backend.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(backend.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failing_backend_scores_worst_case() {
        let evaluator = FitnessEvaluator::new(
            Arc::new(SimulatedBackend::new().always_fail()),
            GoldenDataset::default(),
        )
        .with_retry(fast_retry());
        let token = CancellationToken::new();

        let mut genomes = population(1);
        evaluator.evaluate_population(&mut genomes, &token).await.unwrap();
        assert_eq!(genomes[0].fitness, Some(FitnessVector::WORST));
        assert_eq!(genomes[0].scalar_fitness, Some(0.0));
    }

    #[tokio::test]
    async fn test_cancelled_pass_leaves_fitness_unset() {
        let evaluator = FitnessEvaluator::new(
            Arc::new(SimulatedBackend::new()),
            GoldenDataset::default(),
        );
        let token = CancellationToken::new();
        token.cancel();

        let mut genomes = population(2);
        let err = evaluator.evaluate_population(&mut genomes, &token).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(genomes.iter().all(|g| !g.is_scored()));
    }

    #[tokio::test]
    async fn test_keyword_rich_template_scores_higher() {
        let dataset = GoldenDataset::new(vec![GoldenExample::new(
            "q",
            TaskType::CodeGeneration,
            "Implement quicksort with partition",
            &["quicksort", "partition"],
            "quicksort partition pivot",
        )]);
        let backend = Arc::new(SimulatedBackend::new().with_word_budget(6));
        let evaluator = FitnessEvaluator::new(backend, dataset).with_retry(fast_retry());
        let token = CancellationToken::new();

        let terse = Genome::seed(PromptTemplate::new("", "", ""));
        let verbose = Genome::seed(PromptTemplate::new(
            "Carefully consider every aspect of this particular request before writing anything",
            "",
            "",
        ));
        let terse_fit = evaluator.evaluate_genome(&terse, &token).await.unwrap();
        let verbose_fit = evaluator.evaluate_genome(&verbose, &token).await.unwrap();
        assert!(terse_fit.quality > verbose_fit.quality);
    }
}
