//! Selection, crossover and mutation over prompt templates

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::genome::{FewShotExample, FragmentKind, Genome, PromptTemplate};

/// Phrase pools mutation draws replacements from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationLibrary {
    pub instructions: Vec<String>,
    pub scaffolds: Vec<String>,
    pub output_formats: Vec<String>,
    pub examples: Vec<FewShotExample>,
    /// Cap on few-shot examples per template
    pub max_examples: usize,
}

impl Default for MutationLibrary {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            instructions: owned(&[
                "Solve the task completely and accurately.",
                "You are an expert assistant. Address every requirement in the task.",
                "Answer the task directly.",
                "Complete the task below, naming the key concepts explicitly.",
                "Respond to the task as a senior practitioner would.",
            ]),
            scaffolds: owned(&[
                "Think through the problem step by step before answering.",
                "List the key requirements first, then address each one.",
                "Identify the core question, then answer it.",
                "",
            ]),
            output_formats: owned(&[
                "Answer in concise prose.",
                "Use a short bulleted answer.",
                "Respond in one paragraph.",
                "Lead with the answer, then give supporting detail.",
            ]),
            examples: vec![
                FewShotExample::new(
                    "Summarize the benefits of caching",
                    "Caching lowers latency and reduces load on backing stores.",
                ),
                FewShotExample::new(
                    "Explain binary search",
                    "Binary search halves a sorted range each step until the target is found.",
                ),
                FewShotExample::new(
                    "Plan a database migration",
                    "Back up, migrate a replica, verify, then switch traffic with a rollback plan.",
                ),
            ],
            max_examples: 3,
        }
    }
}

impl MutationLibrary {
    pub fn validate(&self) -> Result<(), String> {
        if self.instructions.is_empty() {
            return Err("evolution.library.instructions must not be empty".to_string());
        }
        if self.output_formats.is_empty() {
            return Err("evolution.library.output_formats must not be empty".to_string());
        }
        Ok(())
    }
}

/// Tournament selection: draw `k` contenders with replacement, keep the fittest.
///
/// Unscored genomes lose to any scored one. Returns `None` for an empty
/// population.
pub fn tournament_select<'a, R: Rng + ?Sized>(
    population: &'a [Genome],
    k: usize,
    rng: &mut R,
) -> Option<&'a Genome> {
    if population.is_empty() {
        return None;
    }
    let mut best: Option<&Genome> = None;
    for _ in 0..k.max(1) {
        let contender = &population[rng.gen_range(0..population.len())];
        match best {
            Some(current) if contender.rank_key() <= current.rank_key() => {}
            _ => best = Some(contender),
        }
    }
    best
}

/// Fragment-wise uniform crossover
pub fn crossover<R: Rng + ?Sized>(
    a: &PromptTemplate,
    b: &PromptTemplate,
    rng: &mut R,
) -> PromptTemplate {
    let mut parent = || if rng.gen_bool(0.5) { a } else { b };
    PromptTemplate {
        instruction: parent().instruction.clone(),
        reasoning_scaffold: parent().reasoning_scaffold.clone(),
        output_format: parent().output_format.clone(),
        examples: parent().examples.clone(),
    }
}

/// Perturb one randomly chosen fragment, returning which one changed
pub fn mutate<R: Rng + ?Sized>(
    template: &PromptTemplate,
    library: &MutationLibrary,
    rng: &mut R,
) -> (PromptTemplate, FragmentKind) {
    let mut child = template.clone();
    let kind = FragmentKind::ALL[rng.gen_range(0..FragmentKind::ALL.len())];

    match kind {
        FragmentKind::Instruction => {
            reword(&mut child.instruction, &library.instructions, rng);
        }
        FragmentKind::ReasoningScaffold => {
            reword(&mut child.reasoning_scaffold, &library.scaffolds, rng);
        }
        FragmentKind::OutputFormat => {
            reword(&mut child.output_format, &library.output_formats, rng);
        }
        FragmentKind::Examples => mutate_examples(&mut child.examples, library, rng),
    }

    (child, kind)
}

/// Replace `slot` with a different phrase from `pool` when one exists
fn reword<R: Rng + ?Sized>(slot: &mut String, pool: &[String], rng: &mut R) {
    let candidates: Vec<&String> = pool.iter().filter(|p| p.as_str() != slot.as_str()).collect();
    if let Some(choice) = candidates.choose(rng) {
        *slot = (*choice).clone();
    }
}

fn mutate_examples<R: Rng + ?Sized>(
    examples: &mut Vec<FewShotExample>,
    library: &MutationLibrary,
    rng: &mut R,
) {
    let unused: Vec<&FewShotExample> = library
        .examples
        .iter()
        .filter(|e| !examples.contains(e))
        .collect();
    let can_add = !unused.is_empty() && examples.len() < library.max_examples;
    let can_swap = !unused.is_empty() && !examples.is_empty();
    let can_drop = !examples.is_empty();

    let mut ops = Vec::with_capacity(3);
    if can_add {
        ops.push(ExampleOp::Add);
    }
    if can_drop {
        ops.push(ExampleOp::Drop);
    }
    if can_swap {
        ops.push(ExampleOp::Swap);
    }

    let Some(op) = ops.choose(rng).copied() else {
        return;
    };
    match op {
        ExampleOp::Add => {
            if let Some(e) = unused.choose(rng) {
                examples.push((*e).clone());
            }
        }
        ExampleOp::Drop => {
            let index = rng.gen_range(0..examples.len());
            examples.remove(index);
        }
        ExampleOp::Swap => {
            let index = rng.gen_range(0..examples.len());
            if let Some(e) = unused.choose(rng) {
                examples[index] = (*e).clone();
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ExampleOp {
    Add,
    Drop,
    Swap,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::genome::{FitnessVector, FitnessWeights};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn scored(quality: f64) -> Genome {
        let mut genome = Genome::seed(PromptTemplate::default());
        genome.set_fitness(
            FitnessVector { quality, speed: quality, cost: quality },
            &FitnessWeights::default(),
        );
        genome
    }

    #[test]
    fn test_tournament_prefers_fitter() {
        let population = vec![scored(0.1), scored(0.9), scored(0.5)];
        let best_id = population[1].genome_id.clone();
        let mut rng = StdRng::seed_from_u64(42);

        let wins = (0..200)
            .filter(|_| tournament_select(&population, 3, &mut rng).unwrap().genome_id == best_id)
            .count();
        // P(best in a 3-draw tournament) = 1 - (2/3)^3 ≈ 0.70
        assert!(wins > 110, "best won {} of 200", wins);
        assert!(tournament_select(&[], 3, &mut rng).is_none());
    }

    #[test]
    fn test_tournament_full_size_always_finds_scored() {
        let population = vec![Genome::seed(PromptTemplate::default()), scored(0.2)];
        let mut rng = StdRng::seed_from_u64(1);
        let picked = tournament_select(&population, 64, &mut rng).unwrap();
        assert!(picked.is_scored());
    }

    #[test]
    fn test_crossover_fragments_come_from_parents() {
        let a = PromptTemplate::new("inst a", "scaffold a", "format a");
        let b = PromptTemplate::new("inst b", "scaffold b", "format b")
            .with_example(FewShotExample::new("x", "y"));
        let mut rng = StdRng::seed_from_u64(3);

        let mut mixed = false;
        for _ in 0..50 {
            let child = crossover(&a, &b, &mut rng);
            assert!(child.instruction == a.instruction || child.instruction == b.instruction);
            assert!(
                child.reasoning_scaffold == a.reasoning_scaffold
                    || child.reasoning_scaffold == b.reasoning_scaffold
            );
            assert!(child.output_format == a.output_format || child.output_format == b.output_format);
            assert!(child.examples == a.examples || child.examples == b.examples);
            if child != a && child != b {
                mixed = true;
            }
        }
        assert!(mixed);
    }

    #[test]
    fn test_mutate_changes_exactly_one_fragment() {
        let library = MutationLibrary::default();
        let template = PromptTemplate::default();
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..100 {
            let (child, kind) = mutate(&template, &library, &mut rng);
            let changed: Vec<FragmentKind> = FragmentKind::ALL
                .into_iter()
                .filter(|k| match k {
                    FragmentKind::Instruction => child.instruction != template.instruction,
                    FragmentKind::ReasoningScaffold => {
                        child.reasoning_scaffold != template.reasoning_scaffold
                    }
                    FragmentKind::OutputFormat => child.output_format != template.output_format,
                    FragmentKind::Examples => child.examples != template.examples,
                })
                .collect();
            assert_eq!(changed, vec![kind]);
        }
    }

    #[test]
    fn test_examples_respect_cap() {
        let library = MutationLibrary {
            max_examples: 2,
            ..Default::default()
        };
        let mut examples = Vec::new();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..200 {
            mutate_examples(&mut examples, &library, &mut rng);
            assert!(examples.len() <= 2);
        }
    }
}
