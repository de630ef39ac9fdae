//! Switchboard CLI - adaptive task routing and prompt optimization

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use switchboard_core::agents::AgentSelector;
use switchboard_core::classify::{ComplexityClassifier, Task};
use switchboard_core::config::Config;
use switchboard_core::engine::{EngineStats, RoutingEngine, TaskResponse};
use switchboard_core::evolution::GoldenDataset;
use switchboard_core::llm::{HttpBackend, InferenceBackend, SimulatedBackend};
use switchboard_core::retrieval::{Document, HybridRetriever};
use switchboard_core::routing::{Outcome, PolicyStore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(author, version, about = "Adaptive task routing and prompt optimization", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a task (type and complexity)
    Classify {
        /// Task text
        text: String,
    },

    /// Show which agent and reasoning mode a task would get
    Route {
        /// Task text
        text: String,
    },

    /// Handle a task end to end
    Run {
        /// Task text
        text: String,
        /// Use the simulated backend even when an API key is configured
        #[arg(long)]
        offline: bool,
        /// JSON file of documents ([{"doc_id", "content"}]) to retrieve context from
        #[arg(short, long)]
        docs: Option<PathBuf>,
    },

    /// Evolve prompt templates and promote the best into serving
    Evolve {
        /// Generations to run (defaults to evolution.max_generations)
        #[arg(short, long)]
        generations: Option<u32>,
        /// Golden dataset JSON file (defaults to the built-in set)
        #[arg(long)]
        golden: Option<PathBuf>,
        /// Use the simulated backend even when an API key is configured
        #[arg(long)]
        offline: bool,
    },

    /// Report an externally judged outcome for a served genome
    Feedback {
        /// Genome ID from a previous run
        genome_id: String,
        /// Quality in [0, 1]
        #[arg(long)]
        quality: f64,
        #[arg(long, default_value_t = 0)]
        latency_ms: u64,
        #[arg(long, default_value_t = 0.0)]
        cost: f64,
    },

    /// Show evolution progress and live prompt arms
    Stats,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let level = if cli.quiet { "switchboard=warn" } else { "switchboard=info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.parse()?),
        )
        .init();

    let out = Output {
        format: cli.format,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Classify { text } => cmd_classify(&text, out),

        Commands::Route { text } => cmd_route(&text, out),

        Commands::Run {
            text,
            offline,
            docs,
        } => cmd_run(&text, offline, docs.as_deref(), out).await,

        Commands::Evolve {
            generations,
            golden,
            offline,
        } => cmd_evolve(generations, golden.as_deref(), offline, out).await,

        Commands::Feedback {
            genome_id,
            quality,
            latency_ms,
            cost,
        } => cmd_feedback(genome_id, quality, latency_ms, cost, out).await,

        Commands::Stats => cmd_stats(out).await,

        Commands::Config { action } => cmd_config(action, out.quiet),

        Commands::Doctor => cmd_doctor(out.quiet).await,
    }
}

#[derive(Clone, Copy)]
struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    fn print_json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

fn short_id(id: &str) -> &str {
    id.char_indices().nth(8).map_or(id, |(end, _)| &id[..end])
}

// ============================================================================
// Engine Setup
// ============================================================================

fn make_backend(config: &Config, offline: bool) -> anyhow::Result<Arc<dyn InferenceBackend>> {
    if offline {
        return Ok(Arc::new(SimulatedBackend::new()));
    }
    match config.llm.resolved_api_key()? {
        Some(key) => Ok(Arc::new(HttpBackend::new(config.llm.clone(), key)?)),
        None => {
            warn!("No API key configured, using the simulated backend");
            Ok(Arc::new(SimulatedBackend::new()))
        }
    }
}

async fn open_engine(
    config: Config,
    backend: Arc<dyn InferenceBackend>,
    retriever: Option<HybridRetriever>,
) -> anyhow::Result<RoutingEngine> {
    let db_path = Config::database_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = PolicyStore::connect(&db_path).await?;

    let mut builder = RoutingEngine::builder()
        .config(config)
        .backend(backend)
        .store(store);
    if let Some(retriever) = retriever {
        builder = builder.retriever(retriever);
    }
    let engine = builder.build()?;
    engine.bootstrap().await?;
    Ok(engine)
}

async fn load_retriever(path: &Path, config: &Config) -> anyhow::Result<HybridRetriever> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read documents {}: {}", path.display(), e))?;
    let docs: Vec<Document> = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Invalid documents file {}: {}", path.display(), e))?;
    info!(documents = docs.len(), "Indexing documents");
    Ok(HybridRetriever::in_memory(docs, config.retrieval.clone()).await?)
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing the current step");
            token.cancel();
        }
    });
}

// ============================================================================
// Command Implementations
// ============================================================================

fn cmd_classify(text: &str, out: Output) -> anyhow::Result<()> {
    let config = Config::load()?;
    let classification = ComplexityClassifier::new(config.classifier).classify(text);

    if out.json() {
        return out.print_json(&classification);
    }

    println!("Type:       {}", classification.task_type);
    println!("Complexity: {:.2}", classification.complexity_score);
    if !out.quiet {
        let signals = &classification.signals;
        println!("  Length:           {} chars", signals.length_chars);
        if !signals.technical_terms.is_empty() {
            println!("  Technical terms:  {}", signals.technical_terms.join(", "));
        }
        println!("  Compound markers: {}", signals.compound_markers);
    }
    Ok(())
}

#[derive(Serialize)]
struct RouteReport {
    task: Task,
    selection: switchboard_core::agents::SelectionResult,
}

fn cmd_route(text: &str, out: Output) -> anyhow::Result<()> {
    let config = Config::load()?;
    let classification = ComplexityClassifier::new(config.classifier.clone()).classify(text);
    let task = Task::new(text, &classification);
    let selection = AgentSelector::new(&config.selector)?.select(&task);

    if out.json() {
        return out.print_json(&RouteReport { task, selection });
    }

    println!("Agent: {} ({})", selection.agent_id, selection.mode);
    if !out.quiet {
        println!(
            "  Task: {} (complexity {:.2})",
            task.task_type, task.complexity_score
        );
        println!("  Score: {:.3}", selection.score);
        for reason in &selection.reasons {
            println!("    {:<32} {:+.3}", reason.rule, reason.weight);
        }
        if selection.fallback_used {
            println!("  (default agent - no profiles available)");
        }
    }
    Ok(())
}

async fn cmd_run(text: &str, offline: bool, docs: Option<&Path>, out: Output) -> anyhow::Result<()> {
    let config = Config::load()?;
    let backend = make_backend(&config, offline)?;
    let retriever = match docs {
        Some(path) => Some(load_retriever(path, &config).await?),
        None => None,
    };
    let engine = open_engine(config, backend, retriever).await?;

    let token = CancellationToken::new();
    cancel_on_ctrl_c(token.clone());
    let response = engine.handle_with_token(text, &token).await?;

    if out.json() {
        return out.print_json(&response);
    }
    print_response(&response, out.quiet);
    Ok(())
}

fn print_response(response: &TaskResponse, quiet: bool) {
    println!("{}", response.text);
    if quiet {
        return;
    }

    let meta = &response.metadata;
    println!();
    println!(
        "  Task:     {} (complexity {:.2})",
        meta.task_type, meta.complexity_score
    );
    println!("  Agent:    {} ({})", meta.agent_id, meta.mode);
    if meta.paths_attempted > 1 {
        println!(
            "  Paths:    {}/{} succeeded",
            meta.paths_succeeded, meta.paths_attempted
        );
    }
    println!("  Genome:   {} ({})", short_id(&meta.genome_id), meta.genome_reason);
    if !meta.context_doc_ids.is_empty() {
        let cached = if meta.retrieval_cache_hit { " (cached)" } else { "" };
        println!("  Context:  {}{}", meta.context_doc_ids.join(", "), cached);
    }
    println!(
        "  Usage:    {} ms, {} tokens, ${:.6}",
        meta.latency_ms, meta.token_count, meta.cost_usd
    );
    println!("  Quality:  {:.2}", meta.quality);
    if let Some(reward) = &meta.reward {
        println!(
            "  Reward:   {:.3}{}",
            reward.reward,
            if reward.counted { "" } else { " (discounted)" }
        );
    }
    if meta.deadline_hit {
        println!("  Deadline: exceeded, partial result");
    }
    if meta.fallback_used {
        println!("  Fallback: yes");
    }
}

async fn cmd_evolve(
    generations: Option<u32>,
    golden: Option<&Path>,
    offline: bool,
    out: Output,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let dataset = match golden {
        Some(path) => GoldenDataset::load(path)?,
        None => GoldenDataset::default(),
    };
    let backend = make_backend(&config, offline)?;
    let engine = open_engine(config, backend, None).await?;

    if !out.quiet && !out.json() {
        println!(
            "Evolving prompts against {} golden examples...",
            dataset.len()
        );
    }

    let token = CancellationToken::new();
    cancel_on_ctrl_c(token.clone());
    let outcome = engine.run_evolution(generations, dataset, &token).await?;

    if out.json() {
        return out.print_json(&outcome);
    }

    let summary = &outcome.summary;
    if !out.quiet {
        for report in &summary.reports {
            println!(
                "  Generation {:>3}: best {:.4}  mean {:.4}  ({} evaluated)",
                report.generation, report.best_fitness, report.mean_fitness, report.evaluated
            );
        }
        if summary.stopped_early {
            println!("Stopped early: no improvement within patience.");
        }
        if summary.cancelled {
            println!("Cancelled.");
        }
    }
    println!(
        "Ran {} generation(s), best fitness {:.4}",
        summary.generations_run, summary.best_fitness
    );
    if outcome.promoted.is_empty() {
        println!("No new genomes promoted.");
    } else {
        let ids: Vec<&str> = outcome.promoted.iter().map(|id| short_id(id)).collect();
        println!("Promoted: {}", ids.join(", "));
    }
    Ok(())
}

async fn cmd_feedback(
    genome_id: String,
    quality: f64,
    latency_ms: u64,
    cost_usd: f64,
    out: Output,
) -> anyhow::Result<()> {
    if !(0.0..=1.0).contains(&quality) {
        anyhow::bail!("--quality must be within [0, 1]");
    }
    let config = Config::load()?;
    let engine = open_engine(config, Arc::new(SimulatedBackend::new()), None).await?;

    let update = engine
        .record_feedback(&Outcome {
            genome_id,
            quality,
            latency_ms,
            cost_usd,
            fallback_used: false,
        })
        .await?;

    if out.json() {
        return out.print_json(&update);
    }
    if !out.quiet {
        println!(
            "Recorded reward {:.3} for {} ({})",
            update.reward,
            short_id(&update.genome_id),
            if update.success { "success" } else { "failure" }
        );
        if update.retired {
            println!("Genome retired: posterior fell below the floor.");
        }
    }
    Ok(())
}

async fn cmd_stats(out: Output) -> anyhow::Result<()> {
    let config = Config::load()?;
    let engine = open_engine(config, Arc::new(SimulatedBackend::new()), None).await?;
    let stats = engine.stats().await;

    if out.json() {
        return out.print_json(&stats);
    }
    print_stats(&stats, out.quiet);
    Ok(())
}

fn print_stats(stats: &EngineStats, quiet: bool) {
    let fmt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.4}", v));

    println!("Generations evolved: {}", stats.generation);
    println!("Best fitness:        {}", fmt(stats.best_fitness));
    println!("Mean fitness:        {}", fmt(stats.mean_fitness));
    println!("Live arms:           {}", stats.arms.len());
    if quiet {
        return;
    }

    println!();
    println!(
        "  {:<10} {:>7} {:>7} {:>8} {:>8} {:>8}",
        "GENOME", "PULLS", "FALLBK", "E[p]", "REWARD", "TRAFFIC"
    );
    for arm in &stats.arms {
        println!(
            "  {:<10} {:>7} {:>7} {:>8.3} {:>8.3} {:>7.0}%{}",
            short_id(&arm.genome_id),
            arm.pulls,
            arm.discounted_pulls,
            arm.expected_value,
            arm.mean_reward,
            arm.traffic_fraction * 100.0,
            if arm.is_default { "  (default)" } else { "" }
        );
    }
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(quiet: bool) -> anyhow::Result<()> {
    if !quiet {
        println!("Switchboard Health Check");
        println!("========================");
        println!();
    }

    let mut all_ok = true;

    match Config::load() {
        Ok(config) => {
            if !quiet {
                println!("[OK] Configuration: Valid");
            }

            match config.llm.resolved_api_key() {
                Ok(Some(_)) => {
                    if !quiet {
                        let redacted = config.llm.redacted_api_key()?.unwrap_or_default();
                        println!("[OK] API Key: Configured ({})", redacted);
                    }
                }
                Ok(None) => {
                    if !quiet {
                        println!("[--] API Key: Not configured (simulated backend will be used)");
                        println!(
                            "     Set SWITCHBOARD_API_KEY or OPENROUTER_API_KEY environment variable"
                        );
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] API Key: Error - {}", e);
                    }
                }
            }

            match open_engine(config, Arc::new(SimulatedBackend::new()), None).await {
                Ok(engine) => {
                    if !quiet {
                        println!(
                            "[OK] Policy store: {} live arm(s)",
                            engine.policy().len().await
                        );
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Policy store: Error - {}", e);
                    }
                }
            }
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Configuration: Error - {}", e);
            }
        }
    }

    if !quiet {
        match Config::config_path() {
            Ok(path) => {
                if path.exists() {
                    println!("[OK] Config file: {}", path.display());
                } else {
                    println!("[--] Config file: {} (using defaults)", path.display());
                }
            }
            Err(e) => println!("[!!] Config file: Error - {}", e),
        }
        if let Ok(path) = Config::database_path() {
            println!("[--] Database: {}", path.display());
        }
        println!();
        if all_ok {
            println!("All checks passed.");
        } else {
            println!("Some checks failed.");
        }
    }

    if !all_ok {
        anyhow::bail!("health check failed");
    }
    Ok(())
}
