mod config;
mod llm;
mod output;
mod parse;
mod prompt;

use clap::Parser;
use photojudge_core::constants::{
    DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_MAX_COMBINATIONS, DEFAULT_MAX_PARALLEL, DEFAULT_MAX_SETS_TO_EVALUATE,
    DEFAULT_MEMORY_THRESHOLD_MB, DEFAULT_PARALLEL, DEFAULT_PRE_FILTER_TOP_N, DEFAULT_TIMEOUT_SECS, MAX_TIMEOUT_SECS,
    MIN_TIMEOUT_SECS,
};
use photojudge_core::{
    aggregate_set_scores, build_ranking, compare_sets, generate_tiers, rank_sets, select_candidate_sets, BatchDriver,
    BatchError, BatchOptions, CompetitionConfig, CompositeWeights, ConcurrencyController, ControllerConfig,
    ScorerError, SelectionOptions, SetResult, SetScorer, SignatureValidator,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{PhotojudgeConfig, COMPETITION_FILENAME};
use crate::llm::{LlmConfig, VisionClient};
use crate::output::{AnalysisResults, RESULTS_FILENAME};

/// Exit code when the scoring backend went away mid-run.
const EXIT_BACKEND_UNREACHABLE: i32 = 2;

pub fn bail(msg: impl std::fmt::Display) -> ! {
    eprintln!("Error: {msg}");
    std::process::exit(1);
}

#[derive(Parser)]
#[command(name = "photojudge", version, about = "Judge competition photos with a vision LLM")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Score every photo in a project, resuming an interrupted run
    Analyze(AnalyzeArgs),
    /// Pick and evaluate exhibition sets from analyzed photos
    Sets(SetsArgs),
    /// Create a default config file at ~/.config/photojudge/config.toml
    /// (and a competition.toml when --project is given)
    Init(InitArgs),
}

#[derive(clap::Args)]
struct LlmArgs {
    /// OpenAI-compatible base URL (e.g. http://localhost:8000)
    #[arg(long)]
    endpoint: Option<String>,

    /// Bearer token for the API
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Vision model ID
    #[arg(long)]
    model: Option<String>,

    /// Per-photo timeout in seconds (30-300). Default: 60.
    #[arg(long)]
    timeout: Option<u64>,

    /// Max retries per request on HTTP errors. Default: 2. Set to 0 to disable.
    #[arg(long)]
    retries: Option<usize>,

    /// Path to config file (default: ~/.config/photojudge/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long)]
    verbose: bool,

    /// Output JSON instead of tables
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct AnalyzeArgs {
    /// Project directory: holds competition.toml, the checkpoint and results.json
    #[arg(long)]
    project: PathBuf,

    /// Photo directory (default: the project directory)
    #[arg(long)]
    photos: Option<PathBuf>,

    /// Competition config (default: <project>/competition.toml)
    #[arg(long)]
    competition: Option<PathBuf>,

    /// Concurrent scoring requests. Default: 3.
    #[arg(long)]
    parallel: Option<usize>,

    /// Ceiling for --auto-scale. Default: 6.
    #[arg(long)]
    max_parallel: Option<usize>,

    /// Adapt concurrency to observed latency and memory use
    #[arg(long)]
    auto_scale: bool,

    /// Photos per checkpoint save (1-50). Default: 10.
    #[arg(long)]
    checkpoint_interval: Option<usize>,

    /// Ignore any checkpoint and start over
    #[arg(long)]
    fresh: bool,

    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Parser)]
struct SetsArgs {
    /// Project directory containing results.json from `analyze`
    #[arg(long)]
    project: PathBuf,

    /// Competition config (default: <project>/competition.toml)
    #[arg(long)]
    competition: Option<PathBuf>,

    /// Photos per set (default: set_mode.set_size from the competition)
    #[arg(long)]
    set_size: Option<usize>,

    /// Candidate sets sent to the model. Default: 10.
    #[arg(long)]
    max_sets: Option<usize>,

    /// Only the N best photos are combined. Default: 12.
    #[arg(long)]
    top_n: Option<usize>,

    /// Refuse to enumerate more than this many combinations. Default: 10000.
    #[arg(long)]
    max_combinations: Option<u64>,

    /// Concurrent set evaluations. Default: 3.
    #[arg(long)]
    parallel: Option<usize>,

    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Parser)]
struct InitArgs {
    /// Also write a starter competition.toml into this directory
    #[arg(long)]
    project: Option<PathBuf>,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze(args) => {
            init_tracing(args.llm.verbose);
            run_analyze(args).await
        }
        Commands::Sets(args) => {
            init_tracing(args.llm.verbose);
            run_sets(args).await
        }
        Commands::Init(args) => {
            let path = config::create_default_config();
            println!("Created config at {}", path.display());
            println!("Edit it to set your default endpoint, model, etc.");
            if let Some(project) = args.project {
                let path = config::create_competition_template(&project);
                println!("Created competition config at {}", path.display());
            }
        }
    }
}

/// Settings resolved from CLI flags, then the config file, then defaults.
struct Resolved {
    cfg: PhotojudgeConfig,
    llm: LlmConfig,
    timeout: Duration,
}

fn resolve(args: &LlmArgs) -> Resolved {
    let config_path = args.config.clone().unwrap_or_else(config::config_path);
    let cfg = config::load_config(&config_path);

    let endpoint = args.endpoint.clone().or(cfg.endpoint.clone()).unwrap_or_else(|| {
        bail(format!("No endpoint specified. Pass --endpoint or set it in {}", config_path.display()));
    });
    let model = args.model.clone().or(cfg.model.clone()).unwrap_or_else(|| {
        bail(format!("No model specified. Pass --model or set it in {}", config_path.display()));
    });

    let timeout_secs = args.timeout.or(cfg.timeout_secs).unwrap_or(DEFAULT_TIMEOUT_SECS);
    if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&timeout_secs) {
        eprintln!(
            "Warning: --timeout {timeout_secs} is outside {MIN_TIMEOUT_SECS}-{MAX_TIMEOUT_SECS}s and will be clamped."
        );
    }

    let llm = LlmConfig {
        endpoint,
        model,
        api_key: args.api_key.clone(),
        temperature: cfg.temperature.unwrap_or(0.2),
        max_retries: args.retries.or(cfg.retries).unwrap_or(2),
    };
    Resolved {
        cfg,
        llm,
        timeout: Duration::from_secs(timeout_secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS)),
    }
}

fn load_project_competition(project: &Path, explicit: Option<&PathBuf>) -> CompetitionConfig {
    let path = explicit.cloned().unwrap_or_else(|| project.join(COMPETITION_FILENAME));
    config::load_competition(&path)
}

/// Which command lost the backend. Only `analyze` has a checkpoint to resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupted {
    Analyze,
    Sets,
}

fn unreachable_hint(command: Interrupted) -> &'static str {
    match command {
        Interrupted::Analyze => "Progress is saved. Re-run the same command once the endpoint is reachable to resume.",
        Interrupted::Sets => "No set results were produced. Re-run `photojudge sets` once the endpoint is reachable.",
    }
}

fn exit_backend_unreachable(command: Interrupted, message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {message}");
    eprintln!("{}", unreachable_hint(command));
    std::process::exit(EXIT_BACKEND_UNREACHABLE);
}

async fn run_analyze(args: AnalyzeArgs) {
    if !args.project.is_dir() {
        bail(format!("Project directory {} does not exist", args.project.display()));
    }
    let resolved = resolve(&args.llm);
    let cfg = &resolved.cfg;
    let competition = load_project_competition(&args.project, args.competition.as_ref());
    let photo_dir = args.photos.clone().unwrap_or_else(|| args.project.clone());

    let parallel = args.parallel.or(cfg.parallel).unwrap_or(DEFAULT_PARALLEL);
    if parallel == 0 {
        bail("--parallel must be at least 1");
    }
    let controller = ConcurrencyController::new(ControllerConfig {
        initial_slots: parallel,
        max_slots: args.max_parallel.or(cfg.max_parallel).unwrap_or(DEFAULT_MAX_PARALLEL).max(parallel),
        auto_scale: args.auto_scale || cfg.auto_scale.unwrap_or(false),
        memory_threshold_mb: cfg.memory_threshold_mb.unwrap_or(DEFAULT_MEMORY_THRESHOLD_MB),
    });

    let criteria_prompt = prompt::build_criteria_prompt(&competition);
    let client = Arc::new(VisionClient::new(resolved.llm, competition.criteria.clone(), Vec::new()));
    let driver = BatchDriver::new(client, Arc::new(SignatureValidator), controller);

    let mut options = BatchOptions::new(&args.project, &photo_dir);
    options.checkpoint_interval = args
        .checkpoint_interval
        .or(cfg.checkpoint_interval)
        .unwrap_or(DEFAULT_CHECKPOINT_INTERVAL);
    options.timeout = resolved.timeout;
    options.fresh = args.fresh;

    let outcome = match driver.run(&competition, &criteria_prompt, options).await {
        Ok(outcome) => outcome,
        Err(e @ BatchError::BackendUnreachable { .. }) => {
            if e.is_resumable() {
                exit_backend_unreachable(Interrupted::Analyze, e)
            }
            bail(format!("{e} (checkpoint could not be saved)"))
        }
        Err(e) => bail(e),
    };

    let report = generate_tiers(&outcome.scores, None);
    let ranking = build_ranking(&report);
    let results = AnalysisResults {
        competition: &competition.name,
        photo_dir: &photo_dir,
        total_photos: outcome.total_photos,
        summary: &report.summary,
        ranking: &ranking,
        photos: &outcome.scores,
        failed: &outcome.failed,
    };

    let results_path = args.project.join(RESULTS_FILENAME);
    output::write_results(&results_path, &results);

    if args.llm.json {
        output::print_json(&results);
    } else {
        output::print_table(&ranking, &report.summary, &outcome);
        eprintln!("\nResults written to {}", results_path.display());
    }
    if !outcome.is_reconciled() {
        warn!(
            scored = outcome.scores.len(),
            failed = outcome.failed.len(),
            total = outcome.total_photos,
            "Scored and failed photos do not add up to the total"
        );
    }
}

async fn run_sets(args: SetsArgs) {
    let resolved = resolve(&args.llm);
    let competition = load_project_competition(&args.project, args.competition.as_ref());
    let stored = output::load_results(&args.project.join(RESULTS_FILENAME));
    if stored.competition != competition.name {
        warn!(results = %stored.competition, config = %competition.name, "results.json was produced for a different competition");
    }

    let set_mode = competition.set_mode.clone();
    let set_size = args
        .set_size
        .or(set_mode.as_ref().map(|m| m.set_size))
        .unwrap_or_else(|| bail("No set size. Pass --set-size or add [set_mode] to the competition config."));
    let options = SelectionOptions {
        pre_filter_top_n: args.top_n.unwrap_or(DEFAULT_PRE_FILTER_TOP_N),
        max_combinations: args.max_combinations.map(u128::from).unwrap_or(DEFAULT_MAX_COMBINATIONS),
        max_sets_to_evaluate: args
            .max_sets
            .or(set_mode.as_ref().map(|m| m.max_sets_to_evaluate))
            .unwrap_or(DEFAULT_MAX_SETS_TO_EVALUATE),
    };
    let weights = set_mode
        .as_ref()
        .map(|m| CompositeWeights { individual: m.individual_weight, set: m.set_weight })
        .unwrap_or_default();
    let set_criteria = set_mode
        .as_ref()
        .map(|m| m.set_criteria.clone())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(prompt::default_set_criteria);

    let candidates = select_candidate_sets(&stored.photos, set_size, &options).unwrap_or_else(|e| bail(e));
    info!(candidates = candidates.len(), set_size, "Evaluating candidate sets");

    let set_prompt = prompt::build_set_prompt(&competition, &set_criteria, set_size);
    let client = Arc::new(VisionClient::new(resolved.llm, competition.criteria.clone(), set_criteria));
    let parallel = args.parallel.or(resolved.cfg.parallel).unwrap_or(DEFAULT_PARALLEL).max(1);
    let semaphore = Arc::new(tokio::sync::Semaphore::new(parallel));
    let set_prompt = Arc::new(set_prompt);

    let mut handles = Vec::with_capacity(candidates.len());
    for (i, candidate) in candidates.into_iter().enumerate() {
        let candidate = candidate.promote(format!("set-{}", i + 1));
        let set_id = candidate.set_id.clone().unwrap_or_default();
        let filenames: Vec<String> = candidate.filenames().iter().map(|s| s.to_string()).collect();
        let individual: Vec<f64> = candidate.photos.iter().map(|p| p.weighted_average).collect();
        let paths: Vec<PathBuf> = filenames.iter().map(|f| stored.photo_dir.join(f)).collect();

        let sem = semaphore.clone();
        let client = client.clone();
        let set_prompt = set_prompt.clone();
        let timeout = resolved.timeout;
        let handle = tokio::spawn(async move {
            let _permit = sem.acquire().await;
            let evaluation = client.evaluate_set(&paths, &set_prompt, timeout).await;
            (set_id, filenames, individual, evaluation)
        });
        handles.push(handle);
    }

    let mut results = Vec::new();
    for handle in handles {
        match handle.await {
            Ok((set_id, photos, individual, Ok(evaluation))) => {
                let score = aggregate_set_scores(&individual, &evaluation, weights);
                results.push(SetResult { set_id, photos, evaluation, score });
            }
            Ok((_, _, _, Err(ScorerError::Unreachable(message)))) => exit_backend_unreachable(
                Interrupted::Sets,
                format!("scoring backend unreachable, no set results were produced: {message}"),
            ),
            Ok((set_id, _, _, Err(e))) => warn!(%set_id, error = %e, "Set evaluation failed, skipping"),
            Err(e) => warn!(error = %e, "Set evaluation task panicked"),
        }
    }

    if results.is_empty() {
        bail("All set evaluations failed. Nothing to rank.");
    }

    let ranking = rank_sets(results);
    let comparison = match ranking.ranking.as_slice() {
        [first, second, ..] => Some(compare_sets(&first.result, &second.result)),
        _ => None,
    };

    if args.llm.json {
        output::print_sets_json(&ranking, comparison.as_ref());
    } else {
        output::print_set_ranking(&ranking);
        if let (Some(comparison), [first, second, ..]) = (&comparison, ranking.ranking.as_slice()) {
            output::print_comparison(comparison, &first.result.set_id, &second.result.set_id);
        }
    }
}
