//! CLI interface for prompt-forge

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::feedback::FeedbackFilter;
use crate::generation::HttpTextGenerator;
use crate::service::TrainingService;
use crate::training::TrainingLoop;
use crate::types::{
    FeedbackKind, NewFeedback, PromptExport, PromptVersion, TrainingRun, TrainingStrategy,
};

#[derive(Parser)]
#[command(name = "prompt-forge")]
#[command(about = "Automatic prompt training: collect feedback, retrain, evaluate, deploy", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config file and database
    Init,
    /// Manage prompts and their versions
    Prompt {
        #[command(subcommand)]
        command: PromptCommands,
    },
    /// Record and inspect feedback
    Feedback {
        #[command(subcommand)]
        command: FeedbackCommands,
    },
    /// Run and inspect training
    Train {
        #[command(subcommand)]
        command: TrainCommands,
    },
    /// Evaluate a stored version against the test battery
    Evaluate {
        /// Prompt identity
        identity: String,
        /// Version number to evaluate
        version: u32,
        /// Compare against this version (default: the deployed one)
        #[arg(short, long)]
        baseline: Option<u32>,
    },
    /// Show training status for one prompt or all of them
    Status {
        /// Prompt identity (omit for all)
        identity: Option<String>,
    },
}

#[derive(Subcommand)]
enum PromptCommands {
    /// Register a new prompt; the body becomes v1 and is deployed
    Create {
        /// Prompt identity
        identity: String,
        /// Prompt body text
        #[arg(short, long)]
        body: Option<String>,
        /// Read the body from a file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Print a version's body and metadata
    Show {
        /// Prompt identity
        identity: String,
        /// Version number (default: the deployed one)
        #[arg(short, long)]
        version: Option<u32>,
    },
    /// List all versions of a prompt
    Versions {
        /// Prompt identity
        identity: String,
    },
    /// Deploy a specific version
    Deploy {
        /// Prompt identity
        identity: String,
        /// Version number
        version: u32,
    },
    /// Restore the previously deployed version
    Rollback {
        /// Prompt identity
        identity: String,
    },
    /// Reject a candidate version
    Reject {
        /// Prompt identity
        identity: String,
        /// Version number
        version: u32,
    },
    /// Export a prompt's full version history as JSON
    Export {
        /// Prompt identity
        identity: String,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Import a previously exported prompt
    Import {
        /// Path to the export file
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum FeedbackCommands {
    /// Record one feedback event
    Add {
        /// Prompt identity
        identity: String,
        /// Event kind: rating, error, success_metric, suggestion
        #[arg(short, long)]
        kind: String,
        /// Rating in [0.0, 1.0] (rating events only)
        #[arg(short, long)]
        rating: Option<f64>,
        /// What happened
        #[arg(short, long, default_value = "")]
        detail: String,
        /// Structured context as a JSON string
        #[arg(short, long)]
        payload: Option<String>,
    },
    /// List recorded feedback
    List {
        /// Prompt identity
        identity: String,
        /// Only events from the last N hours
        #[arg(long)]
        since_hours: Option<i64>,
        /// Filter by kind
        #[arg(short, long)]
        kind: Option<String>,
        /// Maximum events to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Aggregate counts and rates
    Summary {
        /// Prompt identity
        identity: String,
        /// Only events from the last N hours
        #[arg(long)]
        since_hours: Option<i64>,
    },
}

#[derive(Subcommand)]
enum TrainCommands {
    /// Train one prompt now, bypassing the trigger gates
    Run {
        /// Prompt identity
        identity: String,
        /// Force a strategy: few_shot, reinforcement, meta_prompt, adversarial
        #[arg(short, long)]
        strategy: Option<String>,
    },
    /// Show past training runs
    History {
        /// Prompt identity
        identity: String,
        /// Maximum runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Run the automatic training loop until interrupted
    Start,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            init().await?;
        }
        Commands::Prompt { command } => match command {
            PromptCommands::Create { identity, body, file } => {
                create_prompt(&identity, body, file).await?;
            }
            PromptCommands::Show { identity, version } => {
                show_prompt(&identity, version).await?;
            }
            PromptCommands::Versions { identity } => {
                list_versions(&identity).await?;
            }
            PromptCommands::Deploy { identity, version } => {
                let service = build_service().await?;
                let deployed = service.deploy_version(&identity, version, Utc::now()).await?;
                println!("Deployed '{}' v{}", identity, deployed.version);
            }
            PromptCommands::Rollback { identity } => {
                let service = build_service().await?;
                let restored = service.rollback(&identity, Utc::now()).await?;
                println!("Rolled back '{}' to v{}", identity, restored.version);
            }
            PromptCommands::Reject { identity, version } => {
                let service = build_service().await?;
                service.reject_version(&identity, version).await?;
                println!("Rejected '{}' v{}", identity, version);
            }
            PromptCommands::Export { identity, out } => {
                export_prompt(&identity, out).await?;
            }
            PromptCommands::Import { file } => {
                import_prompt(&file).await?;
            }
        },
        Commands::Feedback { command } => match command {
            FeedbackCommands::Add { identity, kind, rating, detail, payload } => {
                add_feedback(&identity, &kind, rating, detail, payload).await?;
            }
            FeedbackCommands::List { identity, since_hours, kind, limit } => {
                list_feedback(&identity, since_hours, kind, limit).await?;
            }
            FeedbackCommands::Summary { identity, since_hours } => {
                feedback_summary(&identity, since_hours).await?;
            }
        },
        Commands::Train { command } => match command {
            TrainCommands::Run { identity, strategy } => {
                train_now(&identity, strategy).await?;
            }
            TrainCommands::History { identity, limit } => {
                train_history(&identity, limit).await?;
            }
            TrainCommands::Start => {
                start_loop().await?;
            }
        },
        Commands::Evaluate { identity, version, baseline } => {
            evaluate(&identity, version, baseline).await?;
        }
        Commands::Status { identity } => {
            status(identity.as_deref()).await?;
        }
    }

    Ok(())
}

/// Load config, open the database, and wire up the service.
async fn build_service() -> Result<Arc<TrainingService>> {
    let config = Config::load()?;
    let db_path = config.storage.resolve_db_path();
    let db = Database::open(&db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    let generator = Arc::new(HttpTextGenerator::from_config(&config.generation)?);
    Ok(Arc::new(TrainingService::new(config, &db, generator)))
}

fn parse_kind(s: &str) -> Result<FeedbackKind> {
    FeedbackKind::parse(s).ok_or_else(|| {
        anyhow::anyhow!(
            "Unknown feedback kind '{}'. Valid kinds: rating, error, success_metric, suggestion",
            s
        )
    })
}

fn parse_strategy(s: &str) -> Result<TrainingStrategy> {
    match TrainingStrategy::parse(s) {
        Some(TrainingStrategy::None) => {
            bail!("Strategy 'none' marks human-authored versions and cannot be forced")
        }
        Some(strategy) => Ok(strategy),
        None => bail!(
            "Unknown strategy '{}'. Valid strategies: few_shot, reinforcement, meta_prompt, adversarial",
            s
        ),
    }
}

async fn init() -> Result<()> {
    let config = Config::load()?;
    let db_path = config.storage.resolve_db_path();
    Database::open(&db_path).await?;

    println!("prompt-forge initialized");
    println!("  Config:   {}", crate::config::config_path().display());
    println!("  Database: {}", db_path.display());
    println!();
    println!("Register a prompt with:");
    println!("  prompt-forge prompt create <identity> --body \"You are ...\"");
    Ok(())
}

async fn create_prompt(identity: &str, body: Option<String>, file: Option<PathBuf>) -> Result<()> {
    let body = match (body, file) {
        (Some(text), None) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (Some(_), Some(_)) => bail!("Provide either --body or --file, not both"),
        (None, None) => bail!("Provide the prompt body with --body or --file"),
    };

    let service = build_service().await?;
    let version = service.create_prompt(identity, &body, Utc::now()).await?;
    println!("Created '{}' v{} (deployed)", identity, version.version);
    Ok(())
}

async fn show_prompt(identity: &str, version: Option<u32>) -> Result<()> {
    let service = build_service().await?;
    let found = match version {
        Some(v) => service
            .versions()
            .get(identity, v)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No version {} for '{}'", v, identity))?,
        None => service.versions().active(identity).await?,
    };

    println!("{} v{} [{}]", found.identity, found.version, found.status);
    println!("Strategy: {}", found.strategy);
    println!("Created:  {}", found.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(deployed_at) = found.deployed_at {
        println!("Deployed: {}", deployed_at.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(ref metrics) = found.metrics {
        println!(
            "Scores:   success {:.2}  coherence {:.2}  relevance {:.2}  safety {:.2}",
            metrics.success_rate, metrics.coherence, metrics.relevance, metrics.safety
        );
    }
    println!();
    println!("{}", found.body);
    Ok(())
}

async fn list_versions(identity: &str) -> Result<()> {
    let service = build_service().await?;
    let history = service.versions().history(identity).await?;

    if history.is_empty() {
        println!("No versions for '{}'.", identity);
        println!("Create it with 'prompt-forge prompt create {} --body ...'", identity);
        return Ok(());
    }

    println!("Versions of '{}'", identity);
    println!("=======================================");
    for v in &history {
        print_version_line(v);
    }
    Ok(())
}

fn print_version_line(v: &PromptVersion) {
    let scores = v
        .metrics
        .as_ref()
        .map(|m| format!("  success {:.2} safety {:.2}", m.success_rate, m.safety))
        .unwrap_or_default();
    println!(
        "  v{} [{}] {} created {}{}",
        v.version,
        v.status,
        v.strategy,
        v.created_at.format("%Y-%m-%d %H:%M"),
        scores
    );
}

async fn export_prompt(identity: &str, out: Option<PathBuf>) -> Result<()> {
    let service = build_service().await?;
    let export = service.versions().export(identity, Utc::now()).await?;
    let json = serde_json::to_string_pretty(&export)?;

    match out {
        Some(path) => {
            std::fs::write(&path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "Exported {} version(s) of '{}' to {}",
                export.versions.len(),
                identity,
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn import_prompt(file: &PathBuf) -> Result<()> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let export: PromptExport = serde_json::from_str(&json)
        .with_context(|| format!("{} is not a valid prompt export", file.display()))?;

    let service = build_service().await?;
    let count = service.versions().import(&export).await?;
    println!("Imported {} version(s) of '{}'", count, export.identity);
    Ok(())
}

async fn add_feedback(
    identity: &str,
    kind: &str,
    rating: Option<f64>,
    detail: String,
    payload: Option<String>,
) -> Result<()> {
    let kind = parse_kind(kind)?;
    let payload = match payload {
        Some(raw) => Some(
            serde_json::from_str(&raw).context("--payload must be a valid JSON value")?,
        ),
        None => None,
    };

    let service = build_service().await?;
    let event = NewFeedback { kind, rating, detail, payload };
    let id = service.record_feedback(identity, event, Utc::now()).await?;
    println!("Recorded {} feedback #{} for '{}'", kind, id, identity);
    Ok(())
}

async fn list_feedback(
    identity: &str,
    since_hours: Option<i64>,
    kind: Option<String>,
    limit: usize,
) -> Result<()> {
    let kind = kind.as_deref().map(parse_kind).transpose()?;
    let filter = FeedbackFilter {
        since: since_hours.map(|h| Utc::now() - Duration::hours(h)),
        kind,
        limit: Some(limit),
    };

    let service = build_service().await?;
    let events = service.feedback().query(identity, &filter).await?;

    if events.is_empty() {
        println!("No feedback for '{}'.", identity);
        return Ok(());
    }

    println!("Feedback for '{}' ({} shown)", identity, events.len());
    println!("=======================================");
    for event in &events {
        let rating = event
            .rating
            .map(|r| format!(" {:.2}", r))
            .unwrap_or_default();
        let detail = if event.detail.is_empty() {
            String::new()
        } else {
            format!("  {}", crate::truncate_safe(&event.detail, 70))
        };
        println!(
            "  #{} [{}]{} {}{}",
            event.id,
            event.kind,
            rating,
            event.created_at.format("%Y-%m-%d %H:%M"),
            detail
        );
    }
    Ok(())
}

async fn feedback_summary(identity: &str, since_hours: Option<i64>) -> Result<()> {
    let since = since_hours.map(|h| Utc::now() - Duration::hours(h));
    let service = build_service().await?;
    let summary = service.feedback().summary(identity, since).await?;

    println!("Feedback Summary: {}", identity);
    println!("=======================================");
    println!("  Events:       {}", summary.count);
    println!(
        "  Ratings:      {} (avg {})",
        summary.rating_count,
        summary
            .avg_rating
            .map(|r| format!("{:.2}", r))
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!(
        "  Errors:       {} ({:.0}% of events)",
        summary.error_count,
        summary.error_rate * 100.0
    );
    println!("  Successes:    {}", summary.success_count);
    println!("  Suggestions:  {}", summary.suggestion_count);
    Ok(())
}

async fn train_now(identity: &str, strategy: Option<String>) -> Result<()> {
    let strategy = strategy.as_deref().map(parse_strategy).transpose()?;
    let service = build_service().await?;

    println!("Training '{}'...", identity);
    let run = service.trigger_training(identity, strategy, Utc::now()).await?;
    print_run(&run);
    Ok(())
}

async fn train_history(identity: &str, limit: usize) -> Result<()> {
    let service = build_service().await?;
    let runs = service.runs().history(identity, limit).await?;

    if runs.is_empty() {
        println!("No training runs for '{}'.", identity);
        return Ok(());
    }

    println!("Training runs for '{}'", identity);
    println!("=======================================");
    for run in &runs {
        print_run(run);
    }
    Ok(())
}

fn print_run(run: &TrainingRun) {
    let disposition = run
        .disposition
        .map(|d| d.to_string())
        .unwrap_or_else(|| "in progress".to_string());
    let candidate = run
        .candidate_version
        .map(|v| format!(" -> v{}", v))
        .unwrap_or_default();
    let duration = run
        .finished_at
        .map(|f| {
            let secs = (f - run.started_at).num_milliseconds() as f64 / 1000.0;
            format!(", {:.1}s", secs)
        })
        .unwrap_or_default();
    println!(
        "  {} [{}] {}{} ({} event(s){})",
        run.started_at.format("%Y-%m-%d %H:%M:%S"),
        disposition,
        run.strategy,
        candidate,
        run.feedback_count,
        duration
    );
    if let Some(ref reason) = run.reason {
        println!("    {}", crate::truncate_safe(reason, 100));
    }
    if let Some(ref eval) = run.evaluation {
        println!(
            "    success {:.2}  coherence {:.2}  relevance {:.2}  safety {:.2}  improvement {}",
            eval.success_rate,
            eval.coherence,
            eval.relevance,
            eval.safety,
            eval.improvement_over_baseline
                .map(|d| format!("{:+.3}", d))
                .unwrap_or_else(|| "n/a".to_string())
        );
    }
}

async fn start_loop() -> Result<()> {
    let service = build_service().await?;
    let schedule = service.config().schedule.clone();
    let interval = schedule.tick_interval_secs;
    let looper = TrainingLoop::new(service, schedule);

    looper.start().await;
    println!(
        "Training loop running (checking every {}s). Press Ctrl+C to stop.",
        interval
    );

    tokio::signal::ctrl_c().await?;
    looper.stop().await;
    println!("Training loop stopped.");
    Ok(())
}

async fn evaluate(identity: &str, version: u32, baseline: Option<u32>) -> Result<()> {
    let service = build_service().await?;

    println!("Evaluating '{}' v{}...", identity, version);
    let result = service.evaluate_version(identity, version, baseline).await?;

    let weights = &service.config().evaluation.weights;
    let thresholds = &service.config().deployment.thresholds;
    let (recommendation, notes) = crate::evaluation::recommend(&result, thresholds);

    println!();
    println!("Evaluation: {} v{}", identity, version);
    println!("=======================================");
    println!("  Success rate:  {:.2}", result.success_rate);
    println!("  Coherence:     {:.2}", result.coherence);
    println!("  Relevance:     {:.2}", result.relevance);
    println!("  Safety:        {:.2}", result.safety);
    println!(
        "  Latency:       p50 {:.0}ms  p95 {:.0}ms",
        result.latency_p50, result.latency_p95
    );
    println!(
        "  Composite:     {:.3}",
        crate::evaluation::composite_score(&result, weights)
    );
    if let Some(delta) = result.improvement_over_baseline {
        println!("  Improvement:   {:+.3} over baseline", delta);
    }
    println!();
    println!("Recommendation: {}", recommendation);
    for note in &notes {
        println!("  - {}", note);
    }
    Ok(())
}

async fn status(identity: Option<&str>) -> Result<()> {
    let service = build_service().await?;
    let report = service.training_status(identity, Utc::now()).await?;

    if report.identities.is_empty() {
        println!("No prompts registered yet.");
        println!("Create one with 'prompt-forge prompt create <identity> --body ...'");
        return Ok(());
    }

    println!("Prompt Training Status");
    println!("=======================================");
    for entry in &report.identities {
        let deployed = entry
            .deployed_version
            .map(|v| format!("v{}", v))
            .unwrap_or_else(|| "none".to_string());
        println!("{}", entry.identity);
        println!(
            "  Deployed: {} ({} version(s))",
            deployed, entry.version_count
        );
        println!("  Pending feedback: {}", entry.pending_feedback);
        match &entry.last_run {
            Some(run) => {
                let disposition = run
                    .disposition
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "in progress".to_string());
                println!(
                    "  Last run: {} {} ({})",
                    run.started_at.format("%Y-%m-%d %H:%M"),
                    run.strategy,
                    disposition
                );
            }
            None => println!("  Last run: never"),
        }
        println!("  Next: {}", entry.next_action);
        println!();
    }

    if report.loop_status.running {
        let next = report
            .loop_status
            .next_tick_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!("Loop: running (next pass {})", next);
    } else {
        println!("Loop: stopped. Start it with 'prompt-forge train start'.");
    }
    Ok(())
}
