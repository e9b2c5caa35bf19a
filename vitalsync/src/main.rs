//! vitalsync - daily health and focus scoring with dashboard sync
//!
//! Reads daily health and screen-time exports, computes the productivity and
//! vitality scores, and pushes them to a remote dashboard. Failed pushes are
//! kept in a durable retry queue.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/vitalsync/state.db (~/.local/share/vitalsync/state.db)
//! - Exports:  $XDG_DATA_HOME/vitalsync/exports/{health,usage}/<date>.json
//! - Logs:     $XDG_STATE_HOME/vitalsync/vitalsync.log
//! - Config:   $XDG_CONFIG_HOME/vitalsync/config.toml

mod process_lock;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use process_lock::acquire_sync_guard;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vitalsync_core::onboarding::{is_onboarded, run_onboarding};
use vitalsync_core::providers::file::{FileHealthCapability, FileUsageCapability};
use vitalsync_core::providers::{
    count_focus_sessions, AppCategorizer, HealthSampleProvider, UsageSampleProvider,
};
use vitalsync_core::remote::HttpSink;
use vitalsync_core::scoring::{compute_productivity_score, compute_vitality_score};
use vitalsync_core::sync::{SyncReport, TriggerOutcome};
use vitalsync_core::{
    logging, AgingTrend, BackgroundSync, Config, DailyHealthSample, DailyUsageSample, Database,
    Feature, ProductivityScore, ScoreBand, ScoreLabel, SyncCoordinator, SyncOptions, SyncOutcome,
    VitalityScore,
};

#[derive(Parser)]
#[command(name = "vitalsync")]
#[command(about = "Score daily health and focus, and sync them to a dashboard")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch today's data, score it and push it to the dashboard
    Sync {
        /// Keep running and sync every `sync.min_interval_secs`
        #[arg(short, long)]
        watch: bool,
    },

    /// Retry syncs that failed earlier
    Retry,

    /// Show sync state, retry queue and the latest local score
    Status,

    /// Show the dashboard's latest data, falling back to local state
    Dashboard,

    /// Score a health sample file without syncing
    Score {
        /// DailyHealthSample JSON file
        health: PathBuf,

        /// DailyUsageSample JSON file
        #[arg(short, long)]
        usage: Option<PathBuf>,
    },

    /// Show the vitality score over cached samples
    Vitality,

    /// Request capability access and record the grants
    Onboard,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();
    let config = Config::load().context("failed to load config")?;

    let _guard = logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("vitalsync starting");

    match args.command {
        Command::Score { health, usage } => run_score(&health, usage.as_deref()),
        Command::Status => run_status(&config),
        Command::Vitality => run_vitality(&config),
        Command::Onboard => {
            let db_path = Config::database_path();
            let _lock = acquire_sync_guard(&db_path)?;
            let db = open_database(&db_path)?;
            let (health, usage) = build_providers(&config);
            let runtime = build_runtime()?;
            let report = runtime.block_on(run_onboarding(&health, &usage, &db))?;

            println!("Health access: {:?}", report.health);
            println!(
                "Usage tracking: {}",
                if report.usage_available {
                    "available"
                } else {
                    "unavailable"
                }
            );
            if report.completed {
                println!("Onboarding complete.");
            } else {
                println!("Onboarding incomplete: health access is required.");
            }
            Ok(())
        }
        Command::Sync { watch } => {
            let db_path = Config::database_path();
            let _lock = acquire_sync_guard(&db_path)?;
            let runtime = build_runtime()?;
            let Some(coordinator) =
                runtime.block_on(build_owning_coordinator(&config, &db_path))?
            else {
                return Ok(());
            };
            install_cancel_handler(&coordinator)?;

            if watch {
                run_watch_mode(&runtime, coordinator, &config)
            } else {
                let outcome = runtime.block_on(coordinator.sync_now())?;
                print_outcome(&outcome);
                Ok(())
            }
        }
        Command::Retry => {
            let db_path = Config::database_path();
            let _lock = acquire_sync_guard(&db_path)?;
            let runtime = build_runtime()?;
            let Some(coordinator) =
                runtime.block_on(build_owning_coordinator(&config, &db_path))?
            else {
                return Ok(());
            };
            install_cancel_handler(&coordinator)?;

            let report = runtime.block_on(coordinator.retry_failed_syncs())?;
            if report.attempted == 0 && report.remaining == 0 {
                println!("Retry queue is empty.");
            } else {
                println!("Retry complete:");
                println!("  Attempts:  {}", report.attempted);
                println!("  Resolved:  {}", report.resolved);
                println!("  Remaining: {}", report.remaining);
            }
            Ok(())
        }
        Command::Dashboard => {
            // Read-only: no sync lock, and the sync flag is never touched.
            let db_path = Config::database_path();
            let runtime = build_runtime()?;
            let Some(coordinator) = runtime.block_on(build_coordinator(&config, &db_path))? else {
                return Ok(());
            };

            let dashboard = runtime.block_on(coordinator.dashboard())?;
            match (&dashboard.remote_score, dashboard.best_score()) {
                (Some(score), _) => {
                    println!("Dashboard score:");
                    print_score(score);
                }
                (None, Some(score)) => {
                    println!("Dashboard unreachable, showing last local score:");
                    print_score(score);
                }
                (None, None) => println!("No score yet. Run `vitalsync sync` first."),
            }
            if let Some(health) = &dashboard.remote_health {
                println!(
                    "\nDashboard health for {}: {} steps, {:.1}h sleep",
                    health.date, health.steps, health.sleep_hours
                );
            }
            if dashboard.pending_retries > 0 {
                println!("\n{} sync(s) waiting for retry.", dashboard.pending_retries);
            }
            Ok(())
        }
    }
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")
}

fn open_database(db_path: &Path) -> Result<Database> {
    let db = Database::open(db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    db.migrate().context("failed to run database migrations")?;
    Ok(db)
}

/// File-backed providers rooted at the configured export directories
fn build_providers(config: &Config) -> (HealthSampleProvider, UsageSampleProvider) {
    let health = HealthSampleProvider::new(
        Arc::new(FileHealthCapability::new(config.capabilities.health_root())),
        config.user.user_id.clone(),
        config.goals.clone(),
    );
    let usage = UsageSampleProvider::new(
        Arc::new(FileUsageCapability::new(config.capabilities.usage_root())),
        AppCategorizer::from_config(&config.categories),
        config.user.user_id.clone(),
    );
    (health, usage)
}

/// Wire up a coordinator, or print why we can't and return `None`.
async fn build_coordinator(config: &Config, db_path: &Path) -> Result<Option<Arc<SyncCoordinator>>> {
    let sink = match HttpSink::new(&config.remote) {
        Ok(sink) => sink,
        Err(e) => {
            tracing::warn!(error = %e, "Remote dashboard not configured");
            eprintln!("Warning: remote dashboard is not configured: {}", e);
            eprintln!("Set [remote] server_url in {}", Config::config_path().display());
            return Ok(None);
        }
    };

    let db = Arc::new(open_database(db_path)?);
    let (health, usage) = build_providers(config);

    let status = health.initialize().await;
    let usage_available = usage.initialize().await;
    tracing::info!(health = ?status, usage_available, "Capabilities initialized");

    let coordinator = SyncCoordinator::new(
        Arc::new(health),
        Arc::new(usage),
        Arc::new(sink),
        db,
        SyncOptions::from_config(config),
    )
    .context("failed to create sync coordinator")?;

    Ok(Some(Arc::new(coordinator)))
}

/// Build a coordinator for a command that owns the sync lock, clearing a
/// flag left by a crashed sync.
async fn build_owning_coordinator(
    config: &Config,
    db_path: &Path,
) -> Result<Option<Arc<SyncCoordinator>>> {
    let coordinator = build_coordinator(config, db_path).await?;
    if let Some(coordinator) = &coordinator {
        coordinator
            .recover_stale_sync()
            .context("failed to clear stale sync flag")?;
    }
    Ok(coordinator)
}

fn install_cancel_handler(coordinator: &Arc<SyncCoordinator>) -> Result<()> {
    let token = coordinator.cancellation_token();
    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        token.cancel();
    })
    .context("failed to set Ctrl+C handler")
}

/// Sync on every interval tick until Ctrl+C
fn run_watch_mode(
    runtime: &tokio::runtime::Runtime,
    coordinator: Arc<SyncCoordinator>,
    config: &Config,
) -> Result<()> {
    let interval = config.sync.min_interval();
    let background = BackgroundSync::new(Arc::clone(&coordinator), interval);

    println!(
        "Watch mode active (sync every {}s). Press Ctrl+C to stop.",
        interval.as_secs()
    );

    runtime.block_on(async {
        // Catch up on anything queued before the loop's first tick.
        match coordinator.retry_failed_syncs().await {
            Ok(report) if report.resolved > 0 => {
                println!("Resolved {} queued sync(s).", report.resolved);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Retry on startup failed"),
        }

        match background.sync_on_app_open().await {
            Ok(TriggerOutcome::Ran(outcome)) => print_outcome(&outcome),
            Ok(TriggerOutcome::Skipped { last }) => {
                println!("Last sync at {}, waiting for next interval.", last);
            }
            Err(e) => tracing::warn!(error = %e, "Startup sync failed"),
        }

        background
            .run_periodic(coordinator.cancellation_token())
            .await;
    });

    println!("Watch mode stopped.");
    tracing::info!("vitalsync watch mode stopped");
    Ok(())
}

fn run_status(config: &Config) -> Result<()> {
    let db_path = Config::database_path();
    let db = open_database(&db_path)?;

    let state = db.sync_state()?;
    let queue = db.list_retry_queue()?;

    println!("Database: {}", db_path.display());
    println!("Log file: {}", logging::log_file_path().display());
    println!(
        "Remote:   {}",
        config
            .remote
            .server_url
            .as_deref()
            .unwrap_or("(not configured)")
    );
    println!(
        "Onboarded: {}",
        if is_onboarded(&db)? { "yes" } else { "no" }
    );
    println!(
        "Permissions: health={:?} usage={:?}",
        db.permission(Feature::Health)?,
        db.permission(Feature::Usage)?
    );

    println!("\nSync state:");
    match state.last_sync {
        Some(at) => println!("  Last sync:  {}", at),
        None => println!("  Last sync:  never"),
    }
    println!("  In flight:  {}", if state.is_syncing { "yes" } else { "no" });
    if let Some(error) = &state.error {
        println!("  Last error: {}", error);
    }
    if let Some(at) = db.last_background_sync()? {
        println!("  Background: {}", at);
    }

    println!("\nRetry queue: {} pending", queue.len());
    for entry in &queue {
        println!(
            "  {} [{}] {}",
            entry.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
            entry.failure_class,
            entry.failure_reason
        );
    }

    match db.latest_score(&config.user.user_id)? {
        Some(score) => {
            println!("\nLatest score:");
            print_score(&score);
        }
        None => println!("\nNo score recorded yet."),
    }

    Ok(())
}

fn run_score(health_path: &Path, usage_path: Option<&Path>) -> Result<()> {
    let health: DailyHealthSample = read_json(health_path)?;
    let usage = match usage_path {
        Some(path) => {
            let mut usage: DailyUsageSample = read_json(path)?;
            // Intervals win over a stored count, matching the usage provider.
            if !usage.app_intervals.is_empty() {
                usage.focus_session_count = count_focus_sessions(&usage.app_intervals);
            }
            Some(usage)
        }
        None => None,
    };

    let score = compute_productivity_score(&health.sanitized(), usage.as_ref(), &[]);
    print_score(&score);
    Ok(())
}

fn run_vitality(config: &Config) -> Result<()> {
    let Some(birth_year) = config.user.birth_year else {
        eprintln!(
            "Warning: set [user] birth_year in {} to compute the vitality score",
            Config::config_path().display()
        );
        return Ok(());
    };

    let db = open_database(&Config::database_path())?;
    let today = Utc::now().date_naive();
    let span = i64::from(config.sync.vitality_window_days.max(1)) - 1;
    let window = db.cached_health_samples(today - chrono::Duration::days(span), today)?;

    if window.is_empty() {
        println!("No cached health samples yet. Run `vitalsync sync` first.");
        return Ok(());
    }

    let score = compute_vitality_score(birth_year, &window, today, &config.vitality)
        .context("failed to compute vitality score")?;
    print_vitality(&score, window.len());
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

fn print_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Synced(report) => print_sync_report(report),
        SyncOutcome::Failed { failure, .. } => {
            eprintln!("Warning: sync failed: {}", failure);
            if failure.class.is_retryable() {
                eprintln!("The sync was queued and will be retried.");
            }
        }
        SyncOutcome::Rejected => println!("A sync is already in progress."),
    }
}

fn print_sync_report(report: &SyncReport) {
    println!("\nSync complete ({} ms):", report.duration_ms);
    println!("  Date:     {}", report.health.date);
    println!("  Steps:    {}", report.health.steps);
    println!("  Sleep:    {:.1}h", report.health.sleep_hours);
    match &report.usage {
        Some(usage) => println!(
            "  Screen:   {:.0} min ({} focus sessions)",
            usage.total_screen_minutes, usage.focus_session_count
        ),
        None => println!("  Screen:   unavailable"),
    }
    println!();
    print_score(&report.score);
    if let Some(vitality) = &report.vitality {
        println!(
            "\nBiological age: {:.1} ({})",
            vitality.biological_age,
            AgingTrend::from_rate(vitality.aging_rate).message()
        );
    }
}

fn print_score(score: &ProductivityScore) {
    let label = ScoreLabel::from_score(score.score);
    let band = ScoreBand::from_score(score.score);
    println!(
        "Productivity score for {}: {} ({}, {:?})",
        score.date,
        score.score,
        label.display_name(),
        band
    );
    println!("  Steps:    +{}", score.breakdown.steps_component);
    println!("  Sleep:    +{}", score.breakdown.sleep_component);
    println!("  Focus:    +{}", score.breakdown.focus_component);
    println!("  Workout:  +{}", score.breakdown.workout_component);
    println!("  Streak:   {} day(s)", score.streak_days);
}

fn print_vitality(score: &VitalityScore, samples: usize) {
    println!("Vitality over {} day(s):", samples);
    println!(
        "  Biological age:    {:.1} (chronological {})",
        score.biological_age, score.chronological_age
    );
    println!(
        "  Aging rate:        {:.2} ({})",
        score.aging_rate,
        AgingTrend::from_rate(score.aging_rate).message()
    );
    println!("  Score:             {}", score.score);

    println!("\nComponents:");
    for (metric, component) in &score.components {
        println!(
            "  {:<20} {:>5} -> {}",
            metric.display_name(),
            format!("{:.0}", component.value),
            component.score
        );
    }

    if !score.recommendations.is_empty() {
        println!("\nRecommendations:");
        for rec in &score.recommendations {
            println!("  [{:?}] {} {}", rec.priority, rec.message, rec.action);
        }
    }
}
