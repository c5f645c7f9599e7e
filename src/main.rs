//! CLI entry point: thin dispatch from `grove::cli::Command` onto the
//! library. Owns process-level concerns the library doesn't: logging
//! setup, concrete backend construction, Ctrl-C handling, and exit status.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info};

use grove::active_plan::{self, ActivePlanState};
use grove::cli::{Cli, Command, OutputFormat};
use grove::config::GroveConfig;
use grove::domain::{PlanConfig, PlanStatus};
use grove::executor::{Backends, Executor, TokioShellRunner};
use grove::hooks::HookEngine;
use grove::persistence::{self, JobStore};
use grove::plan_ops::{self, NewJob};
use grove::scheduler::{cancellation_pair, RunMode, Scheduler};

const PLAN_CONFIG_FILENAME: &str = ".grove-plan.yml";

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("grove").join("logs");
    fs::create_dir_all(&log_dir).context("failed to create log directory")?;

    let level_str = cli_log_level.or(config_log_level);
    let level = match level_str.map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("warning: unknown log-level '{other}', defaulting to INFO");
            tracing::Level::INFO
        }
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("grove.log")).context("failed to create log file")?;
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!(?level, "logging initialized");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = GroveConfig::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref())?;
    let config = GroveConfig::load(cli.config.as_ref())?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Init { dir, model, worktree }) => cmd_init(&dir, model, worktree).await,
        Some(Command::Add { plan, title, job_type, depends_on, model, body }) => {
            cmd_add(plan.as_deref(), title, job_type.into(), depends_on, model, body).await
        }
        Some(Command::Run { target, all, next, parallel, model, prepend_dependencies, .. }) => {
            cmd_run(&config, target.as_deref(), all, next, parallel, model, prepend_dependencies).await
        }
        Some(Command::Status { plan, format }) => cmd_status(plan.as_deref(), format).await,
        Some(Command::Graph { plan, format }) => cmd_graph(plan.as_deref(), format).await,
        Some(Command::Finish { plan }) => cmd_set_status(&config, plan.as_deref(), PlanStatus::Finished).await,
        Some(Command::Review { plan }) => cmd_set_status(&config, plan.as_deref(), PlanStatus::Review).await,
        Some(Command::Set { dir }) => cmd_set_active(&dir),
        Some(Command::Current) => cmd_current(),
        Some(Command::Unset) => cmd_unset(),
        None => {
            use clap::CommandFactory;
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    }
}

/// Resolve a plan argument the way every command but `run`/`init` does:
/// explicit path, else the active-plan pointer, else the current
/// directory if it looks like a plan.
fn resolve_plan_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    let state = ActivePlanState::new(ActivePlanState::default_path());
    active_plan::resolve(explicit, &state)
        .context("failed to resolve active plan state")?
        .ok_or_else(|| eyre::eyre!("no plan specified and none is active; pass a path or run `grove set <dir>`"))
}

async fn cmd_init(dir: &Path, model: Option<String>, worktree: Option<String>) -> Result<()> {
    debug!(dir = %dir.display(), "cmd_init: called");
    tokio::fs::create_dir_all(dir).await.with_context(|| format!("failed to create {}", dir.display()))?;

    let config = PlanConfig { model, worktree, ..PlanConfig::default() };
    persistence::write_plan_config(&dir.join(PLAN_CONFIG_FILENAME), &config)
        .await
        .context("failed to write plan config")?;

    println!("initialized plan at {}", dir.display());
    Ok(())
}

async fn cmd_add(
    plan_arg: Option<&Path>,
    title: String,
    job_type: grove::domain::JobType,
    depends_on: Vec<String>,
    model: Option<String>,
    body: Option<String>,
) -> Result<()> {
    let dir = resolve_plan_dir(plan_arg)?;
    let mut plan = grove::loader::load(&dir).context("failed to load plan")?;

    let body = match body {
        Some(b) => b,
        None => read_stdin_if_piped(),
    };

    let filename = plan_ops::add_job(&mut plan, NewJob { title, job_type, depends_on, model, body })
        .await
        .context("failed to add job")?;
    println!("added {filename}");
    Ok(())
}

fn read_stdin_if_piped() -> String {
    use std::io::IsTerminal;
    if std::io::stdin().is_terminal() {
        return String::new();
    }
    std::io::read_to_string(std::io::stdin()).unwrap_or_default()
}

async fn cmd_run(
    config: &GroveConfig,
    target: Option<&Path>,
    all: bool,
    next: bool,
    parallel: Option<usize>,
    model: Option<String>,
    prepend_dependencies: Option<bool>,
) -> Result<()> {
    let resolved = match target {
        Some(t) => t.to_path_buf(),
        None => resolve_plan_dir(None)?,
    };

    let store = Arc::new(JobStore::new());
    let mut plan = Scheduler::open_plan(&resolved, &store).await.context("failed to load plan")?;
    let single_job = plan.target_job.clone();

    let backends = Backends { shell: Some(Arc::new(TokioShellRunner)), ..Backends::empty() };
    let executor = Arc::new(
        Executor::new(backends)
            .with_model_override(model)
            .with_prepend_dependencies_override(prepend_dependencies)
            .with_job_store(store.clone()),
    );
    let hooks = Arc::new(HookEngine::new().with_timeout(std::time::Duration::from_secs(config.hook_timeout_secs)));

    let mut scheduler_config = config.scheduler.clone();
    if let Some(parallel) = parallel {
        scheduler_config.max_parallel_jobs = parallel;
    }
    let scheduler = Scheduler::new(store, hooks, executor, scheduler_config);

    let (cancel_handle, cancel) = cancellation_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt, cancelling run");
            cancel_handle.cancel();
        }
    });

    let mode = match (single_job, next, all) {
        (Some(filename), _, _) => RunMode::Single(filename),
        (None, _, true) => RunMode::All,
        (None, true, false) => RunMode::Next,
        (None, false, false) => RunMode::Next,
    };
    let single_run = matches!(mode, RunMode::Single(_));

    let report = scheduler.run(&mut plan, mode, &cancel).await.context("run failed")?;

    print_run_report(&report);
    if single_run && !report.failed.is_empty() {
        eyre::bail!("job failed");
    }
    Ok(())
}

fn print_run_report(report: &grove::scheduler::RunReport) {
    for filename in &report.completed {
        println!("completed {filename}");
    }
    for filename in &report.failed {
        println!("failed {filename}");
    }
    for filename in &report.deferred_for_consecutive_cap {
        println!("deferred (max-consecutive-steps) {filename}");
    }
    if report.cancelled {
        println!("run cancelled");
    }
}

async fn cmd_status(plan_arg: Option<&Path>, format: OutputFormat) -> Result<()> {
    let dir = resolve_plan_dir(plan_arg)?;
    let store = JobStore::new();
    let plan = Scheduler::open_plan(&dir, &store).await.context("failed to load plan")?;

    match format {
        OutputFormat::Json => {
            let jobs: Vec<&grove::domain::Job> = plan.jobs_in_order();
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        OutputFormat::Text => {
            for job in plan.jobs_in_order() {
                println!(
                    "{:<32} {:<12} {}",
                    job.filename,
                    colorize_status(job.status),
                    job.title.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}

/// Color a job status for terminal output: success in green, failure in
/// red, an in-progress state in yellow, everything else left plain.
fn colorize_status(status: grove::domain::JobStatus) -> String {
    use grove::domain::JobStatus::*;
    let text = status.as_str();
    match status {
        Completed => text.green().to_string(),
        Failed | Abandoned => text.red().to_string(),
        Running => text.yellow().to_string(),
        _ => text.to_string(),
    }
}

async fn cmd_graph(plan_arg: Option<&Path>, format: OutputFormat) -> Result<()> {
    let dir = resolve_plan_dir(plan_arg)?;
    let plan = grove::loader::load(&dir).context("failed to load plan")?;
    let graph = grove::graph::DependencyGraph::build(&plan.jobs).context("failed to build dependency graph")?;
    let ordered = graph.topological_order();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&ordered)?);
        }
        OutputFormat::Text => {
            for job in ordered {
                let deps = if job.depends_on.is_empty() { String::new() } else { format!(" <- {}", job.depends_on.join(", ")) };
                println!("{}{}", job.filename, deps);
            }
        }
    }
    Ok(())
}

async fn cmd_set_status(config: &GroveConfig, plan_arg: Option<&Path>, status: PlanStatus) -> Result<()> {
    let dir = resolve_plan_dir(plan_arg)?;
    let mut plan = grove::loader::load(&dir).context("failed to load plan")?;
    plan_ops::set_plan_status(&mut plan, status, PLAN_CONFIG_FILENAME).await.context("failed to persist plan status")?;

    if status == PlanStatus::Review {
        let hooks = HookEngine::new().with_timeout(std::time::Duration::from_secs(config.hook_timeout_secs));
        hooks.fire_plan(grove::hooks::HookKind::OnReview, &plan).await;
        hooks.drain().await;
    }

    println!("plan marked {status}");
    Ok(())
}

fn cmd_set_active(dir: &Path) -> Result<()> {
    let state = ActivePlanState::new(ActivePlanState::default_path());
    state.set(dir).context("failed to set active plan")?;
    println!("active plan set to {}", dir.display());
    Ok(())
}

fn cmd_current() -> Result<()> {
    let state = ActivePlanState::new(ActivePlanState::default_path());
    match state.get().context("failed to read active plan state")? {
        Some(dir) => println!("{}", dir.display()),
        None => println!("no active plan"),
    }
    Ok(())
}

fn cmd_unset() -> Result<()> {
    let state = ActivePlanState::new(ActivePlanState::default_path());
    state.unset().context("failed to unset active plan")?;
    println!("active plan cleared");
    Ok(())
}
