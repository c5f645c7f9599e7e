//! CLI command definitions.
//!
//! Deliberately thin: the terminal UI widgets (plan browser,
//! dependency-tree selector, finish-cleanup picker) are out of
//! scope — these subcommands are pass-throughs onto the library, not a
//! TUI. `templates list` / `recipes list` are omitted entirely: the
//! recipe/template listing they'd wrap is an out-of-scope auxiliary
//! concern, with no library operation behind it to pass through to.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

use crate::domain::JobType;

/// Grove — local orchestration engine for multi-step markdown job plans.
#[derive(Parser)]
#[command(name = "grove", about = "Dependency-ordered execution of markdown job plans", version)]
pub struct Cli {
    /// Path to a `grove.yml` config file (overrides the usual fallback
    /// chain; see `GroveConfig::load`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Initialize a new, empty plan directory.
    Init {
        /// Directory to create the plan in (created if missing).
        #[arg(default_value = ".")]
        dir: PathBuf,
        /// Default model for jobs that don't specify one.
        #[arg(long)]
        model: Option<String>,
        /// Logical worktree name this plan owns.
        #[arg(long)]
        worktree: Option<String>,
    },

    /// Add a new job to a plan.
    Add {
        /// Plan directory; resolved via the active-plan pointer if omitted.
        #[arg(long)]
        plan: Option<PathBuf>,
        /// Job title (also used to derive the filename slug).
        title: String,
        /// Job type.
        #[arg(long = "type", value_enum, default_value_t = JobTypeArg::Shell)]
        job_type: JobTypeArg,
        /// Dependency references (ids or filenames), may be repeated.
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
        /// Model override for this job.
        #[arg(long)]
        model: Option<String>,
        /// Prompt body; reads stdin if omitted.
        #[arg(long)]
        body: Option<String>,
    },

    /// Run a plan (or a single job file).
    Run {
        /// Plan directory or a single job file within one; resolved via
        /// the active-plan pointer if omitted.
        target: Option<PathBuf>,
        /// Drive every runnable job to completion, re-polling as jobs
        /// unblock downstream dependents (`RunMode::All`).
        #[arg(long)]
        all: bool,
        /// Compute the runnable set once and drive it to completion
        /// without re-polling (`RunMode::Next`).
        #[arg(long)]
        next: bool,
        /// Override `MaxParallelJobs` for this run.
        #[arg(short = 'p', long)]
        parallel: Option<usize>,
        /// Skip confirmation prompts (accepted for CLI-surface parity;
        /// this core never prompts interactively).
        #[arg(short = 'y', long)]
        yes: bool,
        /// Model override, outranking both the job's own `model` field
        /// and the plan's default.
        #[arg(long)]
        model: Option<String>,
        /// Override `prepend_dependencies` for every job this run
        /// dispatches, outranking both the job's own flag and the plan's
        /// default.
        #[arg(long = "prepend-dependencies")]
        prepend_dependencies: Option<bool>,
        /// Accepted for CLI-surface parity; live progress display is a
        /// terminal-UI concern out of scope for this core.
        #[arg(long)]
        watch: bool,
        /// Accepted for CLI-surface parity; interactive agent hand-off is
        /// a terminal-UI concern out of scope for this core.
        #[arg(long = "skip-interactive")]
        skip_interactive: bool,
    },

    /// Show the status of every job in a plan.
    Status {
        #[arg(long)]
        plan: Option<PathBuf>,
        #[arg(short, long, default_value_t)]
        format: OutputFormat,
    },

    /// Show the plan's dependency graph in topological order.
    Graph {
        #[arg(long)]
        plan: Option<PathBuf>,
        #[arg(short, long, default_value_t)]
        format: OutputFormat,
    },

    /// Mark a plan `finished` (gates external cleanup flows).
    Finish {
        #[arg(long)]
        plan: Option<PathBuf>,
    },

    /// Mark a plan `review` (gates external cleanup flows).
    Review {
        #[arg(long)]
        plan: Option<PathBuf>,
    },

    /// Set the active plan pointer.
    Set {
        dir: PathBuf,
    },

    /// Print the active plan pointer, if any.
    Current,

    /// Clear the active plan pointer.
    Unset,
}

/// Job type as a CLI-selectable value (mirrors `domain::JobType`; kept
/// separate so `clap::ValueEnum` doesn't have to be derived on the domain
/// type itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum JobTypeArg {
    Oneshot,
    Agent,
    InteractiveAgent,
    HeadlessAgent,
    Shell,
    Chat,
    File,
}

impl From<JobTypeArg> for JobType {
    fn from(value: JobTypeArg) -> Self {
        match value {
            JobTypeArg::Oneshot => JobType::Oneshot,
            JobTypeArg::Agent => JobType::Agent,
            JobTypeArg::InteractiveAgent => JobType::InteractiveAgent,
            JobTypeArg::HeadlessAgent => JobType::HeadlessAgent,
            JobTypeArg::Shell => JobType::Shell,
            JobTypeArg::Chat => JobType::Chat,
            JobTypeArg::File => JobType::File,
        }
    }
}

/// Output format for `status`/`graph`.
#[derive(Debug, Clone, Copy, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown format '{s}', use: text or json")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
