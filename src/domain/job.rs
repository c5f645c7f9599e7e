//! Job: a single unit of work inside a plan, backed by one markdown file
//! with a YAML frontmatter header.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::JobStatus;

/// What backend a job dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// A single stateless completion request to an LLM.
    Oneshot,
    /// A long-running interactive agent session (e.g. attached to a
    /// terminal multiplexer).
    Agent,
    InteractiveAgent,
    /// A non-interactive agent run inside a container, driven to
    /// completion without a human in the loop.
    HeadlessAgent,
    /// A plain subprocess.
    Shell,
    /// A conversational, multi-turn job that keeps accumulating context
    /// across runs rather than resetting it.
    Chat,
    /// A job whose "execution" is just materializing or transforming a
    /// file; no backend process runs.
    File,
}

/// What happens to a job's output once its backend finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputPolicy {
    /// Write backend output to `output.path` relative to the plan directory.
    File,
    /// Commit the worktree's changes using the job's title as message.
    Commit,
    /// Discard backend output; the job's only effect is its exit status.
    #[default]
    None,
    /// Backend output is itself a set of new job files to add to the plan.
    GenerateJobs,
}

/// Output handling configuration for a job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(rename = "type", default)]
    pub kind: OutputPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Per-job flags that tweak executor/scheduler behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobFlags {
    /// For agent-type jobs: resume the previous session rather than
    /// starting fresh.
    #[serde(default)]
    pub agent_continue: bool,
    /// Overrides the plan-level `prepend_dependencies` setting for this
    /// job specifically. `None` means "inherit from the plan".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepend_dependencies: Option<bool>,
}

/// A single job: the typed view over a job file's header plus its body.
///
/// This type only models the keys it knows about. Header keys it doesn't
/// recognize aren't dropped: `header::rebuild`/`header::update` operate on
/// the raw `serde_yaml::Mapping` directly, so unknown keys a newer or
/// out-of-tree tool wrote survive a rewrite untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub job_type: JobType,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<String>,
    #[serde(default, rename = "rules_file", skip_serializing_if = "Option::is_none")]
    pub rules_file: Option<String>,
    #[serde(default, rename = "note_ref", skip_serializing_if = "Option::is_none")]
    pub note_ref: Option<String>,
    #[serde(default, rename = "include_files")]
    pub include_files: Vec<String>,
    #[serde(default, rename = "source_files")]
    pub source_files: Vec<String>,
    #[serde(default)]
    pub output: OutputSpec,
    #[serde(default, rename = "depends_on")]
    pub depends_on: Vec<String>,
    #[serde(default, flatten)]
    pub flags: JobFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,

    /// The raw, unparsed job body (everything after the closing `---`).
    #[serde(skip)]
    pub body: String,
    /// Source filename, e.g. `010-add-oauth.md`. Not part of the header;
    /// derived from the file's path when loaded.
    #[serde(skip)]
    pub filename: String,
    /// Jobs this job depends on, resolved to filenames at load time by the
    /// Plan Loader. Distinct from `depends_on`, which holds the raw
    /// references as written in the header (ids or filenames).
    #[serde(skip)]
    pub resolved_dependencies: Vec<String>,
}

impl Job {
    /// Whether this job, on its own (ignoring dependencies), is in a state
    /// the scheduler will pick up automatically.
    pub fn is_auto_runnable(&self) -> bool {
        self.status.is_auto_runnable()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The effective `prepend_dependencies` setting for this job: its own
    /// override if set, otherwise the plan's default.
    pub fn effective_prepend_dependencies(&self, plan_default: bool) -> bool {
        self.flags.prepend_dependencies.unwrap_or(plan_default)
    }

    /// A stable key used to identify this job, preferring the explicit
    /// `id` field and falling back to the filename.
    pub fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.filename)
    }
}
