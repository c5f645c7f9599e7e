//! Plan: a directory of job files plus its `.grove-plan.yml` config.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::job::Job;

/// Hook commands configured at the plan level. Each value is a shell
/// command template (rendered by the Hook Engine); absence means "no hook
/// of this kind".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanHooks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_complete: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_review: Option<String>,
}

/// Status of the plan as a whole, independent of any single job's status.
/// Gates the cleanup actions the CLI/finish-flow layer performs (the flows
/// themselves are out of scope here; this is just the field they read).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Active,
    Review,
    Finished,
}

impl PlanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Review => "review",
            Self::Finished => "finished",
        }
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The parsed contents of a plan directory's `.grove-plan.yml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<String>,
    #[serde(default)]
    pub repos: Vec<String>,
    /// Default for `Job::effective_prepend_dependencies` when a job
    /// doesn't override it.
    #[serde(default, rename = "prepend-dependencies")]
    pub prepend_dependencies: bool,
    #[serde(default)]
    pub status: PlanStatus,
    #[serde(default)]
    pub hooks: PlanHooks,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            model: None,
            worktree: None,
            repos: Vec::new(),
            prepend_dependencies: false,
            status: PlanStatus::default(),
            hooks: PlanHooks::default(),
        }
    }
}

/// An in-memory plan: its directory, parsed config, and every job file
/// loaded from it, keyed by filename.
#[derive(Debug, Clone)]
pub struct Plan {
    pub dir: PathBuf,
    pub config: PlanConfig,
    pub jobs: HashMap<String, Job>,
    /// Filenames in plan (directory-listing) order: the order-prefix sort
    /// used for tie-breaking and for deterministic iteration.
    pub order: Vec<String>,
    /// Set when the path originally passed to `loader::load` named a single
    /// job file rather than a plan directory: that file's name, within
    /// `dir` (its parent). Callers that want "just run/show this one job"
    /// semantics read this instead of re-deriving it from the original
    /// argument.
    pub target_job: Option<String>,
}

impl Plan {
    pub fn new(dir: PathBuf, config: PlanConfig) -> Self {
        Self { dir, config, jobs: HashMap::new(), order: Vec::new(), target_job: None }
    }

    /// The plan's name: its directory's basename.
    pub fn name(&self) -> String {
        self.dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
    }

    pub fn job(&self, filename: &str) -> Option<&Job> {
        self.jobs.get(filename)
    }

    pub fn job_mut(&mut self, filename: &str) -> Option<&mut Job> {
        self.jobs.get_mut(filename)
    }

    /// Look a job up by its `id` field if it has one, falling back to
    /// treating `reference` as a filename.
    pub fn resolve_reference(&self, reference: &str) -> Option<&str> {
        if self.jobs.contains_key(reference) {
            return Some(reference);
        }
        self.jobs
            .values()
            .find(|j| j.id.as_deref() == Some(reference))
            .map(|j| j.filename.as_str())
    }

    pub fn is_complete(&self) -> bool {
        self.jobs.values().all(|j| j.is_terminal())
    }

    pub fn jobs_in_order(&self) -> Vec<&Job> {
        self.order.iter().filter_map(|f| self.jobs.get(f)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::{JobFlags, JobType, OutputSpec};
    use crate::domain::status::JobStatus;

    fn job(filename: &str, id: Option<&str>) -> Job {
        Job {
            id: id.map(String::from),
            title: Some("t".into()),
            job_type: JobType::Shell,
            status: JobStatus::Pending,
            model: None,
            worktree: None,
            rules_file: None,
            note_ref: None,
            include_files: vec![],
            source_files: vec![],
            output: OutputSpec::default(),
            depends_on: vec![],
            flags: JobFlags::default(),
            error: None,
            session_id: None,
            output_file: None,
            commit_sha: None,
            started_at: None,
            completed_at: None,
            pid: None,
            process_started_at: None,
            session_name: None,
            body: String::new(),
            filename: filename.into(),
            resolved_dependencies: vec![],
        }
    }

    #[test]
    fn resolve_reference_prefers_filename_then_id() {
        let mut plan = Plan::new(PathBuf::from("/tmp/plan"), PlanConfig::default());
        plan.jobs.insert("010-a.md".into(), job("010-a.md", Some("alpha")));
        assert_eq!(plan.resolve_reference("010-a.md"), Some("010-a.md"));
        assert_eq!(plan.resolve_reference("alpha"), Some("010-a.md"));
        assert_eq!(plan.resolve_reference("missing"), None);
    }

    #[test]
    fn is_complete_requires_all_terminal() {
        let mut plan = Plan::new(PathBuf::from("/tmp/plan"), PlanConfig::default());
        let mut j1 = job("010-a.md", None);
        j1.status = JobStatus::Completed;
        let mut j2 = job("020-b.md", None);
        j2.status = JobStatus::Pending;
        plan.jobs.insert(j1.filename.clone(), j1);
        plan.jobs.insert(j2.filename.clone(), j2.clone());
        assert!(!plan.is_complete());
        plan.jobs.get_mut("020-b.md").unwrap().status = JobStatus::Abandoned;
        assert!(plan.is_complete());
    }
}
