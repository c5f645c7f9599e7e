//! Plan-mutating operations used by the CLI: adding a job file, and
//! transitioning plan-level status (`finish`/`review`).
//!
//! These are the thin write paths for a job's lifecycle (created by
//! "add step" or by extraction from an input specification) and for
//! the plan config's `status` field. Every
//! mutation still goes through `header::rebuild` / `persistence`, the same
//! disciplines the rest of the core uses — there is no separate "create a
//! job" code path that bypasses the Header Codec.

use std::path::PathBuf;

use serde_yaml::Value;
use thiserror::Error;
use tracing::debug;

use crate::domain::{Job, JobFlags, JobStatus, JobType, OutputSpec, Plan, PlanStatus};
use crate::header::{self, HeaderError};
use crate::persistence::{self, PersistError};

#[derive(Debug, Error)]
pub enum PlanOpsError {
    #[error("io error writing {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("failed to serialize new job header: {0}")]
    Serialize(#[from] serde_yaml::Error),
    #[error("header error: {0}")]
    Header(#[from] HeaderError),
    #[error("generated filename '{0}' already exists in the plan")]
    FilenameCollision(String),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Build the slug portion of a job filename from its title: lowercase,
/// non-alphanumeric runs collapsed to a single `-`, leading/trailing `-`
/// trimmed.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_was_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash && !slug.is_empty() {
            slug.push('-');
            last_was_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() { "job".to_string() } else { slug }
}

/// The next order prefix to use for a new job file: ten past the highest
/// numeric prefix already in use, or 10 if the plan has no jobs yet.
/// Matches `graph::order_key`'s own numeric-prefix parsing, so a freshly
/// added job always sorts after every existing one.
pub fn next_order_prefix(plan: &Plan) -> u32 {
    plan.order
        .iter()
        .filter_map(|f| {
            let digits: String = f.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u32>().ok()
        })
        .max()
        .map(|max| max + 10)
        .unwrap_or(10)
}

/// Parameters for a new job. Everything not listed here takes its `Job`
/// default (no rules file, no include files, `output.type: none`, etc.)
pub struct NewJob {
    pub title: String,
    pub job_type: JobType,
    pub depends_on: Vec<String>,
    pub model: Option<String>,
    pub body: String,
}

/// Create a new job file in `plan`'s directory and register it in the
/// in-memory plan. Returns the new job's filename.
///
/// Dependency references are taken as given (ids or filenames); they are
/// not validated against the plan here — a dangling reference surfaces as
/// `PlanLoadError::UnresolvedDependency` the next time the plan is loaded,
/// exactly as a hand-written job file with a typo'd `depends_on` would.
pub async fn add_job(plan: &mut Plan, new_job: NewJob) -> Result<String, PlanOpsError> {
    debug!(title = %new_job.title, "plan_ops::add_job: called");
    let order = next_order_prefix(plan);
    let slug = slugify(&new_job.title);
    let filename = format!("{order:03}-{slug}.md");
    if plan.jobs.contains_key(&filename) {
        return Err(PlanOpsError::FilenameCollision(filename));
    }

    let job = Job {
        id: None,
        title: Some(new_job.title),
        job_type: new_job.job_type,
        status: JobStatus::Pending,
        model: new_job.model,
        worktree: None,
        rules_file: None,
        note_ref: None,
        include_files: Vec::new(),
        source_files: Vec::new(),
        output: OutputSpec::default(),
        depends_on: new_job.depends_on,
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
        body: new_job.body,
        filename: filename.clone(),
        resolved_dependencies: Vec::new(),
    };

    let Value::Mapping(mapping) = serde_yaml::to_value(&job)? else {
        unreachable!("Job always serializes to a YAML mapping");
    };
    let contents = header::rebuild(Some(&mapping), &job.body)?;

    let path = plan.dir.join(&filename);
    tokio::fs::write(&path, contents).await.map_err(|e| PlanOpsError::Io(path.clone(), e))?;

    plan.order.push(filename.clone());
    plan.jobs.insert(filename.clone(), job);
    Ok(filename)
}

/// Set the plan's status field (`active`/`review`/`finished`) and persist
/// `.grove-plan.yml`. The cleanup actions a status transition gates are
/// external; this only flips the field the gate reads.
pub async fn set_plan_status(
    plan: &mut Plan,
    status: PlanStatus,
    config_filename: &str,
) -> Result<(), PlanOpsError> {
    debug!(?status, "plan_ops::set_plan_status: called");
    plan.config.status = status;
    let path = plan.dir.join(config_filename);
    persistence::write_plan_config(&path, &plan.config).await?;
    Ok(())
}
