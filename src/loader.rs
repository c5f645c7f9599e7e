//! Plan Loader: reads a plan directory off disk into an in-memory `Plan`.

use std::path::{Path, PathBuf};

use serde_yaml::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{Job, Plan, PlanConfig};
use crate::graph::{DependencyGraph, GraphError};
use crate::header;

const PLAN_CONFIG_FILENAME: &str = ".grove-plan.yml";
const JOB_FILE_GLOB: &str = "*.md";

#[derive(Debug, Error)]
pub enum PlanLoadError {
    #[error("failed to read plan directory {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("failed to parse plan config {0}: {1}")]
    PlanConfig(PathBuf, serde_yaml::Error),
    #[error("failed to parse job file {0}: {1}")]
    JobHeader(PathBuf, header::HeaderError),
    #[error("failed to deserialize job header in {0}: {1}")]
    JobFields(PathBuf, serde_yaml::Error),
    #[error("job file {0} has no '---' header region at all (expected at least a 'type' field)")]
    MissingHeader(PathBuf),
    #[error("duplicate job id '{0}' used by both {1} and {2}")]
    DuplicateJob(String, String, String),
    #[error("job '{job}' depends on unresolvable reference '{reference}'")]
    UnresolvedDependency { job: String, reference: String },
    #[error("cyclic dependency: {0}")]
    CyclicDependency(String),
    #[error("glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),
}

impl From<GraphError> for PlanLoadError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::Cycle(path) => PlanLoadError::CyclicDependency(path.join(" -> ")),
            GraphError::UnresolvedDependency(job, reference) => {
                PlanLoadError::UnresolvedDependency { job, reference }
            }
        }
    }
}

/// Load a plan from `path`. `path` may name a plan directory directly, or a
/// single chat-style job file within one (e.g. `grove run plan/030-chat.md`);
/// in the latter case its parent directory is loaded as the plan and the
/// file's own name is recorded on `Plan::target_job` for the caller to read
/// back, rather than every caller re-deriving the file/directory split
/// itself.
///
/// Otherwise: reads `.grove-plan.yml` (or defaults if absent), every job
/// file matching the job-file pattern, and the resolved dependency graph,
/// validated for duplicates, unresolved references, and cycles.
pub fn load(path: &Path) -> Result<Plan, PlanLoadError> {
    debug!(path = %path.display(), "loader::load: called");

    let (dir, target_job) = if path.is_file() {
        let parent = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let filename = path.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_default();
        (parent, Some(filename))
    } else {
        (path.to_path_buf(), None)
    };
    let dir = dir.as_path();

    let config = load_plan_config(dir)?;
    let mut plan = Plan::new(dir.to_path_buf(), config);
    plan.target_job = target_job;

    let pattern = dir.join(JOB_FILE_GLOB);
    let pattern_str = pattern.to_string_lossy().to_string();
    let mut paths: Vec<PathBuf> = glob::glob(&pattern_str)?.filter_map(Result::ok).collect();
    paths.sort();

    for path in &paths {
        let job = load_job_file(path)?;
        let filename = job.filename.clone();
        if let Some(id) = &job.id {
            if let Some(existing) = plan.jobs.values().find(|j| j.id.as_deref() == Some(id.as_str())) {
                return Err(PlanLoadError::DuplicateJob(id.clone(), existing.filename.clone(), filename));
            }
        }
        plan.order.push(filename.clone());
        plan.jobs.insert(filename, job);
    }

    resolve_dependencies(&mut plan)?;

    // Validates acyclicity and unresolved-reference invariants as a final
    // pass over the fully-linked graph (resolve_dependencies above already
    // maps references to filenames, but building the graph is what
    // actually walks it for cycles).
    DependencyGraph::build(&plan.jobs)?;

    debug!(job_count = plan.jobs.len(), "loader::load: completed");
    Ok(plan)
}

fn load_plan_config(dir: &Path) -> Result<PlanConfig, PlanLoadError> {
    let path = dir.join(PLAN_CONFIG_FILENAME);
    if !path.exists() {
        debug!(path = %path.display(), "loader::load_plan_config: no plan config file, using defaults");
        return Ok(PlanConfig::default());
    }
    let text = std::fs::read_to_string(&path).map_err(|e| PlanLoadError::Io(path.clone(), e))?;
    serde_yaml::from_str(&text).map_err(|e| PlanLoadError::PlanConfig(path, e))
}

fn load_job_file(path: &Path) -> Result<Job, PlanLoadError> {
    debug!(path = %path.display(), "loader::load_job_file: called");
    let bytes = std::fs::read(path).map_err(|e| PlanLoadError::Io(path.to_path_buf(), e))?;
    let parsed = header::parse(&bytes).map_err(|e| PlanLoadError::JobHeader(path.to_path_buf(), e))?;
    let Some(mapping) = parsed.header else {
        return Err(PlanLoadError::MissingHeader(path.to_path_buf()));
    };

    let mut job: Job = serde_yaml::from_value(Value::Mapping(mapping))
        .map_err(|e| PlanLoadError::JobFields(path.to_path_buf(), e))?;
    job.body = parsed.body;
    job.filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());
    Ok(job)
}

/// Resolve each job's raw `depends_on` references (ids or filenames) into
/// the filenames used as graph node keys, recording them on
/// `resolved_dependencies`.
fn resolve_dependencies(plan: &mut Plan) -> Result<(), PlanLoadError> {
    let filenames: Vec<String> = plan.order.clone();
    for filename in filenames {
        let raw_deps = plan.jobs.get(&filename).unwrap().depends_on.clone();
        let mut resolved = Vec::with_capacity(raw_deps.len());
        for reference in raw_deps {
            match plan.resolve_reference(&reference) {
                Some(target) => resolved.push(target.to_string()),
                None => {
                    return Err(PlanLoadError::UnresolvedDependency { job: filename, reference });
                }
            }
        }
        plan.jobs.get_mut(&filename).unwrap().resolved_dependencies = resolved;
    }
    Ok(())
}

/// Re-load a single job file's header in isolation (used by the Liveness
/// Verifier and executor to pick up out-of-band edits without reloading
/// the whole plan).
pub fn reload_job(path: &Path) -> Result<Job, PlanLoadError> {
    let job = load_job_file(path)?;
    if job.status.is_terminal() {
        debug!(filename = %job.filename, "loader::reload_job: job is already terminal");
    }
    Ok(job)
}

pub(crate) fn warn_on_abandoned_unblock(job_filename: &str, dependency_filename: &str) {
    warn!(
        job = job_filename,
        dependency = dependency_filename,
        "job unblocked through an abandoned dependency"
    );
}
