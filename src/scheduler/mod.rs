//! Scheduler: orchestrates one run of a plan — picking runnable jobs up
//! to a parallelism cap, dispatching them to the Executor, persisting
//! status transitions, driving the Hook Engine, and honoring
//! cancellation.
//!
//! `RunMode::Single` runs exactly one job; `RunMode::Next` computes the
//! runnable set once and drives it to completion without re-polling for
//! newly unblocked jobs; `RunMode::All` loops until nothing is runnable
//! and nothing is in flight.

pub mod config;

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::domain::{JobStatus, Plan};
use crate::executor::{ExecutionOutcome, Executor, ExecutorError};
use crate::graph::{DependencyGraph, GraphError};
use crate::hooks::{HookEngine, HookKind};
use crate::liveness::{self, LivenessError};
use crate::loader::{self, PlanLoadError};
use crate::persistence::{JobStore, PersistError};

pub use config::SchedulerConfig;

type JobJoinSet = JoinSet<(String, Result<ExecutionOutcome, ExecutorError>)>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job '{0}' not found in plan")]
    JobNotFound(String),
    #[error("job '{0}' is already completed")]
    AlreadyCompleted(String),
    #[error("job '{0}' is already running")]
    AlreadyRunning(String),
    #[error("job '{job}' has unmet dependency '{dependency}' (status: {status})")]
    UnmetDependency { job: String, dependency: String, status: String },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    PlanLoad(#[from] PlanLoadError),
    #[error(transparent)]
    Liveness(#[from] LivenessError),
}

/// What a single call to `Scheduler::run` should do.
pub enum RunMode {
    /// Run exactly one job, identified by filename.
    Single(String),
    /// Compute the runnable set once and drive it to completion.
    Next,
    /// Loop until nothing is runnable and nothing is in flight.
    All,
}

/// What happened during a run, for the caller (typically the CLI) to
/// report to the user.
#[derive(Debug, Default)]
pub struct RunReport {
    pub dispatched: Vec<String>,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    /// Jobs that were runnable but declined this run because dispatching
    /// them would have exceeded `MaxConsecutiveSteps` for their chain.
    pub deferred_for_consecutive_cap: Vec<String>,
    pub cancelled: bool,
}

/// The sending half of a cancellation signal. Cloning and sending from
/// another task (e.g. a Ctrl-C handler) is the intended usage.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    tx: watch::Sender<bool>,
}

impl CancellationHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// The receiving half, threaded through `Scheduler::run`.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    /// A cancellation that will never fire — for callers that don't need
    /// one (single-shot test harnesses, simple CLI invocations without a
    /// signal handler wired up).
    pub fn none() -> Self {
        cancellation_pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Build a linked `(handle, receiver)` pair.
pub fn cancellation_pair() -> (CancellationHandle, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancellationHandle { tx }, Cancellation { rx })
}

pub struct Scheduler {
    store: Arc<JobStore>,
    hooks: Arc<HookEngine>,
    executor: Arc<Executor>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(store: Arc<JobStore>, hooks: Arc<HookEngine>, executor: Arc<Executor>, config: SchedulerConfig) -> Self {
        Self { store, hooks, executor, config }
    }

    /// Load a plan and reconcile any stale `running` jobs left behind by a
    /// crashed prior process, in one step — the normal way to obtain a
    /// `Plan` before calling `run`. `path` may name the plan directory or a
    /// single job file within it; see `loader::load`.
    pub async fn open_plan(path: &Path, store: &JobStore) -> Result<Plan, SchedulerError> {
        let mut plan = loader::load(path)?;
        liveness::reconcile_plan(store, &mut plan).await?;
        Ok(plan)
    }

    pub async fn run(&self, plan: &mut Plan, mode: RunMode, cancel: &Cancellation) -> Result<RunReport, SchedulerError> {
        debug!(plan = %plan.dir.display(), "Scheduler::run: called");
        let mut report = RunReport::default();
        match mode {
            RunMode::Single(filename) => self.run_single(plan, &filename, cancel, &mut report).await?,
            RunMode::Next => self.run_next(plan, cancel, &mut report).await?,
            RunMode::All => self.run_all(plan, cancel, &mut report).await?,
        }
        self.hooks.drain().await;
        debug!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            "Scheduler::run: finished"
        );
        Ok(report)
    }

    async fn run_single(
        &self,
        plan: &mut Plan,
        filename: &str,
        cancel: &Cancellation,
        report: &mut RunReport,
    ) -> Result<(), SchedulerError> {
        let status = plan
            .jobs
            .get(filename)
            .ok_or_else(|| SchedulerError::JobNotFound(filename.to_string()))?
            .status;
        match status {
            JobStatus::Completed => return Err(SchedulerError::AlreadyCompleted(filename.to_string())),
            JobStatus::Running => return Err(SchedulerError::AlreadyRunning(filename.to_string())),
            _ => {}
        }

        {
            let graph = DependencyGraph::build(&plan.jobs)?;
            let job = &plan.jobs[filename];
            if !graph.dependencies_satisfied(job) {
                let blockers = graph
                    .unmet()
                    .into_iter()
                    .find(|(j, _)| j.filename == filename)
                    .map(|(_, blockers)| blockers)
                    .unwrap_or_default();
                if let Some(dependency) = blockers.first() {
                    let dep_status =
                        plan.jobs.get(*dependency).map(|j| j.status.to_string()).unwrap_or_default();
                    return Err(SchedulerError::UnmetDependency {
                        job: filename.to_string(),
                        dependency: dependency.to_string(),
                        status: dep_status,
                    });
                }
            }
        }

        // Rerunning a failed job resets it to pending first — a fresh
        // execution, not a resume.
        if status == JobStatus::Failed {
            self.reset_to_pending(plan, filename).await?;
        }

        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(());
        }

        let mut chain_depth = HashMap::new();
        let mut join_set: JobJoinSet = JoinSet::new();
        let mut in_flight = HashSet::new();
        self.dispatch(plan, filename, &mut chain_depth, &mut join_set, &mut in_flight, report).await?;
        self.wait_and_finalize_one(plan, &mut join_set, &mut in_flight, report).await?;
        Ok(())
    }

    async fn run_next(&self, plan: &mut Plan, cancel: &Cancellation, report: &mut RunReport) -> Result<(), SchedulerError> {
        let mut queue: VecDeque<String> =
            DependencyGraph::build(&plan.jobs)?.runnable().into_iter().map(|j| j.filename.clone()).collect();
        let mut chain_depth: HashMap<String, usize> = HashMap::new();
        let mut join_set: JobJoinSet = JoinSet::new();
        let mut in_flight: HashSet<String> = HashSet::new();

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                self.drain_with_grace(plan, &mut join_set, &mut in_flight, report).await;
                break;
            }

            while in_flight.len() < self.config.max_parallel_jobs {
                let Some(filename) = queue.pop_front() else { break };
                if !self.within_consecutive_cap(&filename, plan, &chain_depth) {
                    record_deferred(report, &filename);
                    continue;
                }
                self.dispatch(plan, &filename, &mut chain_depth, &mut join_set, &mut in_flight, report).await?;
            }

            if in_flight.is_empty() {
                break;
            }

            self.wait_and_finalize_one(plan, &mut join_set, &mut in_flight, report).await?;
        }
        Ok(())
    }

    async fn run_all(&self, plan: &mut Plan, cancel: &Cancellation, report: &mut RunReport) -> Result<(), SchedulerError> {
        let mut chain_depth: HashMap<String, usize> = HashMap::new();
        let mut join_set: JobJoinSet = JoinSet::new();
        let mut in_flight: HashSet<String> = HashSet::new();

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                self.drain_with_grace(plan, &mut join_set, &mut in_flight, report).await;
                break;
            }

            let candidates: Vec<String> =
                DependencyGraph::build(&plan.jobs)?.runnable().into_iter().map(|j| j.filename.clone()).collect();
            for filename in candidates {
                if in_flight.len() >= self.config.max_parallel_jobs {
                    break;
                }
                if in_flight.contains(&filename) {
                    continue;
                }
                if !self.within_consecutive_cap(&filename, plan, &chain_depth) {
                    record_deferred(report, &filename);
                    continue;
                }
                self.dispatch(plan, &filename, &mut chain_depth, &mut join_set, &mut in_flight, report).await?;
            }

            if in_flight.is_empty() {
                break;
            }

            self.wait_and_finalize_one(plan, &mut join_set, &mut in_flight, report).await?;
        }
        Ok(())
    }

    /// Wait, at most `cancellation_grace`, for in-flight jobs to finish on
    /// their own after a cancellation. Anything still running when the
    /// grace period elapses is simply abandoned: it stays `running` in
    /// persistence (already written by `dispatch`/`mark_running`), and a
    /// future `Scheduler::open_plan` call's Liveness Verifier resolves it.
    async fn drain_with_grace(
        &self,
        plan: &mut Plan,
        join_set: &mut JobJoinSet,
        in_flight: &mut HashSet<String>,
        report: &mut RunReport,
    ) {
        if in_flight.is_empty() {
            return;
        }
        let grace = self.config.cancellation_grace();
        let deadline = tokio::time::Instant::now() + grace;
        while !in_flight.is_empty() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, self.wait_and_finalize_one(plan, join_set, in_flight, report)).await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "error finalizing job during cancellation drain"),
                Err(_) => break,
            }
        }
        if !in_flight.is_empty() {
            warn!(
                remaining = in_flight.len(),
                "cancellation grace period elapsed with jobs still running"
            );
        }
    }

    fn compute_chain_depth(&self, filename: &str, plan: &Plan, chain_depth: &HashMap<String, usize>) -> usize {
        let deps = &plan.jobs[filename].resolved_dependencies;
        let max_dep_depth = deps.iter().filter_map(|d| chain_depth.get(d)).copied().max().unwrap_or(0);
        max_dep_depth + 1
    }

    fn within_consecutive_cap(&self, filename: &str, plan: &Plan, chain_depth: &HashMap<String, usize>) -> bool {
        match self.config.max_consecutive_steps {
            None => true,
            Some(max) => self.compute_chain_depth(filename, plan, chain_depth) <= max,
        }
    }

    async fn reset_to_pending(&self, plan: &mut Plan, filename: &str) -> Result<(), SchedulerError> {
        let path = plan.dir.join(filename);
        let mut patch = Mapping::new();
        patch.insert(Value::from("status"), Value::from("pending"));
        patch.insert(Value::from("error"), Value::Null);
        self.store.update(&path, &patch).await?;

        let job = plan.jobs.get_mut(filename).expect("job exists: checked by caller");
        job.status = JobStatus::Pending;
        job.error = None;
        Ok(())
    }

    async fn mark_running(&self, plan: &mut Plan, filename: &str) -> Result<(), SchedulerError> {
        let path = plan.dir.join(filename);
        let now = Utc::now();
        let pid = std::process::id();

        let mut patch = Mapping::new();
        patch.insert(Value::from("status"), Value::from("running"));
        patch.insert(Value::from("pid"), Value::from(pid as u64));
        patch.insert(Value::from("process_started_at"), Value::from(now.to_rfc3339()));
        patch.insert(Value::from("started_at"), Value::from(now.to_rfc3339()));
        self.store.update(&path, &patch).await?;

        let job = plan.jobs.get_mut(filename).expect("job exists: checked by caller");
        job.status = JobStatus::Running;
        job.pid = Some(pid);
        job.process_started_at = Some(now);
        job.started_at = Some(now);
        Ok(())
    }

    /// Transition `filename` to `running`, fire its start hooks, and spawn
    /// its backend execution as a task against an immutable snapshot of
    /// the plan taken at this instant.
    async fn dispatch(
        &self,
        plan: &mut Plan,
        filename: &str,
        chain_depth: &mut HashMap<String, usize>,
        join_set: &mut JobJoinSet,
        in_flight: &mut HashSet<String>,
        report: &mut RunReport,
    ) -> Result<(), SchedulerError> {
        let depth = self.compute_chain_depth(filename, plan, chain_depth);
        chain_depth.insert(filename.to_string(), depth);

        self.mark_running(plan, filename).await?;
        {
            let job = &plan.jobs[filename];
            self.hooks.fire(HookKind::OnStart, plan, job).await;
        }
        {
            let job = &plan.jobs[filename];
            self.hooks.fire(HookKind::OnStatus, plan, job).await;
        }
        report.dispatched.push(filename.to_string());

        let plan_snapshot = Arc::new(plan.clone());
        let executor = self.executor.clone();
        let fname = filename.to_string();
        join_set.spawn(async move {
            let job = plan_snapshot
                .jobs
                .get(&fname)
                .cloned()
                .expect("dispatched job present in its own plan snapshot");
            let result = executor.execute(&plan_snapshot, &job).await;
            (fname, result)
        });
        in_flight.insert(filename.to_string());
        Ok(())
    }

    async fn wait_and_finalize_one(
        &self,
        plan: &mut Plan,
        join_set: &mut JobJoinSet,
        in_flight: &mut HashSet<String>,
        report: &mut RunReport,
    ) -> Result<(), SchedulerError> {
        let Some(joined) = join_set.join_next().await else {
            return Ok(());
        };
        // a panic here would mean a bug in Executor::execute, not a normal
        // job failure (those come back as `Err(ExecutorError)`); there is
        // no meaningful recovery for this process.
        let (filename, result) = joined.expect("job execution task panicked");
        in_flight.remove(&filename);
        self.finalize_job(plan, &filename, result, report).await
    }

    async fn finalize_job(
        &self,
        plan: &mut Plan,
        filename: &str,
        result: Result<ExecutionOutcome, ExecutorError>,
        report: &mut RunReport,
    ) -> Result<(), SchedulerError> {
        let summary = Finalized::from_result(&result);
        let path = plan.dir.join(filename);

        let mut patch = Mapping::new();
        patch.insert(Value::from("status"), Value::from(summary.status.as_str()));
        patch.insert(Value::from("completed_at"), Value::from(summary.completed_at.to_rfc3339()));
        if let Some(error) = &summary.error {
            patch.insert(Value::from("error"), Value::from(error.as_str()));
        }
        if let Some(session_id) = &summary.session_id {
            patch.insert(Value::from("session_id"), Value::from(session_id.as_str()));
        }
        if let Some(output_file) = &summary.output_file {
            patch.insert(Value::from("output_file"), Value::from(output_file.as_str()));
        }
        if let Some(commit_sha) = &summary.commit_sha {
            patch.insert(Value::from("commit_sha"), Value::from(commit_sha.as_str()));
        }
        self.store.update(&path, &patch).await?;

        {
            let job = plan.jobs.get_mut(filename).expect("job exists: dispatched earlier in this run");
            job.status = summary.status;
            job.error = summary.error.clone();
            job.completed_at = Some(summary.completed_at);
            if summary.session_id.is_some() {
                job.session_id = summary.session_id.clone();
            }
            job.output_file = summary.output_file.clone();
            job.commit_sha = summary.commit_sha.clone();
        }

        {
            let job = &plan.jobs[filename];
            if job.status == JobStatus::Completed {
                self.hooks.fire(HookKind::OnComplete, plan, job).await;
                report.completed.push(filename.to_string());
            } else {
                self.hooks.fire(HookKind::OnFailed, plan, job).await;
                report.failed.push(filename.to_string());
            }
        }
        {
            let job = &plan.jobs[filename];
            self.hooks.fire(HookKind::OnStatus, plan, job).await;
        }

        if !summary.generated_job_filenames.is_empty() {
            info!(
                job = filename,
                count = summary.generated_job_filenames.len(),
                "reloading plan after generate_jobs output"
            );
            *plan = loader::load(&plan.dir)?;
        }

        Ok(())
    }
}

fn record_deferred(report: &mut RunReport, filename: &str) {
    if !report.deferred_for_consecutive_cap.iter().any(|f| f == filename) {
        report.deferred_for_consecutive_cap.push(filename.to_string());
    }
}

/// The fields pulled out of an `Executor::execute` result that get folded
/// into both the persisted header patch and the in-memory `Job`.
struct Finalized {
    status: JobStatus,
    error: Option<String>,
    completed_at: chrono::DateTime<Utc>,
    session_id: Option<String>,
    output_file: Option<String>,
    commit_sha: Option<String>,
    generated_job_filenames: Vec<String>,
}

impl Finalized {
    fn from_result(result: &Result<ExecutionOutcome, ExecutorError>) -> Self {
        match result {
            Ok(outcome) if outcome.succeeded => Self {
                status: JobStatus::Completed,
                error: None,
                completed_at: outcome.completed_at,
                session_id: outcome.backend_output.session_id.clone(),
                output_file: outcome.output_result.output_file.clone(),
                commit_sha: outcome.output_result.commit_sha.clone(),
                generated_job_filenames: outcome.output_result.generated_job_filenames.clone(),
            },
            Ok(outcome) => Self {
                status: JobStatus::Failed,
                error: Some(if outcome.backend_output.stderr.trim().is_empty() {
                    "backend did not succeed".to_string()
                } else {
                    outcome.backend_output.stderr.clone()
                }),
                completed_at: outcome.completed_at,
                session_id: None,
                output_file: None,
                commit_sha: None,
                generated_job_filenames: Vec::new(),
            },
            Err(e) => Self {
                status: JobStatus::Failed,
                error: Some(e.to_string()),
                completed_at: Utc::now(),
                session_id: None,
                output_file: None,
                commit_sha: None,
                generated_job_filenames: Vec::new(),
            },
        }
    }
}
