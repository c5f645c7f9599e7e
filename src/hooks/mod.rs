//! Hook Engine: fires plan-configured shell commands on job lifecycle
//! events, fire-and-forget, with a drain barrier the scheduler waits on
//! between run-mode invocations so a hook that's still running doesn't
//! straddle two scheduler steps.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use handlebars::Handlebars;
use serde_json::json;
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::{Job, Plan, PlanHooks};

const HOOK_LOG_FILENAME: &str = ".grove-hooks.log";
const DEFAULT_HOOK_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("failed to render hook template: {0}")]
    Template(#[from] handlebars::RenderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    OnStart,
    OnComplete,
    OnFailed,
    OnStatus,
    OnReview,
}

impl HookKind {
    fn select(self, hooks: &PlanHooks) -> Option<&str> {
        match self {
            Self::OnStart => hooks.on_start.as_deref(),
            Self::OnComplete => hooks.on_complete.as_deref(),
            Self::OnFailed => hooks.on_failed.as_deref(),
            Self::OnStatus => hooks.on_status.as_deref(),
            Self::OnReview => hooks.on_review.as_deref(),
        }
    }
}

/// Fires plan hooks and tracks in-flight hook processes so callers can
/// drain them before treating a scheduler run as fully finished.
pub struct HookEngine {
    handlebars: Handlebars<'static>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
    timeout: Duration,
}

impl Default for HookEngine {
    fn default() -> Self {
        Self {
            handlebars: Handlebars::new(),
            in_flight: Mutex::new(Vec::new()),
            timeout: Duration::from_secs(DEFAULT_HOOK_TIMEOUT_SECS),
        }
    }
}

impl HookEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the per-hook timeout ceiling. A hook command still running
    /// when its timeout elapses is killed; this never fails the job it's
    /// attached to (see `HookError` policy).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fire `kind` for `job`, if the plan configures one. Fire-and-forget:
    /// returns as soon as the command is spawned, not when it finishes.
    /// Template rendering failures and spawn failures are logged, not
    /// propagated — a broken hook must never fail the job it's attached
    /// to.
    pub async fn fire(&self, kind: HookKind, plan: &Plan, job: &Job) {
        let Some(template) = kind.select(&plan.config.hooks) else {
            return;
        };
        debug!(job = %job.filename, ?kind, "HookEngine::fire: called");

        let context = json!({
            "plan_name": plan.name(),
            "plan_dir": plan.dir.display().to_string(),
            "job_id": job.key(),
            "job_filename": job.filename,
            "job_title": job.title.clone().unwrap_or_default(),
            "status": job.status.to_string(),
            "job_status": job.status.to_string(),
            "job_error": job.error.clone().unwrap_or_default(),
            "output_file": job.output_file.clone().unwrap_or_default(),
            "note_ref": job.note_ref.clone().unwrap_or_default(),
        });

        let rendered = match self.handlebars.render_template(template, &context) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(error = %e, ?kind, "hook template failed to render, skipping");
                return;
            }
        };

        let handle = spawn_hook_command(kind, rendered, plan.dir.clone(), self.timeout);
        self.in_flight.lock().await.push(handle);
    }

    /// Fire `kind` for a plan-level transition that isn't about any single
    /// job (currently just `on_review`, fired when a plan's status is set
    /// to `review`). Same fire-and-forget semantics as `fire`, with a
    /// template context of plan-level variables only.
    pub async fn fire_plan(&self, kind: HookKind, plan: &Plan) {
        let Some(template) = kind.select(&plan.config.hooks) else {
            return;
        };
        debug!(?kind, "HookEngine::fire_plan: called");

        let context = json!({
            "plan_name": plan.name(),
            "plan_dir": plan.dir.display().to_string(),
            "status": plan.config.status.to_string(),
        });

        let rendered = match self.handlebars.render_template(template, &context) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(error = %e, ?kind, "hook template failed to render, skipping");
                return;
            }
        };

        let handle = spawn_hook_command(kind, rendered, plan.dir.clone(), self.timeout);
        self.in_flight.lock().await.push(handle);
    }

    /// Await every hook spawned since the last drain. Called at the end of
    /// a scheduler step so that, e.g., an `on_complete` hook that writes a
    /// status file is guaranteed to have finished before the scheduler
    /// re-reads plan state for its next dispatch decision.
    pub async fn drain(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.in_flight.lock().await);
        debug!(count = handles.len(), "HookEngine::drain: called");
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// Launch one rendered hook command as a detached task: run it under a
/// timeout ceiling, capture its stdout/stderr, and append a record of the
/// outcome to the hook log beside the plan. Never returns an error to the
/// caller — failures are logged and recorded, matching the "hook failures
/// never fail the parent job" policy.
fn spawn_hook_command(kind: HookKind, rendered: String, cwd: PathBuf, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(command = %rendered, ?kind, "HookEngine: spawning hook command");
        let child = Command::new("sh")
            .arg("-c")
            .arg(&rendered)
            .current_dir(&cwd)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let outcome = match child {
            Ok(child) => match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(Ok(output)) => HookOutcome::Finished {
                    success: output.status.success(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                },
                Ok(Err(e)) => HookOutcome::SpawnFailed(e.to_string()),
                Err(_) => HookOutcome::TimedOut,
            },
            Err(e) => HookOutcome::SpawnFailed(e.to_string()),
        };

        match &outcome {
            HookOutcome::Finished { success: false, .. } => {
                warn!(%rendered, ?kind, "hook command exited non-zero")
            }
            HookOutcome::SpawnFailed(e) => warn!(%rendered, ?kind, error = %e, "hook command failed to spawn"),
            HookOutcome::TimedOut => warn!(%rendered, ?kind, ?timeout, "hook command timed out"),
            HookOutcome::Finished { success: true, .. } => {}
        }

        append_hook_log(&cwd, kind, &rendered, &outcome).await;
    })
}

enum HookOutcome {
    Finished { success: bool, stdout: String, stderr: String },
    SpawnFailed(String),
    TimedOut,
}

/// Append one record of a finished hook invocation to `.grove-hooks.log`
/// beside the plan. Best-effort: a failure to write the log is itself just
/// a `warn!`, never propagated.
async fn append_hook_log(plan_dir: &std::path::Path, kind: HookKind, command: &str, outcome: &HookOutcome) {
    let line = match outcome {
        HookOutcome::Finished { success, stdout, stderr } => format!(
            "[{}] {:?} success={} command={:?}\n  stdout: {}\n  stderr: {}\n",
            Utc::now().to_rfc3339(),
            kind,
            success,
            command,
            stdout.trim(),
            stderr.trim()
        ),
        HookOutcome::SpawnFailed(e) => {
            format!("[{}] {:?} spawn_failed={} command={:?}\n", Utc::now().to_rfc3339(), kind, e, command)
        }
        HookOutcome::TimedOut => {
            format!("[{}] {:?} timed_out command={:?}\n", Utc::now().to_rfc3339(), kind, command)
        }
    };

    let path = plan_dir.join(HOOK_LOG_FILENAME);
    match OpenOptions::new().create(true).append(true).open(&path).await {
        Ok(mut file) => {
            if let Err(e) = file.write_all(line.as_bytes()).await {
                warn!(path = %path.display(), error = %e, "failed to write hook log");
            }
        }
        Err(e) => warn!(path = %path.display(), error = %e, "failed to open hook log"),
    }
}

/// A plan-keyed registry, in case multiple plans share one long-lived
/// process (e.g. a daemon watching several plan directories). Not
/// required by the core scheduler, which can use a bare `HookEngine`
/// directly, but kept as the natural extension point.
#[derive(Default)]
pub struct HookEngineRegistry {
    engines: Mutex<HashMap<String, Arc<HookEngine>>>,
}

impl HookEngineRegistry {
    pub async fn engine_for(&self, plan_key: &str) -> Arc<HookEngine> {
        let mut engines = self.engines.lock().await;
        engines.entry(plan_key.to_string()).or_insert_with(|| Arc::new(HookEngine::new())).clone()
    }
}
