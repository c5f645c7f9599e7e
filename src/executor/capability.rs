//! Capability traits: the seams between the core (which owns plan state,
//! scheduling, and job lifecycle) and the vendor-specific backends that
//! actually run a job (shell, one-shot LLM call, interactive or headless
//! agent, git worktree provisioning).
//!
//! The concrete implementations of these traits are treated as
//! external collaborators; this repo only defines the seams and a couple
//! of minimal in-process implementations (`ShellRunner`'s
//! `TokioShellRunner`) needed to exercise the executor end to end.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend process exited with status {0}")]
    NonZeroExit(i32),
    #[error("backend process was terminated by signal")]
    Signaled,
    #[error("backend io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend capability unavailable: {0}")]
    Unavailable(String),
}

/// Output of a single backend invocation.
#[derive(Debug, Clone, Default)]
pub struct BackendOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// Opaque session identifier a stateful backend (agent/chat) can
    /// return so a subsequent run resumes the same session.
    pub session_id: Option<String>,
}

impl BackendOutput {
    pub fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Runs a shell command to completion.
#[async_trait]
pub trait ShellRunner: Send + Sync {
    async fn run(&self, command: &str, cwd: &PathBuf) -> Result<BackendOutput, BackendError>;
}

/// A single stateless request/response exchange with an LLM, used for
/// `oneshot` jobs.
#[async_trait]
pub trait LlmOneShot: Send + Sync {
    async fn complete(&self, prompt: &str, model: Option<&str>) -> Result<BackendOutput, BackendError>;
}

/// A longer-lived agent session, used for `agent`, `interactive_agent`,
/// and `headless_agent` jobs. `resume` carries a previous `session_id`
/// when `agent_continue` is set.
#[async_trait]
pub trait AgentSession: Send + Sync {
    async fn run(
        &self,
        prompt: &str,
        cwd: &PathBuf,
        model: Option<&str>,
        resume: Option<&str>,
    ) -> Result<BackendOutput, BackendError>;
}

/// Provisions an isolated working directory (conventionally a git
/// worktree) for a job to run in. The worktree machinery itself is out of
/// scope; this is the narrow seam the executor calls through.
#[async_trait]
pub trait WorktreeProvider: Send + Sync {
    async fn ensure(&self, name: &str) -> Result<PathBuf, BackendError>;
}

/// The bundle of backend capabilities the executor dispatches to. Not
/// every job type needs every capability; `None` fields make the
/// corresponding job types unavailable and fail with
/// `BackendError::Unavailable`.
#[derive(Clone)]
pub struct Backends {
    pub shell: Option<std::sync::Arc<dyn ShellRunner>>,
    pub llm: Option<std::sync::Arc<dyn LlmOneShot>>,
    pub agent: Option<std::sync::Arc<dyn AgentSession>>,
    pub worktree: Option<std::sync::Arc<dyn WorktreeProvider>>,
}

impl Backends {
    pub fn empty() -> Self {
        Self { shell: None, llm: None, agent: None, worktree: None }
    }
}

impl Default for Backends {
    fn default() -> Self {
        Self::empty()
    }
}

/// A `ShellRunner` that actually spawns `sh -c <command>` via `tokio::process`.
///
/// This is the one concrete backend this repo ships, since a plain
/// subprocess has no vendor-specific surface the way an LLM or container
/// runtime does. The other capabilities (`LlmOneShot`, `AgentSession`,
/// `WorktreeProvider`) stay trait-only; a caller wires in its own
/// implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioShellRunner;

#[async_trait]
impl ShellRunner for TokioShellRunner {
    async fn run(&self, command: &str, cwd: &PathBuf) -> Result<BackendOutput, BackendError> {
        debug!(command, cwd = %cwd.display(), "TokioShellRunner::run: called");
        let output = Command::new("sh").arg("-c").arg(command).current_dir(cwd).output().await?;
        Ok(BackendOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
            session_id: None,
        })
    }
}
