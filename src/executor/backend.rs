//! Backend dispatch: runs a single job to completion against whichever
//! capability its `JobType` needs, then applies its output policy.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{Job, JobType, Plan};
use crate::executor::capability::{BackendError, BackendOutput, Backends};
use crate::executor::output::{self, OutputError, OutputResult};
use crate::executor::prompt;
use crate::persistence::{JobStore, PersistError};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("output handling error: {0}")]
    Output(#[from] OutputError),
    #[error("worktree provisioning error: {0}")]
    Worktree(String),
    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),
    #[error("chat jobs need a JobStore configured on the Executor")]
    NoJobStore,
}

/// The observable result of running one job once.
pub struct ExecutionOutcome {
    pub succeeded: bool,
    pub backend_output: BackendOutput,
    pub output_result: OutputResult,
    pub started_at: chrono::DateTime<Utc>,
    pub completed_at: chrono::DateTime<Utc>,
}

pub struct Executor {
    backends: Backends,
    /// CLI-level `--model` override. Outranks both the job's own `model`
    /// field and the plan's default (CLI > job field > plan default >
    /// implementation default).
    model_override: Option<String>,
    /// CLI-level `--prepend-dependencies` override. Outranks the job's own
    /// flag and the plan's default the same way `model_override` does.
    prepend_dependencies_override: Option<bool>,
    /// Used only by `chat`-type jobs to append their turn to the job file's
    /// body. `None` is fine for any plan that never dispatches a chat job.
    job_store: Option<Arc<JobStore>>,
}

impl Executor {
    pub fn new(backends: Backends) -> Self {
        Self { backends, model_override: None, prepend_dependencies_override: None, job_store: None }
    }

    /// Builder-style setter for the CLI `--model` override.
    pub fn with_model_override(mut self, model: Option<String>) -> Self {
        self.model_override = model;
        self
    }

    /// Builder-style setter for the CLI `--prepend-dependencies` override.
    pub fn with_prepend_dependencies_override(mut self, value: Option<bool>) -> Self {
        self.prepend_dependencies_override = value;
        self
    }

    /// Builder-style setter for the `JobStore` chat jobs append turns
    /// through. The caller typically passes the same store the `Scheduler`
    /// uses for header writes, so the two never race over the same file.
    pub fn with_job_store(mut self, store: Arc<JobStore>) -> Self {
        self.job_store = Some(store);
        self
    }

    /// Resolve the model a backend call should use, following the
    /// precedence this system uses. `None` means "let the backend
    /// pick its own implementation default".
    fn effective_model<'a>(&'a self, plan: &'a Plan, job: &'a Job) -> Option<&'a str> {
        self.model_override
            .as_deref()
            .or(job.model.as_deref())
            .or(plan.config.model.as_deref())
    }

    /// Run `job` (looked up by filename in `plan`) to completion: resolve
    /// its prompt, dispatch to the backend its type needs, then apply its
    /// output policy.
    pub async fn execute(&self, plan: &Plan, job: &Job) -> Result<ExecutionOutcome, ExecutorError> {
        debug!(job = %job.filename, job_type = ?job.job_type, "Executor::execute: called");
        let started_at = Utc::now();

        let cwd = self.resolve_cwd(plan, job).await?;
        let prompt_text = prompt::resolve(plan, job, self.prepend_dependencies_override);
        let model = self.effective_model(plan, job);

        let backend_output = match job.job_type {
            JobType::Oneshot => {
                let llm = self.backends.llm.as_ref().ok_or_else(|| {
                    BackendError::Unavailable("no LlmOneShot backend configured".into())
                })?;
                llm.complete(&prompt_text, model).await?
            }
            JobType::Agent | JobType::InteractiveAgent | JobType::HeadlessAgent => {
                let agent = self.backends.agent.as_ref().ok_or_else(|| {
                    BackendError::Unavailable("no AgentSession backend configured".into())
                })?;
                let resume = if job.flags.agent_continue { job.session_id.as_deref() } else { None };
                agent.run(&prompt_text, &cwd, model, resume).await?
            }
            JobType::Chat => {
                // a chat job is always its own conversation: each dispatch
                // is a new turn in the same session, not a one-off unless
                // resumed, so it doesn't gate on `agent_continue`.
                let agent = self.backends.agent.as_ref().ok_or_else(|| {
                    BackendError::Unavailable("no AgentSession backend configured".into())
                })?;
                agent.run(&prompt_text, &cwd, model, job.session_id.as_deref()).await?
            }
            JobType::Shell => {
                let shell = self
                    .backends
                    .shell
                    .as_ref()
                    .ok_or_else(|| BackendError::Unavailable("no ShellRunner backend configured".into()))?;
                shell.run(job.body.trim(), &cwd).await?
            }
            JobType::File => BackendOutput {
                stdout: job.body.clone(),
                stderr: String::new(),
                exit_code: Some(0),
                session_id: None,
            },
        };

        let succeeded = backend_succeeded(job.job_type, &backend_output);
        if succeeded {
            info!(job = %job.filename, "job backend completed successfully");
        } else {
            warn!(job = %job.filename, exit_code = ?backend_output.exit_code, "job backend did not succeed");
        }

        let output_result = if !succeeded {
            OutputResult::default()
        } else if job.job_type == JobType::Chat {
            // chat jobs accumulate turns on the job file itself; no output
            // policy applies and no sibling job files are ever created.
            let store = self.job_store.as_ref().ok_or(ExecutorError::NoJobStore)?;
            let path = plan.dir.join(&job.filename);
            let turn = format!("## Response\n\n{}", backend_output.stdout.trim());
            store.append_chat_turn(&path, &turn).await?;
            OutputResult::default()
        } else {
            output::apply(
                &cwd,
                job.output.kind,
                job.output.path.as_deref(),
                &job.filename,
                job.title.as_deref().unwrap_or(&job.filename),
                &backend_output,
            )
            .await?
        };

        Ok(ExecutionOutcome {
            succeeded,
            backend_output,
            output_result,
            started_at,
            completed_at: Utc::now(),
        })
    }

    async fn resolve_cwd(&self, plan: &Plan, job: &Job) -> Result<PathBuf, ExecutorError> {
        let worktree_name = job.worktree.as_deref().or(plan.config.worktree.as_deref());
        match (worktree_name, &self.backends.worktree) {
            (Some(name), Some(provider)) => {
                provider.ensure(name).await.map_err(|e| ExecutorError::Worktree(e.to_string()))
            }
            _ => Ok(plan.dir.clone()),
        }
    }
}

/// Shell and file jobs succeed iff their exit status is zero. LLM/agent
/// backends, including chat, don't have a process exit code in the same
/// sense; they succeed unless the capability itself returned an error
/// (already surfaced via `?` before this is evaluated), so here they're
/// always treated as successful.
fn backend_succeeded(job_type: JobType, output: &BackendOutput) -> bool {
    match job_type {
        JobType::Shell | JobType::File => output.success() || output.exit_code.is_none(),
        JobType::Oneshot | JobType::Agent | JobType::InteractiveAgent | JobType::HeadlessAgent | JobType::Chat => {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::{JobFlags, OutputSpec};
    use crate::domain::{JobStatus, PlanConfig};
    use crate::executor::capability::ShellRunner;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct EchoShell;

    #[async_trait]
    impl ShellRunner for EchoShell {
        async fn run(&self, command: &str, _cwd: &PathBuf) -> Result<BackendOutput, BackendError> {
            Ok(BackendOutput { stdout: command.to_string(), stderr: String::new(), exit_code: Some(0), session_id: None })
        }
    }

    struct FailingShell;

    #[async_trait]
    impl ShellRunner for FailingShell {
        async fn run(&self, _command: &str, _cwd: &PathBuf) -> Result<BackendOutput, BackendError> {
            Ok(BackendOutput { stdout: String::new(), stderr: "boom".into(), exit_code: Some(1), session_id: None })
        }
    }

    fn job(filename: &str, job_type: JobType) -> Job {
        Job {
            id: None,
            title: Some("t".into()),
            job_type,
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
            body: "echo hi".into(),
            filename: filename.into(),
            resolved_dependencies: vec![],
        }
    }

    #[tokio::test]
    async fn shell_job_succeeds_with_zero_exit() {
        let dir = tempdir().unwrap();
        let plan = Plan::new(dir.path().to_path_buf(), PlanConfig::default());
        let backends = Backends { shell: Some(std::sync::Arc::new(EchoShell)), ..Backends::empty() };
        let executor = Executor::new(backends);
        let outcome = executor.execute(&plan, &job("010-a.md", JobType::Shell)).await.unwrap();
        assert!(outcome.succeeded);
        assert_eq!(outcome.backend_output.stdout, "echo hi");
    }

    #[tokio::test]
    async fn shell_job_fails_with_nonzero_exit() {
        let dir = tempdir().unwrap();
        let plan = Plan::new(dir.path().to_path_buf(), PlanConfig::default());
        let backends = Backends { shell: Some(std::sync::Arc::new(FailingShell)), ..Backends::empty() };
        let executor = Executor::new(backends);
        let outcome = executor.execute(&plan, &job("010-a.md", JobType::Shell)).await.unwrap();
        assert!(!outcome.succeeded);
    }

    #[tokio::test]
    async fn missing_backend_capability_errors() {
        let dir = tempdir().unwrap();
        let plan = Plan::new(dir.path().to_path_buf(), PlanConfig::default());
        let executor = Executor::new(Backends::empty());
        let err = executor.execute(&plan, &job("010-a.md", JobType::Shell)).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Backend(BackendError::Unavailable(_))));
    }

    #[tokio::test]
    async fn file_job_needs_no_backend() {
        let dir = tempdir().unwrap();
        let plan = Plan::new(dir.path().to_path_buf(), PlanConfig::default());
        let executor = Executor::new(Backends::empty());
        let mut j = job("010-a.md", JobType::File);
        j.body = "materialized content".into();
        let outcome = executor.execute(&plan, &j).await.unwrap();
        assert!(outcome.succeeded);
        assert_eq!(outcome.backend_output.stdout, "materialized content");
    }

    struct EchoAgent;

    #[async_trait]
    impl crate::executor::capability::AgentSession for EchoAgent {
        async fn run(
            &self,
            prompt: &str,
            _cwd: &PathBuf,
            _model: Option<&str>,
            _resume: Option<&str>,
        ) -> Result<BackendOutput, BackendError> {
            Ok(BackendOutput {
                stdout: format!("echoed: {prompt}"),
                stderr: String::new(),
                exit_code: None,
                session_id: Some("sess-1".into()),
            })
        }
    }

    #[tokio::test]
    async fn chat_job_appends_turn_to_body_instead_of_output_policy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("010-a.md");
        tokio::fs::write(&path, "---\ntype: chat\nstatus: pending\n---\nhello\n").await.unwrap();

        let plan = Plan::new(dir.path().to_path_buf(), PlanConfig::default());
        let backends = Backends { agent: Some(std::sync::Arc::new(EchoAgent)), ..Backends::empty() };
        let store = std::sync::Arc::new(crate::persistence::JobStore::new());
        let executor = Executor::new(backends).with_job_store(store);

        let mut j = job("010-a.md", JobType::Chat);
        j.body = "hello".into();
        let outcome = executor.execute(&plan, &j).await.unwrap();

        assert!(outcome.succeeded);
        assert!(outcome.output_result.output_file.is_none());
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("type: chat"));
        assert!(contents.contains("hello"));
        assert!(contents.contains("echoed: hello"));
    }

    #[tokio::test]
    async fn chat_job_without_a_job_store_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("010-a.md");
        tokio::fs::write(&path, "---\ntype: chat\nstatus: pending\n---\nhello\n").await.unwrap();

        let plan = Plan::new(dir.path().to_path_buf(), PlanConfig::default());
        let backends = Backends { agent: Some(std::sync::Arc::new(EchoAgent)), ..Backends::empty() };
        let executor = Executor::new(backends);

        let mut j = job("010-a.md", JobType::Chat);
        j.body = "hello".into();
        let err = executor.execute(&plan, &j).await.unwrap_err();
        assert!(matches!(err, ExecutorError::NoJobStore));
    }

    struct RecordingLlm {
        seen_model: std::sync::Mutex<Option<String>>,
    }

    #[async_trait]
    impl crate::executor::capability::LlmOneShot for RecordingLlm {
        async fn complete(&self, _prompt: &str, model: Option<&str>) -> Result<BackendOutput, BackendError> {
            *self.seen_model.lock().unwrap() = model.map(str::to_string);
            Ok(BackendOutput { stdout: String::new(), stderr: String::new(), exit_code: Some(0), session_id: None })
        }
    }

    #[tokio::test]
    async fn model_precedence_is_cli_then_job_then_plan() {
        let dir = tempdir().unwrap();
        let llm = std::sync::Arc::new(RecordingLlm { seen_model: std::sync::Mutex::new(None) });
        let backends = Backends { llm: Some(llm.clone()), ..Backends::empty() };

        // plan default only
        let mut config = PlanConfig::default();
        config.model = Some("plan-model".into());
        let plan = Plan::new(dir.path().to_path_buf(), config);
        let executor = Executor::new(backends.clone());
        executor.execute(&plan, &job("010-a.md", JobType::Oneshot)).await.unwrap();
        assert_eq!(llm.seen_model.lock().unwrap().as_deref(), Some("plan-model"));

        // job field outranks plan default
        let mut j = job("010-a.md", JobType::Oneshot);
        j.model = Some("job-model".into());
        executor.execute(&plan, &j).await.unwrap();
        assert_eq!(llm.seen_model.lock().unwrap().as_deref(), Some("job-model"));

        // CLI override outranks everything
        let executor = Executor::new(backends).with_model_override(Some("cli-model".into()));
        executor.execute(&plan, &j).await.unwrap();
        assert_eq!(llm.seen_model.lock().unwrap().as_deref(), Some("cli-model"));
    }
}
