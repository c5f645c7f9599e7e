//! Executor & Backends: prompt resolution, per-job-type backend dispatch,
//! and output-policy post-processing.

pub mod backend;
pub mod capability;
pub mod output;
pub mod prompt;

pub use backend::{ExecutionOutcome, Executor, ExecutorError};
pub use capability::{
    AgentSession, BackendError, BackendOutput, Backends, LlmOneShot, ShellRunner, TokioShellRunner,
    WorktreeProvider,
};
pub use output::{OutputError, OutputResult};
