//! Output-policy post-processing: what happens to a job's backend output
//! once the backend finishes, driven by `Job::output.kind`.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::OutputPolicy;
use crate::executor::capability::BackendOutput;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("io error writing output file {0}: {1}")]
    Io(std::path::PathBuf, std::io::Error),
    #[error("output policy is 'commit' but git commit failed: {0}")]
    CommitFailed(String),
    #[error("generated jobs output was not valid YAML: {0}")]
    BadGeneratedJobsYaml(serde_yaml::Error),
    #[error("generated job '{0}' collides with an existing file; no files were written")]
    BadGeneratedJobs(String),
}

#[derive(Debug, Deserialize)]
struct GeneratedJobsDoc {
    jobs: Vec<GeneratedJob>,
}

#[derive(Debug, Deserialize)]
struct GeneratedJob {
    filename: String,
    contents: String,
}

/// The default `output.path` for a `file`-policy job that didn't specify
/// one explicitly: a sibling file named after the job (defaults derived
/// from filename).
fn default_output_filename(job_filename: &str) -> String {
    match job_filename.strip_suffix(".md") {
        Some(stem) => format!("{stem}.output.md"),
        None => format!("{job_filename}.output.md"),
    }
}

/// Result of applying an output policy, fed back into the job's header
/// patch by the caller.
#[derive(Debug, Default)]
pub struct OutputResult {
    pub output_file: Option<String>,
    pub commit_sha: Option<String>,
    pub generated_job_filenames: Vec<String>,
}

/// Apply `policy` to `output` for a job whose worktree/plan directory is
/// `dir`. Does not mutate the job's header itself; callers fold the
/// returned `OutputResult` into a header patch via `persistence::JobStore`.
pub async fn apply(
    dir: &Path,
    policy: OutputPolicy,
    path: Option<&str>,
    filename: &str,
    title: &str,
    output: &BackendOutput,
) -> Result<OutputResult, OutputError> {
    debug!(?policy, "output::apply: called");
    match policy {
        OutputPolicy::None => Ok(OutputResult::default()),
        OutputPolicy::File => {
            let default_relative = default_output_filename(filename);
            let relative = path.unwrap_or(&default_relative);
            let full = dir.join(relative);
            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| OutputError::Io(full.clone(), e))?;
            }
            tokio::fs::write(&full, &output.stdout).await.map_err(|e| OutputError::Io(full.clone(), e))?;
            Ok(OutputResult { output_file: Some(relative.to_string()), ..Default::default() })
        }
        OutputPolicy::Commit => {
            let status = Command::new("git")
                .args(["add", "-A"])
                .current_dir(dir)
                .status()
                .await
                .map_err(|e| OutputError::CommitFailed(e.to_string()))?;
            if !status.success() {
                return Err(OutputError::CommitFailed("git add failed".into()));
            }
            let commit = Command::new("git")
                .args(["commit", "-m", title, "--allow-empty"])
                .current_dir(dir)
                .output()
                .await
                .map_err(|e| OutputError::CommitFailed(e.to_string()))?;
            if !commit.status.success() {
                return Err(OutputError::CommitFailed(String::from_utf8_lossy(&commit.stderr).to_string()));
            }
            let rev = Command::new("git")
                .args(["rev-parse", "HEAD"])
                .current_dir(dir)
                .output()
                .await
                .map_err(|e| OutputError::CommitFailed(e.to_string()))?;
            let sha = String::from_utf8_lossy(&rev.stdout).trim().to_string();
            Ok(OutputResult { commit_sha: Some(sha), ..Default::default() })
        }
        OutputPolicy::GenerateJobs => {
            let doc: GeneratedJobsDoc =
                serde_yaml::from_str(&output.stdout).map_err(OutputError::BadGeneratedJobsYaml)?;

            // pre-check every filename before writing anything, so a
            // collision never leaves a partial set of new job files behind.
            for generated in &doc.jobs {
                if dir.join(&generated.filename).exists() {
                    warn!(filename = %generated.filename, "generated job filename collides with existing file");
                    return Err(OutputError::BadGeneratedJobs(generated.filename.clone()));
                }
            }

            let mut written = Vec::with_capacity(doc.jobs.len());
            for generated in &doc.jobs {
                let full = dir.join(&generated.filename);
                tokio::fs::write(&full, &generated.contents)
                    .await
                    .map_err(|e| OutputError::Io(full.clone(), e))?;
                written.push(generated.filename.clone());
            }
            Ok(OutputResult { generated_job_filenames: written, ..Default::default() })
        }
    }
}
