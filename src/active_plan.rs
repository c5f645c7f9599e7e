//! Active Plan State: a single key/value file under the user state
//! directory tracking "which plan am I on" for CLI ergonomics.
//!
//! This is the only piece of process-wide state the core keeps outside a
//! plan directory itself. It never participates in scheduling decisions;
//! it only feeds the plan-argument resolver used by CLI commands that
//! accept an optional plan path.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

const STATE_FILENAME: &str = "active-plan";

#[derive(Debug, Error)]
pub enum ActivePlanError {
    #[error("failed to read active plan state at {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to write active plan state at {0}: {1}")]
    Write(PathBuf, std::io::Error),
}

/// Handle onto the active-plan pointer file. Tests construct this with a
/// tempdir path; the CLI binary uses `ActivePlanState::default_path()`.
pub struct ActivePlanState {
    path: PathBuf,
}

impl ActivePlanState {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `$XDG_DATA_HOME/grove/active-plan` (or the platform equivalent via
    /// `dirs::data_local_dir`), falling back to `.` if no data directory
    /// can be determined.
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("grove").join(STATE_FILENAME)
    }

    /// The currently active plan directory, if any is set and the file
    /// exists and is non-empty. Does not check that the path still
    /// resolves to a real plan; callers do that via `resolve`.
    pub fn get(&self) -> Result<Option<PathBuf>, ActivePlanError> {
        debug!(path = %self.path.display(), "ActivePlanState::get: called");
        if !self.path.exists() {
            return Ok(None);
        }
        let contents =
            std::fs::read_to_string(&self.path).map_err(|e| ActivePlanError::Read(self.path.clone(), e))?;
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        Ok(Some(PathBuf::from(trimmed)))
    }

    pub fn set(&self, plan_dir: &Path) -> Result<(), ActivePlanError> {
        debug!(plan_dir = %plan_dir.display(), "ActivePlanState::set: called");
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ActivePlanError::Write(self.path.clone(), e))?;
        }
        let absolute = plan_dir.canonicalize().unwrap_or_else(|_| plan_dir.to_path_buf());
        std::fs::write(&self.path, absolute.to_string_lossy().as_bytes())
            .map_err(|e| ActivePlanError::Write(self.path.clone(), e))
    }

    pub fn unset(&self) -> Result<(), ActivePlanError> {
        debug!(path = %self.path.display(), "ActivePlanState::unset: called");
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| ActivePlanError::Write(self.path.clone(), e))?;
        }
        Ok(())
    }
}

/// Does `dir` look like a plan directory: a `.grove-plan.yml` config, a
/// `plan.md` chat-style file, or at least one `*.md` job file.
pub fn looks_like_plan(dir: &Path) -> bool {
    if dir.join(".grove-plan.yml").exists() || dir.join("plan.md").exists() {
        return true;
    }
    std::fs::read_dir(dir)
        .map(|entries| {
            entries.filter_map(Result::ok).any(|e| e.path().extension().is_some_and(|ext| ext == "md"))
        })
        .unwrap_or(false)
}

/// Resolve a plan argument with the precedence this system uses:
/// an explicit path always wins; otherwise the active plan pointer, if it
/// still exists; otherwise the current working directory, if it looks
/// like a plan. Returns `None` if none of the three apply.
pub fn resolve(explicit: Option<&Path>, state: &ActivePlanState) -> Result<Option<PathBuf>, ActivePlanError> {
    if let Some(explicit) = explicit {
        return Ok(Some(explicit.to_path_buf()));
    }
    if let Some(active) = state.get()? {
        if active.exists() {
            return Ok(Some(active));
        }
        debug!(path = %active.display(), "active_plan::resolve: active plan no longer exists, falling through");
    }
    if let Ok(cwd) = std::env::current_dir() {
        if looks_like_plan(&cwd) {
            return Ok(Some(cwd));
        }
    }
    Ok(None)
}
