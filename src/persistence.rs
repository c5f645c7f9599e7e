//! Job Persistence: the only code path that writes a job file's header
//! back to disk, built on `header::update`.
//!
//! Writes are atomic (write to a temp file in the same directory, then
//! rename) and serialized per path so two tasks updating the same job
//! concurrently can't interleave a read-modify-write race.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::PlanConfig;
use crate::header::{self, HeaderError};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error on {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("header error on {0}: {1}")]
    Header(PathBuf, #[source] HeaderError),
}

/// Owns the per-path lock table used to serialize writes to job files.
///
/// One `JobStore` is shared (via `Arc`) across every worker dispatched by
/// the scheduler for a given plan run.
#[derive(Default)]
pub struct JobStore {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(path.to_path_buf()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Apply `patch` to the job file at `path`, atomically. Holds the
    /// path's lock for the duration of the read-modify-write so concurrent
    /// callers serialize rather than race.
    pub async fn update(&self, path: &Path, patch: &Mapping) -> Result<(), PersistError> {
        debug!(path = %path.display(), patch_keys = patch.len(), "JobStore::update: called");
        let lock = self.lock_for(path).await;
        let _guard = lock.lock().await;

        let bytes = tokio::fs::read(path).await.map_err(|e| PersistError::Io(path.to_path_buf(), e))?;
        let updated = header::update(&bytes, patch).map_err(|e| PersistError::Header(path.to_path_buf(), e))?;
        write_atomic(path, updated.as_bytes()).await.map_err(|e| PersistError::Io(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Convenience wrapper for the common single-key status transition.
    pub async fn set_status(&self, path: &Path, status: &str) -> Result<(), PersistError> {
        let mut patch = Mapping::new();
        patch.insert(Value::String("status".into()), Value::String(status.to_string()));
        self.update(path, &patch).await
    }

    /// Append `turn` to a `chat`-type job's body, preserving its header
    /// verbatim. Unlike `update`, this rewrites the body rather than the
    /// header, so it goes through the same read-modify-write lock but
    /// rebuilds via `header::rebuild` instead of `header::update`.
    pub async fn append_chat_turn(&self, path: &Path, turn: &str) -> Result<(), PersistError> {
        debug!(path = %path.display(), "JobStore::append_chat_turn: called");
        let lock = self.lock_for(path).await;
        let _guard = lock.lock().await;

        let bytes = tokio::fs::read(path).await.map_err(|e| PersistError::Io(path.to_path_buf(), e))?;
        let parsed = header::parse(&bytes).map_err(|e| PersistError::Header(path.to_path_buf(), e))?;

        let mut body = parsed.body;
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        body.push_str(turn.trim_end());
        body.push('\n');

        let rebuilt = header::rebuild(parsed.header.as_ref(), &body)
            .map_err(|e| PersistError::Header(path.to_path_buf(), e))?;
        write_atomic(path, rebuilt.as_bytes()).await.map_err(|e| PersistError::Io(path.to_path_buf(), e))
    }
}

/// Atomically rewrite a plan's `.grove-plan.yml`, entirely replacing its
/// contents with `config`'s serialized form.
///
/// Unlike job files, a plan config has no unknown-field carry-over
/// requirement — it's a single typed document, not a
/// header-plus-body file someone else might have hand-edited with extra
/// keys — so this serializes the whole `PlanConfig` rather than routing
/// through `header::update`.
pub async fn write_plan_config(path: &Path, config: &PlanConfig) -> Result<(), PersistError> {
    debug!(path = %path.display(), "persistence::write_plan_config: called");
    let yaml = serde_yaml::to_string(config).map_err(|e| {
        PersistError::Header(path.to_path_buf(), HeaderError::Yaml(e))
    })?;
    write_atomic(path, yaml.as_bytes()).await.map_err(|e| PersistError::Io(path.to_path_buf(), e))
}

/// Write `bytes` to `path` by writing a sibling temp file and renaming it
/// over the destination, so a crash mid-write never leaves a partially
/// written job file behind.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().and_then(|f| f.to_str()).unwrap_or("job");
    let tmp_path = dir.join(format!(".{file_name}.tmp-{}", std::process::id()));

    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}
