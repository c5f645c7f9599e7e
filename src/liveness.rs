//! Liveness Verifier: on reload, checks whether a job recorded as
//! `running` actually still has a live backend process behind it, and
//! demotes it to `failed` if not.

use nix::sys::signal::kill;
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{Job, JobStatus, Plan};
use crate::persistence::{JobStore, PersistError};

#[derive(Debug, Error)]
pub enum LivenessError {
    #[error("persistence error while demoting stale job: {0}")]
    Persist(#[from] PersistError),
}

/// How a running job's liveness is tracked: either a bare PID with the
/// process's recorded start time (to guard against PID reuse), or an
/// opaque session name probed by some external means (e.g. a terminal
/// multiplexer session). The probing mechanism for `Session` is an
/// external collaborator; only the `Pid` path is checked directly here.
pub enum LivenessToken<'a> {
    Pid { pid: u32, started_at: Option<chrono::DateTime<chrono::Utc>> },
    Session { name: &'a str },
}

/// Probe whether `job` (assumed to be in `Running` status) still has a
/// live backend behind it.
///
/// For a PID-based token, liveness means the process exists (`kill(pid,
/// 0)` succeeds). The recorded `process_started_at` isn't independently
/// re-verified against `/proc` here (that would need platform-specific
/// `/proc/<pid>/stat` parsing out of scope for this check) but is
/// preserved on the job header so a future, more precise verifier has it
/// to compare against.
///
/// For a session-name token, liveness can't be determined without the
/// external session manager; such jobs are treated as alive (never
/// auto-demoted) since false-positive demotion of a live session is worse
/// than leaving a truly-dead one running a little longer until a human
/// notices.
pub fn is_alive(token: &LivenessToken) -> bool {
    match token {
        LivenessToken::Pid { pid, .. } => process_exists(*pid),
        LivenessToken::Session { .. } => true,
    }
}

fn process_exists(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Reconcile every `Running` job in `plan` in place: demote stale ones to
/// `Failed` both on disk (via `store`) and in `plan.jobs`, so the caller's
/// in-memory view matches what just got persisted without a full reload.
/// Returns the filenames demoted.
pub async fn reconcile_plan(store: &JobStore, plan: &mut Plan) -> Result<Vec<String>, LivenessError> {
    debug!(job_count = plan.jobs.len(), "liveness::reconcile_plan: called");
    let mut demoted = Vec::new();
    let running_with_pid: Vec<(String, u32)> = plan
        .jobs
        .values()
        .filter(|j| j.status == JobStatus::Running)
        .filter_map(|j| j.pid.map(|pid| (j.filename.clone(), pid)))
        .collect();

    for (filename, pid) in running_with_pid {
        let token = LivenessToken::Pid { pid, started_at: None };
        if is_alive(&token) {
            continue;
        }
        warn!(job = %filename, pid, "running job's process is gone, demoting to failed");
        let path = plan.dir.join(&filename);
        let mut patch = serde_yaml::Mapping::new();
        patch.insert("status".into(), "failed".into());
        patch.insert("error".into(), "process lost".into());
        store.update(&path, &patch).await?;

        if let Some(job) = plan.jobs.get_mut(&filename) {
            job.status = JobStatus::Failed;
            job.error = Some("process lost".to_string());
        }
        demoted.push(filename);
    }
    if !demoted.is_empty() {
        info!(count = demoted.len(), "liveness reconciliation demoted stale running jobs");
    }
    Ok(demoted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_reported_alive() {
        let pid = std::process::id();
        assert!(is_alive(&LivenessToken::Pid { pid, started_at: None }));
    }

    #[test]
    fn implausible_pid_is_reported_dead() {
        // pid 0 is never a user process's pid on a running system and
        // kill(0, None) targeting the whole process group is avoided by
        // using a very large, almost-certainly-unused pid instead.
        assert!(!is_alive(&LivenessToken::Pid { pid: 2_147_483_000, started_at: None }));
    }

    #[test]
    fn session_tokens_are_always_considered_alive() {
        assert!(is_alive(&LivenessToken::Session { name: "whatever" }));
    }

    #[tokio::test]
    async fn reconcile_plan_demotes_dead_pid_in_memory_and_on_disk() {
        use crate::domain::job::{JobFlags, JobType, OutputSpec};
        use crate::domain::PlanConfig;
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let filename = "010-a.md".to_string();
        std::fs::write(
            dir.path().join(&filename),
            "---\nstatus: running\npid: 2147483000\n---\nbody\n",
        )
        .unwrap();

        let mut plan = Plan::new(dir.path().to_path_buf(), PlanConfig::default());
        let job = Job {
            id: None,
            title: None,
            job_type: JobType::Shell,
            status: JobStatus::Running,
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
            pid: Some(2_147_483_000),
            process_started_at: None,
            session_name: None,
            body: "body\n".into(),
            filename: filename.clone(),
            resolved_dependencies: vec![],
        };
        plan.order.push(filename.clone());
        plan.jobs.insert(filename.clone(), job);

        let store = JobStore::new();
        let demoted = reconcile_plan(&store, &mut plan).await.unwrap();
        assert_eq!(demoted, vec![filename.clone()]);
        assert_eq!(plan.jobs[&filename].status, JobStatus::Failed);
        assert_eq!(plan.jobs[&filename].error.as_deref(), Some("process lost"));

        let on_disk = std::fs::read_to_string(dir.path().join(&filename)).unwrap();
        assert!(on_disk.contains("status: failed"));
    }
}
