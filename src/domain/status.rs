//! Job status: the closed set a job can occupy, plus the readiness rules
//! built on top of it.

use serde::{Deserialize, Serialize};

/// The closed set of states a job can be in.
///
/// `Completed` and `Abandoned` are terminal: once a job reaches either one
/// it never transitions again under normal operation (an explicit rerun on
/// a completed job is a distinct "restart" action, not a status
/// transition the scheduler performs on its own).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    PendingUser,
    PendingLlm,
    Running,
    Completed,
    Failed,
    Blocked,
    Todo,
    Hold,
    Abandoned,
}

impl JobStatus {
    /// Terminal states never transition again on their own.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }

    /// States the dependency graph and scheduler will pick up automatically
    /// once a job's dependencies are satisfied. `Failed` is deliberately
    /// excluded here: a failed job only becomes runnable again through an
    /// explicit rerun (`Scheduler::Single` resets it to `Pending` first),
    /// never through the ordinary `Next`/`All` sweep.
    pub fn is_auto_runnable(self) -> bool {
        matches!(self, Self::Pending | Self::PendingUser | Self::PendingLlm)
    }

    /// Whether a dependent job can treat a job in this status as
    /// "satisfied" for readiness purposes. `Completed` always counts;
    /// `Abandoned` counts too (see DESIGN.md's Open Question decisions)
    /// so that a deliberately-abandoned job doesn't permanently block its
    /// dependents.
    pub fn satisfies_dependency(self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PendingUser => "pending_user",
            Self::PendingLlm => "pending_llm",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Todo => "todo",
            Self::Hold => "hold",
            Self::Abandoned => "abandoned",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Abandoned.is_terminal());
        assert!(!JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn auto_runnable_excludes_failed() {
        assert!(JobStatus::Pending.is_auto_runnable());
        assert!(JobStatus::PendingUser.is_auto_runnable());
        assert!(JobStatus::PendingLlm.is_auto_runnable());
        assert!(!JobStatus::Failed.is_auto_runnable());
        assert!(!JobStatus::Running.is_auto_runnable());
        assert!(!JobStatus::Blocked.is_auto_runnable());
    }

    #[test]
    fn dependency_satisfaction() {
        assert!(JobStatus::Completed.satisfies_dependency());
        assert!(JobStatus::Abandoned.satisfies_dependency());
        assert!(!JobStatus::Failed.satisfies_dependency());
        assert!(!JobStatus::Pending.satisfies_dependency());
    }

    #[test]
    fn serde_round_trip() {
        let s = serde_yaml::to_string(&JobStatus::PendingUser).unwrap();
        assert_eq!(s.trim(), "pending_user");
        let back: JobStatus = serde_yaml::from_str(&s).unwrap();
        assert_eq!(back, JobStatus::PendingUser);
    }

    #[test]
    fn display_matches_wire_form() {
        for (status, text) in [
            (JobStatus::Pending, "pending"),
            (JobStatus::PendingUser, "pending_user"),
            (JobStatus::PendingLlm, "pending_llm"),
            (JobStatus::Running, "running"),
            (JobStatus::Completed, "completed"),
            (JobStatus::Failed, "failed"),
            (JobStatus::Blocked, "blocked"),
            (JobStatus::Todo, "todo"),
            (JobStatus::Hold, "hold"),
            (JobStatus::Abandoned, "abandoned"),
        ] {
            assert_eq!(status.to_string(), text);
        }
    }
}
