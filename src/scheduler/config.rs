//! Tunables for the scheduler's dispatch loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_max_parallel_jobs() -> usize {
    3
}

fn default_cancellation_grace_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How many jobs the `All` run mode will dispatch concurrently.
    #[serde(default = "default_max_parallel_jobs")]
    pub max_parallel_jobs: usize,
    /// Hard ceiling on the number of jobs a single `All` run will dispatch
    /// before stopping on its own, even if more are runnable. `None` means
    /// unbounded.
    #[serde(default)]
    pub max_consecutive_steps: Option<usize>,
    /// How long a cancelled job's backend is given to exit on its own
    /// before the scheduler force-kills it.
    #[serde(default = "default_cancellation_grace_secs")]
    pub cancellation_grace_secs: u64,
}

impl SchedulerConfig {
    pub fn cancellation_grace(&self) -> Duration {
        Duration::from_secs(self.cancellation_grace_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel_jobs: default_max_parallel_jobs(),
            max_consecutive_steps: None,
            cancellation_grace_secs: default_cancellation_grace_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_parallel_jobs, 3);
        assert_eq!(config.max_consecutive_steps, None);
        assert_eq!(config.cancellation_grace(), Duration::from_secs(5));
    }

    #[test]
    fn deserializes_with_partial_yaml() {
        let config: SchedulerConfig = serde_yaml::from_str("max_parallel_jobs: 8\n").unwrap();
        assert_eq!(config.max_parallel_jobs, 8);
        assert_eq!(config.cancellation_grace_secs, 5);
    }
}
