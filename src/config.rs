//! `GroveConfig`: the CLI binary's own configuration, distinct from a
//! plan's `.grove-plan.yml`. Full configuration loading for
//! the operator-facing surface is out of scope as a *feature* (provider
//! keys, concurrency ceilings an operator tunes); this is the thin
//! scheduler-defaults/log-level config a CLI binary needs regardless, and
//! it is loaded with the same fallback cascade the prior `Config::load`
//! used: explicit path, then a project-local file, then a user config
//! directory, then built-in defaults.

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::scheduler::SchedulerConfig;

const LOCAL_CONFIG_FILENAME: &str = ".grove.yml";
const USER_CONFIG_FILENAME: &str = "grove.yml";

/// Top-level CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroveConfig {
    /// Scheduler tunables (`max_parallel_jobs`, `max_consecutive_steps`,
    /// cancellation grace) a `run` invocation uses when the CLI doesn't
    /// override them directly.
    pub scheduler: SchedulerConfig,
    /// Log level used when `--log-level` isn't passed on the command
    /// line. One of `trace`/`debug`/`info`/`warn`/`error`.
    #[serde(rename = "log-level")]
    pub log_level: String,
    /// Seconds a hook command is allowed to run before the Hook Engine
    /// kills it and logs a timeout.
    #[serde(rename = "hook-timeout-secs", default = "default_hook_timeout_secs")]
    pub hook_timeout_secs: u64,
}

fn default_hook_timeout_secs() -> u64 {
    30
}

impl Default for GroveConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            log_level: "info".to_string(),
            hook_timeout_secs: default_hook_timeout_secs(),
        }
    }
}

impl GroveConfig {
    /// Load configuration with fallback chain: explicit `--config` path,
    /// then `./.grove.yml`, then `$XDG_CONFIG_HOME/grove/grove.yml`, then
    /// built-in defaults. A file that exists but fails to parse is a hard
    /// error only when explicitly named; the local/user fallbacks are
    /// skipped with a warning so a stray malformed file never blocks
    /// startup.
    pub fn load(explicit_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load_from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()));
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILENAME);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!(path = %local.display(), error = %e, "failed to load local config, skipping"),
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user = config_dir.join("grove").join(USER_CONFIG_FILENAME);
            if user.exists() {
                match Self::load_from_file(&user) {
                    Ok(config) => return Ok(config),
                    Err(e) => tracing::warn!(path = %user.display(), error = %e, "failed to load user config, skipping"),
                }
            }
        }

        tracing::info!("no config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the `log-level` field from a config file, without
    /// requiring the rest of it to parse cleanly — used to set up logging
    /// before the full config (and its own logging) is available.
    pub fn load_log_level(explicit_path: Option<&PathBuf>) -> Option<String> {
        let path = explicit_path.cloned().or_else(|| {
            let local = PathBuf::from(LOCAL_CONFIG_FILENAME);
            if local.exists() { Some(local) } else { None }
        })?;
        let contents = std::fs::read_to_string(&path).ok()?;
        let value: serde_yaml::Value = serde_yaml::from_str(&contents).ok()?;
        value.get("log-level")?.as_str().map(str::to_string)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path).context("failed to read config file")?;
        let config: Self = serde_yaml::from_str(&contents).context("failed to parse config file")?;
        tracing::info!(path = %path.as_ref().display(), "loaded config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_scheduler_defaults() {
        let config = GroveConfig::default();
        assert_eq!(config.scheduler.max_parallel_jobs, 3);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let config: GroveConfig = serde_yaml::from_str("log-level: debug\n").unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.scheduler.max_parallel_jobs, 3);
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = GroveConfig::load(Some(&PathBuf::from("/nonexistent/grove.yml"))).unwrap_err();
        assert!(err.to_string().contains("failed to load config from"));
    }
}
