//! Environment-driven daemon configuration.
//!
//! Every setting has a default, so an empty environment yields a working
//! configuration rooted at the current directory. Relative paths are
//! resolved against the directory the daemon starts in.

use crate::task::{
    adapters::process::{ContainerSettings, WorkspaceLayout},
    domain::PrMode,
    services::{DEFAULT_MAX_CONCURRENT_TASKS, OrchestratorSettings, WorkerPolicy},
};
use camino::{Utf8Path, Utf8PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Project repository the daemon works on.
pub const REPOSITORY_VAR: &str = "TASKWRIGHT_REPOSITORY";
/// Root of the task store.
pub const DATA_DIR_VAR: &str = "TASKWRIGHT_DATA_DIR";
/// Unix socket the daemon listens on.
pub const SOCKET_VAR: &str = "TASKWRIGHT_SOCKET";
/// Bound on concurrently running workers.
pub const MAX_CONCURRENT_TASKS_VAR: &str = "TASKWRIGHT_MAX_CONCURRENT_TASKS";
/// Execution ceiling in seconds.
pub const EXECUTION_TIMEOUT_VAR: &str = "TASKWRIGHT_EXECUTION_TIMEOUT_SECS";
/// Pull request policy for submissions that do not name one.
pub const DEFAULT_PR_MODE_VAR: &str = "TASKWRIGHT_DEFAULT_PR_MODE";
/// Whether draft pull requests are marked ready on completion.
pub const MARK_READY_VAR: &str = "TASKWRIGHT_MARK_READY";
/// Container image holding the agent CLI.
pub const IMAGE_VAR: &str = "TASKWRIGHT_IMAGE";
/// Model flag passed to the agent CLI.
pub const MODEL_VAR: &str = "TASKWRIGHT_MODEL";
/// Git remote receiving task branches.
pub const REMOTE_VAR: &str = "TASKWRIGHT_REMOTE";

const DEFAULT_DATA_DIR_NAME: &str = ".taskwright";
const DEFAULT_SOCKET_NAME: &str = "taskwrightd.sock";
const WORKTREES_DIR_NAME: &str = "worktrees";
const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 3600;
const DEFAULT_MODEL: &str = "sonnet";
const DEFAULT_REMOTE: &str = "origin";
const IMAGE_PREFIX: &str = "taskwright";

/// Errors raised while reading configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A variable holds a value that cannot be used.
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    /// The working directory could not be determined.
    #[error("cannot determine the current directory: {0}")]
    CurrentDir(Arc<std::io::Error>),

    /// A path is not valid UTF-8.
    #[error("path is not valid UTF-8: {0}")]
    NonUtf8Path(String),
}

impl ConfigError {
    fn invalid(var: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue(var.to_owned(), reason.into())
    }
}

/// Complete daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Project repository.
    pub repository: Utf8PathBuf,
    /// Task store root.
    pub data_dir: Utf8PathBuf,
    /// Unix socket path.
    pub socket: Utf8PathBuf,
    /// Git remote name.
    pub remote: String,
    /// Orchestrator and worker tunables.
    pub orchestrator: OrchestratorSettings,
    /// Execution container settings.
    pub container: ContainerSettings,
}

impl Config {
    /// Reads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is invalid or the current
    /// directory is unavailable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let cwd =
            std::env::current_dir().map_err(|err| ConfigError::CurrentDir(Arc::new(err)))?;
        let base = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|path| ConfigError::NonUtf8Path(path.display().to_string()))?;
        Self::from_lookup(&base, |name| std::env::var(name).ok())
    }

    /// Reads configuration through `lookup`, resolving relative paths
    /// against `base`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first bad variable.
    pub fn from_lookup(
        base: &Utf8Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let value = |name: &str| {
            lookup(name)
                .map(|raw| raw.trim().to_owned())
                .filter(|trimmed| !trimmed.is_empty())
        };

        let repository =
            value(REPOSITORY_VAR).map_or_else(|| base.to_owned(), |raw| base.join(raw));
        let data_dir = value(DATA_DIR_VAR).map_or_else(
            || repository.join(DEFAULT_DATA_DIR_NAME),
            |raw| base.join(raw),
        );
        let socket = value(SOCKET_VAR).map_or_else(
            || data_dir.join(DEFAULT_SOCKET_NAME),
            |raw| base.join(raw),
        );

        let max_concurrent_tasks = match value(MAX_CONCURRENT_TASKS_VAR) {
            Some(raw) => parse_positive(MAX_CONCURRENT_TASKS_VAR, &raw)?,
            None => DEFAULT_MAX_CONCURRENT_TASKS,
        };
        let timeout_secs = match value(EXECUTION_TIMEOUT_VAR) {
            Some(raw) => parse_positive(EXECUTION_TIMEOUT_VAR, &raw)?,
            None => DEFAULT_EXECUTION_TIMEOUT_SECS,
        };
        let default_mode = match value(DEFAULT_PR_MODE_VAR) {
            Some(raw) => PrMode::try_from(raw.as_str())
                .map_err(|err| ConfigError::invalid(DEFAULT_PR_MODE_VAR, err.to_string()))?,
            None => PrMode::default(),
        };
        let mark_ready_on_completion = match value(MARK_READY_VAR) {
            Some(raw) => parse_flag(MARK_READY_VAR, &raw)?,
            None => false,
        };

        let image = value(IMAGE_VAR).unwrap_or_else(|| default_image(&repository));
        let model = value(MODEL_VAR).unwrap_or_else(|| DEFAULT_MODEL.to_owned());
        let remote = value(REMOTE_VAR).unwrap_or_else(|| DEFAULT_REMOTE.to_owned());

        Ok(Self {
            repository,
            data_dir,
            socket,
            remote,
            orchestrator: OrchestratorSettings {
                max_concurrent_tasks,
                default_mode,
                policy: WorkerPolicy {
                    execution_timeout: Duration::from_secs(timeout_secs),
                    mark_ready_on_completion,
                },
            },
            container: ContainerSettings { image, model },
        })
    }

    /// Returns where the repository and per-branch worktrees live.
    #[must_use]
    pub fn workspace_layout(&self) -> WorkspaceLayout {
        WorkspaceLayout::new(
            self.repository.clone(),
            self.data_dir.join(WORKTREES_DIR_NAME),
        )
    }
}

fn parse_positive<T>(var: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + From<u8>,
    T::Err: std::fmt::Display,
{
    let parsed: T = raw
        .parse()
        .map_err(|err: T::Err| ConfigError::invalid(var, err.to_string()))?;
    if parsed < T::from(1) {
        return Err(ConfigError::invalid(var, "must be at least 1"));
    }
    Ok(parsed)
}

fn parse_flag(var: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::invalid(
            var,
            format!("expected a boolean, got '{other}'"),
        )),
    }
}

/// `taskwright-<repository directory name>`, lowercased.
fn default_image(repository: &Utf8Path) -> String {
    repository.file_name().map_or_else(
        || IMAGE_PREFIX.to_owned(),
        |name| format!("{IMAGE_PREFIX}-{}", name.to_ascii_lowercase()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        Config::from_lookup(Utf8Path::new("/srv/widgets"), |name| map.get(name).cloned())
    }

    #[rstest]
    fn empty_environment_uses_defaults() {
        let config = load(&[]).expect("defaults");

        assert_eq!(config.repository, Utf8PathBuf::from("/srv/widgets"));
        assert_eq!(config.data_dir, Utf8PathBuf::from("/srv/widgets/.taskwright"));
        assert_eq!(
            config.socket,
            Utf8PathBuf::from("/srv/widgets/.taskwright/taskwrightd.sock")
        );
        assert_eq!(config.remote, "origin");
        assert_eq!(config.orchestrator.max_concurrent_tasks, 3);
        assert_eq!(config.orchestrator.default_mode, PrMode::DeferredPr);
        assert_eq!(
            config.orchestrator.policy.execution_timeout,
            Duration::from_secs(3600)
        );
        assert!(!config.orchestrator.policy.mark_ready_on_completion);
        assert_eq!(config.container.image, "taskwright-widgets");
        assert_eq!(config.container.model, "sonnet");
    }

    #[rstest]
    fn explicit_values_override_defaults() {
        let config = load(&[
            (REPOSITORY_VAR, "/repos/gadgets"),
            (DATA_DIR_VAR, "state"),
            (MAX_CONCURRENT_TASKS_VAR, "8"),
            (EXECUTION_TIMEOUT_VAR, "90"),
            (DEFAULT_PR_MODE_VAR, "eager_pr"),
            (MARK_READY_VAR, "yes"),
            (IMAGE_VAR, "agent:latest"),
            (REMOTE_VAR, "upstream"),
        ])
        .expect("valid config");

        assert_eq!(config.repository, Utf8PathBuf::from("/repos/gadgets"));
        assert_eq!(config.data_dir, Utf8PathBuf::from("/srv/widgets/state"));
        assert_eq!(config.socket, Utf8PathBuf::from("/srv/widgets/state/taskwrightd.sock"));
        assert_eq!(config.orchestrator.max_concurrent_tasks, 8);
        assert_eq!(config.orchestrator.default_mode, PrMode::EagerPr);
        assert_eq!(
            config.orchestrator.policy.execution_timeout,
            Duration::from_secs(90)
        );
        assert!(config.orchestrator.policy.mark_ready_on_completion);
        assert_eq!(config.container.image, "agent:latest");
        assert_eq!(config.remote, "upstream");
        assert_eq!(
            config.workspace_layout().worktrees(),
            Utf8Path::new("/srv/widgets/state/worktrees")
        );
    }

    #[rstest]
    #[case(MAX_CONCURRENT_TASKS_VAR, "0")]
    #[case(MAX_CONCURRENT_TASKS_VAR, "many")]
    #[case(EXECUTION_TIMEOUT_VAR, "-5")]
    #[case(DEFAULT_PR_MODE_VAR, "sometimes")]
    #[case(MARK_READY_VAR, "maybe")]
    fn invalid_values_name_the_variable(#[case] var: &str, #[case] raw: &str) {
        let err = load(&[(var, raw)]).expect_err("invalid value");

        let ConfigError::InvalidValue(name, _) = err else {
            panic!("expected InvalidValue, got {err:?}");
        };
        assert_eq!(name, var);
    }

    #[rstest]
    fn blank_values_fall_back_to_defaults() {
        let config = load(&[(MODEL_VAR, "   "), (REMOTE_VAR, "")]).expect("defaults");

        assert_eq!(config.container.model, "sonnet");
        assert_eq!(config.remote, "origin");
    }
}
