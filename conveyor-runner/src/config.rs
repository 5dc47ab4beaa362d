//! Engine configuration
//!
//! Defines the tunable parameters of the execution engine: where workspaces
//! live, how long terminated processes get before a forced kill, and how the
//! log sink batches output before persisting it.

use std::path::PathBuf;
use std::time::Duration;

/// Execution engine configuration
///
/// All timeouts and intervals are configurable to allow tuning
/// for different deployment scenarios (dev vs prod, fast vs slow storage).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory under which one workspace per execution is created
    pub workspace_root: PathBuf,

    /// Time a terminated step gets to exit before it is killed
    pub termination_grace: Duration,

    /// How often buffered log output is written to the record store
    pub log_flush_interval: Duration,

    /// Buffered bytes that force a synchronous flush from `append`
    pub log_buffer_limit: usize,

    /// Upper bound on a single log flush (lock wait plus store write)
    pub log_flush_timeout: Duration,

    /// Optional wall-clock limit for a whole execution
    pub execution_timeout: Option<Duration>,

    /// Attempts made to persist the terminal status
    pub finalize_retries: u32,
}

impl EngineConfig {
    /// Creates a new configuration with defaults rooted at `workspace_root`
    pub fn new(workspace_root: PathBuf) -> Self {
        Self {
            workspace_root,
            termination_grace: Duration::from_secs(5),
            log_flush_interval: Duration::from_millis(500),
            log_buffer_limit: 64 * 1024,
            log_flush_timeout: Duration::from_secs(5),
            execution_timeout: None,
            finalize_retries: 3,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Recognized environment variables (all optional):
    /// - WORKSPACE_ROOT (default: <tmp>/conveyor-workspaces)
    /// - TERMINATION_GRACE_SECS (default: 5)
    /// - LOG_FLUSH_INTERVAL_MS (default: 500)
    /// - LOG_BUFFER_LIMIT (bytes, default: 65536)
    /// - LOG_FLUSH_TIMEOUT_SECS (default: 5)
    /// - EXECUTION_TIMEOUT_SECS (default: unset, no limit)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let workspace_root = std::env::var("WORKSPACE_ROOT")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.workspace_root);

        let termination_grace = env_parse::<u64>("TERMINATION_GRACE_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.termination_grace);

        let log_flush_interval = env_parse::<u64>("LOG_FLUSH_INTERVAL_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.log_flush_interval);

        let log_buffer_limit =
            env_parse::<usize>("LOG_BUFFER_LIMIT").unwrap_or(defaults.log_buffer_limit);

        let log_flush_timeout = env_parse::<u64>("LOG_FLUSH_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.log_flush_timeout);

        let execution_timeout = env_parse::<u64>("EXECUTION_TIMEOUT_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Self {
            workspace_root,
            termination_grace,
            log_flush_interval,
            log_buffer_limit,
            log_flush_timeout,
            execution_timeout,
            finalize_retries: defaults.finalize_retries,
        }
    }

    /// Sets the whole-execution timeout
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workspace_root.as_os_str().is_empty() {
            anyhow::bail!("workspace_root cannot be empty");
        }

        if self.termination_grace.is_zero() {
            anyhow::bail!("termination_grace must be greater than 0");
        }

        if self.log_flush_interval.is_zero() {
            anyhow::bail!("log_flush_interval must be greater than 0");
        }

        if self.log_flush_timeout.is_zero() {
            anyhow::bail!("log_flush_timeout must be greater than 0");
        }

        if self.log_buffer_limit == 0 {
            anyhow::bail!("log_buffer_limit must be greater than 0");
        }

        if self.finalize_retries == 0 {
            anyhow::bail!("finalize_retries must be greater than 0");
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("conveyor-workspaces"))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.termination_grace, Duration::from_secs(5));
        assert_eq!(config.log_flush_interval, Duration::from_millis(500));
        assert_eq!(config.log_buffer_limit, 64 * 1024);
        assert!(config.execution_timeout.is_none());
        assert!(config.workspace_root.ends_with("conveyor-workspaces"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());

        config.log_buffer_limit = 0;
        assert!(config.validate().is_err());
        config.log_buffer_limit = 1024;

        config.termination_grace = Duration::ZERO;
        assert!(config.validate().is_err());
        config.termination_grace = Duration::from_secs(1);

        config.workspace_root = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_execution_timeout() {
        let config = EngineConfig::default().with_execution_timeout(Duration::from_secs(90));
        assert_eq!(config.execution_timeout, Some(Duration::from_secs(90)));
    }
}
