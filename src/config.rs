//! Configuration for Binswap.
//!
//! Three layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. YAML file (~/.config/binswap/binswap.yml or ./binswap.yml)
//! 3. `BINSWAP_REPLACEMENT` environment variable for the replacement path

use backon::ConstantBuilder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BinswapError, Result};

/// Environment variable naming the replacement path.
pub const REPLACEMENT_ENV: &str = "BINSWAP_REPLACEMENT";

/// Replacement path used when neither the environment nor the config file names one.
pub const DEFAULT_REPLACEMENT_PATH: &str = "/tmp/binswap";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub replacement_path: Option<PathBuf>,
    pub watch: WatchConfig,
    pub supervisor: LoopConfig,
    pub install: InstallConfig,
}

/// What the watcher does when stat fails for a reason other than absence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatErrorPolicy {
    /// Log and try again on the next tick
    #[default]
    Continue,
    /// Log and stop watching for good
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub poll_interval_ms: u64,
    pub on_stat_error: StatErrorPolicy,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            on_stat_error: StatErrorPolicy::Continue,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub start_backoff_ms: u64,
    pub swap_backoff_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            start_backoff_ms: 1000,
            swap_backoff_ms: 1000,
        }
    }
}

/// How a replacement is installed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStrategy {
    /// Rename onto `<original>-<counter>`, retiring the previous versioned file
    #[default]
    Versioned,
    /// Rename straight onto the original path
    InPlace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub delay_ms: u64,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_ms: 0,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    pub strategy: InstallStrategy,
    pub remove: RetryConfig,
    pub rename: RetryConfig,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            strategy: InstallStrategy::Versioned,
            remove: RetryConfig::default(),
            rename: RetryConfig {
                delay_ms: 500,
                max_attempts: None,
            },
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // An explicitly named file must load
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let project_name = env!("CARGO_PKG_NAME");

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Skipping {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Skipping {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| BinswapError::Config(format!("failed to read {}: {}", path.display(), e)))?;

        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| BinswapError::Config(format!("failed to parse {}: {}", path.display(), e)))?;

        log::info!("Loaded config from: {}", path.display());
        Ok(config)
    }
}

/// Retry behavior for one installer step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Retry forever with the given delay between attempts
    pub fn unbounded(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Give up after `attempts` tries
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Retries allowed after the first attempt, `None` for unbounded
    pub fn max_retries(&self) -> Option<usize> {
        self.max_attempts.map(|max| max.saturating_sub(1) as usize)
    }

    /// Build the fixed-delay backoff for this policy
    pub fn build_backoff(&self) -> ConstantBuilder {
        let builder = ConstantBuilder::default().with_delay(self.delay);
        match self.max_retries() {
            Some(retries) => builder.with_max_times(retries),
            None => builder.without_max_times(),
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self {
            delay: Duration::from_millis(config.delay_ms),
            max_attempts: config.max_attempts,
        }
    }
}

/// Immutable runtime configuration, fixed once at startup.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Path the operator named; versioned paths derive from it
    pub original_executable: PathBuf,
    /// Arguments passed verbatim to every launch
    pub arguments: Vec<String>,
    /// Path polled for a replacement binary
    pub replacement_path: PathBuf,
    pub poll_interval: Duration,
    pub on_stat_error: StatErrorPolicy,
    pub start_backoff: Duration,
    pub swap_backoff: Duration,
    pub strategy: InstallStrategy,
    pub remove_retry: RetryPolicy,
    pub rename_retry: RetryPolicy,
}

impl SupervisorConfig {
    /// Build the runtime configuration from CLI input, file config and environment.
    ///
    /// `env_replacement` is the raw value of [`REPLACEMENT_ENV`]; an empty value
    /// counts as unset.
    pub fn resolve(
        executable: impl Into<PathBuf>,
        arguments: Vec<String>,
        config: &Config,
        env_replacement: Option<String>,
    ) -> Result<Self> {
        let original_executable = executable.into();
        if original_executable.as_os_str().is_empty() {
            return Err(BinswapError::Config("executable path must not be empty".to_string()));
        }
        if config.watch.poll_interval_ms == 0 {
            return Err(BinswapError::Config("poll_interval_ms must be non-zero".to_string()));
        }

        let replacement_path = env_replacement
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .or_else(|| config.replacement_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REPLACEMENT_PATH));

        if replacement_path == original_executable {
            return Err(BinswapError::Config(format!(
                "replacement path {} is the executable itself",
                replacement_path.display()
            )));
        }

        Ok(Self {
            original_executable,
            arguments,
            replacement_path,
            poll_interval: Duration::from_millis(config.watch.poll_interval_ms),
            on_stat_error: config.watch.on_stat_error,
            start_backoff: Duration::from_millis(config.supervisor.start_backoff_ms),
            swap_backoff: Duration::from_millis(config.supervisor.swap_backoff_ms),
            strategy: config.install.strategy,
            remove_retry: config.install.remove.into(),
            rename_retry: config.install.rename.into(),
        })
    }
}
