//! Global configuration management
//!
//! Reads settings from `config.toml` in the config directory. A missing file
//! means defaults everywhere.

use crate::config::defaults;
use crate::infra::dirs::KilnDirs;
use crate::infra::retry::RetryPolicy;
use crate::infra::toolchain::{lenient_version, ToolchainId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Global configuration error types
#[derive(Error, Debug)]
pub enum GlobalConfigError {
    /// Failed to read config file
    #[error("Failed to read config file '{path}': {error}")]
    ReadError { path: String, error: String },

    /// Failed to parse config file
    #[error("Failed to parse config file '{path}': {error}")]
    ParseError { path: String, error: String },

    /// Failed to write config file
    #[error("Failed to write config file '{path}': {error}")]
    WriteError { path: String, error: String },
}

/// Global configuration for kiln
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Build defaults
    #[serde(default)]
    pub build: BuildConfig,

    /// Download behavior
    #[serde(default)]
    pub network: NetworkConfig,

    /// Toolchain identity override
    #[serde(default)]
    pub toolchain: ToolchainConfig,
}

/// Default build options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Default number of parallel jobs
    pub jobs: Option<usize>,

    /// Root holding `Cellar/` and `opt/`
    pub prefix_root: Option<PathBuf>,
}

/// Download retry and timeout settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Retries per URL after the first attempt
    pub retries: Option<u32>,

    /// First backoff delay in milliseconds
    pub backoff_ms: Option<u64>,

    /// Backoff cap in milliseconds
    pub max_backoff_ms: Option<u64>,

    /// Whole-request timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// Toolchain identity used instead of probing the compiler
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolchainConfig {
    pub name: Option<String>,
    pub version: Option<String>,
    pub build: Option<u64>,
}

impl GlobalConfig {
    /// Load global configuration from the config directory
    ///
    /// # Errors
    ///
    /// Returns `GlobalConfigError::ParseError` if the config file exists but
    /// contains invalid TOML.
    pub fn load(dirs: &KilnDirs) -> Result<Self, GlobalConfigError> {
        Self::load_from_path(&dirs.global_config_path())
    }

    /// Load global configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, GlobalConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| GlobalConfigError::ReadError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| GlobalConfigError::ParseError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Save global configuration to a specific path
    ///
    /// Creates parent directories if they don't exist.
    pub fn save_to_path(&self, path: &Path) -> Result<(), GlobalConfigError> {
        let write_error = |e: &dyn std::fmt::Display, at: &Path| GlobalConfigError::WriteError {
            path: at.display().to_string(),
            error: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| write_error(&e, parent))?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| write_error(&e, path))?;
        fs::write(path, content).map_err(|e| write_error(&e, path))
    }

    /// Effective number of build jobs; CPU count when unset or zero
    #[must_use]
    pub fn build_jobs(&self) -> usize {
        match self.build.jobs {
            Some(jobs) if jobs > 0 => jobs,
            _ => num_cpus::get(),
        }
    }

    /// Effective prefix root
    #[must_use]
    pub fn prefix_root(&self, dirs: &KilnDirs) -> PathBuf {
        self.build
            .prefix_root
            .clone()
            .unwrap_or_else(|| dirs.default_prefix_root())
    }

    /// Retry policy for downloads and remote patches
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.network.retries.unwrap_or(defaults::MAX_DOWNLOAD_RETRIES),
            self.network.backoff_ms.unwrap_or(defaults::BACKOFF_BASE_MS),
            self.network.max_backoff_ms.unwrap_or(defaults::BACKOFF_MAX_MS),
        )
    }

    /// Effective download timeout in seconds
    #[must_use]
    pub fn timeout_secs(&self) -> u64 {
        self.network
            .timeout_secs
            .unwrap_or(defaults::DOWNLOAD_TIMEOUT_SECS)
    }

    /// Configured toolchain identity, if a name is set
    #[must_use]
    pub fn toolchain(&self) -> Option<ToolchainId> {
        let name = self.toolchain.name.as_deref()?;
        let version = self.toolchain.version.as_deref().and_then(lenient_version);
        Some(ToolchainId::new(name, version, self.toolchain.build))
    }
}
