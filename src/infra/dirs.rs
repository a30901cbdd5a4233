//! Platform-specific directory management
//!
//! Follows the XDG Base Directory layout on Linux and standard locations on
//! macOS. Environment variables override the defaults:
//! - `KILN_CACHE_DIR` - downloads and build scratch trees
//! - `KILN_CONFIG_DIR` - `config.toml`
//! - `KILN_DATA_DIR` - default prefix root

use std::env;
use std::path::PathBuf;

/// Environment variable names for directory overrides
pub const ENV_CACHE_DIR: &str = "KILN_CACHE_DIR";
pub const ENV_CONFIG_DIR: &str = "KILN_CONFIG_DIR";
pub const ENV_DATA_DIR: &str = "KILN_DATA_DIR";

/// Application name used in directory paths
const APP_NAME: &str = "kiln";

const DOWNLOADS_SUBDIR: &str = "downloads";
const SCRATCH_SUBDIR: &str = "build";
const PREFIX_SUBDIR: &str = "prefix";

/// Directory provider for kiln
#[derive(Debug, Clone)]
pub struct KilnDirs {
    cache_dir: PathBuf,
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl KilnDirs {
    /// Resolve directories from the environment, then platform defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache_dir: resolve(ENV_CACHE_DIR, dirs::cache_dir, &[".cache"]),
            config_dir: resolve(ENV_CONFIG_DIR, dirs::config_dir, &[".config"]),
            data_dir: resolve(ENV_DATA_DIR, dirs::data_dir, &[".local", "share"]),
        }
    }

    /// Use one root for everything; handy for tests and sandboxes
    #[must_use]
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            cache_dir: root.join("cache"),
            config_dir: root.join("config"),
            data_dir: root.join("data"),
        }
    }

    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone()
    }

    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }

    /// Verified source archives, shared by every build
    #[must_use]
    pub fn downloads_dir(&self) -> PathBuf {
        self.cache_dir.join(DOWNLOADS_SUBDIR)
    }

    /// Root of per-build scratch directories
    #[must_use]
    pub fn scratch_root(&self) -> PathBuf {
        self.cache_dir.join(SCRATCH_SUBDIR)
    }

    /// Prefix root used when the configuration names none
    #[must_use]
    pub fn default_prefix_root(&self) -> PathBuf {
        self.data_dir.join(PREFIX_SUBDIR)
    }

    /// Get the global config file path
    #[must_use]
    pub fn global_config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }
}

impl Default for KilnDirs {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve(var: &str, platform: fn() -> Option<PathBuf>, home_fallback: &[&str]) -> PathBuf {
    if let Ok(path) = env::var(var) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    platform().map_or_else(
        || {
            let mut base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            base.extend(home_fallback);
            base.join(APP_NAME)
        },
        |p| p.join(APP_NAME),
    )
}
