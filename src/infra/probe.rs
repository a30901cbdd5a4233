//! Dependency presence probing

use std::path::PathBuf;

use crate::config::defaults;
use crate::core::resolver::DependencyProbe;

/// Finds installed dependencies under a prefix root or on `PATH`
#[derive(Debug, Clone)]
pub struct PrefixProbe {
    prefix_root: PathBuf,
    search_path: bool,
}

impl PrefixProbe {
    /// Probe `<prefix_root>/opt/<name>`, then `PATH`
    pub fn new(prefix_root: impl Into<PathBuf>) -> Self {
        Self {
            prefix_root: prefix_root.into(),
            search_path: true,
        }
    }

    /// Only look under the prefix root
    #[must_use]
    pub fn prefix_only(mut self) -> Self {
        self.search_path = false;
        self
    }
}

impl DependencyProbe for PrefixProbe {
    fn is_present(&self, name: &str) -> bool {
        if self.prefix_root.join(defaults::OPT_SUBDIR).join(name).exists() {
            return true;
        }
        self.search_path && which::which(name).is_ok()
    }
}
