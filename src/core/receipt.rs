//! Install receipts
//!
//! A receipt records what one successful build placed into its prefix.
//! Writing it anywhere is the caller's business.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::core::finalize::FinalizeOutcome;
use crate::core::options::{SourceKind, Variant};
use crate::core::recipe::Recipe;
use crate::core::resolver::{DependencyPlan, ResolvedDependency};
use crate::infra::filesystem;

/// Generated launcher script
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrapperRecord {
    /// Path relative to the prefix
    pub path: PathBuf,
    /// Script content
    pub script: String,
}

/// Record of a completed install
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReceipt {
    pub name: String,
    /// Release version or `HEAD`
    pub version: String,
    pub source: SourceKind,
    /// Commit id of a git head checkout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    pub variant_id: String,
    /// Absolute prefix of the keg
    pub prefix: PathBuf,
    /// Selected options in name order
    pub options: Vec<String>,
    pub dependencies: Vec<ResolvedDependency>,
    /// Optional dependencies that were wanted but not found
    pub missing_optional: Vec<String>,
    /// Files in the prefix, relative and sorted
    pub files: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrapper: Option<WrapperRecord>,
    pub caveats: Vec<String>,
}

impl InstallReceipt {
    /// Assemble the receipt from the build's results
    pub fn new(
        recipe: &Recipe,
        variant: &Variant,
        plan: &DependencyPlan,
        outcome: &FinalizeOutcome,
        prefix: &Path,
        commit: Option<String>,
    ) -> Self {
        Self {
            name: recipe.name().to_string(),
            version: variant.keg_version(recipe).to_string(),
            source: variant.source(),
            commit,
            variant_id: variant.id(),
            prefix: prefix.to_path_buf(),
            options: variant.options().selected().map(str::to_string).collect(),
            dependencies: plan.dependencies.clone(),
            missing_optional: plan.missing_optional.clone(),
            files: filesystem::relative_files(prefix),
            removed: outcome.removed.clone(),
            wrapper: outcome.wrapper.as_ref().map(|(path, script)| WrapperRecord {
                path: path.clone(),
                script: script.clone(),
            }),
            caveats: outcome.caveats.clone(),
        }
    }

    /// Pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
