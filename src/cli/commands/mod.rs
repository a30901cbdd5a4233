//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod build;
pub mod deps;
pub mod options;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use tokio_util::sync::CancellationToken;

use crate::core::global_config::GlobalConfig;
use crate::core::recipe::Recipe;
use crate::infra::dirs::KilnDirs;

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch, patch, build and install a recipe
    Build {
        /// Path to the recipe file
        recipe: PathBuf,

        /// Select an option (repeatable; `name` or `--name`)
        #[arg(short, long = "with", value_name = "OPTION", allow_hyphen_values = true)]
        with: Vec<String>,

        /// Build from the version-control head instead of the release
        #[arg(long)]
        head: bool,

        /// Number of parallel jobs
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Install under this prefix root instead of the configured one
        #[arg(long, value_name = "DIR")]
        prefix_root: Option<PathBuf>,

        /// Write the install receipt as JSON to this file
        #[arg(long, value_name = "FILE")]
        receipt: Option<PathBuf>,
    },

    /// List the options a recipe declares
    Options {
        /// Path to the recipe file
        recipe: PathBuf,
    },

    /// Show the dependency plan for a variant without building
    Deps {
        /// Path to the recipe file
        recipe: PathBuf,

        /// Select an option (repeatable; `name` or `--name`)
        #[arg(short, long = "with", value_name = "OPTION", allow_hyphen_values = true)]
        with: Vec<String>,

        /// Evaluate for a head build
        #[arg(long)]
        head: bool,
    },
}

impl Commands {
    /// Execute the command
    pub async fn run(self, quiet: bool, cancel: CancellationToken) -> Result<()> {
        match self {
            Self::Build {
                recipe,
                with,
                head,
                jobs,
                prefix_root,
                receipt,
            } => {
                let options = build::BuildOptions {
                    with,
                    head,
                    jobs,
                    prefix_root,
                    receipt,
                    quiet,
                };
                build::execute(&recipe, options, cancel).await
            }
            Self::Options { recipe } => options::execute(&recipe),
            Self::Deps { recipe, with, head } => deps::execute(&recipe, &with, head),
        }
    }
}

/// Load and validate a recipe file
pub(crate) fn load_recipe(path: &Path) -> Result<Recipe> {
    Recipe::load(path).with_context(|| format!("Failed to load recipe {}", path.display()))
}

/// Resolve directories and the global configuration
pub(crate) fn load_environment() -> Result<(KilnDirs, GlobalConfig)> {
    let dirs = KilnDirs::new();
    let config = GlobalConfig::load(&dirs).context("Failed to load global configuration")?;
    Ok((dirs, config))
}
