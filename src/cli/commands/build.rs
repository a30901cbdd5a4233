//! Build command implementation
//!
//! Implements `kiln build` to fetch, patch, compile and install a recipe.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{HumanBytes, ProgressBar};
use tokio_util::sync::CancellationToken;

use super::{load_environment, load_recipe};
use crate::cli::output::{self, status};
use crate::core::builder::{BuildRequest, Builder};
use crate::infra::filesystem;
use crate::infra::toolchain;

/// Build options
pub struct BuildOptions {
    /// Requested option flags
    pub with: Vec<String>,
    /// Build from the head source
    pub head: bool,
    /// Number of parallel jobs
    pub jobs: Option<usize>,
    /// Prefix root override
    pub prefix_root: Option<PathBuf>,
    /// Where to write the receipt JSON
    pub receipt: Option<PathBuf>,
    /// Suppress progress and summary output
    pub quiet: bool,
}

/// Execute the build command
pub async fn execute(recipe_path: &Path, options: BuildOptions, cancel: CancellationToken) -> Result<()> {
    let recipe = load_recipe(recipe_path)?;
    let (dirs, config) = load_environment()?;

    let detected = config
        .toolchain()
        .or_else(|| toolchain::detect(&toolchain::default_compiler()));
    match &detected {
        Some(id) => tracing::info!("Using toolchain {id}"),
        None => tracing::warn!("No compiler detected; skipping toolchain compatibility checks"),
    }

    let mut builder = Builder::new(&dirs, &config)
        .with_toolchain(detected)
        .with_cancellation(cancel);
    if let Some(root) = &options.prefix_root {
        builder = builder.with_prefix_root(root);
    }

    let spinner = if options.quiet {
        ProgressBar::hidden()
    } else {
        output::create_spinner(&format!("Building {}", recipe.name()))
    };
    let fetching = spinner.clone();
    let name = recipe.name().to_string();
    builder = builder.with_progress(Box::new(move |done, total| {
        let message = if total > 0 {
            format!("Fetching {name}: {} / {}", HumanBytes(done), HumanBytes(total))
        } else {
            format!("Fetching {name}: {}", HumanBytes(done))
        };
        fetching.set_message(message);
    }));

    let request = BuildRequest {
        flags: options.with,
        head: options.head,
        jobs: options.jobs,
    };

    let result = builder.build(&recipe, &request).await;
    spinner.finish_and_clear();
    let report = result?;

    if let Some(path) = &options.receipt {
        let json = report.receipt.to_json().context("Failed to serialize install receipt")?;
        filesystem::write_file(path, &json)
            .with_context(|| format!("Failed to write receipt to {}", path.display()))?;
    }

    if !options.quiet {
        if let Some(first) = report.finalize.missing.first() {
            println!(
                "{} {} removal target(s) were already absent, e.g. {}",
                status::WARNING,
                report.finalize.missing.len(),
                first.display()
            );
        }
        print!("{}", output::format_report(&report));
    }

    Ok(())
}
