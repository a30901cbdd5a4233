//! Deps command implementation
//!
//! Implements `kiln deps` to show the dependency plan of a variant without
//! fetching or building anything.

use std::path::Path;

use anyhow::Result;

use super::{load_environment, load_recipe};
use crate::cli::output::{self, status};
use crate::core::builder::{BuildRequest, Builder};

/// Execute the deps command
pub fn execute(recipe_path: &Path, with: &[String], head: bool) -> Result<()> {
    let recipe = load_recipe(recipe_path)?;
    let (dirs, config) = load_environment()?;
    let builder = Builder::new(&dirs, &config);

    let request = BuildRequest {
        flags: with.to_vec(),
        head,
        jobs: None,
    };
    let prepared = builder.prepare(&recipe, &request)?;

    println!("{} {} ({})", recipe.name(), prepared.variant.keg_version(&recipe), prepared.variant.id());
    for dropped in prepared.dropped() {
        println!("{} --{} ignored: {}", status::WARNING, dropped.name, dropped.reason);
    }
    print!("{}", output::format_plan(&prepared.plan));
    Ok(())
}
