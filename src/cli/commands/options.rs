//! Options command implementation
//!
//! Implements `kiln options` to list what a recipe lets callers select.

use std::path::Path;

use anyhow::Result;

use super::load_recipe;
use crate::core::recipe::{OptionDeclaration, Recipe};

/// Execute the options command
pub fn execute(recipe_path: &Path) -> Result<()> {
    let recipe = load_recipe(recipe_path)?;
    print!("{}", format_options(&recipe));
    Ok(())
}

/// One line per declared option, implicit ones included
pub fn format_options(recipe: &Recipe) -> String {
    let declared = recipe.declared_options();
    if declared.is_empty() {
        return format!("{} declares no options\n", recipe.name());
    }

    let width = declared.iter().map(|o| o.name.len()).max().unwrap_or(0) + 2;
    declared
        .iter()
        .map(|option| format!("--{:<width$}{}\n", option.name, describe(option)))
        .collect()
}

fn describe(option: &OptionDeclaration) -> String {
    let mut text = option.description.clone();
    if option.default {
        text.push_str(" [default]");
    }
    if let Some(parent) = &option.requires {
        text.push_str(&format!(" (requires --{parent})"));
    }
    if !option.conflicts.is_empty() {
        text.push_str(&format!(" (conflicts with --{})", option.conflicts.join(", --")));
    }
    text
}
