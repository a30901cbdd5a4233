//! Core recipe and build logic
//!
//! Side effects go through [`crate::infra`]; the modules here decide what
//! to do with them.
//!
//! # Submodules
//!
//! - [`recipe`] - Recipe (TOML) parsing and validation
//! - [`condition`] - Condition expressions used by conditional recipe rules
//! - [`options`] - Option resolution and variants
//! - [`resolver`] - Dependency evaluation and toolchain checks
//! - [`fetch`] - Source fetching and extraction
//! - [`patch`] - Unified diff application and in-place replacement
//! - [`build_env`] - Placeholders and the build environment overlay
//! - [`executor`] - Configure/compile/install pipeline
//! - [`finalize`] - Post-install rules and caveats
//! - [`receipt`] - Install receipts
//! - [`builder`] - Stage orchestration
//! - [`global_config`] - Global configuration management

pub mod build_env;
pub mod builder;
pub mod condition;
pub mod executor;
pub mod fetch;
pub mod finalize;
pub mod global_config;
pub mod options;
pub mod patch;
pub mod receipt;
pub mod recipe;
pub mod resolver;
