//! Kiln - recipe interpreter and build engine
//!
//! Turns a declarative recipe plus a set of requested options into an
//! installed package: fetch and verify the source, apply patches, run the
//! configure/compile/install pipeline and finalize the install tree.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Recipe model, option/dependency resolution and build stages
//! - [`infra`] - Infrastructure layer (network, filesystem, processes)
//! - [`config`] - Configuration and constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;

#[cfg(test)]
pub mod test_utils;
