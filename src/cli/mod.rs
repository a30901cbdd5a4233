//! Command-line interface module
//!
//! Argument parsing and output only; the work happens in [`crate::core`].

pub mod commands;
pub mod output;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use commands::Commands;

/// Kiln - build packages from declarative recipes
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log filter directive implied by `-v`/`-q`
    pub fn log_level(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "error",
            (false, 0) => "warn",
            (false, 1) => "info",
            (false, _) => "debug",
        }
    }

    /// Execute the CLI command
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        self.command.run(self.quiet, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_log_level_from_flags() {
        let cli = Cli::parse_from(["kiln", "-vv", "options", "r.toml"]);
        assert_eq!(cli.log_level(), "debug");

        let cli = Cli::parse_from(["kiln", "--quiet", "options", "r.toml"]);
        assert_eq!(cli.log_level(), "error");

        let cli = Cli::parse_from(["kiln", "options", "r.toml"]);
        assert_eq!(cli.log_level(), "warn");
    }

    #[test]
    fn test_build_arguments() {
        let cli = Cli::parse_from([
            "kiln", "build", "emacs.toml", "--with", "cocoa", "--with", "--srgb", "--head", "-j", "3",
        ]);
        match cli.command {
            Commands::Build {
                recipe,
                with,
                head,
                jobs,
                prefix_root,
                receipt,
            } => {
                assert_eq!(recipe.to_str(), Some("emacs.toml"));
                assert_eq!(with, vec!["cocoa", "--srgb"]);
                assert!(head);
                assert_eq!(jobs, Some(3));
                assert!(prefix_root.is_none());
                assert!(receipt.is_none());
            }
            other => panic!("expected build, got {other:?}"),
        }
    }
}
