//! Head source checkouts
//!
//! Git repositories are cloned shallowly with the gix crate. Bazaar and
//! Mercurial sources shell out to `bzr` and `hg`.

use gix::remote::fetch::Shallow;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

use crate::core::recipe::{HeadSource, Vcs};

/// Checkout errors
#[derive(Error, Debug)]
pub enum GitError {
    /// Failed to clone repository
    #[error("Failed to clone '{url}': {error}")]
    CloneFailed { url: String, error: String },

    /// Branch does not exist on the remote
    #[error("Branch '{branch}' not found in '{url}': {error}")]
    BranchNotFound {
        url: String,
        branch: String,
        error: String,
    },

    /// Failed to resolve the checked out commit
    #[error("Failed to resolve HEAD in '{path}': {error}")]
    ResolveFailed { path: PathBuf, error: String },

    /// External VCS tool is not installed
    #[error("'{tool}' is required to check out '{url}' but was not found on PATH")]
    ToolMissing { tool: String, url: String },

    /// External VCS tool exited unsuccessfully
    #[error("`{command}` failed: {error}")]
    CommandFailed { command: String, error: String },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },
}

/// Result of a head checkout
#[derive(Debug, Clone)]
pub struct CheckoutResult {
    /// Path to the working tree
    pub path: PathBuf,
    /// VCS used
    pub vcs: Vcs,
    /// Commit id, known for git checkouts
    pub commit: Option<String>,
}

/// Check out `source` into `dest`, replacing whatever is there
///
/// Blocking; run on the blocking pool from async code.
pub fn checkout(source: &HeadSource, dest: &Path) -> Result<CheckoutResult, GitError> {
    if dest.exists() {
        std::fs::remove_dir_all(dest).map_err(|e| GitError::IoError {
            path: dest.to_path_buf(),
            error: e.to_string(),
        })?;
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| GitError::IoError {
            path: parent.to_path_buf(),
            error: e.to_string(),
        })?;
    }

    let vcs = source.vcs();
    let commit = match vcs {
        Vcs::Git => Some(clone_git(source.locator(), source.branch.as_deref(), dest)?),
        Vcs::Bzr | Vcs::Hg => {
            run_external(&external_command(vcs, source.locator(), dest), source.locator())?;
            None
        }
    };

    tracing::debug!(
        "Checked out {} ({}) into {}",
        source.locator(),
        vcs.command(),
        dest.display()
    );

    Ok(CheckoutResult {
        path: dest.to_path_buf(),
        vcs,
        commit,
    })
}

/// Shallow clone and return the checked out commit id
fn clone_git(url: &str, branch: Option<&str>, dest: &Path) -> Result<String, GitError> {
    let clone_failed = |e: &dyn std::fmt::Display| GitError::CloneFailed {
        url: url.to_string(),
        error: e.to_string(),
    };

    let mut prepare = gix::prepare_clone(url, dest).map_err(|e| clone_failed(&e))?;
    prepare = prepare.with_shallow(Shallow::DepthAtRemote(NonZeroU32::MIN));

    if let Some(branch) = branch {
        prepare = prepare
            .with_ref_name(Some(branch))
            .map_err(|e| GitError::BranchNotFound {
                url: url.to_string(),
                branch: branch.to_string(),
                error: e.to_string(),
            })?;
    }

    let (mut checkout, _outcome) = prepare
        .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
        .map_err(|e| clone_failed(&e))?;

    let (repo, _outcome) = checkout
        .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
        .map_err(|e| clone_failed(&e))?;

    let head = repo.head_id().map_err(|e| GitError::ResolveFailed {
        path: dest.to_path_buf(),
        error: e.to_string(),
    })?;

    Ok(head.to_hex().to_string())
}

/// Argument vector for a non-git checkout
pub fn external_command(vcs: Vcs, url: &str, dest: &Path) -> Vec<String> {
    let dest = dest.display().to_string();
    match vcs {
        Vcs::Bzr => vec![
            "bzr".to_string(),
            "checkout".to_string(),
            "--lightweight".to_string(),
            url.to_string(),
            dest,
        ],
        Vcs::Hg | Vcs::Git => vec![
            vcs.command().to_string(),
            "clone".to_string(),
            url.to_string(),
            dest,
        ],
    }
}

fn run_external(argv: &[String], url: &str) -> Result<(), GitError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(GitError::CommandFailed {
            command: String::new(),
            error: "empty command".to_string(),
        });
    };

    let program = which::which(program).map_err(|_| GitError::ToolMissing {
        tool: program.clone(),
        url: url.to_string(),
    })?;

    let command = argv.join(" ");
    tracing::debug!("Running {command}");

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| GitError::CommandFailed {
            command: command.clone(),
            error: e.to_string(),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(GitError::CommandFailed {
            command,
            error: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
