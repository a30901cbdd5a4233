//! Error types for kiln
//!
//! Domain-specific error types using thiserror.

use std::path::PathBuf;
use thiserror::Error;

/// Recipe loading and validation errors
#[derive(Error, Debug)]
pub enum RecipeError {
    /// Recipe file could not be read
    #[error("Failed to read recipe '{path}': {error}")]
    Read { path: PathBuf, error: String },

    /// Recipe TOML could not be parsed
    #[error("Failed to parse recipe: {0}")]
    Parse(String),

    /// Condition expression is malformed
    #[error("Invalid condition '{expr}': {reason}")]
    InvalidCondition { expr: String, reason: String },

    /// A condition or option field names an option the recipe never declares
    #[error("Recipe '{recipe}' references undeclared option '{name}' in {context}")]
    UndeclaredOption {
        recipe: String,
        name: String,
        context: String,
    },

    /// Checksum is not `<algorithm>:<hex>` with a supported algorithm
    #[error("Invalid checksum '{value}': {reason}")]
    InvalidChecksum { value: String, reason: String },

    /// Any other structural problem
    #[error("Recipe '{recipe}' is invalid: {reason}")]
    Invalid { recipe: String, reason: String },
}

/// Option resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionError {
    /// Caller requested an option the recipe does not declare
    #[error("Unknown option '{flag}' requested")]
    UnknownOption { flag: String },

    /// Two options that the recipe declares as conflicting were both selected
    #[error("Options '{first}' and '{second}' cannot be combined")]
    Conflicting { first: String, second: String },

    /// Head build requested but the recipe has no head source
    #[error("Recipe '{recipe}' has no head source")]
    HeadUnavailable { recipe: String },
}

/// Dependency resolution errors
#[derive(Error, Debug)]
pub enum ResolverError {
    /// Same dependency declared with incompatible version requirements
    #[error("Dependency '{dependency}' has conflicting requirements '{first}' and '{second}'")]
    VersionConflict {
        dependency: String,
        first: String,
        second: String,
    },

    /// Version requirement could not be parsed
    #[error("Dependency '{dependency}' has invalid version requirement '{requirement}': {error}")]
    InvalidRequirement {
        dependency: String,
        requirement: String,
        error: String,
    },

    /// Active toolchain is known to break this recipe
    #[error("Cannot build with {toolchain}: {cause}")]
    IncompatibleToolchain { toolchain: String, cause: String },
}

/// Download errors
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Network error
    #[error("Network error downloading '{url}': {error}")]
    NetworkError { url: String, error: String },

    /// Server answered with a status that retrying the same URL will not fix
    #[error("HTTP {status} downloading '{url}'")]
    HttpStatus { url: String, status: u16 },

    /// Checksum verification failed
    #[error("Checksum mismatch for '{file}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },

    /// Every URL failed after its retries
    #[error("All sources failed: {}", attempts.join("; "))]
    MirrorsExhausted { attempts: Vec<String> },
}

impl DownloadError {
    /// Whether another attempt against the same URL may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. } => true,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Patch stage errors
#[derive(Error, Debug)]
pub enum PatchError {
    /// Diff text is malformed
    #[error("Patch {index} is malformed: {reason}")]
    Malformed { index: usize, reason: String },

    /// Patch does not apply, even with fuzz
    #[error("Patch {index} does not apply to '{file}' (hunk {hunk}): {reason}")]
    Unapplicable {
        index: usize,
        file: String,
        hunk: usize,
        reason: String,
    },

    /// Remote patch could not be retrieved
    #[error("Patch {index} could not be fetched: {error}")]
    Fetch { index: usize, error: String },

    /// In-place replacement found nothing to replace
    #[error("In-place replacement in '{path}' failed: '{pattern}' not found")]
    Inreplace { path: String, pattern: String },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },
}

/// Build errors
#[derive(Error, Debug)]
pub enum BuildError {
    /// Child process exited unsuccessfully
    #[error("{stage} failed: `{command}` exited with {code}\n{tail}")]
    ProcessFailed {
        stage: String,
        command: String,
        code: String,
        tail: String,
    },

    /// Child process could not be started
    #[error("{stage} failed: could not run `{command}`: {error}")]
    Spawn {
        stage: String,
        command: String,
        error: String,
    },

    /// Build was interrupted by the caller
    #[error("{stage} interrupted")]
    Interrupted { stage: String },

    /// Another build owns the scratch directory
    #[error("Scratch directory '{path}' is in use by another build")]
    ScratchBusy { path: PathBuf },

    /// Source archive could not be unpacked
    #[error("Failed to extract '{archive}': {error}")]
    Extract { archive: PathBuf, error: String },

    /// Scratch lock file could not be created or locked
    #[error("Failed to lock '{path}': {error}")]
    Lock { path: PathBuf, error: String },
}

/// Filesystem errors
#[derive(Error, Debug)]
pub enum FilesystemError {
    /// Failed to create directory
    #[error("Failed to create directory '{path}': {error}")]
    CreateDir { path: PathBuf, error: String },

    /// Failed to remove a file or directory
    #[error("Failed to remove '{path}': {error}")]
    Remove { path: PathBuf, error: String },

    /// Failed to write file
    #[error("Failed to write file '{path}': {error}")]
    WriteFile { path: PathBuf, error: String },

    /// A recipe-supplied path resolves outside the directory it belongs to
    #[error("Path '{path}' escapes '{root}'")]
    Escapes { root: PathBuf, path: PathBuf },

    /// Failed to move a file or directory
    #[error("Failed to move '{from}' to '{to}': {error}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        error: String,
    },
}

/// Pipeline stage names used in error context and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Fetch,
    Patch,
    Configure,
    Compile,
    Install,
    Finalize,
}

impl Stage {
    /// Lowercase stage name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Fetch => "fetch",
            Self::Patch => "patch",
            Self::Configure => "configure",
            Self::Compile => "compile",
            Self::Install => "install",
            Self::Finalize => "finalize",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The failure categories callers act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ChecksumMismatch,
    NetworkFetchFailure,
    PatchApplicationFailure,
    UnknownOptionRequested,
    IncompatibleToolchain,
    ExternalProcessFailure,
    UnsupportedVariantCombination,
}

/// Top-level kiln error type
#[derive(Error, Debug)]
pub enum KilnError {
    /// Recipe error
    #[error("Recipe error: {0}")]
    Recipe(#[from] RecipeError),

    /// Option error
    #[error("Option error: {0}")]
    Option(#[from] OptionError),

    /// Resolver error
    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),

    /// Download error
    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    /// Patch error
    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    /// Build error
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Head checkout error
    #[error("Checkout error: {0}")]
    Git(#[from] crate::infra::git::GitError),

    /// Filesystem error
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] FilesystemError),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(#[from] crate::core::global_config::GlobalConfigError),

    /// A stage failed while building a recipe
    #[error("{recipe}: {stage} stage failed: {source}")]
    Stage {
        recipe: String,
        stage: Stage,
        #[source]
        source: Box<KilnError>,
    },
}

impl KilnError {
    /// Attach recipe identity and stage to an error
    pub fn in_stage(self, recipe: &str, stage: Stage) -> Self {
        match self {
            already @ Self::Stage { .. } => already,
            other => Self::Stage {
                recipe: recipe.to_string(),
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage the error was raised in, if known
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Classify the error
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Stage { source, .. } => source.kind(),
            Self::Option(OptionError::UnknownOption { .. }) => {
                Some(ErrorKind::UnknownOptionRequested)
            }
            Self::Option(_) => Some(ErrorKind::UnsupportedVariantCombination),
            Self::Resolver(ResolverError::IncompatibleToolchain { .. }) => {
                Some(ErrorKind::IncompatibleToolchain)
            }
            Self::Download(DownloadError::ChecksumMismatch { .. }) => {
                Some(ErrorKind::ChecksumMismatch)
            }
            Self::Download(
                DownloadError::NetworkError { .. }
                | DownloadError::HttpStatus { .. }
                | DownloadError::MirrorsExhausted { .. },
            )
            | Self::Git(_) => Some(ErrorKind::NetworkFetchFailure),
            Self::Patch(_) => Some(ErrorKind::PatchApplicationFailure),
            Self::Build(BuildError::ProcessFailed { .. } | BuildError::Spawn { .. }) => {
                Some(ErrorKind::ExternalProcessFailure)
            }
            _ => None,
        }
    }
}
