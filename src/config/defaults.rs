//! Default configuration values

/// Retries per URL after the first failed attempt
pub const MAX_DOWNLOAD_RETRIES: u32 = 2;

/// First backoff delay between retries (in milliseconds)
pub const BACKOFF_BASE_MS: u64 = 1000;

/// Upper bound for a single backoff delay (in milliseconds)
pub const BACKOFF_MAX_MS: u64 = 30_000;

/// Whole-request timeout for downloads (in seconds)
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// Connect timeout for downloads (in seconds)
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Number of stderr lines kept for process failure reports
pub const STDERR_TAIL_LINES: usize = 20;

/// Fuzz factor used when strict patch application fails
pub const PATCH_FUZZ: usize = 2;

/// Subdirectory of a prefix root holding installed kegs
pub const CELLAR_SUBDIR: &str = "Cellar";

/// Subdirectory of a prefix root holding linked optional packages
pub const OPT_SUBDIR: &str = "opt";
