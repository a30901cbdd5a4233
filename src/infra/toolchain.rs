//! Toolchain detection
//!
//! Identifies the active C compiler by name, version and vendor build number.

use regex::Regex;
use semver::Version;
use std::fmt;
use std::process::Command;

/// Identity of a C toolchain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainId {
    /// Family name: "clang", "gcc" or "llvm" (llvm-gcc)
    pub name: String,
    /// Compiler version
    pub version: Option<Version>,
    /// Vendor build number
    pub build: Option<u64>,
}

impl ToolchainId {
    /// Create a toolchain identity
    pub fn new(name: &str, version: Option<Version>, build: Option<u64>) -> Self {
        Self {
            name: name.to_string(),
            version,
            build,
        }
    }
}

impl fmt::Display for ToolchainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(version) = &self.version {
            write!(f, " {version}")?;
        }
        if let Some(build) = self.build {
            write!(f, " (build {build})")?;
        }
        Ok(())
    }
}

/// Parse `4.2` or `15.0.0` into a semver version
pub fn lenient_version(text: &str) -> Option<Version> {
    let mut parts = text.split('.').map(str::parse::<u64>);
    let major = parts.next()?.ok()?;
    let minor = parts.next().and_then(Result::ok).unwrap_or(0);
    let patch = parts.next().and_then(Result::ok).unwrap_or(0);
    Some(Version::new(major, minor, patch))
}

fn capture<'t>(pattern: &str, text: &'t str) -> Option<&'t str> {
    Regex::new(pattern)
        .ok()?
        .captures(text)?
        .get(1)
        .map(|m| m.as_str())
}

/// Identify a compiler from its `--version` output
pub fn parse_version_output(output: &str) -> Option<ToolchainId> {
    let first_line = output.lines().next()?;

    if let Some(build) = capture(r"LLVM build (\d+)", output) {
        let version = capture(r"\) (\d+(?:\.\d+)+)", first_line).and_then(lenient_version);
        return Some(ToolchainId::new("llvm", version, build.parse().ok()));
    }

    if first_line.contains("clang") || first_line.contains("Apple LLVM") {
        let version = capture(r"version (\d+(?:\.\d+)*)", first_line).and_then(lenient_version);
        let build = capture(r"\(clang-(\d+)", first_line).and_then(|b| b.parse().ok());
        return Some(ToolchainId::new("clang", version, build));
    }

    if output.contains("Free Software Foundation") || first_line.contains("GCC") || first_line.contains("gcc") {
        let version = Regex::new(r"(\d+\.\d+(?:\.\d+)?)")
            .ok()?
            .find_iter(first_line)
            .last()
            .and_then(|m| lenient_version(m.as_str()));
        let build = capture(r"Apple Inc\. build (\d+)", output).and_then(|b| b.parse().ok());
        return Some(ToolchainId::new("gcc", version, build));
    }

    None
}

/// Run `<compiler> --version` and identify the result
///
/// Blocking; call from the blocking pool in async contexts.
pub fn detect(compiler: &str) -> Option<ToolchainId> {
    let output = Command::new(compiler).arg("--version").output().ok()?;
    if !output.status.success() {
        tracing::debug!("'{compiler} --version' exited with {}", output.status);
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let id = parse_version_output(&text);
    tracing::debug!("Detected toolchain: {id:?}");
    id
}

/// Compiler named by `CC`, falling back to `cc`
pub fn default_compiler() -> String {
    std::env::var("CC").unwrap_or_else(|_| "cc".to_string())
}
