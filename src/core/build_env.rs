//! Build environment setup
//!
//! Placeholder expansion for commands and arguments, and the environment
//! overlay every build process runs with.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::options::Variant;
use crate::core::recipe::{EnvOperation, EnvRule};

const MAKEFLAGS: &str = "MAKEFLAGS";

/// Values substituted for `{prefix}`, `{bin}`, `{share}`, `{info}`, `{man}`,
/// `{root}`, `{name}` and `{version}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholders {
    values: BTreeMap<&'static str, String>,
}

impl Placeholders {
    /// Placeholders for one keg
    ///
    /// `version` is the keg version, `HEAD` for head builds.
    pub fn new(name: &str, version: &str, prefix: &Path, source_root: &Path) -> Self {
        let path = |p: PathBuf| p.display().to_string();
        let values = BTreeMap::from([
            ("prefix", path(prefix.to_path_buf())),
            ("bin", path(prefix.join("bin"))),
            ("share", path(prefix.join("share"))),
            ("info", path(prefix.join("share/info"))),
            ("man", path(prefix.join("share/man"))),
            ("root", path(source_root.to_path_buf())),
            ("name", name.to_string()),
            ("version", version.to_string()),
        ]);
        Self { values }
    }

    /// Substitute every known placeholder; unknown braces are left alone
    ///
    /// One left-to-right pass: substituted values are never rescanned.
    pub fn expand(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let tail = &rest[open..];
            let value = tail
                .find('}')
                .and_then(|close| self.values.get(&tail[1..close]).map(|v| (close, v)));
            match value {
                Some((close, value)) => {
                    out.push_str(value);
                    rest = &tail[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Substitute placeholders in each element
    pub fn expand_all(&self, items: &[String]) -> Vec<String> {
        items.iter().map(|item| self.expand(item)).collect()
    }

    /// Value of one placeholder
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Environment overlay for a build
///
/// Holds only the variables kiln sets; children inherit everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEnvironment {
    /// Install prefix
    pub prefix: PathBuf,
    /// Number of parallel jobs
    pub jobs: usize,
    /// Variables set by recipe rules
    pub overlay: BTreeMap<String, String>,
}

impl BuildEnvironment {
    /// Empty overlay for `prefix` with `jobs` parallel jobs
    pub fn new(prefix: &Path, jobs: usize) -> Self {
        Self {
            prefix: prefix.to_path_buf(),
            jobs: jobs.max(1),
            overlay: BTreeMap::new(),
        }
    }

    /// Apply the recipe's env rules whose condition holds, in declared order
    ///
    /// Append and prepend extend the current value (overlay first, then
    /// `inherited`) with a single space.
    pub fn apply_rules<F>(
        &mut self,
        rules: &[EnvRule],
        variant: &Variant,
        placeholders: &Placeholders,
        inherited: F,
    ) where
        F: Fn(&str) -> Option<String>,
    {
        for rule in rules.iter().filter(|r| r.when.eval(variant)) {
            let Some(operation) = rule.operation() else {
                continue;
            };
            let current = self
                .overlay
                .get(&rule.var)
                .cloned()
                .or_else(|| inherited(&rule.var))
                .filter(|v| !v.is_empty());

            let value = match operation {
                EnvOperation::Set(v) => placeholders.expand(&v),
                EnvOperation::Append(v) => {
                    join_words(current.as_deref(), &placeholders.expand(&v))
                }
                EnvOperation::Prepend(v) => join_words(
                    Some(&placeholders.expand(&v)),
                    current.as_deref().unwrap_or_default(),
                ),
            };

            tracing::debug!("env {}={}", rule.var, value);
            self.overlay.insert(rule.var.clone(), value);
        }
    }

    /// Variables handed to child processes
    ///
    /// The job count is appended to any `MAKEFLAGS` already set, by a recipe
    /// rule or by `inherited`.
    pub fn to_env_map<F>(&self, inherited: F) -> BTreeMap<String, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = self.overlay.clone();
        let makeflags = env.get(MAKEFLAGS).cloned().or_else(|| inherited(MAKEFLAGS));
        env.insert(
            MAKEFLAGS.to_string(),
            join_words(makeflags.as_deref(), &format!("-j{}", self.jobs)),
        );
        env.insert("PREFIX".to_string(), self.prefix.display().to_string());
        env
    }
}

/// Environment lookup against the current process
pub fn process_env(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

fn join_words(first: Option<&str>, second: &str) -> String {
    match first {
        Some(first) if !first.is_empty() && !second.is_empty() => format!("{first} {second}"),
        Some(first) if second.is_empty() => first.to_string(),
        _ => second.to_string(),
    }
}
