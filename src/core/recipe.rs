//! Recipe definition handling
//!
//! A recipe is the declarative description of how to obtain, configure and
//! build one package. It is parsed from TOML, validated once, and never
//! mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path};

use crate::core::condition::{is_option_name, Condition};
use crate::error::RecipeError;

/// Complete recipe definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recipe {
    /// Identity and release source
    pub recipe: RecipeMetadata,

    /// Head (version-control) sources, in priority order
    #[serde(default)]
    pub head: Vec<HeadSource>,

    /// Declared build options
    #[serde(default, rename = "option")]
    pub options: Vec<OptionDeclaration>,

    /// Declared dependencies
    #[serde(default, rename = "dependency")]
    pub dependencies: Vec<DependencyDeclaration>,

    /// Known-incompatible toolchains
    #[serde(default)]
    pub fails_with: Vec<ToolchainRule>,

    /// Source patches
    #[serde(default)]
    pub patches: PatchSet,

    /// Configure/compile/install description
    #[serde(default)]
    pub build: BuildSection,

    /// Post-install rules
    #[serde(default)]
    pub install: InstallSection,

    /// Advisory messages shown after install
    #[serde(default, rename = "caveat")]
    pub caveats: Vec<CaveatRule>,
}

/// Recipe identity and release source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecipeMetadata {
    /// Package name
    pub name: String,

    /// Release version
    pub version: String,

    /// Short description
    #[serde(default)]
    pub description: Option<String>,

    /// Homepage URL
    #[serde(default)]
    pub homepage: Option<String>,

    /// Primary release artifact URL
    pub url: String,

    /// Fallback URLs tried in order
    #[serde(default)]
    pub mirrors: Vec<String>,

    /// Expected digest of the release artifact
    pub checksum: Checksum,

    /// Prefix paths exempt from empty-directory pruning
    #[serde(default)]
    pub skip_clean: Vec<String>,
}

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    /// Algorithm name as written in recipes
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of a hex digest
    pub fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }
}

/// Expected content hash, written `<algorithm>:<hex>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum {
    /// Digest algorithm
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest
    pub digest: String,
}

impl Checksum {
    /// Parse `<algorithm>:<hex>`; a bare 64-char hex string is taken as sha256
    pub fn parse(value: &str) -> Result<Self, RecipeError> {
        let err = |reason: &str| RecipeError::InvalidChecksum {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let (algorithm, digest) = match value.split_once(':') {
            Some(("sha256", hex)) => (HashAlgorithm::Sha256, hex),
            Some(("sha512", hex)) => (HashAlgorithm::Sha512, hex),
            Some((other, _)) => return Err(err(&format!("unsupported algorithm '{other}'"))),
            None => (HashAlgorithm::Sha256, value),
        };

        if digest.len() != algorithm.hex_len() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(err(&format!(
                "expected {} hex characters",
                algorithm.hex_len()
            )));
        }

        Ok(Self {
            algorithm,
            digest: digest.to_ascii_lowercase(),
        })
    }

    /// Case-insensitive comparison against a computed hex digest
    pub fn matches(&self, actual: &str) -> bool {
        self.digest.eq_ignore_ascii_case(actual)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.digest)
    }
}

impl TryFrom<String> for Checksum {
    type Error = RecipeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Checksum> for String {
    fn from(value: Checksum) -> Self {
        value.to_string()
    }
}

/// Version-control system of a head source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vcs {
    Git,
    Bzr,
    Hg,
}

impl Vcs {
    /// Executable used for non-git checkouts
    pub fn command(self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Bzr => "bzr",
            Self::Hg => "hg",
        }
    }
}

/// Head source locator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeadSource {
    /// Repository URL; `bzr://` and `hg://` prefixes select the VCS
    pub url: String,

    /// Explicit VCS, inferred from the URL when absent
    #[serde(default)]
    pub vcs: Option<Vcs>,

    /// Option that selects this source
    #[serde(default)]
    pub selector: Option<String>,

    /// Branch to check out instead of the remote default
    #[serde(default)]
    pub branch: Option<String>,
}

impl HeadSource {
    /// Effective VCS
    pub fn vcs(&self) -> Vcs {
        self.vcs.unwrap_or_else(|| {
            if self.url.starts_with("bzr://") {
                Vcs::Bzr
            } else if self.url.starts_with("hg://") {
                Vcs::Hg
            } else {
                Vcs::Git
            }
        })
    }

    /// URL handed to the VCS, with any selector scheme removed
    pub fn locator(&self) -> &str {
        self.url
            .strip_prefix("bzr://")
            .or_else(|| self.url.strip_prefix("hg://"))
            .unwrap_or(&self.url)
    }
}

/// Declared build option
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptionDeclaration {
    /// Option name
    pub name: String,

    /// Description
    #[serde(default)]
    pub description: String,

    /// Selected when not requested
    #[serde(default)]
    pub default: bool,

    /// Parent option; this option is ignored while the parent is unselected
    #[serde(default)]
    pub requires: Option<String>,

    /// Options that cannot be combined with this one
    #[serde(default)]
    pub conflicts: Vec<String>,
}

/// Dependency kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Used if requested and present
    Optional,
    /// Needed only while building
    Build,
    /// Needed at build and run time
    #[default]
    Required,
}

impl DependencyKind {
    /// Name as written in recipes
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Optional => "optional",
            Self::Build => "build",
            Self::Required => "required",
        }
    }
}

/// Declared dependency
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DependencyDeclaration {
    /// Dependency name
    pub name: String,

    /// Dependency kind
    #[serde(default)]
    pub kind: DependencyKind,

    /// Semver requirement
    #[serde(default)]
    pub version: Option<String>,

    /// Inclusion condition
    #[serde(default)]
    pub when: Condition,
}

/// Whether `path` is relative and never climbs out of its root
pub fn is_contained_path(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Whether `value` can be used as one path component (names and versions)
pub fn is_path_segment(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\', '\0'])
}

/// Option implicitly declared by an optional dependency
pub fn optional_dependency_option(dependency: &str) -> String {
    format!("with-{dependency}")
}

/// Known-incompatible toolchain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolchainRule {
    /// Toolchain name (as reported by detection, e.g. "clang", "gcc", "llvm")
    pub toolchain: String,

    /// Builds up to and including this number fail
    #[serde(default)]
    pub build: Option<u64>,

    /// Versions matching this semver requirement fail
    #[serde(default)]
    pub version: Option<String>,

    /// Reason shown to the user
    pub cause: String,
}

/// Patch list with its release-only switch
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PatchSet {
    /// Skip all patches for head builds
    #[serde(default)]
    pub release_only: bool,

    /// Patches in application order
    #[serde(default, rename = "patch")]
    pub patches: Vec<PatchDeclaration>,
}

/// Declared patch; exactly one of `inline` and `url` is set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchDeclaration {
    /// Leading path components to strip
    #[serde(default = "default_strip")]
    pub strip: usize,

    /// Literal diff text
    #[serde(default)]
    pub inline: Option<String>,

    /// Remote diff location
    #[serde(default)]
    pub url: Option<String>,

    /// Application condition
    #[serde(default)]
    pub when: Condition,
}

fn default_strip() -> usize {
    1
}

/// Where the diff text of a patch comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchSource<'a> {
    Inline(&'a str),
    Remote(&'a str),
}

impl PatchDeclaration {
    /// Source of the diff text
    pub fn source(&self) -> Option<PatchSource<'_>> {
        match (&self.inline, &self.url) {
            (Some(text), None) => Some(PatchSource::Inline(text)),
            (None, Some(url)) => Some(PatchSource::Remote(url)),
            _ => None,
        }
    }
}

/// Build description
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildSection {
    /// Configure command; empty skips the configure step
    #[serde(default = "default_configure")]
    pub configure: Vec<String>,

    /// Compile command
    #[serde(default = "default_compile")]
    pub compile: Vec<String>,

    /// Install command
    #[serde(default = "default_install")]
    pub install: Vec<String>,

    /// Baseline configure arguments
    #[serde(default)]
    pub configure_args: Vec<String>,

    /// Builds matching this condition run with a single job
    #[serde(default)]
    pub parallel_unsafe: Option<Condition>,

    /// Conditional steps run before configure
    #[serde(default)]
    pub bootstrap: Vec<BootstrapStep>,

    /// Conditional configure arguments
    #[serde(default)]
    pub args: Vec<ArgRule>,

    /// Conditional environment changes
    #[serde(default)]
    pub env: Vec<EnvRule>,

    /// Conditional in-place source edits
    #[serde(default)]
    pub inreplace: Vec<InreplaceRule>,
}

fn default_configure() -> Vec<String> {
    vec!["./configure".to_string()]
}

fn default_compile() -> Vec<String> {
    vec!["make".to_string()]
}

fn default_install() -> Vec<String> {
    vec!["make".to_string(), "install".to_string()]
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            configure: default_configure(),
            compile: default_compile(),
            install: default_install(),
            configure_args: Vec::new(),
            parallel_unsafe: None,
            bootstrap: Vec::new(),
            args: Vec::new(),
            env: Vec::new(),
            inreplace: Vec::new(),
        }
    }
}

/// Command run before configure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BootstrapStep {
    #[serde(default)]
    pub when: Condition,
    pub run: Vec<String>,
}

/// Arguments appended when `when` holds, `else` arguments otherwise
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArgRule {
    #[serde(default)]
    pub when: Condition,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, rename = "else")]
    pub otherwise: Vec<String>,
}

/// Environment change; exactly one of `append`, `prepend`, `set`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvRule {
    #[serde(default)]
    pub when: Condition,
    pub var: String,
    #[serde(default)]
    pub append: Option<String>,
    #[serde(default)]
    pub prepend: Option<String>,
    #[serde(default)]
    pub set: Option<String>,
}

/// Environment operation of an [`EnvRule`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvOperation {
    Append(String),
    Prepend(String),
    Set(String),
}

impl EnvRule {
    /// The single operation this rule performs
    pub fn operation(&self) -> Option<EnvOperation> {
        match (&self.append, &self.prepend, &self.set) {
            (Some(v), None, None) => Some(EnvOperation::Append(v.clone())),
            (None, Some(v), None) => Some(EnvOperation::Prepend(v.clone())),
            (None, None, Some(v)) => Some(EnvOperation::Set(v.clone())),
            _ => None,
        }
    }
}

/// Literal replacement inside a source file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InreplaceRule {
    #[serde(default)]
    pub when: Condition,
    pub path: String,
    pub from: String,
    pub to: String,
}

/// Post-install rules
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstallSection {
    /// Application bundles moved from the source tree into the prefix
    #[serde(default)]
    pub bundle: Vec<BundleRule>,

    /// Files removed from the prefix
    #[serde(default)]
    pub remove: Vec<RemoveRule>,

    /// Launcher scripts written into the prefix
    #[serde(default)]
    pub wrapper: Vec<WrapperRule>,
}

/// Move a directory from the source tree into the prefix
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleRule {
    #[serde(default)]
    pub when: Condition,
    pub from: String,
    pub to: String,
}

/// Remove prefix-relative paths
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoveRule {
    #[serde(default)]
    pub when: Condition,
    pub paths: Vec<String>,
}

/// Replace a launcher with a wrapper script
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WrapperRule {
    #[serde(default)]
    pub when: Condition,
    pub path: String,
    pub exec: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Advisory post-install message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaveatRule {
    #[serde(default)]
    pub when: Condition,
    pub text: String,
}

impl Recipe {
    /// Parse and validate a recipe from TOML
    pub fn from_toml(content: &str) -> Result<Self, RecipeError> {
        let recipe: Self = toml::from_str(content).map_err(|e| RecipeError::Parse(e.to_string()))?;
        recipe.validate()?;
        Ok(recipe)
    }

    /// Read, parse and validate a recipe file
    pub fn load(path: &Path) -> Result<Self, RecipeError> {
        let content = std::fs::read_to_string(path).map_err(|e| RecipeError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Package name
    pub fn name(&self) -> &str {
        &self.recipe.name
    }

    /// Release version
    pub fn version(&self) -> &str {
        &self.recipe.version
    }

    /// Release URL followed by mirrors
    pub fn source_urls(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.recipe.url.as_str()).chain(self.recipe.mirrors.iter().map(String::as_str))
    }

    /// All options a caller may request, in declaration order
    ///
    /// Explicit declarations come first, followed by the implicit `with-<dep>`
    /// option of each optional dependency and any head selector not declared
    /// explicitly.
    pub fn declared_options(&self) -> Vec<OptionDeclaration> {
        let mut out = self.options.clone();
        let mut seen: BTreeSet<String> = out.iter().map(|o| o.name.clone()).collect();

        for dep in &self.dependencies {
            if dep.kind != DependencyKind::Optional {
                continue;
            }
            let name = optional_dependency_option(&dep.name);
            if seen.insert(name.clone()) {
                out.push(OptionDeclaration {
                    name,
                    description: format!("Build with {} support", dep.name),
                    default: false,
                    requires: None,
                    conflicts: Vec::new(),
                });
            }
        }

        for head in &self.head {
            if let Some(selector) = &head.selector {
                if seen.insert(selector.clone()) {
                    out.push(OptionDeclaration {
                        name: selector.clone(),
                        description: format!("Use {} for head builds", head.url),
                        default: false,
                        requires: None,
                        conflicts: Vec::new(),
                    });
                }
            }
        }

        out
    }

    /// Names of optional dependencies
    pub fn optional_dependencies(&self) -> BTreeSet<&str> {
        self.dependencies
            .iter()
            .filter(|d| d.kind == DependencyKind::Optional)
            .map(|d| d.name.as_str())
            .collect()
    }

    fn conditions(&self) -> Vec<(String, &Condition)> {
        let mut out: Vec<(String, &Condition)> = Vec::new();
        for dep in &self.dependencies {
            out.push((format!("dependency '{}'", dep.name), &dep.when));
        }
        for (i, patch) in self.patches.patches.iter().enumerate() {
            out.push((format!("patch {i}"), &patch.when));
        }
        if let Some(cond) = &self.build.parallel_unsafe {
            out.push(("build.parallel_unsafe".to_string(), cond));
        }
        for (i, step) in self.build.bootstrap.iter().enumerate() {
            out.push((format!("build.bootstrap[{i}]"), &step.when));
        }
        for (i, rule) in self.build.args.iter().enumerate() {
            out.push((format!("build.args[{i}]"), &rule.when));
        }
        for rule in &self.build.env {
            out.push((format!("build.env '{}'", rule.var), &rule.when));
        }
        for rule in &self.build.inreplace {
            out.push((format!("build.inreplace '{}'", rule.path), &rule.when));
        }
        for rule in &self.install.bundle {
            out.push((format!("install.bundle '{}'", rule.from), &rule.when));
        }
        for (i, rule) in self.install.remove.iter().enumerate() {
            out.push((format!("install.remove[{i}]"), &rule.when));
        }
        for rule in &self.install.wrapper {
            out.push((format!("install.wrapper '{}'", rule.path), &rule.when));
        }
        for (i, rule) in self.caveats.iter().enumerate() {
            out.push((format!("caveat[{i}]"), &rule.when));
        }
        out
    }

    /// Check cross-references the deserializer cannot check
    pub fn validate(&self) -> Result<(), RecipeError> {
        let name = self.recipe.name.clone();
        let invalid = |reason: String| RecipeError::Invalid {
            recipe: name.clone(),
            reason,
        };

        if self.recipe.name.trim().is_empty() {
            return Err(invalid("name is empty".to_string()));
        }
        if self.recipe.version.trim().is_empty() {
            return Err(invalid("version is empty".to_string()));
        }
        for (field, value) in [("name", &self.recipe.name), ("version", &self.recipe.version)] {
            if !is_path_segment(value) {
                return Err(invalid(format!("{field} '{value}' is not a single path component")));
            }
        }

        let mut explicit = BTreeSet::new();
        for option in &self.options {
            if !is_option_name(&option.name) {
                return Err(invalid(format!("'{}' is not a valid option name", option.name)));
            }
            if !explicit.insert(option.name.as_str()) {
                return Err(invalid(format!("option '{}' declared twice", option.name)));
            }
        }

        let declared: BTreeSet<String> = self.declared_options().into_iter().map(|o| o.name).collect();
        let undeclared = |name: &str, context: String| RecipeError::UndeclaredOption {
            recipe: self.recipe.name.clone(),
            name: name.to_string(),
            context,
        };

        for option in &self.options {
            if let Some(parent) = &option.requires {
                if !declared.contains(parent) {
                    return Err(undeclared(parent, format!("requires of '{}'", option.name)));
                }
            }
            for other in &option.conflicts {
                if !declared.contains(other) {
                    return Err(undeclared(other, format!("conflicts of '{}'", option.name)));
                }
            }
        }

        let optional = self.optional_dependencies();
        for (context, condition) in self.conditions() {
            for option in condition.options() {
                if !declared.contains(option) {
                    return Err(undeclared(option, context));
                }
            }
            for dep in condition.dependencies() {
                if !optional.contains(dep) {
                    return Err(invalid(format!(
                        "{context} tests 'dep:{dep}' but '{dep}' is not an optional dependency"
                    )));
                }
            }
        }

        for (i, patch) in self.patches.patches.iter().enumerate() {
            if patch.source().is_none() {
                return Err(invalid(format!("patch {i} needs exactly one of 'inline' and 'url'")));
            }
        }

        for rule in &self.build.env {
            if rule.operation().is_none() {
                return Err(invalid(format!(
                    "env rule for '{}' needs exactly one of 'append', 'prepend' and 'set'",
                    rule.var
                )));
            }
        }

        for step in &self.build.bootstrap {
            if step.run.is_empty() {
                return Err(invalid("bootstrap step with empty command".to_string()));
            }
        }
        if self.build.compile.is_empty() || self.build.install.is_empty() {
            return Err(invalid("compile and install commands must not be empty".to_string()));
        }

        let relative_paths = self
            .install
            .bundle
            .iter()
            .flat_map(|r| [&r.from, &r.to])
            .chain(self.install.remove.iter().flat_map(|r| &r.paths))
            .chain(self.install.wrapper.iter().map(|r| &r.path))
            .chain(self.build.inreplace.iter().map(|r| &r.path))
            .chain(&self.recipe.skip_clean);
        for path in relative_paths {
            if !is_contained_path(path) {
                return Err(invalid(format!(
                    "path '{path}' must be relative and stay inside its root"
                )));
            }
        }

        for rule in &self.fails_with {
            if let Some(req) = &rule.version {
                semver::VersionReq::parse(req).map_err(|e| {
                    invalid(format!("fails_with '{}' version '{req}': {e}", rule.toolchain))
                })?;
            }
        }

        Ok(())
    }
}
