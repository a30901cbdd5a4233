//! Option resolution
//!
//! Merges recipe-declared option defaults with caller-requested flags into a
//! finalized [`OptionSet`], and combines it with the source kind and the
//! present optional dependencies into a [`Variant`].

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::core::condition::Facts;
use crate::core::recipe::{optional_dependency_option, HeadSource, Recipe};
use crate::error::OptionError;

/// Where an option's selection came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionSource {
    /// Requested by the caller
    Requested,
    /// Declared default
    Default,
}

/// Resolved state of one declared option
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionState {
    /// Option description
    pub description: String,
    /// Whether the option is selected
    pub selected: bool,
    /// Where the selection came from
    pub source: OptionSource,
}

/// Why a requested option was deselected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DropReason {
    /// The option's parent is not selected
    ParentUnselected { parent: String },
    /// Another head selector with higher priority is selected
    HeadPriority { kept: String },
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParentUnselected { parent } => write!(f, "requires '{parent}'"),
            Self::HeadPriority { kept } => write!(f, "'{kept}' takes priority"),
        }
    }
}

/// Option that was selected and then dropped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedOption {
    pub name: String,
    pub reason: DropReason,
}

/// Finalized option selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OptionSet {
    options: BTreeMap<String, OptionState>,
    dropped: Vec<DroppedOption>,
}

/// Strip the optional `--` prefix of a requested flag
fn normalize_flag(flag: &str) -> &str {
    flag.trim().trim_start_matches("--")
}

impl OptionSet {
    /// Resolve requested flags against the recipe's declarations
    ///
    /// Flags may be written `name` or `--name`. Unknown flags fail before
    /// anything else is looked at.
    pub fn resolve<S: AsRef<str>>(recipe: &Recipe, requested: &[S]) -> Result<Self, OptionError> {
        let declarations = recipe.declared_options();

        let mut options: BTreeMap<String, OptionState> = declarations
            .iter()
            .map(|decl| {
                (
                    decl.name.clone(),
                    OptionState {
                        description: decl.description.clone(),
                        selected: decl.default,
                        source: OptionSource::Default,
                    },
                )
            })
            .collect();

        for flag in requested {
            let flag = flag.as_ref();
            let state = options
                .get_mut(normalize_flag(flag))
                .ok_or_else(|| OptionError::UnknownOption {
                    flag: flag.to_string(),
                })?;
            state.selected = true;
            state.source = OptionSource::Requested;
        }

        let mut set = Self {
            options,
            dropped: Vec::new(),
        };

        // Sub-options may chain, so repeat until nothing changes.
        loop {
            let mut changed = false;
            for decl in &declarations {
                let Some(parent) = &decl.requires else { continue };
                if set.is_selected(&decl.name) && !set.is_selected(parent) {
                    set.drop_option(
                        &decl.name,
                        DropReason::ParentUnselected {
                            parent: parent.clone(),
                        },
                    );
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let selectors: Vec<&str> = recipe
            .head
            .iter()
            .filter_map(|h| h.selector.as_deref())
            .filter(|s| set.is_selected(s))
            .collect();
        if let Some((kept, rest)) = selectors.split_first() {
            for name in rest {
                set.drop_option(
                    name,
                    DropReason::HeadPriority {
                        kept: (*kept).to_string(),
                    },
                );
            }
        }

        for decl in &declarations {
            if !set.is_selected(&decl.name) {
                continue;
            }
            if let Some(other) = decl.conflicts.iter().find(|c| set.is_selected(c)) {
                return Err(OptionError::Conflicting {
                    first: decl.name.clone(),
                    second: other.clone(),
                });
            }
        }

        Ok(set)
    }

    fn drop_option(&mut self, name: &str, reason: DropReason) {
        if let Some(state) = self.options.get_mut(name) {
            state.selected = false;
        }
        tracing::warn!("Ignoring option '{name}': {reason}");
        self.dropped.push(DroppedOption {
            name: name.to_string(),
            reason,
        });
    }

    /// Whether a declared option is selected
    pub fn is_selected(&self, name: &str) -> bool {
        self.options.get(name).is_some_and(|s| s.selected)
    }

    /// State of a declared option
    pub fn get(&self, name: &str) -> Option<&OptionState> {
        self.options.get(name)
    }

    /// Selected option names in sorted order
    pub fn selected(&self) -> impl Iterator<Item = &str> {
        self.options
            .iter()
            .filter(|(_, s)| s.selected)
            .map(|(n, _)| n.as_str())
    }

    /// All declared options in sorted order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionState)> {
        self.options.iter().map(|(n, s)| (n.as_str(), s))
    }

    /// Options that were requested but ignored
    pub fn dropped(&self) -> &[DroppedOption] {
        &self.dropped
    }
}

/// Release artifact or version-control checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Release,
    Head,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Release => "release",
            Self::Head => "head",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finalized options, source kind and present optional dependencies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    options: OptionSet,
    source: SourceKind,
    head_index: Option<usize>,
    present: BTreeSet<String>,
}

impl Variant {
    /// Build a variant; a head build picks its source from the selected selector
    ///
    /// The first head entry whose selector is selected wins, then the first
    /// entry without a selector, then the first entry.
    pub fn new(recipe: &Recipe, options: OptionSet, source: SourceKind) -> Result<Self, OptionError> {
        let head_index = match source {
            SourceKind::Release => None,
            SourceKind::Head => {
                if recipe.head.is_empty() {
                    return Err(OptionError::HeadUnavailable {
                        recipe: recipe.name().to_string(),
                    });
                }
                let chosen = recipe
                    .head
                    .iter()
                    .position(|h| h.selector.as_deref().is_some_and(|s| options.is_selected(s)))
                    .or_else(|| recipe.head.iter().position(|h| h.selector.is_none()))
                    .unwrap_or(0);
                Some(chosen)
            }
        };

        Ok(Self {
            options,
            source,
            head_index,
            present: BTreeSet::new(),
        })
    }

    /// Record which optional dependencies were found
    #[must_use]
    pub fn with_present_dependencies<I, S>(mut self, present: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.present = present.into_iter().map(Into::into).collect();
        self
    }

    /// Finalized options
    pub fn options(&self) -> &OptionSet {
        &self.options
    }

    /// Source kind
    pub fn source(&self) -> SourceKind {
        self.source
    }

    /// Head source used by a head build
    pub fn head_source<'r>(&self, recipe: &'r Recipe) -> Option<&'r HeadSource> {
        self.head_index.and_then(|i| recipe.head.get(i))
    }

    /// Version the keg is installed under: the release version or `HEAD`
    pub fn keg_version<'r>(&self, recipe: &'r Recipe) -> &'r str {
        match self.source {
            SourceKind::Release => recipe.version(),
            SourceKind::Head => "HEAD",
        }
    }

    /// Optional dependencies that were found
    pub fn present_dependencies(&self) -> impl Iterator<Item = &str> {
        self.present.iter().map(String::as_str)
    }

    /// Short stable identifier of source kind plus selected options
    pub fn id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source.as_str().as_bytes());
        for name in self.options.selected() {
            hasher.update(b"\0");
            hasher.update(name.as_bytes());
        }
        hex::encode(hasher.finalize())[..8].to_string()
    }
}

impl Facts for Variant {
    fn option_selected(&self, name: &str) -> bool {
        self.options.is_selected(name)
    }

    fn is_head(&self) -> bool {
        self.source == SourceKind::Head
    }

    fn has_dependency(&self, name: &str) -> bool {
        self.options.is_selected(&optional_dependency_option(name)) && self.present.contains(name)
    }
}
