//! Dependency resolution
//!
//! Evaluates a recipe's dependency declarations against a variant into an
//! ordered, deduplicated install list, and checks the active toolchain
//! against the recipe's known failures.

use semver::VersionReq;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::core::condition::Facts;
use crate::core::options::Variant;
use crate::core::recipe::{optional_dependency_option, DependencyKind, Recipe};
use crate::error::ResolverError;
use crate::infra::toolchain::ToolchainId;

/// Answers whether an optional dependency is installed
pub trait DependencyProbe {
    fn is_present(&self, name: &str) -> bool;
}

/// Concrete dependency to satisfy before building
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDependency {
    /// Dependency name
    pub name: String,
    /// Strongest kind among its declarations
    pub kind: DependencyKind,
    /// Normalized semver requirement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirement: Option<String>,
}

/// Result of dependency evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyPlan {
    /// Dependencies in first-declaration order
    pub dependencies: Vec<ResolvedDependency>,
    /// Requested optional dependencies that were not found
    pub missing_optional: Vec<String>,
}

impl DependencyPlan {
    /// Dependencies of one kind
    pub fn of_kind(&self, kind: DependencyKind) -> impl Iterator<Item = &ResolvedDependency> {
        self.dependencies.iter().filter(move |d| d.kind == kind)
    }

    /// Whether a dependency is part of the plan
    pub fn contains(&self, name: &str) -> bool {
        self.dependencies.iter().any(|d| d.name == name)
    }
}

fn parse_requirement(name: &str, requirement: &str) -> Result<VersionReq, ResolverError> {
    VersionReq::parse(requirement).map_err(|e| ResolverError::InvalidRequirement {
        dependency: name.to_string(),
        requirement: requirement.to_string(),
        error: e.to_string(),
    })
}

/// Evaluate dependency declarations against a variant
///
/// Optional dependencies whose `with-<name>` option is selected are probed
/// first; the returned variant records the ones found, so `dep:<name>`
/// conditions evaluate against actual presence.
pub fn resolve_dependencies(
    recipe: &Recipe,
    variant: Variant,
    probe: &dyn DependencyProbe,
) -> Result<(Variant, DependencyPlan), ResolverError> {
    let mut present = BTreeSet::new();
    let mut missing_optional = Vec::new();

    for decl in &recipe.dependencies {
        if decl.kind != DependencyKind::Optional
            || !variant.option_selected(&optional_dependency_option(&decl.name))
            || !decl.when.eval(&variant)
            || present.contains(&decl.name)
        {
            continue;
        }
        if probe.is_present(&decl.name) {
            present.insert(decl.name.clone());
        } else if !missing_optional.contains(&decl.name) {
            tracing::warn!(
                "Optional dependency '{}' requested but not found; building without it",
                decl.name
            );
            missing_optional.push(decl.name.clone());
        }
    }

    let variant = variant.with_present_dependencies(present);

    let mut dependencies: Vec<ResolvedDependency> = Vec::new();
    for decl in &recipe.dependencies {
        let included = match decl.kind {
            DependencyKind::Optional => variant.has_dependency(&decl.name) && decl.when.eval(&variant),
            _ => decl.when.eval(&variant),
        };
        if !included {
            continue;
        }

        let requirement = decl
            .version
            .as_deref()
            .map(|r| parse_requirement(&decl.name, r).map(|req| req.to_string()))
            .transpose()?;

        match dependencies.iter_mut().find(|d| d.name == decl.name) {
            Some(existing) => {
                existing.kind = existing.kind.max(decl.kind);
                match (&existing.requirement, requirement) {
                    (Some(first), Some(second)) if *first != second => {
                        return Err(ResolverError::VersionConflict {
                            dependency: decl.name.clone(),
                            first: first.clone(),
                            second,
                        });
                    }
                    (None, Some(second)) => existing.requirement = Some(second),
                    _ => {}
                }
            }
            None => dependencies.push(ResolvedDependency {
                name: decl.name.clone(),
                kind: decl.kind,
                requirement,
            }),
        }
    }

    for dep in &dependencies {
        tracing::debug!("Dependency {} ({})", dep.name, dep.kind.as_str());
    }

    Ok((
        variant,
        DependencyPlan {
            dependencies,
            missing_optional,
        },
    ))
}

/// Fail if the toolchain matches one of the recipe's `fails_with` rules
///
/// A rule matches on toolchain name; a build bound matches builds up to and
/// including it, a version requirement matches versions it accepts. A bound
/// the toolchain cannot be compared against does not match.
pub fn check_toolchain(recipe: &Recipe, toolchain: &ToolchainId) -> Result<(), ResolverError> {
    for rule in &recipe.fails_with {
        if !rule.toolchain.eq_ignore_ascii_case(&toolchain.name) {
            continue;
        }

        let build_matches = match rule.build {
            Some(max) => toolchain.build.is_some_and(|b| b <= max),
            None => true,
        };

        let version_matches = match &rule.version {
            Some(req) => {
                let req = parse_requirement(&rule.toolchain, req)?;
                toolchain.version.as_ref().is_some_and(|v| req.matches(v))
            }
            None => true,
        };

        if build_matches && version_matches {
            return Err(ResolverError::IncompatibleToolchain {
                toolchain: toolchain.to_string(),
                cause: rule.cause.clone(),
            });
        }
    }

    Ok(())
}
