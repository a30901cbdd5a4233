//! Install-tree finalization
//!
//! Evaluates the recipe's install rules against the variant into an action
//! list, runs the actions against the keg, prunes empty directories and
//! renders caveats.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::core::build_env::Placeholders;
use crate::core::options::Variant;
use crate::core::recipe::Recipe;
use crate::error::FilesystemError;
use crate::infra::filesystem;

/// One post-install action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeAction {
    /// Move a directory from the source tree into the prefix
    Bundle { from: PathBuf, to: PathBuf },
    /// Delete paths under the prefix
    Remove { paths: Vec<PathBuf> },
    /// Replace a launcher with a script exec'ing `exec`
    Wrapper { path: PathBuf, script: String },
}

/// What finalization did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FinalizeOutcome {
    /// Bundles moved into the prefix, relative to it
    pub bundles: Vec<PathBuf>,
    /// Paths removed, relative to the prefix
    pub removed: Vec<PathBuf>,
    /// Paths a removal rule named but that did not exist
    pub missing: Vec<PathBuf>,
    /// Generated wrapper script path and content
    pub wrapper: Option<(PathBuf, String)>,
    /// Empty directories pruned
    pub pruned: Vec<PathBuf>,
    /// Rendered caveat text
    pub caveats: Vec<String>,
}

/// Launcher script running `exec` with fixed `args` and the caller's arguments
pub fn wrapper_script(exec: &str, args: &[String]) -> String {
    let mut line = format!("exec {}", shell_quote(exec));
    for arg in args {
        line.push(' ');
        line.push_str(&shell_quote(arg));
    }
    format!("#!/bin/sh\n{line} \"$@\"\n")
}

fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:,@%".contains(c))
    {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Evaluate install rules into actions: bundles, then removals, then wrappers
pub fn plan_actions(recipe: &Recipe, variant: &Variant, placeholders: &Placeholders) -> Vec<FinalizeAction> {
    let install = &recipe.install;
    let mut actions = Vec::new();

    for rule in install.bundle.iter().filter(|r| r.when.eval(variant)) {
        actions.push(FinalizeAction::Bundle {
            from: PathBuf::from(placeholders.expand(&rule.from)),
            to: PathBuf::from(placeholders.expand(&rule.to)),
        });
    }
    for rule in install.remove.iter().filter(|r| r.when.eval(variant)) {
        actions.push(FinalizeAction::Remove {
            paths: rule
                .paths
                .iter()
                .map(|p| PathBuf::from(placeholders.expand(p)))
                .collect(),
        });
    }
    for rule in install.wrapper.iter().filter(|r| r.when.eval(variant)) {
        actions.push(FinalizeAction::Wrapper {
            path: PathBuf::from(placeholders.expand(&rule.path)),
            script: wrapper_script(&placeholders.expand(&rule.exec), &placeholders.expand_all(&rule.args)),
        });
    }

    actions
}

/// Rendered caveats whose condition holds
pub fn caveats(recipe: &Recipe, variant: &Variant, placeholders: &Placeholders) -> Vec<String> {
    recipe
        .caveats
        .iter()
        .filter(|c| c.when.eval(variant))
        .map(|c| placeholders.expand(&c.text))
        .collect()
}

/// Run the install rules against `prefix`
///
/// Bundle sources are relative to `source_dir`; everything else is relative
/// to `prefix`. Paths are checked again after placeholder expansion and any
/// that leave their root fail with [`FilesystemError::Escapes`]. Missing
/// removal targets are logged and skipped.
pub fn finalize(
    recipe: &Recipe,
    variant: &Variant,
    placeholders: &Placeholders,
    source_dir: &Path,
    prefix: &Path,
) -> Result<FinalizeOutcome, FilesystemError> {
    let mut outcome = FinalizeOutcome::default();

    for action in plan_actions(recipe, variant, placeholders) {
        match action {
            FinalizeAction::Bundle { from, to } => {
                let source = filesystem::join_contained(source_dir, &from)?;
                let target = filesystem::join_contained(prefix, &to)?;
                filesystem::remove_path(&target)?;
                filesystem::rename(&source, &target)?;
                tracing::info!("Installed bundle {}", target.display());
                outcome.bundles.push(to);
            }
            FinalizeAction::Remove { paths } => {
                for path in paths {
                    if filesystem::remove_path(&filesystem::join_contained(prefix, &path)?)? {
                        tracing::debug!("Removed {}", path.display());
                        outcome.removed.push(path);
                    } else {
                        tracing::info!("{} not present; nothing to remove", path.display());
                        outcome.missing.push(path);
                    }
                }
            }
            FinalizeAction::Wrapper { path, script } => {
                let target = filesystem::join_contained(prefix, &path)?;
                filesystem::remove_path(&target)?;
                filesystem::write_file(&target, &script)?;
                filesystem::set_executable(&target)?;
                tracing::debug!("Wrote wrapper {}", target.display());
                outcome.wrapper = Some((path, script));
            }
        }
    }

    let keep: Vec<PathBuf> = recipe.recipe.skip_clean.iter().map(PathBuf::from).collect();
    outcome.pruned = filesystem::prune_empty_dirs(prefix, &keep)?;
    outcome.caveats = caveats(recipe, variant, placeholders);

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::options::{OptionSet, SourceKind};
    use crate::test_utils::fixtures::sample_recipe;
    use tempfile::TempDir;

    fn variant(recipe: &Recipe, flags: &[&str]) -> Variant {
        let options = OptionSet::resolve(recipe, flags).unwrap();
        Variant::new(recipe, options, SourceKind::Release).unwrap()
    }

    /// Prefix with the files a plain `make install` of emacs leaves behind
    fn installed_keg(temp: &TempDir) -> (PathBuf, PathBuf, Placeholders) {
        let prefix = temp.path().join("Cellar/emacs/24.3");
        let source = temp.path().join("src");
        filesystem::write_file(&prefix.join("bin/emacs"), "binary").unwrap();
        filesystem::write_file(&prefix.join("bin/ctags"), "binary").unwrap();
        filesystem::write_file(&prefix.join("share/man/man1/ctags.1.gz"), "man").unwrap();
        filesystem::write_file(&prefix.join("share/man/man1/emacs.1.gz"), "man").unwrap();
        filesystem::create_dir_all(&prefix.join("share/info")).unwrap();
        filesystem::create_dir_all(&prefix.join("var/empty")).unwrap();
        filesystem::write_file(&source.join("nextstep/Emacs.app/Contents/MacOS/Emacs"), "app").unwrap();
        let placeholders = Placeholders::new("emacs", "24.3", &prefix, &source);
        (prefix, source, placeholders)
    }

    // ============================================
    // Unit Tests - Planning
    // ============================================

    #[test]
    fn test_wrapper_script_format() {
        let script = wrapper_script("/p/Emacs.app/Contents/MacOS/Emacs", &["-nw".to_string()]);
        assert_eq!(script, "#!/bin/sh\nexec /p/Emacs.app/Contents/MacOS/Emacs -nw \"$@\"\n");

        let quoted = wrapper_script("/with space/bin", &[]);
        assert!(quoted.contains("exec '/with space/bin' \"$@\""));
    }

    #[test]
    fn test_plan_order_is_bundle_remove_wrapper() {
        let recipe = sample_recipe();
        let (_, _, placeholders) = installed_keg(&TempDir::new().unwrap());
        let actions = plan_actions(&recipe, &variant(&recipe, &["cocoa"]), &placeholders);

        assert!(matches!(actions[0], FinalizeAction::Bundle { .. }));
        assert!(matches!(actions[1], FinalizeAction::Remove { .. }));
        assert!(matches!(actions[2], FinalizeAction::Wrapper { .. }));
        assert_eq!(actions.len(), 3);
    }

    #[test]
    fn test_caveats_only_for_matching_variant() {
        let recipe = sample_recipe();
        let placeholders = Placeholders::new("emacs", "24.3", Path::new("/p"), Path::new("/s"));

        assert!(caveats(&recipe, &variant(&recipe, &[]), &placeholders).is_empty());
        let text = caveats(&recipe, &variant(&recipe, &["cocoa"]), &placeholders);
        assert_eq!(text, vec!["Emacs.app was installed to:\n  /p\n"]);
    }

    // ============================================
    // Integration Tests - Finalizing a keg
    // ============================================

    #[test]
    fn test_removes_ctags_without_keep_flag() {
        let temp = TempDir::new().unwrap();
        let (prefix, source, placeholders) = installed_keg(&temp);
        let recipe = sample_recipe();

        let outcome = finalize(&recipe, &variant(&recipe, &[]), &placeholders, &source, &prefix).unwrap();

        assert!(!prefix.join("bin/ctags").exists());
        assert!(!prefix.join("share/man/man1/ctags.1.gz").exists());
        assert!(prefix.join("bin/emacs").exists());
        assert_eq!(outcome.removed.len(), 2);
        assert!(outcome.missing.is_empty());
    }

    #[test]
    fn test_keeps_ctags_with_keep_flag() {
        let temp = TempDir::new().unwrap();
        let (prefix, source, placeholders) = installed_keg(&temp);
        let recipe = sample_recipe();

        let outcome = finalize(&recipe, &variant(&recipe, &["keep-ctags"]), &placeholders, &source, &prefix).unwrap();

        assert!(prefix.join("bin/ctags").exists());
        assert!(prefix.join("share/man/man1/ctags.1.gz").exists());
        assert!(outcome.removed.is_empty());
    }

    #[test]
    fn test_missing_removal_target_is_not_fatal() {
        let temp = TempDir::new().unwrap();
        let (prefix, source, placeholders) = installed_keg(&temp);
        std::fs::remove_file(prefix.join("bin/ctags")).unwrap();
        let recipe = sample_recipe();

        let outcome = finalize(&recipe, &variant(&recipe, &[]), &placeholders, &source, &prefix).unwrap();
        assert_eq!(outcome.missing, vec![PathBuf::from("bin/ctags")]);
    }

    #[test]
    fn test_prunes_empty_dirs_except_skip_clean() {
        let temp = TempDir::new().unwrap();
        let (prefix, source, placeholders) = installed_keg(&temp);
        let recipe = sample_recipe();

        let outcome = finalize(&recipe, &variant(&recipe, &[]), &placeholders, &source, &prefix).unwrap();

        assert!(prefix.join("share/info").is_dir());
        assert!(!prefix.join("var").exists());
        assert!(outcome.pruned.contains(&PathBuf::from("var")));
    }

    #[test]
    fn test_expanded_paths_cannot_leave_prefix() {
        let temp = TempDir::new().unwrap();
        let (prefix, source, placeholders) = installed_keg(&temp);
        filesystem::write_file(&source.join("keep"), "precious").unwrap();

        for target in ["{root}/keep", "{bin}/ctags", "{prefix}/bin/ctags"] {
            let text = format!(
                "{}\n[[install.remove]]\npaths = [\"{target}\"]\n",
                crate::test_utils::fixtures::SAMPLE_RECIPE
            );
            let recipe = Recipe::from_toml(&text).unwrap();

            let err = finalize(&recipe, &variant(&recipe, &["keep-ctags"]), &placeholders, &source, &prefix)
                .unwrap_err();
            assert!(matches!(err, FilesystemError::Escapes { .. }), "{target}: {err}");
        }

        assert_eq!(std::fs::read_to_string(source.join("keep")).unwrap(), "precious");
        assert!(prefix.join("bin/ctags").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_cocoa_bundle_and_wrapper() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let (prefix, source, placeholders) = installed_keg(&temp);
        std::fs::remove_file(prefix.join("bin/emacs")).unwrap();
        std::os::unix::fs::symlink("../Emacs.app/Contents/MacOS/Emacs", prefix.join("bin/emacs")).unwrap();
        let recipe = sample_recipe();

        let outcome = finalize(&recipe, &variant(&recipe, &["cocoa"]), &placeholders, &source, &prefix).unwrap();

        assert!(prefix.join("Emacs.app/Contents/MacOS/Emacs").is_file());
        assert!(!source.join("nextstep/Emacs.app").exists());

        let launcher = prefix.join("bin/emacs");
        let meta = std::fs::symlink_metadata(&launcher).unwrap();
        assert!(meta.file_type().is_file());
        assert_eq!(meta.permissions().mode() & 0o777, 0o755);

        let script = std::fs::read_to_string(&launcher).unwrap();
        let exec = prefix.join("Emacs.app/Contents/MacOS/Emacs");
        assert!(script.contains(&exec.display().to_string()));
        assert!(script.trim_end().ends_with("-nw \"$@\""));
        assert_eq!(outcome.wrapper.map(|(p, _)| p), Some(PathBuf::from("bin/emacs")));
        assert_eq!(outcome.caveats.len(), 1);
    }
}
