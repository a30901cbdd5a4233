//! Filesystem operations
//!
//! Thin wrappers that attach the offending path to every IO failure.

use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::error::FilesystemError;

/// Create a directory and all parent directories
pub fn create_dir_all(path: &Path) -> Result<(), FilesystemError> {
    std::fs::create_dir_all(path).map_err(|e| FilesystemError::CreateDir {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Remove a directory and all its contents, if present
pub fn remove_dir_all(path: &Path) -> Result<(), FilesystemError> {
    if path.exists() {
        std::fs::remove_dir_all(path).map_err(|e| FilesystemError::Remove {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
    }
    Ok(())
}

/// Remove a file, symlink or directory tree
///
/// Returns `false` when nothing was there. Dangling symlinks count as present.
pub fn remove_path(path: &Path) -> Result<bool, FilesystemError> {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return Ok(false);
    };

    let result = if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };

    result.map_err(|e| FilesystemError::Remove {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;
    Ok(true)
}

/// Write content to a file, creating parent directories
pub fn write_file(path: &Path, content: &str) -> Result<(), FilesystemError> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    std::fs::write(path, content).map_err(|e| FilesystemError::WriteFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Join a recipe-supplied relative path onto `root`
///
/// Fails unless `relative` is non-empty, relative and free of `..`, so the
/// result always lies inside `root`.
pub fn join_contained(root: &Path, relative: &Path) -> Result<PathBuf, FilesystemError> {
    let contained = relative.components().next().is_some()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !contained {
        return Err(FilesystemError::Escapes {
            root: root.to_path_buf(),
            path: relative.to_path_buf(),
        });
    }
    Ok(root.join(relative))
}

/// Move a file or directory, creating the destination's parent
///
/// Moves across filesystems fall back to copy-then-remove.
pub fn rename(from: &Path, to: &Path) -> Result<(), FilesystemError> {
    if let Some(parent) = to.parent() {
        create_dir_all(parent)?;
    }
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            tracing::debug!("{} is on another filesystem; copying", from.display());
            move_by_copy(from, to)
        }
        Err(e) => Err(FilesystemError::Rename {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            error: e.to_string(),
        }),
    }
}

#[cfg(unix)]
fn is_cross_device(error: &std::io::Error) -> bool {
    // EXDEV on Linux and the BSDs
    const EXDEV: i32 = 18;
    error.raw_os_error() == Some(EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(_error: &std::io::Error) -> bool {
    false
}

/// Copy `from` to `to` (file, symlink or tree), then remove `from`
pub fn move_by_copy(from: &Path, to: &Path) -> Result<(), FilesystemError> {
    let copy_error = |path: &Path, e: &dyn std::fmt::Display| FilesystemError::Rename {
        from: path.to_path_buf(),
        to: to.to_path_buf(),
        error: e.to_string(),
    };

    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(|e| copy_error(from, &e))?;
        let relative = entry.path().strip_prefix(from).map_err(|e| copy_error(entry.path(), &e))?;
        let target = if relative.as_os_str().is_empty() {
            to.to_path_buf()
        } else {
            to.join(relative)
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target).map_err(|e| copy_error(entry.path(), &e))?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| copy_error(entry.path(), &e))?;
        }
    }

    remove_path(from)?;
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(std::fs::read_link(link)?, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    std::fs::copy(link, target).map(|_| ())
}

/// Mark a file executable (0755)
#[cfg(unix)]
pub fn set_executable(path: &Path) -> Result<(), FilesystemError> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(|e| {
        FilesystemError::WriteFile {
            path: path.to_path_buf(),
            error: e.to_string(),
        }
    })
}

#[cfg(not(unix))]
pub fn set_executable(_path: &Path) -> Result<(), FilesystemError> {
    Ok(())
}

/// Files and symlinks under `root`, relative and sorted
pub fn relative_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| !entry.file_type().is_dir())
        .filter_map(|entry| entry.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();
    files.sort();
    files
}

/// Delete empty directories below `root`, deepest first
///
/// Directories at or below any of `keep` (relative to `root`) survive.
/// Returns the removed directories relative to `root`.
pub fn prune_empty_dirs(root: &Path, keep: &[PathBuf]) -> Result<Vec<PathBuf>, FilesystemError> {
    let mut removed = Vec::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
    {
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        if keep.iter().any(|k| relative.starts_with(k)) {
            continue;
        }

        let is_empty = std::fs::read_dir(entry.path())
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if is_empty {
            std::fs::remove_dir(entry.path()).map_err(|e| FilesystemError::Remove {
                path: entry.path().to_path_buf(),
                error: e.to_string(),
            })?;
            removed.push(relative.to_path_buf());
        }
    }

    Ok(removed)
}
