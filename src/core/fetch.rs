//! Source fetching
//!
//! Obtains the source tree of a variant: the release artifact (cached,
//! downloaded with mirror fallback, verified and extracted) or a head
//! checkout.

use std::path::{Path, PathBuf};

use crate::core::options::{SourceKind, Variant};
use crate::core::recipe::Recipe;
use crate::error::{BuildError, KilnError};
use crate::infra::archive::{extract_archive, ArchiveFormat};
use crate::infra::download::{verify_checksum, DownloadManager, ProgressCallback};
use crate::infra::{filesystem, git};

/// How the source tree was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Root of the extracted or checked out tree
    pub source_root: PathBuf,
    /// Verified artifact in the downloads cache (release builds)
    pub archive: Option<PathBuf>,
    /// URL the artifact came from; `None` when served from cache
    pub url: Option<String>,
    /// Mirrors fallen back to before a URL succeeded
    pub mirror_fallbacks: usize,
    /// Whether a cached artifact was reused
    pub cached: bool,
    /// Commit id of a git checkout
    pub commit: Option<String>,
}

/// Scratch directory of a variant: `<root>/<name>-<version|HEAD>-<variant-id>`
pub fn scratch_dir(scratch_root: &Path, recipe: &Recipe, variant: &Variant) -> PathBuf {
    scratch_root.join(format!(
        "{}-{}-{}",
        recipe.name(),
        variant.keg_version(recipe),
        variant.id()
    ))
}

/// Cache path of the release artifact: `<name>-<version>.<ext>`
///
/// The extension is dropped when the URL does not name a known format;
/// extraction then sniffs the content.
pub fn cached_archive_path(downloads_dir: &Path, recipe: &Recipe) -> PathBuf {
    let stem = format!("{}-{}", recipe.name(), recipe.version());
    match ArchiveFormat::from_name(&recipe.recipe.url) {
        Some(format) => downloads_dir.join(format!("{stem}.{}", format.extension())),
        None => downloads_dir.join(stem),
    }
}

/// Fetch the variant's source into `src_dir`
///
/// Any previous content of `src_dir` is replaced.
pub async fn fetch_source(
    recipe: &Recipe,
    variant: &Variant,
    downloads: &DownloadManager,
    downloads_dir: &Path,
    src_dir: &Path,
    progress: Option<&ProgressCallback>,
) -> Result<FetchOutcome, KilnError> {
    match variant.source() {
        SourceKind::Release => fetch_release(recipe, downloads, downloads_dir, src_dir, progress).await,
        SourceKind::Head => fetch_head(recipe, variant, src_dir).await,
    }
}

/// Download (or reuse), verify and extract the release artifact
pub async fn fetch_release(
    recipe: &Recipe,
    downloads: &DownloadManager,
    downloads_dir: &Path,
    src_dir: &Path,
    progress: Option<&ProgressCallback>,
) -> Result<FetchOutcome, KilnError> {
    let archive = cached_archive_path(downloads_dir, recipe);
    let expected = &recipe.recipe.checksum;

    let mut cached = false;
    if archive.exists() {
        if verify_checksum(&archive, expected)? {
            tracing::info!("Using cached {}", archive.display());
            cached = true;
        } else {
            tracing::warn!("Cached {} failed verification; downloading again", archive.display());
            filesystem::remove_path(&archive)?;
        }
    }

    let (url, mirror_fallbacks) = if cached {
        (None, 0)
    } else {
        let urls: Vec<&str> = recipe.source_urls().collect();
        let download = downloads
            .download_from_mirrors(&urls, &archive, expected, progress)
            .await?;
        tracing::info!(
            "Downloaded {} ({} bytes) from {}",
            archive.display(),
            download.result.size,
            download.url
        );
        (Some(download.url), download.fallbacks)
    };

    filesystem::remove_dir_all(src_dir)?;
    let source_root = {
        let artifact = archive.clone();
        let dest = src_dir.to_path_buf();
        tokio::task::spawn_blocking(move || extract_archive(&artifact, &dest))
            .await
            .map_err(|e| BuildError::Extract {
                archive: archive.clone(),
                error: e.to_string(),
            })??
    };

    Ok(FetchOutcome {
        source_root,
        archive: Some(archive),
        url,
        mirror_fallbacks,
        cached,
        commit: None,
    })
}

/// Check out the head source selected by the variant
pub async fn fetch_head(recipe: &Recipe, variant: &Variant, src_dir: &Path) -> Result<FetchOutcome, KilnError> {
    let head = variant
        .head_source(recipe)
        .cloned()
        .ok_or_else(|| crate::error::OptionError::HeadUnavailable {
            recipe: recipe.name().to_string(),
        })?;

    tracing::warn!(
        "Head source {} cannot be verified against a checksum",
        head.url
    );

    let dest = src_dir.to_path_buf();
    let url = head.url.clone();
    let checkout = tokio::task::spawn_blocking(move || git::checkout(&head, &dest))
        .await
        .map_err(|e| git::GitError::CloneFailed {
            url: url.clone(),
            error: e.to_string(),
        })??;

    if let Some(commit) = &checkout.commit {
        tracing::info!("Checked out {url} at {commit}");
    }

    Ok(FetchOutcome {
        source_root: checkout.path,
        archive: None,
        url: Some(url),
        mirror_fallbacks: 0,
        cached: false,
        commit: checkout.commit,
    })
}
