//! Build orchestration
//!
//! Runs one recipe through resolve, fetch, patch, configure, compile,
//! install and finalize. Every failure is wrapped with the recipe identity
//! and the stage it happened in.

use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::config::defaults;
use crate::core::executor::BuildContext;
use crate::core::fetch::{fetch_source, scratch_dir, FetchOutcome};
use crate::core::finalize::{finalize, FinalizeOutcome};
use crate::core::global_config::GlobalConfig;
use crate::core::options::{DroppedOption, OptionSet, SourceKind, Variant};
use crate::core::patch::{apply_inreplace, apply_patches, resolve_patches, select_patches, PatchOutcome};
use crate::core::receipt::InstallReceipt;
use crate::core::recipe::Recipe;
use crate::core::resolver::{check_toolchain, resolve_dependencies, DependencyPlan, DependencyProbe};
use crate::error::{FilesystemError, KilnError, Stage};
use crate::infra::dirs::KilnDirs;
use crate::infra::download::{DownloadManager, ProgressCallback};
use crate::infra::filesystem;
use crate::infra::lock::ScratchLock;
use crate::infra::probe::PrefixProbe;
use crate::infra::toolchain::ToolchainId;

/// What the caller asked for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildRequest {
    /// Requested options, `name` or `--name`
    pub flags: Vec<String>,
    /// Build from the head source
    pub head: bool,
    /// Job count overriding the configured one
    pub jobs: Option<usize>,
}

impl BuildRequest {
    pub fn source(&self) -> SourceKind {
        if self.head {
            SourceKind::Head
        } else {
            SourceKind::Release
        }
    }
}

/// Variant and dependencies, settled before any network access
#[derive(Debug, Clone)]
pub struct PreparedBuild {
    pub variant: Variant,
    pub plan: DependencyPlan,
}

impl PreparedBuild {
    /// Options that were requested but dropped
    pub fn dropped(&self) -> &[DroppedOption] {
        self.variant.options().dropped()
    }
}

/// Everything a successful build produced
#[derive(Debug)]
pub struct BuildReport {
    pub receipt: InstallReceipt,
    pub fetch: FetchOutcome,
    pub patches: PatchOutcome,
    pub finalize: FinalizeOutcome,
    /// Scratch directory, kept for inspection
    pub scratch: PathBuf,
}

/// Runs builds against one set of directories and settings
pub struct Builder {
    downloads_dir: PathBuf,
    scratch_root: PathBuf,
    prefix_root: PathBuf,
    jobs: usize,
    downloads: DownloadManager,
    toolchain: Option<ToolchainId>,
    probe: Box<dyn DependencyProbe + Send + Sync>,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
}

impl Builder {
    /// Builder using the configured directories, network policy and jobs
    pub fn new(dirs: &KilnDirs, config: &GlobalConfig) -> Self {
        let prefix_root = config.prefix_root(dirs);
        Self {
            downloads_dir: dirs.downloads_dir(),
            scratch_root: dirs.scratch_root(),
            probe: Box::new(PrefixProbe::new(&prefix_root)),
            prefix_root,
            jobs: config.build_jobs(),
            downloads: DownloadManager::with_policy(config.retry_policy(), config.timeout_secs()),
            toolchain: config.toolchain(),
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Install under a different prefix root; the default probe follows it
    #[must_use]
    pub fn with_prefix_root(mut self, prefix_root: &Path) -> Self {
        self.prefix_root = prefix_root.to_path_buf();
        self.probe = Box::new(PrefixProbe::new(prefix_root));
        self
    }

    #[must_use]
    pub fn with_toolchain(mut self, toolchain: Option<ToolchainId>) -> Self {
        self.toolchain = toolchain;
        self
    }

    #[must_use]
    pub fn with_probe(mut self, probe: Box<dyn DependencyProbe + Send + Sync>) -> Self {
        self.probe = probe;
        self
    }

    #[must_use]
    pub fn with_downloads(mut self, downloads: DownloadManager) -> Self {
        self.downloads = downloads;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Prefix root kegs are installed under
    pub fn prefix_root(&self) -> &Path {
        &self.prefix_root
    }

    /// Keg directory: `<prefix_root>/Cellar/<name>/<version|HEAD>`
    pub fn keg_path(&self, recipe: &Recipe, variant: &Variant) -> PathBuf {
        self.prefix_root
            .join(defaults::CELLAR_SUBDIR)
            .join(recipe.name())
            .join(variant.keg_version(recipe))
    }

    /// Resolve options, check the toolchain and evaluate dependencies
    ///
    /// Touches neither the network nor the filesystem.
    pub fn prepare(&self, recipe: &Recipe, request: &BuildRequest) -> Result<PreparedBuild, KilnError> {
        let wrap = |e: KilnError| e.in_stage(recipe.name(), Stage::Resolve);

        let options = OptionSet::resolve(recipe, &request.flags).map_err(|e| wrap(e.into()))?;
        let variant = Variant::new(recipe, options, request.source()).map_err(|e| wrap(e.into()))?;

        if let Some(toolchain) = &self.toolchain {
            check_toolchain(recipe, toolchain).map_err(|e| wrap(e.into()))?;
        }

        let (variant, plan) =
            resolve_dependencies(recipe, variant, self.probe.as_ref()).map_err(|e| wrap(e.into()))?;

        Ok(PreparedBuild { variant, plan })
    }

    /// Run every stage for `recipe`
    pub async fn build(&self, recipe: &Recipe, request: &BuildRequest) -> Result<BuildReport, KilnError> {
        let name = recipe.name();
        let PreparedBuild { variant, plan } = self.prepare(recipe, request)?;
        tracing::info!(
            "Building {name} {} ({} variant {})",
            variant.keg_version(recipe),
            variant.source(),
            variant.id()
        );

        let scratch = scratch_dir(&self.scratch_root, recipe, &variant);
        let _lock = ScratchLock::try_acquire(&scratch).map_err(|e| KilnError::from(e).in_stage(name, Stage::Fetch))?;

        tracing::info!("==> fetch {name}");
        let fetch = fetch_source(
            recipe,
            &variant,
            &self.downloads,
            &self.downloads_dir,
            &scratch.join("src"),
            self.progress.as_ref(),
        )
        .await
        .map_err(|e| e.in_stage(name, Stage::Fetch))?;
        if fetch.mirror_fallbacks > 0 {
            tracing::warn!("Fetched {name} after {} mirror fallback(s)", fetch.mirror_fallbacks);
        }

        tracing::info!("==> patch {name}");
        let patches = self
            .patch(recipe, &variant, &fetch.source_root)
            .await
            .map_err(|e| e.in_stage(name, Stage::Patch))?;

        let prefix = self.keg_path(recipe, &variant);
        let ctx = BuildContext::new(recipe, &variant, &scratch, &fetch.source_root, &prefix, request.jobs.unwrap_or(self.jobs));
        let previous = PreviousKeg::set_aside(&prefix).map_err(|e| KilnError::from(e).in_stage(name, Stage::Configure))?;

        let installed = match ctx.run(&ctx.steps(recipe, &variant), &self.cancel).await {
            Ok(()) => {
                tracing::info!("==> finalize {name}");
                finalize(recipe, &variant, &ctx.placeholders, &ctx.source_dir, &prefix)
                    .map_err(|e| KilnError::from(e).in_stage(name, Stage::Finalize))
            }
            Err((stage, e)) => Err(KilnError::from(e).in_stage(name, stage)),
        };
        let finalized = match installed {
            Ok(finalized) => {
                previous.discard();
                finalized
            }
            Err(e) => {
                previous.restore();
                return Err(e);
            }
        };

        let receipt = InstallReceipt::new(recipe, &variant, &plan, &finalized, &prefix, fetch.commit.clone());
        tracing::info!("Installed {name} to {}", prefix.display());

        Ok(BuildReport {
            receipt,
            fetch,
            patches,
            finalize: finalized,
            scratch,
        })
    }

    async fn patch(&self, recipe: &Recipe, variant: &Variant, source_root: &Path) -> Result<PatchOutcome, KilnError> {
        let selected = select_patches(recipe, variant);
        let resolved = resolve_patches(&selected, &self.downloads).await?;
        let outcome = apply_patches(source_root, &resolved)?;
        let replaced = apply_inreplace(source_root, &recipe.build.inreplace, variant)?;
        if replaced > 0 {
            tracing::debug!("Applied {replaced} in-place replacement(s)");
        }
        Ok(outcome)
    }
}

/// An existing keg moved aside while its replacement is built
///
/// Restored when the build fails, deleted once the new keg is finalized. A
/// failed build without a previous keg leaves no keg behind.
struct PreviousKeg {
    keg: PathBuf,
    saved: Option<PathBuf>,
}

impl PreviousKeg {
    fn set_aside(keg: &Path) -> Result<Self, FilesystemError> {
        if !keg.exists() {
            return Ok(Self {
                keg: keg.to_path_buf(),
                saved: None,
            });
        }

        let mut saved = keg.as_os_str().to_owned();
        saved.push(".previous");
        let saved = PathBuf::from(saved);
        filesystem::remove_dir_all(&saved)?;
        tracing::warn!("Replacing existing keg {}", keg.display());
        filesystem::rename(keg, &saved)?;

        Ok(Self {
            keg: keg.to_path_buf(),
            saved: Some(saved),
        })
    }

    fn discard(self) {
        if let Some(saved) = &self.saved {
            if let Err(e) = filesystem::remove_dir_all(saved) {
                tracing::warn!("Could not remove replaced keg: {e}");
            }
        }
    }

    /// Drop the partial keg and put the previous one back
    fn restore(self) {
        if let Err(e) = filesystem::remove_dir_all(&self.keg) {
            tracing::warn!("Could not remove partial keg: {e}");
            return;
        }
        let Some(saved) = &self.saved else {
            return;
        };
        match filesystem::rename(saved, &self.keg) {
            Ok(()) => tracing::info!("Restored previous keg {}", self.keg.display()),
            Err(e) => tracing::error!("Could not restore previous keg from {}: {e}", saved.display()),
        }
    }
}
