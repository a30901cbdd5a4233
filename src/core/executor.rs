//! Build pipeline execution
//!
//! Turns a recipe's build section into an ordered list of external commands
//! (bootstrap, configure, compile, install) and runs them one at a time
//! against a [`BuildContext`].

use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::core::build_env::{process_env, BuildEnvironment, Placeholders};
use crate::core::options::Variant;
use crate::core::recipe::Recipe;
use crate::error::{BuildError, Stage};
use crate::infra::process::{display_command, run_logged, ProcessSpec};

/// One external command of the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    pub stage: Stage,
    pub argv: Vec<String>,
}

/// Configure arguments for a variant
///
/// Baseline `configure_args`, then each `[[build.args]]` rule's `args` or
/// `else` list in declared order, placeholders expanded.
pub fn configure_arguments(recipe: &Recipe, variant: &Variant, placeholders: &Placeholders) -> Vec<String> {
    let mut args = placeholders.expand_all(&recipe.build.configure_args);
    for rule in &recipe.build.args {
        let chosen = if rule.when.eval(variant) {
            &rule.args
        } else {
            &rule.otherwise
        };
        args.extend(placeholders.expand_all(chosen));
    }
    args
}

/// Job count after the parallel-unsafe check
pub fn effective_jobs(recipe: &Recipe, variant: &Variant, requested: usize) -> usize {
    let unsafe_parallel = recipe
        .build
        .parallel_unsafe
        .as_ref()
        .is_some_and(|c| c.eval(variant));

    if unsafe_parallel {
        if requested != 1 {
            tracing::info!("{} is not parallel-safe; building with one job", recipe.name());
        }
        1
    } else {
        requested.max(1)
    }
}

/// Scratch state of a single build
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Scratch directory owned by this build
    pub scratch: PathBuf,
    /// Source root inside the scratch directory
    pub source_dir: PathBuf,
    /// Per-step log files
    pub logs_dir: PathBuf,
    /// Install prefix of the keg
    pub prefix: PathBuf,
    /// Placeholder values
    pub placeholders: Placeholders,
    /// Environment overlay
    pub env: BuildEnvironment,
    /// Accumulated configure arguments
    pub configure_args: Vec<String>,
    /// Parallel jobs after the parallel-unsafe check
    pub jobs: usize,
}

impl BuildContext {
    /// Derive the context for `variant`
    pub fn new(
        recipe: &Recipe,
        variant: &Variant,
        scratch: &Path,
        source_dir: &Path,
        prefix: &Path,
        requested_jobs: usize,
    ) -> Self {
        let placeholders = Placeholders::new(
            recipe.name(),
            variant.keg_version(recipe),
            prefix,
            source_dir,
        );
        let jobs = effective_jobs(recipe, variant, requested_jobs);
        let mut env = BuildEnvironment::new(prefix, jobs);
        env.apply_rules(&recipe.build.env, variant, &placeholders, process_env);
        let configure_args = configure_arguments(recipe, variant, &placeholders);

        Self {
            scratch: scratch.to_path_buf(),
            source_dir: source_dir.to_path_buf(),
            logs_dir: scratch.join("logs"),
            prefix: prefix.to_path_buf(),
            placeholders,
            env,
            configure_args,
            jobs,
        }
    }

    /// The commands to run, in order
    ///
    /// An empty command list in the recipe skips that step.
    pub fn steps(&self, recipe: &Recipe, variant: &Variant) -> Vec<BuildStep> {
        let mut steps: Vec<BuildStep> = recipe
            .build
            .bootstrap
            .iter()
            .filter(|step| step.when.eval(variant))
            .map(|step| BuildStep {
                stage: Stage::Configure,
                argv: self.placeholders.expand_all(&step.run),
            })
            .collect();

        if !recipe.build.configure.is_empty() {
            let mut argv = self.placeholders.expand_all(&recipe.build.configure);
            argv.extend(self.configure_args.iter().cloned());
            steps.push(BuildStep {
                stage: Stage::Configure,
                argv,
            });
        }
        for (stage, command) in [
            (Stage::Compile, &recipe.build.compile),
            (Stage::Install, &recipe.build.install),
        ] {
            if !command.is_empty() {
                steps.push(BuildStep {
                    stage,
                    argv: self.placeholders.expand_all(command),
                });
            }
        }
        steps
    }

    /// Log file of the `index`-th step
    pub fn log_path(&self, index: usize, step: &BuildStep) -> PathBuf {
        self.logs_dir.join(format!("{:02}.{}.log", index + 1, step.stage))
    }

    /// Run the `index`-th step in the source directory
    pub async fn run_step(
        &self,
        index: usize,
        step: &BuildStep,
        cancel: &CancellationToken,
    ) -> Result<(), BuildError> {
        if cancel.is_cancelled() {
            return Err(BuildError::Interrupted {
                stage: step.stage.to_string(),
            });
        }

        tracing::info!("==> {}", display_command(&step.argv));
        let env = self.env.to_env_map(process_env);
        let log_path = self.log_path(index, step);
        run_logged(
            &ProcessSpec {
                stage: step.stage,
                argv: &step.argv,
                cwd: &self.source_dir,
                env: &env,
                log_path: &log_path,
            },
            cancel,
        )
        .await
    }

    /// Run `steps` in order, stopping at the first failure
    ///
    /// The error carries the stage of the step that failed. Nothing is cleaned
    /// up on failure; the scratch tree and logs stay for inspection.
    pub async fn run(&self, steps: &[BuildStep], cancel: &CancellationToken) -> Result<(), (Stage, BuildError)> {
        for (index, step) in steps.iter().enumerate() {
            self.run_step(index, step, cancel).await.map_err(|e| (step.stage, e))?;
        }
        Ok(())
    }
}
