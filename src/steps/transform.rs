//! Source to bytecode transformation.
//!
//! Every file matched by the transform pattern is handed to a
//! [`SourceTransform`] together with its destination inside the staging
//! tree. The destination keeps the source's path below the base directory,
//! with the extension swapped, and ends up with the source's timestamps.

use std::time::Instant;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use futures::{StreamExt, TryStreamExt, stream};

use crate::config::TransformConfig;
use crate::core::Project;
use crate::error::{FileError, StepError};
use crate::io::{as_overhead, copy_times, create_parent, glob_files, rebase, within};
use crate::tool::{ToolCommand, expand_args};

/// Turns one source file into one output file.
#[async_trait]
pub trait SourceTransform: Send + Sync {
    async fn transform(&self, input: &Utf8Path, output: &Utf8Path) -> Result<(), StepError>;
}

/// Runs a configured external compiler once per file.
#[derive(Debug, Clone)]
pub struct ExternalTransform {
    program: String,
    args: Vec<String>,
    cwd: Utf8PathBuf,
}

impl ExternalTransform {
    pub fn new(root: &Utf8Path, config: &TransformConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            cwd: root.to_owned(),
        }
    }

    pub fn command(&self, input: &Utf8Path, output: &Utf8Path) -> ToolCommand {
        let vars = [("input", input.as_str()), ("output", output.as_str())];
        ToolCommand::new(&self.program)
            .args(expand_args(&self.args, &vars))
            .current_dir(&self.cwd)
    }
}

#[async_trait]
impl SourceTransform for ExternalTransform {
    async fn transform(&self, input: &Utf8Path, output: &Utf8Path) -> Result<(), StepError> {
        self.command(input, output).output().await?;
        Ok(())
    }
}

/// A single source file and where its output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformJob {
    pub source: Utf8PathBuf,
    pub target: Utf8PathBuf,
}

/// Maps every file matched by the transform pattern to its output path.
pub fn plan(
    root: &Utf8Path,
    staging: &Utf8Path,
    config: &TransformConfig,
) -> Result<Vec<TransformJob>, FileError> {
    let dest = within(staging, &config.dest);

    let jobs = glob_files(root, &config.pattern)?
        .into_iter()
        .map(|file| TransformJob {
            target: dest.join(rebase(&file, &config.base)).with_extension(&config.extension),
            source: root.join(file),
        })
        .collect();

    Ok(jobs)
}

/// Transforms all sources into the staging tree, at most `jobs` at a time.
pub async fn transform_sources(project: &Project) -> Result<usize, StepError> {
    let s = Instant::now();
    let config = &project.config.transform;
    let jobs = plan(&project.root, &project.staging(), config)?;
    let count = jobs.len();

    stream::iter(jobs)
        .map(|job| async move {
            create_parent(&job.target)?;
            project.transform.transform(&job.source, &job.target).await?;
            copy_times(&job.source, &job.target)?;
            tracing::debug!(source = %job.source, target = %job.target, "transformed");
            Ok::<_, StepError>(())
        })
        .buffer_unordered(config.jobs.max(1))
        .try_collect::<Vec<_>>()
        .await?;

    tracing::info!("Transformed {count} sources {}", as_overhead(s));
    Ok(count)
}
