//! The release pipeline: every named command, wired onto the task graph.
//!
//! ```text
//! build  = [transform | copy | copy-plugins] -> install
//! slim   = build -> slim
//! linux  = linux-bin -> linux-zip
//! darwin = build -> package
//! win32  = build -> package
//! debian = debian-bin -> debian-pkg
//! run    = build -> runtime
//! ```
//!
//! Packaging tasks start from `build`, or from `slim` when the project
//! packages its slim tree.

use std::sync::Arc;
use std::time::Instant;

use crate::core::Project;
use crate::engine::{Blueprint, Phase, Step, TaskGraph, TaskResult};
use crate::error::{FileError, GraphError};
use crate::io::{as_overhead, remove_dir};
use crate::steps::package::{Platform, target_for};
use crate::steps::slim::SlimRecord;
use crate::steps::{copy, finalize, install, package, slim, transform};
use crate::tool::ToolCommand;

/// Task run when none is named.
pub const DEFAULT_TASK: &str = "build";

/// Builds the task graph of the release pipeline.
pub fn graph() -> Result<TaskGraph<Project>, GraphError> {
    blueprint(false).finish()
}

/// Builds the task graph for `project`, packaging from the slim tree when
/// its options or config ask for it.
pub fn graph_for(project: &Project) -> Result<TaskGraph<Project>, GraphError> {
    blueprint(project.packages_slim()).finish()
}

pub fn blueprint(from_slim: bool) -> Blueprint<Project> {
    let mut bp = Blueprint::new();
    let source = if from_slim { "slim" } else { "build" };

    bp.task("clean")
        .about("Remove every generated directory")
        .run(|p: Arc<Project>| async move { clean(&p) });

    bp.task("transform")
        .about("Compile sources into the staging tree")
        .phase(Phase::Transforming)
        .run(|p: Arc<Project>| async move { transform::transform_sources(&p).await.map(drop) });

    bp.task("copy")
        .about("Copy the manifest and markup/style assets")
        .phase(Phase::Copying)
        .run(|p: Arc<Project>| async move { copy::copy_assets(&p).await.map(drop) });

    bp.task("copy-plugins")
        .about("Copy plugin trees and link mirrors")
        .phase(Phase::Copying)
        .run(|p: Arc<Project>| async move { copy::copy_plugins(&p).await.map(drop) });

    bp.task("install")
        .about("Install application and plugin dependencies")
        .phase(Phase::Installing)
        .depends_on(["copy", "copy-plugins"])
        .run(|p: Arc<Project>| async move { install::install(&p).await.map(drop) });

    bp.task("build")
        .about("Stage, transform and install the application")
        .sequence([Step::parallel(["transform", "copy", "copy-plugins"]), Step::from("install")]);

    bp.task("slim")
        .about("Write the runtime-only output tree")
        .phase(Phase::Slimming)
        .depends_on(["build"])
        .run(|p: Arc<Project>| async move { slim::slim_output(&p).await.map(drop) });

    bp.task("linux-bin")
        .about("Package for Linux")
        .phase(Phase::Packaging)
        .depends_on([source])
        .run(|p: Arc<Project>| async move { package_for(&p, Platform::Linux).await });

    bp.task("linux-zip")
        .about("Zip the packaged Linux bundle")
        .phase(Phase::Finalizing)
        .run(|p: Arc<Project>| async move {
            let target = target_for(&p, Platform::Linux, p.bundles())?;
            let bundle = target.bundle_dir();
            finalize::archive(&p, &bundle, target.platform(), target.arch()).await?;
            Ok(())
        });

    bp.task("linux")
        .about("Package for Linux and zip the bundle")
        .sequence(["linux-bin", "linux-zip"]);

    bp.task("darwin")
        .about("Package for macOS")
        .phase(Phase::Packaging)
        .depends_on([source])
        .run(|p: Arc<Project>| async move { package_for(&p, Platform::Darwin).await });

    bp.task("win32")
        .about("Package for Windows")
        .phase(Phase::Packaging)
        .depends_on([source])
        .run(|p: Arc<Project>| async move { package_for(&p, Platform::Win32).await });

    bp.task("win32-installer")
        .about("Build the Windows installer wizard from the packaged bundle")
        .phase(Phase::Finalizing)
        .run(|p: Arc<Project>| async move {
            let bundle = target_for(&p, Platform::Win32, p.bundles())?.bundle_dir();
            finalize::build_wizard(&p, &bundle).await?;
            Ok(())
        });

    bp.task("debian-bin")
        .about("Package for Linux into the installer stage")
        .phase(Phase::Packaging)
        .depends_on([source])
        .run(|p: Arc<Project>| async move {
            let target = target_for(&p, Platform::Linux, p.bundles())?;
            let bundle = package::package(&p, &target).await?;
            finalize::stage_bundle(&p, &bundle).await?;
            Ok(())
        });

    bp.task("debian-pkg")
        .about("Render installer templates and build the .deb")
        .phase(Phase::Finalizing)
        .run(|p: Arc<Project>| async move { finalize::build_installer(&p).await.map(drop) });

    bp.task("debian")
        .about("Build the Debian package")
        .sequence(["debian-bin", "debian-pkg"]);

    bp.task("run")
        .about("Build and launch the application")
        .depends_on(["build"])
        .run(|p: Arc<Project>| async move {
            runtime_command(&p).status().await?;
            Ok(())
        });

    bp
}

async fn package_for(project: &Project, platform: Platform) -> TaskResult {
    let target = target_for(project, platform, project.bundles())?;
    package::package(project, &target).await?;
    Ok(())
}

fn clean(project: &Project) -> TaskResult {
    let s = Instant::now();
    let slim = project.slim_dir();

    for dir in [
        project.staging(),
        project.bundles(),
        project.installer_stage(),
        project.artifacts(),
        slim.clone(),
    ] {
        remove_dir(&dir)?;
    }

    let record = SlimRecord::path_for(&slim);
    if record.is_file() {
        std::fs::remove_file(&record).map_err(FileError::io("remove", &record))?;
    }

    tracing::info!("Cleaned generated directories {}", as_overhead(s));
    Ok(())
}

/// Launches the runtime on the staging tree. The attach variable is set to
/// `1` unless the invoking environment already defines it.
pub fn runtime_command(project: &Project) -> ToolCommand {
    let runtime = &project.config.runtime;
    let cmd = ToolCommand::new(&runtime.program)
        .args(runtime.args.iter().cloned())
        .arg(project.staging().as_str())
        .current_dir(&project.root);

    if std::env::var_os(&runtime.attach_env).is_some() {
        cmd
    } else {
        cmd.env(&runtime.attach_env, "1")
    }
}
