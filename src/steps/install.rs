//! Dependency installation for the application and its plugins.
//!
//! The staged application is installed first, after its manifest has been
//! scrubbed of any dependency on itself. Plugins are then discovered in the
//! staging tree and each one is installed into its own root by its own
//! resolver process, so two plugins may pin different versions of the same
//! library. Finally the build-only link mirrors are removed.

use std::fs;
use std::time::Instant;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use futures::{StreamExt, TryStreamExt, stream};
use serde_json::Value;

use crate::core::Project;
use crate::error::{FileError, ManifestError, StepError};
use crate::io::{as_overhead, remove_dir, write_file};
use crate::manifest::PackageManifest;
use crate::tool::ToolCommand;

/// Manifest keys holding dependency maps.
const DEPENDENCY_KEYS: [&str; 3] = ["dependencies", "devDependencies", "optionalDependencies"];

/// Installs the dependencies declared by the manifest at `root` into `root`.
///
/// Implementations must keep every call self-contained: concurrent calls for
/// different roots may not share state.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn install(&self, root: &Utf8Path) -> Result<(), StepError>;
}

/// The npm client, one process per install.
#[derive(Debug, Clone)]
pub struct NpmResolver {
    program: String,
}

impl NpmResolver {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    pub fn command(&self, root: &Utf8Path) -> ToolCommand {
        ToolCommand::new(&self.program)
            .args(["install", "--omit=dev", "--no-audit", "--no-fund", "--prefix"])
            .arg(root.as_str())
            .current_dir(root)
    }
}

#[async_trait]
impl Resolver for NpmResolver {
    async fn install(&self, root: &Utf8Path) -> Result<(), StepError> {
        self.command(root).output().await?;
        Ok(())
    }
}

/// A plugin package found in the staging tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plugin {
    pub root: Utf8PathBuf,
    pub manifest: PackageManifest,
    pub installed: bool,
}

/// Finds every directory directly below `plugins` holding a manifest.
/// Directories without one are skipped; a manifest that doesn't parse fails
/// the discovery.
pub fn discover_plugins(plugins: &Utf8Path, manifest_file: &str) -> Result<Vec<Plugin>, StepError> {
    if !plugins.is_dir() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in plugins.read_dir_utf8().map_err(FileError::io("read", plugins))? {
        let entry = entry.map_err(FileError::io("read", plugins))?;
        let path = entry.path().join(manifest_file);

        if !path.is_file() {
            continue;
        }

        found.push(Plugin {
            root: entry.path().to_owned(),
            manifest: PackageManifest::load(&path)?,
            installed: false,
        });
    }

    found.sort_by(|a, b| a.root.cmp(&b.root));
    Ok(found)
}

/// Removes `app_name` from every dependency map of the staged manifest and
/// deletes a previously installed copy of the app from `node_modules`.
/// Returns whether the manifest changed. Running it again is a no-op.
pub fn strip_self_reference(
    staging: &Utf8Path,
    manifest_file: &str,
    app_name: &str,
) -> Result<bool, StepError> {
    let path = staging.join(manifest_file);
    let text = fs::read_to_string(&path).map_err(FileError::io("read", &path))?;
    let mut manifest: Value = serde_json::from_str(&text).map_err(|source| ManifestError::Parse {
        path: path.clone(),
        source,
    })?;

    let mut removed = false;
    for key in DEPENDENCY_KEYS {
        if let Some(deps) = manifest.get_mut(key).and_then(Value::as_object_mut) {
            removed |= deps.remove(app_name).is_some();
        }
    }

    if removed {
        let mut text =
            serde_json::to_string_pretty(&manifest).map_err(|source| ManifestError::Parse {
                path: path.clone(),
                source,
            })?;
        text.push('\n');
        write_file(&path, text)?;
        tracing::debug!(%path, "removed self reference to {app_name}");
    }

    remove_dir(&staging.join("node_modules").join(app_name))?;
    Ok(removed)
}

/// Installs every plugin into its own root, at most `jobs` at a time. The
/// result keeps discovery order.
pub async fn install_plugins(
    resolver: &dyn Resolver,
    plugins: Vec<Plugin>,
    jobs: usize,
) -> Result<Vec<Plugin>, StepError> {
    let mut installed: Vec<Plugin> = stream::iter(plugins)
        .map(|mut plugin| async move {
            let s = Instant::now();
            resolver.install(&plugin.root).await?;
            plugin.installed = true;
            tracing::info!("Installed plugin {} {}", plugin.manifest.name, as_overhead(s));
            Ok::<_, StepError>(plugin)
        })
        .buffer_unordered(jobs.max(1))
        .try_collect()
        .await?;

    installed.sort_by(|a, b| a.root.cmp(&b.root));
    Ok(installed)
}

/// Deletes the build-only link mirrors from the staging tree.
pub fn prune_mirrors(staging: &Utf8Path, mirrors: &[Utf8PathBuf]) -> Result<(), FileError> {
    for mirror in mirrors {
        remove_dir(&staging.join(mirror))?;
    }
    Ok(())
}

/// The whole install stage: strip, root install, plugin installs, prune.
pub async fn install(project: &Project) -> Result<Vec<Plugin>, StepError> {
    let s = Instant::now();
    let layout = &project.config.layout;
    let staging = project.staging();

    strip_self_reference(&staging, &layout.manifest, &project.app.name)?;
    project.resolver.install(&staging).await?;
    tracing::info!("Installed {} {}", project.app.name, as_overhead(s));

    let plugins = discover_plugins(&staging.join(&layout.plugins), &layout.manifest)?;
    let jobs = project.config.plugins.install_jobs;
    let plugins = install_plugins(&*project.resolver, plugins, jobs).await?;

    prune_mirrors(&staging, &layout.mirrors)?;
    tracing::info!("Installed {} plugins {}", plugins.len(), as_overhead(s));

    Ok(plugins)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::config::Config;
    use crate::io::tests::{utf8_tempdir, write_old};

    /// Resolves by writing `node_modules/<dep>/VERSION` for every dependency
    /// in the manifest at the given root, and remembers what it saw.
    #[derive(Default)]
    pub(crate) struct FakeResolver {
        pub(crate) calls: Mutex<Vec<(Utf8PathBuf, PackageManifest)>>,
    }

    #[async_trait]
    impl Resolver for FakeResolver {
        async fn install(&self, root: &Utf8Path) -> Result<(), StepError> {
            let manifest = PackageManifest::load(&root.join("package.json"))?;

            for (name, version) in &manifest.dependencies {
                let dir = root.join("node_modules").join(name);
                fs::create_dir_all(&dir).map_err(FileError::io("create", &dir))?;
                fs::write(dir.join("VERSION"), version).map_err(FileError::io("write", &dir))?;
            }

            self.calls.lock().unwrap().push((root.to_owned(), manifest));
            Ok(())
        }
    }

    fn plugin(staging: &Utf8Path, name: &str, lib: &str) {
        let manifest = format!(r#"{{"name": "{name}", "dependencies": {{"lib": "{lib}"}}}}"#);
        write_old(&staging.join("packages").join(name).join("package.json"), &manifest);
    }

    #[test]
    fn discovery_requires_a_manifest() {
        let (_dir, staging) = utf8_tempdir();
        plugin(&staging, "b-plugin", "1.0.0");
        plugin(&staging, "a-plugin", "1.0.0");
        fs::create_dir_all(staging.join("packages/not-a-plugin/lib")).unwrap();
        write_old(&staging.join("packages/README"), "");

        let found = discover_plugins(&staging.join("packages"), "package.json").unwrap();

        let names: Vec<_> = found.iter().map(|p| p.manifest.name.as_str()).collect();
        assert_eq!(names, ["a-plugin", "b-plugin"]);
        assert!(found.iter().all(|p| !p.installed));
    }

    #[test]
    fn malformed_manifest_fails_discovery() {
        let (_dir, staging) = utf8_tempdir();
        plugin(&staging, "good", "1.0.0");
        write_old(&staging.join("packages/broken/package.json"), "{ \"name\": ");

        let err = discover_plugins(&staging.join("packages"), "package.json").unwrap_err();

        assert!(matches!(
            err,
            StepError::Manifest(ManifestError::Parse { ref path, .. })
                if path.ends_with("broken/package.json")
        ));
    }

    #[test]
    fn missing_plugins_dir_is_empty() {
        let (_dir, staging) = utf8_tempdir();
        assert!(discover_plugins(&staging.join("packages"), "package.json").unwrap().is_empty());
    }

    #[test]
    fn self_reference_is_stripped_once() {
        let (_dir, staging) = utf8_tempdir();
        write_old(
            &staging.join("package.json"),
            concat!(
                r#"{"name": "viewer", "#,
                r#""dependencies": {"viewer": "file:core", "lib": "1.0.0"}, "#,
                r#""devDependencies": {"viewer": "*"}}"#,
            ),
        );
        write_old(&staging.join("node_modules/viewer/index.js"), "");

        assert!(strip_self_reference(&staging, "package.json", "viewer").unwrap());
        assert!(!strip_self_reference(&staging, "package.json", "viewer").unwrap());

        let manifest = PackageManifest::load(&staging.join("package.json")).unwrap();
        assert_eq!(manifest.name, "viewer");
        assert!(!manifest.dependencies.contains_key("viewer"));
        assert!(!manifest.dev_dependencies.contains_key("viewer"));
        assert_eq!(manifest.dependencies["lib"], "1.0.0");
        assert!(!staging.join("node_modules/viewer").exists());
    }

    #[tokio::test]
    async fn plugins_resolve_in_isolation() {
        let (_dir, staging) = utf8_tempdir();
        plugin(&staging, "a", "1.0.0");
        plugin(&staging, "b", "2.0.0");

        let resolver = FakeResolver::default();
        let plugins = discover_plugins(&staging.join("packages"), "package.json").unwrap();
        let plugins = install_plugins(&resolver, plugins, 2).await.unwrap();

        assert!(plugins.iter().all(|p| p.installed));
        let version = |name: &str| {
            let path = staging.join("packages").join(name).join("node_modules/lib/VERSION");
            fs::read_to_string(path).unwrap()
        };
        assert_eq!(version("a"), "1.0.0");
        assert_eq!(version("b"), "2.0.0");
        assert!(!staging.join("node_modules").exists());
        assert_eq!(resolver.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn install_strips_before_root_install_and_prunes() {
        let (_dir, root) = utf8_tempdir();
        let staging = root.join(".build");
        write_old(
            &staging.join("package.json"),
            r#"{"name": "viewer", "dependencies": {"viewer": "file:core", "lib": "3.0.0"}}"#,
        );
        plugin(&staging, "hexview", "1.0.0");
        write_old(&staging.join("core/package.json"), "{}");
        write_old(&staging.join("filter/binding.gyp"), "");

        let app = PackageManifest {
            name: "viewer".into(),
            ..Default::default()
        };
        let resolver = Arc::new(FakeResolver::default());
        let project = Project::new(&root, Config::default(), app).with_resolver(resolver.clone());

        let plugins = install(&project).await.unwrap();

        let calls = resolver.calls.lock().unwrap();
        assert_eq!(calls[0].0, staging);
        assert!(!calls[0].1.dependencies.contains_key("viewer"));
        assert_eq!(calls[1].0, staging.join("packages/hexview"));
        assert_eq!(plugins.len(), 1);
        assert!(!staging.join("core").exists());
        assert!(!staging.join("filter").exists());
        assert!(staging.join("node_modules/lib/VERSION").is_file());
    }

    #[test]
    fn npm_installs_into_the_given_root() {
        let cmd = NpmResolver::new("npm").command(Utf8Path::new("/p/.build/packages/a"));

        assert_eq!(cmd.program(), "npm");
        assert_eq!(
            cmd.get_args(),
            ["install", "--omit=dev", "--no-audit", "--no-fund", "--prefix", "/p/.build/packages/a"]
        );
        assert_eq!(cmd.get_current_dir(), Some(Utf8Path::new("/p/.build/packages/a")));
    }
}
