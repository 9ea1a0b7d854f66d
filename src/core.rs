use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::Config;
use crate::error::{ConfigError, FileError};
use crate::manifest::PackageManifest;
use crate::steps::install::{NpmResolver, Resolver};
use crate::steps::package::{Bundler, ExternalBundler};
use crate::steps::transform::{ExternalTransform, SourceTransform};

/// Token handed to the bundler for downloading prebuilt runtime binaries.
pub const RUNTIME_TOKEN_VAR: &str = "HAKOBU_RUNTIME_TOKEN";

/// macOS code signing identity.
pub const SIGN_IDENTITY_VAR: &str = "HAKOBU_SIGN_IDENTITY";

/// Credentials taken from the invoking environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Env {
    pub runtime_token: Option<String>,
    pub sign_identity: Option<String>,
}

impl Env {
    pub fn from_process() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|value| !value.is_empty());
        Self {
            runtime_token: var(RUNTIME_TOKEN_VAR),
            sign_identity: var(SIGN_IDENTITY_VAR),
        }
    }
}

/// Switches chosen on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    /// Package from the slim tree instead of the staging tree.
    pub slim: bool,
}

/// Everything a task can see: where the project lives, how it is configured,
/// the application manifest, and the external collaborators.
///
/// A single `Project` is shared (behind an `Arc`) by every task of a run.
/// The collaborators are trait objects so tests can swap in fakes.
pub struct Project {
    pub root: Utf8PathBuf,
    pub config: Config,
    /// The application's own manifest, as found at the project root.
    pub app: PackageManifest,
    pub env: Env,
    pub options: Options,
    pub transform: Arc<dyn SourceTransform>,
    pub resolver: Arc<dyn Resolver>,
    pub bundler: Arc<dyn Bundler>,
}

impl Project {
    /// Reads configuration and the application manifest from `root`, wiring
    /// the external tools named by the configuration.
    pub fn load(root: &Utf8Path, config: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        let config = Config::load(root, config)?;

        let path = root.join(&config.layout.manifest);
        let text = fs::read_to_string(&path).map_err(FileError::io("read", &path))?;
        let app = PackageManifest::parse(&path, &text)?;

        Ok(Self::new(root, config, app))
    }

    pub fn new(root: impl Into<Utf8PathBuf>, config: Config, app: PackageManifest) -> Self {
        let root = root.into();
        let transform = Arc::new(ExternalTransform::new(&root, &config.transform));
        let resolver = Arc::new(NpmResolver::new(&config.plugins.resolver));
        let bundler = Arc::new(ExternalBundler::new(&config.bundler.program));

        Self {
            root,
            config,
            app,
            env: Env::from_process(),
            options: Options::default(),
            transform,
            resolver,
            bundler,
        }
    }

    pub fn with_env(mut self, env: Env) -> Self {
        self.env = env;
        self
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn with_transform(mut self, transform: Arc<dyn SourceTransform>) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_bundler(mut self, bundler: Arc<dyn Bundler>) -> Self {
        self.bundler = bundler;
        self
    }

    pub fn path(&self, relative: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.root.join(relative)
    }

    pub fn staging(&self) -> Utf8PathBuf {
        self.path(&self.config.layout.staging)
    }

    pub fn slim_dir(&self) -> Utf8PathBuf {
        self.path(&self.config.layout.slim)
    }

    pub fn bundles(&self) -> Utf8PathBuf {
        self.path(&self.config.layout.bundles)
    }

    pub fn artifacts(&self) -> Utf8PathBuf {
        self.path(&self.config.layout.artifacts)
    }

    pub fn installer_stage(&self) -> Utf8PathBuf {
        self.path(&self.config.installer.stage)
    }

    pub fn app_manifest_path(&self) -> Utf8PathBuf {
        self.path(&self.config.layout.manifest)
    }

    /// Name used for bundle directories and artifacts.
    pub fn product(&self) -> &str {
        self.config
            .bundler
            .product
            .as_deref()
            .unwrap_or(self.app.name.as_str())
    }

    /// Whether packaging reads the slim output instead of the staging tree.
    pub fn packages_slim(&self) -> bool {
        self.options.slim || self.config.bundler.from_slim
    }

    /// Tree the bundler packages: the slim output when slimming was asked
    /// for, the staging tree otherwise.
    pub fn package_source(&self) -> Utf8PathBuf {
        if self.packages_slim() {
            self.slim_dir()
        } else {
            self.staging()
        }
    }
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("root", &self.root)
            .field("app", &self.app.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
