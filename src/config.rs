//! Project configuration, read from an optional `hakobu.toml`.
//!
//! Every key has a default matching the application's usual layout, so a
//! project without a config file builds as-is.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

pub const CONFIG_FILE: &str = "hakobu.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub layout: Layout,
    pub transform: TransformConfig,
    pub copy: Vec<CopyRule>,
    pub plugins: PluginConfig,
    pub slim: SlimConfig,
    pub runtime: RuntimeConfig,
    pub bundler: BundlerConfig,
    pub platform: PlatformConfig,
    pub installer: InstallerConfig,
    pub wizard: WizardConfig,
}

impl Config {
    /// Loads `path`, or the defaults when `path` is `None` and no config file
    /// sits in `root`.
    pub fn load(root: &Utf8Path, path: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_owned(), true),
            None => (root.join(CONFIG_FILE), false),
        };

        if !required && !path.exists() {
            return Ok(Self::default());
        }

        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        Self::parse(&path, &text)
    }

    pub fn parse(path: &Utf8Path, text: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;

        if config.copy.is_empty() {
            config.copy = CopyRule::defaults();
        }

        if config.installer.token.is_empty() {
            return Err(ConfigError::Empty {
                path: path.to_owned(),
                key: "installer.token",
            });
        }

        Ok(config)
    }

}

impl Default for Config {
    fn default() -> Self {
        Self {
            layout: Layout::default(),
            transform: TransformConfig::default(),
            copy: CopyRule::defaults(),
            plugins: PluginConfig::default(),
            slim: SlimConfig::default(),
            runtime: RuntimeConfig::default(),
            bundler: BundlerConfig::default(),
            platform: PlatformConfig::default(),
            installer: InstallerConfig::default(),
            wizard: WizardConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Layout {
    /// Staging tree receiving transformed sources, assets and installs.
    pub staging: Utf8PathBuf,
    /// Output directory of the platform bundler.
    pub bundles: Utf8PathBuf,
    /// Slim (runtime-only) output tree.
    pub slim: Utf8PathBuf,
    /// Final distributables.
    pub artifacts: Utf8PathBuf,
    /// File name of a package manifest.
    pub manifest: String,
    /// Plugins directory, relative to the staging tree.
    pub plugins: Utf8PathBuf,
    /// Build-only source copies kept in staging so local links resolve during
    /// install, removed once installs finish.
    pub mirrors: Vec<Utf8PathBuf>,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            staging: ".build".into(),
            bundles: ".builtapp".into(),
            slim: ".slim".into(),
            artifacts: "dist".into(),
            manifest: "package.json".into(),
            plugins: "packages".into(),
            mirrors: vec!["core".into(), "filter".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformConfig {
    pub pattern: String,
    pub base: Utf8PathBuf,
    pub dest: Utf8PathBuf,
    pub extension: String,
    pub program: String,
    /// Arguments; `{input}` and `{output}` are replaced per file.
    pub args: Vec<String>,
    pub jobs: usize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            pattern: "src/**/*.es".into(),
            base: "src".into(),
            dest: "js".into(),
            extension: "js".into(),
            program: "babel".into(),
            args: vec!["{input}".into(), "--out-file".into(), "{output}".into()],
            jobs: 8,
        }
    }
}

/// One entry of the build manifest: files matched by `patterns` are copied
/// into `dest` (relative to the staging tree), keeping their path relative to
/// `base`. Without a base, each pattern's non-wildcard prefix is used.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CopyRule {
    pub patterns: Vec<String>,
    #[serde(default)]
    pub base: Option<Utf8PathBuf>,
    #[serde(default = "CopyRule::default_dest")]
    pub dest: Utf8PathBuf,
}

impl CopyRule {
    fn default_dest() -> Utf8PathBuf {
        ".".into()
    }

    pub fn defaults() -> Vec<Self> {
        vec![Self {
            patterns: vec!["package.json".into(), "src/*.html".into(), "src/*.less".into()],
            base: None,
            dest: Self::default_dest(),
        }]
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PluginConfig {
    /// Plugin trees and link mirrors copied verbatim into staging.
    pub patterns: Vec<String>,
    pub base: Utf8PathBuf,
    pub resolver: String,
    /// Concurrent plugin installs; each one runs its own resolver process.
    pub install_jobs: usize,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            patterns: vec!["packages/**/*".into(), "core/**/*".into(), "filter/**/*".into()],
            base: ".".into(),
            resolver: "npm".into(),
            install_jobs: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SlimConfig {
    /// Top-level entries of the staging tree kept in the slim output.
    pub include: Vec<Utf8PathBuf>,
    /// Subtrees left out of the slim output and reattached by the packager.
    pub unpack_exempt: Vec<Utf8PathBuf>,
}

impl Default for SlimConfig {
    fn default() -> Self {
        Self {
            include: vec![
                "js".into(),
                "package.json".into(),
                "packages".into(),
                "node_modules".into(),
            ],
            unpack_exempt: vec!["node_modules/filter".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Development dependency of the app manifest naming the runtime version.
    pub package: String,
    /// Runtime launched by the `run` command.
    pub program: String,
    pub args: Vec<String>,
    /// Variable set to `1` for the launched application unless already set.
    pub attach_env: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            package: "electron".into(),
            program: "electron".into(),
            args: vec!["--enable-logging".into()],
            attach_env: "APP_ATTACH".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BundlerConfig {
    pub program: String,
    /// Product name used for bundle directories; defaults to the manifest name.
    pub product: Option<String>,
    /// Package from the slim tree instead of the full staging tree.
    pub from_slim: bool,
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self {
            program: "electron-packager".into(),
            product: None,
            from_slim: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformConfig {
    pub linux: LinuxConfig,
    pub darwin: DarwinConfig,
    pub win32: Win32Config,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinuxConfig {
    pub arch: String,
    pub icon: Utf8PathBuf,
}

impl Default for LinuxConfig {
    fn default() -> Self {
        Self {
            arch: "x64".into(),
            icon: "images/app.png".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DarwinConfig {
    pub icon: Utf8PathBuf,
    pub signing: crate::steps::package::SigningPolicy,
    pub unpack_exempt: Vec<String>,
}

impl Default for DarwinConfig {
    fn default() -> Self {
        Self {
            icon: "images/app.icns".into(),
            signing: Default::default(),
            unpack_exempt: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Win32Config {
    pub arch: String,
    pub icon: Utf8PathBuf,
    pub company_name: String,
    pub file_description: String,
    pub product_name: String,
}

impl Default for Win32Config {
    fn default() -> Self {
        Self {
            arch: "x64".into(),
            icon: "images/app.ico".into(),
            company_name: String::new(),
            file_description: String::new(),
            product_name: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallerConfig {
    /// Packaging descriptor templates.
    pub template: Utf8PathBuf,
    /// Directory the templates render into and the installer is built from.
    pub stage: Utf8PathBuf,
    /// Literal placeholder replaced by the application version.
    pub token: String,
    /// Where the Linux bundle goes inside the installer stage.
    pub install_dir: Utf8PathBuf,
    pub program: String,
    pub arch: String,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            template: "debian".into(),
            stage: ".debian".into(),
            token: "{{APP_VERSION}}".into(),
            install_dir: "usr/share/app".into(),
            program: "dpkg-deb".into(),
            arch: "amd64".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WizardConfig {
    pub program: String,
    pub script: Utf8PathBuf,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            program: "makensis".into(),
            script: "installer/win32.nsi".into(),
        }
    }
}
