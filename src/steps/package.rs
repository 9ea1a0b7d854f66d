//! Platform bundles.
//!
//! A [`PlatformTarget`] describes one bundle: the part every platform shares
//! ([`TargetBase`]) and the per-OS details ([`TargetOs`]). Targets are
//! validated before the bundler is started, so a missing icon or an empty
//! metadata field fails fast with a [`PackagingError`].

use std::time::Instant;

use async_trait::async_trait;
use camino::Utf8PathBuf;
use serde::Deserialize;

use crate::core::{Project, SIGN_IDENTITY_VAR};
use crate::error::{PackagingError, StepError, ToolError};
use crate::io::as_overhead;
use crate::steps::slim::SlimRecord;
use crate::tool::ToolCommand;

/// When to sign macOS bundles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SigningPolicy {
    Never,
    /// Sign if an identity is configured, otherwise ship unsigned.
    #[default]
    WhenAvailable,
    Required,
}

impl SigningPolicy {
    /// Decides on the identity to sign with, if any.
    pub fn resolve(self, identity: Option<&str>) -> Result<Option<String>, ToolError> {
        match (self, identity) {
            (SigningPolicy::Never, _) => Ok(None),
            (_, Some(identity)) => Ok(Some(identity.to_string())),
            (SigningPolicy::WhenAvailable, None) => {
                tracing::warn!("{SIGN_IDENTITY_VAR} is not set, the macOS bundle will be unsigned");
                Ok(None)
            }
            (SigningPolicy::Required, None) => Err(ToolError::MissingCredential {
                tool: "codesign".into(),
                variable: SIGN_IDENTITY_VAR.into(),
            }),
        }
    }
}

/// Windows executable metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Win32Metadata {
    pub company_name: String,
    pub file_description: String,
    pub product_name: String,
}

/// Settings shared by every platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetBase {
    /// Tree to package.
    pub source: Utf8PathBuf,
    /// Directory the bundler writes into.
    pub out_dir: Utf8PathBuf,
    pub product: String,
    pub app_version: Option<String>,
    pub runtime_version: Option<String>,
    pub icon: Utf8PathBuf,
    /// Loose files placed next to the packed application.
    pub extra_resources: Vec<Utf8PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOs {
    Linux { arch: String },
    MacOs { signing: SigningPolicy, unpack_exempt: Vec<String> },
    Windows { arch: String, metadata: Win32Metadata },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformTarget {
    pub base: TargetBase,
    pub os: TargetOs,
}

impl PlatformTarget {
    /// The bundler's platform name.
    pub fn platform(&self) -> &'static str {
        match self.os {
            TargetOs::Linux { .. } => "linux",
            TargetOs::MacOs { .. } => "darwin",
            TargetOs::Windows { .. } => "win32",
        }
    }

    pub fn arch(&self) -> &str {
        match &self.os {
            TargetOs::Linux { arch } | TargetOs::Windows { arch, .. } => arch.as_str(),
            TargetOs::MacOs { .. } => "x64",
        }
    }

    /// Where the bundler leaves the finished bundle.
    pub fn bundle_dir(&self) -> Utf8PathBuf {
        self.base
            .out_dir
            .join(format!("{}-{}-{}", self.base.product, self.platform(), self.arch()))
    }

    fn needs_icon(&self) -> bool {
        !matches!(self.os, TargetOs::Linux { .. })
    }

    /// Rejects targets the bundler would choke on.
    pub fn validate(&self) -> Result<(), PackagingError> {
        let target = self.platform();

        if !self.base.source.is_dir() {
            return Err(PackagingError::MissingSource {
                target,
                path: self.base.source.clone(),
            });
        }

        if self.needs_icon() && !self.base.icon.is_file() {
            return Err(PackagingError::MissingIcon {
                target,
                path: self.base.icon.clone(),
            });
        }

        if let TargetOs::Windows { metadata, .. } = &self.os {
            let fields = [
                ("company_name", &metadata.company_name),
                ("file_description", &metadata.file_description),
                ("product_name", &metadata.product_name),
            ];
            if let Some(&(field, _)) = fields.iter().find(|(_, value)| value.trim().is_empty()) {
                return Err(PackagingError::EmptyMetadata { target, field });
            }
        }

        Ok(())
    }
}

/// Turns a validated target into a bundle directory.
#[async_trait]
pub trait Bundler: Send + Sync {
    /// `identity` is the resolved signing identity, `token` the runtime
    /// download token. Returns the bundle directory.
    async fn package(
        &self,
        target: &PlatformTarget,
        identity: Option<&str>,
        token: Option<&str>,
    ) -> Result<Utf8PathBuf, StepError>;
}

/// electron-packager style command line bundler.
#[derive(Debug, Clone)]
pub struct ExternalBundler {
    program: String,
}

impl ExternalBundler {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    pub fn command(
        &self,
        target: &PlatformTarget,
        identity: Option<&str>,
        token: Option<&str>,
    ) -> ToolCommand {
        let base = &target.base;
        let mut cmd = ToolCommand::new(&self.program)
            .arg(base.source.as_str())
            .arg(&base.product)
            .flag("platform", target.platform())
            .flag("arch", target.arch())
            .flag("out", &base.out_dir)
            .arg("--overwrite");

        if let Some(version) = &base.runtime_version {
            cmd = cmd.flag("electron-version", version);
        }
        if let Some(version) = &base.app_version {
            cmd = cmd.flag("app-version", version);
        }
        if target.needs_icon() {
            cmd = cmd.flag("icon", &base.icon);
        }

        match &target.os {
            TargetOs::Linux { .. } => {}
            TargetOs::MacOs { unpack_exempt, .. } => {
                if let Some(identity) = identity {
                    cmd = cmd.flag("osx-sign.identity", identity);
                }
                for pattern in unpack_exempt {
                    cmd = cmd.flag("asar.unpackDir", pattern);
                }
            }
            TargetOs::Windows { metadata, .. } => {
                cmd = cmd
                    .flag("win32metadata.CompanyName", &metadata.company_name)
                    .flag("win32metadata.FileDescription", &metadata.file_description)
                    .flag("win32metadata.ProductName", &metadata.product_name);
            }
        }

        for resource in &base.extra_resources {
            cmd = cmd.flag("extra-resource", resource);
        }

        if let Some(token) = token {
            cmd = cmd.env("GITHUB_TOKEN", token);
        }

        cmd
    }
}

#[async_trait]
impl Bundler for ExternalBundler {
    async fn package(
        &self,
        target: &PlatformTarget,
        identity: Option<&str>,
        token: Option<&str>,
    ) -> Result<Utf8PathBuf, StepError> {
        self.command(target, identity, token).output().await?;

        let bundle = target.bundle_dir();
        if !bundle.is_dir() {
            return Err(PackagingError::NoBundle {
                target: target.platform(),
                path: bundle,
            }
            .into());
        }
        Ok(bundle)
    }
}

/// Which platform a packaging task targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Darwin,
    Win32,
}

/// Builds the target for `platform` from the project configuration, writing
/// into `out_dir`.
pub fn target_for(
    project: &Project,
    platform: Platform,
    out_dir: Utf8PathBuf,
) -> Result<PlatformTarget, StepError> {
    let config = &project.config.platform;
    let source = project.package_source();

    let extra_resources = if source == project.slim_dir() {
        SlimRecord::load(&source)?
            .map(|record| record.resources())
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    let (icon, os) = match platform {
        Platform::Linux => (
            &config.linux.icon,
            TargetOs::Linux {
                arch: config.linux.arch.clone(),
            },
        ),
        Platform::Darwin => (
            &config.darwin.icon,
            TargetOs::MacOs {
                signing: config.darwin.signing,
                unpack_exempt: config.darwin.unpack_exempt.clone(),
            },
        ),
        Platform::Win32 => (
            &config.win32.icon,
            TargetOs::Windows {
                arch: config.win32.arch.clone(),
                metadata: Win32Metadata {
                    company_name: config.win32.company_name.clone(),
                    file_description: config.win32.file_description.clone(),
                    product_name: config.win32.product_name.clone(),
                },
            },
        ),
    };

    Ok(PlatformTarget {
        base: TargetBase {
            source,
            out_dir,
            product: project.product().to_string(),
            app_version: project.app.version.clone(),
            runtime_version: project
                .app
                .pinned_dev_dependency(&project.config.runtime.package)
                .map(str::to_string),
            icon: project.path(icon),
            extra_resources,
        },
        os,
    })
}

/// Validates `target`, resolves signing and runs the bundler.
pub async fn package(project: &Project, target: &PlatformTarget) -> Result<Utf8PathBuf, StepError> {
    let s = Instant::now();
    target.validate()?;

    let identity = match &target.os {
        TargetOs::MacOs { signing, .. } => signing.resolve(project.env.sign_identity.as_deref())?,
        _ => None,
    };

    let bundle = project
        .bundler
        .package(target, identity.as_deref(), project.env.runtime_token.as_deref())
        .await?;

    tracing::info!("Packaged {} {}", bundle, as_overhead(s));
    Ok(bundle)
}
