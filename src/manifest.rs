//! Package manifests: the application's own and every plugin's.
//!
//! Both share one JSON shape (`name`, `version`, dependency maps). Parsing is
//! strict about structure, since a plugin with a broken manifest must fail the
//! build rather than silently drop out of it.

use std::collections::BTreeMap;
use std::fs;

use camino::Utf8Path;
use serde::Deserialize;

use crate::error::{FileError, ManifestError, StepError};

/// Parsed package manifest.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,
}

impl PackageManifest {
    /// Reads and parses a manifest file.
    pub fn load(path: &Utf8Path) -> Result<Self, StepError> {
        let text = fs::read_to_string(path).map_err(FileError::io("read", path))?;
        Ok(Self::parse(path, &text)?)
    }

    pub fn parse(path: &Utf8Path, text: &str) -> Result<Self, ManifestError> {
        let manifest: Self = serde_json::from_str(text).map_err(|source| ManifestError::Parse {
            path: path.to_owned(),
            source,
        })?;

        if manifest.name.trim().is_empty() {
            return Err(ManifestError::MissingField {
                path: path.to_owned(),
                field: "name",
            });
        }

        Ok(manifest)
    }

    /// The version string, required for anything that ends up in an artifact.
    pub fn require_version(&self, path: &Utf8Path) -> Result<&str, ManifestError> {
        self.version
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ManifestError::MissingField {
                path: path.to_owned(),
                field: "version",
            })
    }

    /// Looks up a development dependency and strips a leading range operator,
    /// leaving a plain version usable as a download tag.
    pub fn pinned_dev_dependency(&self, name: &str) -> Option<&str> {
        self.dev_dependencies
            .get(name)
            .map(|range| range.trim_start_matches(['^', '~', '=', 'v']).trim())
    }
}
