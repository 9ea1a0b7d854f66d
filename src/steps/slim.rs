//! The slim output: only what the application needs at runtime.
//!
//! Subtrees marked unpack-exempt (native modules that must stay loose files
//! next to the packed application) are left out of the slim tree. A JSON
//! record next to the slim directory names them, so the packager can attach
//! them again from the staging tree.

use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::config::SlimConfig;
use crate::core::Project;
use crate::error::{FileError, ManifestError, StepError};
use crate::io::{as_overhead, clear_dir, copy_file};

/// What the slim output left behind, and where to find it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlimRecord {
    /// The tree the slim output was taken from.
    pub source: Utf8PathBuf,
    /// Left-out subtrees, relative to `source`.
    pub exempt: Vec<Utf8PathBuf>,
}

impl SlimRecord {
    /// Location of the record belonging to `slim_dir`.
    pub fn path_for(slim_dir: &Utf8Path) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{slim_dir}.json"))
    }

    /// Reads the record of `slim_dir`, if one was written.
    pub fn load(slim_dir: &Utf8Path) -> Result<Option<Self>, StepError> {
        let path = Self::path_for(slim_dir);
        if !path.is_file() {
            return Ok(None);
        }

        let text = fs::read_to_string(&path).map_err(FileError::io("read", &path))?;
        let record = serde_json::from_str(&text)
            .map_err(|source| ManifestError::Parse { path, source })?;
        Ok(Some(record))
    }

    fn save(&self, slim_dir: &Utf8Path) -> Result<(), StepError> {
        let path = Self::path_for(slim_dir);
        let text = serde_json::to_string_pretty(self).map_err(|source| ManifestError::Parse {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, text).map_err(FileError::io("write", &path))?;
        Ok(())
    }

    /// Absolute paths of the left-out subtrees that still exist.
    pub fn resources(&self) -> Vec<Utf8PathBuf> {
        self.exempt
            .iter()
            .map(|rel| self.source.join(rel))
            .filter(|path| path.exists())
            .collect()
    }
}

/// Rebuilds `slim_dir` from the included entries of `staging`, skipping
/// exempt subtrees, and writes the record.
pub fn slim(
    staging: &Utf8Path,
    slim_dir: &Utf8Path,
    config: &SlimConfig,
) -> Result<SlimRecord, StepError> {
    clear_dir(slim_dir)?;

    let mut copied = 0;
    for entry in &config.include {
        let src = staging.join(entry);
        if !src.exists() {
            tracing::debug!(%src, "not staged, skipping");
            continue;
        }
        copied += copy_filtered(staging, entry, slim_dir, &config.unpack_exempt)?;
    }

    let record = SlimRecord {
        source: staging.to_owned(),
        exempt: config
            .unpack_exempt
            .iter()
            .filter(|rel| staging.join(rel).exists())
            .cloned()
            .collect(),
    };
    record.save(slim_dir)?;

    tracing::debug!(copied, exempt = ?record.exempt, "slim output written");
    Ok(record)
}

fn copy_filtered(
    staging: &Utf8Path,
    rel: &Utf8Path,
    slim_dir: &Utf8Path,
    exempt: &[Utf8PathBuf],
) -> Result<usize, FileError> {
    if exempt.iter().any(|e| e == rel) {
        return Ok(0);
    }

    let src = staging.join(rel);
    let meta = fs::metadata(&src).map_err(FileError::io("stat", &src))?;
    if !meta.is_dir() {
        copy_file(&src, &slim_dir.join(rel))?;
        return Ok(1);
    }

    let dst = slim_dir.join(rel);
    fs::create_dir_all(&dst).map_err(FileError::io("create", &dst))?;

    let mut count = 0;
    for entry in src.read_dir_utf8().map_err(FileError::io("read", &src))? {
        let entry = entry.map_err(FileError::io("read", &src))?;
        count += copy_filtered(staging, &rel.join(entry.file_name()), slim_dir, exempt)?;
    }
    Ok(count)
}

/// Writes the slim output of the project's staging tree.
pub async fn slim_output(project: &Project) -> Result<SlimRecord, StepError> {
    let s = Instant::now();
    let staging = project.staging();
    let slim_dir = project.slim_dir();
    let config = project.config.slim.clone();

    let record = super::blocking(move || slim(&staging, &slim_dir, &config)).await?;

    tracing::info!(
        "Slimmed output, {} subtrees left unpacked {}",
        record.exempt.len(),
        as_overhead(s)
    );
    Ok(record)
}
