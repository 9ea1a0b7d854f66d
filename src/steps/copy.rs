//! Asset copying driven by the build manifest.

use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;

use crate::config::CopyRule;
use crate::core::Project;
use crate::error::{FileError, StepError};
use crate::io::{as_overhead, copy_file, glob_base, glob_files, rebase, within};

/// Source and destination of every file a rule matches.
pub fn plan_rule(
    root: &Utf8Path,
    staging: &Utf8Path,
    rule: &CopyRule,
) -> Result<Vec<(Utf8PathBuf, Utf8PathBuf)>, FileError> {
    let dest = within(staging, &rule.dest);
    let mut pairs = Vec::new();

    for pattern in &rule.patterns {
        let base = rule.base.clone().unwrap_or_else(|| glob_base(pattern));

        for file in glob_files(root, pattern)? {
            let target = dest.join(rebase(&file, &base));
            pairs.push((root.join(file), target));
        }
    }

    Ok(pairs)
}

/// Copies every file matched by `rules` into `staging`, on the rayon pool.
/// Returns the number of files copied.
pub fn copy_rules(
    root: &Utf8Path,
    staging: &Utf8Path,
    rules: &[CopyRule],
) -> Result<usize, FileError> {
    let mut pairs = Vec::new();
    for rule in rules {
        pairs.extend(plan_rule(root, staging, rule)?);
    }

    pairs.par_iter().try_for_each(|(src, dst)| {
        tracing::debug!(%src, %dst, "copy");
        copy_file(src, dst)
    })?;

    Ok(pairs.len())
}

/// Copies the application manifest and the markup/style assets.
pub async fn copy_assets(project: &Project) -> Result<usize, StepError> {
    let s = Instant::now();
    let root = project.root.clone();
    let staging = project.staging();
    let rules = project.config.copy.clone();

    let count = super::blocking(move || Ok(copy_rules(&root, &staging, &rules)?)).await?;

    tracing::info!("Copied {count} assets {}", as_overhead(s));
    Ok(count)
}

/// Copies the plugin trees and the link mirrors, keeping their paths
/// relative to the plugin base.
pub async fn copy_plugins(project: &Project) -> Result<usize, StepError> {
    let s = Instant::now();
    let root = project.root.clone();
    let staging = project.staging();
    let rule = CopyRule {
        patterns: project.config.plugins.patterns.clone(),
        base: Some(project.config.plugins.base.clone()),
        dest: ".".into(),
    };

    let count = super::blocking(move || Ok(copy_rules(&root, &staging, &[rule])?)).await?;

    tracing::info!("Copied {count} plugin files {}", as_overhead(s));
    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::config::Config;
    use crate::io::tests::{mtime, utf8_tempdir, write_old};
    use crate::manifest::PackageManifest;

    fn project(root: &Utf8Path) -> Project {
        let app = PackageManifest {
            name: "viewer".into(),
            ..Default::default()
        };
        Project::new(root, Config::default(), app)
    }

    #[tokio::test]
    async fn default_rules_flatten_into_staging_root() {
        let (_dir, root) = utf8_tempdir();
        let manifest = write_old(&root.join("package.json"), "{}");
        let html = write_old(&root.join("src/layout.html"), "<html>");
        write_old(&root.join("src/theme.less"), "a {}");
        write_old(&root.join("src/main.es"), "ignored");

        let count = copy_assets(&project(&root)).await.unwrap();

        assert_eq!(count, 3);
        assert_eq!(mtime(&root.join(".build/package.json")), manifest);
        assert_eq!(mtime(&root.join(".build/layout.html")), html);
        assert!(root.join(".build/theme.less").is_file());
        assert!(!root.join(".build/main.es").exists());
        assert!(!root.join(".build/src").exists());
    }

    #[tokio::test]
    async fn plugin_trees_keep_their_paths() {
        let (_dir, root) = utf8_tempdir();
        let when = write_old(&root.join("packages/hexview/package.json"), "{}");
        write_old(&root.join("packages/hexview/lib/view.js"), "x");
        write_old(&root.join("core/package.json"), "{}");
        write_old(&root.join("unrelated/file"), "");

        let count = copy_plugins(&project(&root)).await.unwrap();

        assert_eq!(count, 3);
        assert_eq!(mtime(&root.join(".build/packages/hexview/package.json")), when);
        assert!(root.join(".build/packages/hexview/lib/view.js").is_file());
        assert!(root.join(".build/core/package.json").is_file());
        assert!(!root.join(".build/unrelated").exists());
    }

    #[test]
    fn explicit_base_and_destination() {
        let (_dir, root) = utf8_tempdir();
        write_old(&root.join("assets/img/logo.png"), "png");

        let rule = CopyRule {
            patterns: vec!["assets/**/*.png".into()],
            base: Some("assets".into()),
            dest: "static".into(),
        };
        let count = copy_rules(&root, &root.join("stage"), &[rule]).unwrap();

        assert_eq!(count, 1);
        assert_eq!(fs::read_to_string(root.join("stage/static/img/logo.png")).unwrap(), "png");
    }
}
