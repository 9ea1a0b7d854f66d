//! Distributable artifacts built from packaged bundles.
//!
//! Each finalizer consumes one bundle directory and produces one file in the
//! artifacts directory, next to a `<file>.blake3` checksum.

use std::fs;
use std::io;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::core::Project;
use crate::error::{FileError, StepError, TemplateError};
use crate::io::{as_overhead, clear_dir, copy_times, copy_tree, create_parent, write_file};
use crate::tool::ToolCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Archive,
    Installer,
    Wizard,
}

/// A finished distributable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: Utf8PathBuf,
    /// Hex encoded BLAKE3 hash of the file.
    pub checksum: String,
}

impl Artifact {
    /// Hashes `path` and writes the checksum file next to it.
    fn seal(kind: ArtifactKind, path: Utf8PathBuf) -> Result<Self, FileError> {
        let checksum = write_checksum(&path)?;
        tracing::info!(?kind, checksum = %checksum, "Created {path}");
        Ok(Self { kind, path, checksum })
    }
}

/// Writes `<path>.blake3` in the usual `<hash>  <file name>` format and
/// returns the hash.
pub fn write_checksum(path: &Utf8Path) -> Result<String, FileError> {
    let hash = blake3::Hasher::new()
        .update_mmap_rayon(path)
        .map_err(FileError::io("hash", path))?
        .finalize()
        .to_hex()
        .to_string();

    let sum = Utf8PathBuf::from(format!("{path}.blake3"));
    let line = format!("{hash}  {}\n", path.file_name().unwrap_or(path.as_str()));
    fs::write(&sum, line).map_err(FileError::io("write", &sum))?;

    Ok(hash)
}

/// Zips the contents of `src` into `dst` with paths relative to `src`.
/// Returns the number of files stored.
pub fn zip_dir(src: &Utf8Path, dst: &Utf8Path) -> Result<usize, FileError> {
    let archive = |source: zip::result::ZipError| FileError::Archive {
        path: dst.to_owned(),
        source,
    };

    create_parent(dst)?;
    let file = fs::File::create(dst).map_err(FileError::io("create", dst))?;
    let mut writer = ZipWriter::new(file);

    let mut count = 0;
    let mut pending = vec![src.to_owned()];
    while let Some(dir) = pending.pop() {
        let mut entries = dir
            .read_dir_utf8()
            .map_err(FileError::io("read", &dir))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(FileError::io("read", &dir))?;
        entries.sort_by(|a, b| a.file_name().cmp(b.file_name()));

        for entry in entries {
            let path = entry.path();
            let meta = fs::symlink_metadata(path).map_err(FileError::io("stat", path))?;
            let name = path
                .strip_prefix(src)
                .map(|rel| rel.as_str().replace('\\', "/"))
                .unwrap_or_else(|_| entry.file_name().to_string());
            let options = SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated)
                .unix_permissions(unix_mode(&meta));

            if meta.is_symlink() {
                let target = fs::read_link(path).map_err(FileError::io("read link", path))?;
                writer
                    .add_symlink(name, target.to_string_lossy(), options)
                    .map_err(archive)?;
            } else if meta.is_dir() {
                writer.add_directory(name, options).map_err(archive)?;
                pending.push(path.to_owned());
            } else {
                writer.start_file(name, options).map_err(archive)?;
                let mut input = fs::File::open(path).map_err(FileError::io("open", path))?;
                io::copy(&mut input, &mut writer).map_err(FileError::io("write", dst))?;
                count += 1;
            }
        }
    }

    writer.finish().map_err(archive)?;
    Ok(count)
}

#[cfg(unix)]
fn unix_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn unix_mode(meta: &fs::Metadata) -> u32 {
    if meta.is_dir() { 0o755 } else { 0o644 }
}

/// Finalizers only consume bundles packaged by an earlier task.
fn require_bundle(bundle: &Utf8Path) -> Result<(), FileError> {
    if bundle.is_dir() {
        return Ok(());
    }
    Err(FileError::Io {
        op: "find bundle",
        path: bundle.to_owned(),
        source: io::Error::from(io::ErrorKind::NotFound),
    })
}

/// Zips a packaged bundle into `<artifacts>/<name>-<platform>-<arch>.zip`.
pub async fn archive(
    project: &Project,
    bundle: &Utf8Path,
    platform: &str,
    arch: &str,
) -> Result<Artifact, StepError> {
    let s = Instant::now();
    require_bundle(bundle)?;
    let path = project
        .artifacts()
        .join(format!("{}-{platform}-{arch}.zip", project.app.name));
    let bundle = bundle.to_owned();

    let artifact = super::blocking(move || {
        let count = zip_dir(&bundle, &path)?;
        tracing::debug!(count, "archived {bundle}");
        Ok(Artifact::seal(ArtifactKind::Archive, path)?)
    })
    .await?;

    tracing::info!("Archived bundle {}", as_overhead(s));
    Ok(artifact)
}

/// Renders every file of `template` into `stage`, replacing `token` with
/// `value` in UTF-8 files. Other files are copied as they are. Rendering
/// always starts from the template, so repeating it gives the same result.
pub fn render_template(
    template: &Utf8Path,
    stage: &Utf8Path,
    token: &str,
    value: &str,
) -> Result<usize, StepError> {
    if token.is_empty() {
        return Err(TemplateError::EmptyToken.into());
    }
    if value.contains(token) {
        return Err(TemplateError::Recursive {
            token: token.to_string(),
            value: value.to_string(),
        }
        .into());
    }

    let mut count = 0;
    let mut pending = vec![template.to_owned()];
    while let Some(dir) = pending.pop() {
        for entry in dir.read_dir_utf8().map_err(FileError::io("read", &dir))? {
            let entry = entry.map_err(FileError::io("read", &dir))?;
            let src = entry.path();

            if src.is_dir() {
                pending.push(src.to_owned());
                continue;
            }

            let rel = src.strip_prefix(template).unwrap_or(src);
            let dst = stage.join(rel);
            create_parent(&dst)?;

            let bytes = fs::read(src).map_err(FileError::io("read", src))?;
            let bytes = match String::from_utf8(bytes) {
                Ok(text) => text.replace(token, value).into_bytes(),
                Err(binary) => binary.into_bytes(),
            };
            write_file(&dst, bytes)?;
            copy_times(src, &dst)?;
            count += 1;
        }
    }

    Ok(count)
}

/// Starts a fresh installer stage holding a copy of `bundle`. Files left by
/// an earlier render are dropped with it.
pub async fn stage_bundle(
    project: &Project,
    bundle: &Utf8Path,
) -> Result<Utf8PathBuf, StepError> {
    let stage = project.installer_stage();
    let dst = stage.join(&project.config.installer.install_dir);
    let src = bundle.to_owned();

    super::blocking(move || {
        clear_dir(&stage)?;
        let count = copy_tree(&src, &dst)?;
        tracing::debug!(count, "staged {src} at {dst}");
        Ok(dst)
    })
    .await
}

/// Renders the installer templates with the application version and runs
/// the installer builder over the stage.
pub async fn build_installer(project: &Project) -> Result<Artifact, StepError> {
    let s = Instant::now();
    let config = &project.config.installer;
    let version = project.app.require_version(&project.app_manifest_path())?.to_string();
    let stage = project.installer_stage();

    let template = project.path(&config.template);
    let token = config.token.clone();
    let (dir, value) = (stage.clone(), version.clone());
    let count = super::blocking(move || render_template(&template, &dir, &token, &value)).await?;
    tracing::debug!(count, "rendered installer templates");

    let artifacts = project.artifacts();
    fs::create_dir_all(&artifacts).map_err(FileError::io("create", &artifacts))?;
    let path = artifacts.join(format!("{}_{version}_{}.deb", project.app.name, config.arch));

    ToolCommand::new(&config.program)
        .arg("--build")
        .arg(stage.as_str())
        .arg(path.as_str())
        .current_dir(&project.root)
        .output()
        .await?;

    let artifact = Artifact::seal(ArtifactKind::Installer, path)?;
    tracing::info!("Built installer {}", as_overhead(s));
    Ok(artifact)
}

/// File the wizard script is asked to produce.
pub fn wizard_output(project: &Project, version: &str) -> Utf8PathBuf {
    project
        .artifacts()
        .join(format!("{}-{version}-setup.exe", project.product()))
}

pub fn wizard_command(project: &Project, bundle: &Utf8Path, version: &str) -> ToolCommand {
    let config = &project.config.wizard;
    ToolCommand::new(&config.program)
        .arg(format!("-DBUNDLE_DIR={bundle}"))
        .arg(format!("-DVERSION={version}"))
        .arg(format!("-DOUT_DIR={}", project.artifacts()))
        .arg(format!("-DOUT_FILE={}", wizard_output(project, version)))
        .arg(project.path(&config.script).as_str())
        .current_dir(&project.root)
}

/// Runs the installer wizard builder over an existing bundle.
pub async fn build_wizard(project: &Project, bundle: &Utf8Path) -> Result<Artifact, StepError> {
    let s = Instant::now();
    require_bundle(bundle)?;

    let version = project.app.require_version(&project.app_manifest_path())?;
    let artifacts = project.artifacts();
    fs::create_dir_all(&artifacts).map_err(FileError::io("create", &artifacts))?;

    wizard_command(project, bundle, version).output().await?;

    let artifact = Artifact::seal(ArtifactKind::Wizard, wizard_output(project, version))?;
    tracing::info!("Built installer wizard {}", as_overhead(s));
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;
    use crate::config::Config;
    use crate::io::tests::{mtime, utf8_tempdir, write_old};
    use crate::manifest::PackageManifest;

    fn project(root: &Utf8Path, version: &str) -> Project {
        let app = PackageManifest {
            name: "viewer".into(),
            version: Some(version.into()),
            ..Default::default()
        };
        Project::new(root, Config::default(), app)
    }

    #[test]
    fn render_twice_is_identical() {
        let (_dir, root) = utf8_tempdir();
        let control = "Package: viewer\nVersion: {{APP_VERSION}}\n";
        let when = write_old(&root.join("debian/DEBIAN/control"), control);
        fs::create_dir_all(root.join("debian/usr/share/icons")).unwrap();
        fs::write(root.join("debian/usr/share/icons/app.png"), [0x89, b'P', 0xff, 0xfe]).unwrap();

        let render = || {
            render_template(&root.join("debian"), &root.join(".debian"), "{{APP_VERSION}}", "0.3.1")
                .unwrap()
        };
        assert_eq!(render(), 2);
        let first = fs::read_to_string(root.join(".debian/DEBIAN/control")).unwrap();
        render();
        let second = fs::read_to_string(root.join(".debian/DEBIAN/control")).unwrap();

        assert_eq!(first, "Package: viewer\nVersion: 0.3.1\n");
        assert_eq!(first, second);
        assert_eq!(mtime(&root.join(".debian/DEBIAN/control")), when);
        assert_eq!(
            fs::read(root.join(".debian/usr/share/icons/app.png")).unwrap(),
            [0x89, b'P', 0xff, 0xfe]
        );
    }

    #[test]
    fn recursive_value_is_rejected() {
        let (_dir, root) = utf8_tempdir();
        write_old(&root.join("debian/control"), "{{V}}");

        let err = render_template(&root.join("debian"), &root.join(".debian"), "{{V}}", "1.0-{{V}}")
            .unwrap_err();

        assert!(matches!(err, StepError::Template(TemplateError::Recursive { .. })));
        assert!(!root.join(".debian").exists());
    }

    #[test]
    fn empty_token_is_rejected() {
        let (_dir, root) = utf8_tempdir();
        write_old(&root.join("debian/control"), "Version: 1.0");

        let err = render_template(&root.join("debian"), &root.join(".debian"), "", "1.0")
            .unwrap_err();

        assert!(matches!(err, StepError::Template(TemplateError::EmptyToken)));
    }

    #[tokio::test]
    async fn staging_a_bundle_drops_stale_stage_files() {
        let (_dir, root) = utf8_tempdir();
        let bundle = root.join(".builtapp/viewer-linux-x64");
        write_old(&bundle.join("viewer"), "binary");
        write_old(&root.join(".debian/DEBIAN/removed-script"), "old");
        write_old(&root.join(".debian/usr/share/app/stale"), "old");

        let dst = stage_bundle(&project(&root, "0.3.1"), &bundle).await.unwrap();

        assert_eq!(dst, root.join(".debian/usr/share/app"));
        assert!(dst.join("viewer").is_file());
        assert!(!dst.join("stale").exists());
        assert!(!root.join(".debian/DEBIAN/removed-script").exists());
    }

    #[tokio::test]
    async fn archive_needs_an_existing_bundle() {
        let (_dir, root) = utf8_tempdir();
        let bundle = root.join(".builtapp/viewer-linux-x64");

        let err = archive(&project(&root, "0.3.1"), &bundle, "linux", "x64").await.unwrap_err();

        assert!(matches!(err, StepError::File(FileError::Io { op: "find bundle", .. })));
        assert!(!root.join("dist").exists());
    }

    #[test]
    fn checksum_file_matches_content() {
        let (_dir, root) = utf8_tempdir();
        let path = root.join("a.zip");
        fs::write(&path, b"payload").unwrap();

        let hash = write_checksum(&path).unwrap();

        assert_eq!(hash, blake3::hash(b"payload").to_hex().to_string());
        assert_eq!(
            fs::read_to_string(root.join("a.zip.blake3")).unwrap(),
            format!("{hash}  a.zip\n")
        );
    }

    #[tokio::test]
    async fn archive_holds_bundle_contents() {
        let (_dir, root) = utf8_tempdir();
        let bundle = root.join(".builtapp/viewer-linux-x64");
        write_old(&bundle.join("viewer"), "binary");
        write_old(&bundle.join("resources/app/package.json"), "{}");

        let artifact = archive(&project(&root, "0.3.1"), &bundle, "linux", "x64").await.unwrap();

        assert_eq!(artifact.path, root.join("dist/viewer-linux-x64.zip"));
        assert_eq!(artifact.kind, ArtifactKind::Archive);
        assert!(root.join("dist/viewer-linux-x64.zip.blake3").is_file());

        let mut zip = zip::ZipArchive::new(fs::File::open(&artifact.path).unwrap()).unwrap();
        let mut text = String::new();
        zip.by_name("resources/app/package.json").unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "{}");
        assert!(zip.by_name("viewer").is_ok());
    }

    #[tokio::test]
    async fn wizard_needs_an_existing_bundle() {
        let (_dir, root) = utf8_tempdir();
        let project = project(&root, "0.3.1");

        let err = build_wizard(&project, &root.join(".builtapp/viewer-win32-x64"))
            .await
            .unwrap_err();

        assert!(matches!(err, StepError::File(FileError::Io { op: "find bundle", .. })));
    }

    #[test]
    fn wizard_command_defines_paths() {
        let project = project(Utf8Path::new("/p"), "0.3.1");
        let cmd = wizard_command(&project, Utf8Path::new("/p/.builtapp/viewer-win32-x64"), "0.3.1");

        assert_eq!(cmd.program(), "makensis");
        assert_eq!(
            cmd.get_args(),
            [
                "-DBUNDLE_DIR=/p/.builtapp/viewer-win32-x64",
                "-DVERSION=0.3.1",
                "-DOUT_DIR=/p/dist",
                "-DOUT_FILE=/p/dist/viewer-0.3.1-setup.exe",
                "/p/installer/win32.nsi",
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn installer_runs_builder_over_rendered_stage() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, root) = utf8_tempdir();
        write_old(&root.join("debian/DEBIAN/control"), "Version: {{APP_VERSION}}\n");

        // called as `<tool> --build <stage> <out>`, like dpkg-deb
        let tool = root.join("fake-dpkg-deb");
        fs::write(&tool, "#!/bin/sh\ncp \"$2/DEBIAN/control\" \"$3\"\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        let mut project = project(&root, "0.3.1");
        project.config.installer.program = tool.to_string();

        let artifact = build_installer(&project).await.unwrap();

        assert_eq!(artifact.path, root.join("dist/viewer_0.3.1_amd64.deb"));
        assert_eq!(fs::read_to_string(&artifact.path).unwrap(), "Version: 0.3.1\n");
        assert!(root.join("dist/viewer_0.3.1_amd64.deb.blake3").is_file());
    }
}
