//! Filesystem helpers shared by the pipeline steps.
//!
//! Everything that lands in the staging or output tree goes through
//! [`copy_file`] or [`copy_times`], which carry the source's access and
//! modification times over to the destination.

use std::fmt::Display;
use std::fs::{self, FileTimes};
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use console::Style;

use crate::error::FileError;

const ANSI_BLUE: Style = Style::new().blue();

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Delete a directory tree if it exists.
pub fn remove_dir(path: &Utf8Path) -> Result<(), FileError> {
    if fs::symlink_metadata(path).is_ok() {
        fs::remove_dir_all(path).map_err(FileError::io("remove", path))?;
    }
    Ok(())
}

/// Delete a directory tree if it exists, then recreate it empty.
pub fn clear_dir(path: &Utf8Path) -> Result<(), FileError> {
    remove_dir(path)?;
    fs::create_dir_all(path).map_err(FileError::io("create", path))
}

pub(crate) fn create_parent(path: &Utf8Path) -> Result<(), FileError> {
    if let Some(parent) = path.parent()
        && !parent.as_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(FileError::io("create", parent))?;
    }
    Ok(())
}

/// Sets `dst`'s access and modification times to those of `src`.
pub fn copy_times(src: &Utf8Path, dst: &Utf8Path) -> Result<(), FileError> {
    let meta = fs::metadata(src).map_err(FileError::io("stat", src))?;
    let modified = meta.modified().map_err(FileError::io("stat", src))?;
    let accessed = meta.accessed().unwrap_or(modified);

    let file = open_for_times(dst).map_err(FileError::io("open", dst))?;

    file.set_times(FileTimes::new().set_accessed(accessed).set_modified(modified))
        .map_err(FileError::io("set timestamps on", dst))
}

/// Timestamps can be set through a read-only handle, so copies of
/// read-only files need no write access.
#[cfg(not(windows))]
fn open_for_times(path: &Utf8Path) -> std::io::Result<fs::File> {
    fs::File::open(path)
}

#[cfg(windows)]
fn open_for_times(path: &Utf8Path) -> std::io::Result<fs::File> {
    use std::os::windows::fs::OpenOptionsExt;

    const FILE_WRITE_ATTRIBUTES: u32 = 0x0100;
    fs::File::options().access_mode(FILE_WRITE_ATTRIBUTES).open(path)
}

/// Removes `path` when it is a read-only file, so it can be replaced.
fn unlock(path: &Utf8Path) -> Result<(), FileError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_file() && meta.permissions().readonly() => {
            fs::remove_file(path).map_err(FileError::io("remove", path))
        }
        _ => Ok(()),
    }
}

/// Writes `contents` to `path`, replacing a read-only file left by an
/// earlier copy.
pub(crate) fn write_file(path: &Utf8Path, contents: impl AsRef<[u8]>) -> Result<(), FileError> {
    unlock(path)?;
    fs::write(path, contents).map_err(FileError::io("write", path))
}

/// Byte-identical copy that keeps the source's timestamps.
pub fn copy_file(src: &Utf8Path, dst: &Utf8Path) -> Result<(), FileError> {
    create_parent(dst)?;
    unlock(dst)?;
    fs::copy(src, dst).map_err(FileError::io("copy", src))?;
    copy_times(src, dst)
}

/// Recursively copies a directory tree, keeping timestamps. Returns the number
/// of files copied.
pub fn copy_tree(src: &Utf8Path, dst: &Utf8Path) -> Result<usize, FileError> {
    fs::create_dir_all(dst).map_err(FileError::io("create", dst))?;

    let mut count = 0;
    for entry in src.read_dir_utf8().map_err(FileError::io("read", src))? {
        let entry = entry.map_err(FileError::io("read", src))?;
        let filetype = entry.file_type().map_err(FileError::io("stat", entry.path()))?;
        let target = dst.join(entry.file_name());

        if filetype.is_dir() {
            count += copy_tree(entry.path(), &target)?;
        } else {
            copy_file(entry.path(), &target)?;
            count += 1;
        }
    }

    Ok(count)
}

/// The directory part of a glob pattern before its first wildcard, i.e. the
/// path matched files are made relative to when no explicit base is given.
///
/// - `src/*.html` -> `src`
/// - `packages/**/*` -> `packages`
/// - `package.json` -> `` (the pattern's own parent)
pub fn glob_base(pattern: &str) -> Utf8PathBuf {
    let mut base = Utf8PathBuf::new();
    let path = Utf8Path::new(pattern);
    let components: Vec<_> = path.components().collect();

    for (i, component) in components.iter().enumerate() {
        let is_last = i + 1 == components.len();
        if is_last || component.as_str().contains(['*', '?', '[', '{']) {
            break;
        }
        base.push(component);
    }

    base
}

/// `path` relative to `base`, or `path` itself when it lies outside `base`.
pub(crate) fn rebase<'a>(path: &'a Utf8Path, base: &Utf8Path) -> &'a Utf8Path {
    if matches!(base.as_str(), "" | ".") {
        return path;
    }
    path.strip_prefix(base).unwrap_or(path)
}

/// `dir` joined onto `root`, with `.` meaning `root` itself.
pub(crate) fn within(root: &Utf8Path, dir: &Utf8Path) -> Utf8PathBuf {
    if matches!(dir.as_str(), "" | ".") {
        root.to_owned()
    } else {
        root.join(dir)
    }
}

/// Expands a glob pattern relative to `root`, returning matched regular files
/// as paths relative to `root`, sorted.
pub fn glob_files(root: &Utf8Path, pattern: &str) -> Result<Vec<Utf8PathBuf>, FileError> {
    let absolute = format!("{}/{pattern}", glob::Pattern::escape(root.as_str()));
    let paths = glob::glob(&absolute).map_err(|source| FileError::Pattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let mut files = Vec::new();
    for path in paths {
        let path = Utf8PathBuf::try_from(path?)?;
        if !path.is_file() {
            continue;
        }
        let relative = path.strip_prefix(root).map(Utf8Path::to_path_buf).unwrap_or(path);
        files.push(relative);
    }

    files.sort();
    Ok(files)
}
