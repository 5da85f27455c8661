use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use walkdir::WalkDir;

use crate::error::BuildError;

/// ENOSPC on Unix
const DISK_FULL: i32 = 28;

/// Files copied by a directory copy
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CopyReport {
    pub files: u64,
    pub bytes: u64,
    /// Destination paths, in copy order
    pub written: Vec<PathBuf>,
}

/// Hidden paths (any component starting with `.`) are never picked up by globs
#[inline]
pub(crate) fn is_hidden(relative: &Path) -> bool {
    relative.components().any(|component| match component {
        Component::Normal(name) => name.to_str().is_some_and(|n| n.starts_with('.')),
        _ => false,
    })
}

fn create_parent(dst: &Path) -> Result<(), BuildError> {
    let Some(parent) = dst.parent() else {
        return Ok(());
    };
    if parent.exists() {
        return Ok(());
    }
    fs::create_dir_all(parent).map_err(|e| {
        if e.raw_os_error() == Some(DISK_FULL) {
            return BuildError::DiskFull {
                path: parent.to_path_buf(),
            };
        }
        BuildError::CreateDirFailed {
            path: parent.to_path_buf(),
            source: e,
        }
    })
}

/// Copy a single file from src to dst
pub fn copy_file(src: &Path, dst: &Path) -> Result<u64, BuildError> {
    create_parent(dst)?;

    fs::copy(src, dst).map_err(|e| {
        if e.raw_os_error() == Some(DISK_FULL) {
            return BuildError::DiskFull {
                path: dst.to_path_buf(),
            };
        }
        BuildError::CopyFailed {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
            source: e,
        }
    })
}

/// Write generated contents to dst, creating parent directories
pub fn write_file(dst: &Path, contents: &[u8]) -> Result<u64, BuildError> {
    create_parent(dst)?;

    fs::write(dst, contents).map_err(|e| {
        if e.raw_os_error() == Some(DISK_FULL) {
            return BuildError::DiskFull {
                path: dst.to_path_buf(),
            };
        }
        BuildError::WriteFailed {
            path: dst.to_path_buf(),
            source: e,
        }
    })?;
    Ok(contents.len() as u64)
}

/// Copy directory recursively, hidden files included
pub fn copy_directory(src: &Path, dst: &Path, shutdown: &AtomicBool) -> Result<CopyReport, BuildError> {
    copy_tree(src, dst, shutdown, |_| true)
}

/// Copy the non-hidden files under `src` accepted by `is_match` (given the
/// path relative to `src`), preserving relative paths
pub fn copy_matching<F>(
    src: &Path,
    dst: &Path,
    shutdown: &AtomicBool,
    is_match: F,
) -> Result<CopyReport, BuildError>
where
    F: Fn(&Path) -> bool,
{
    copy_tree(src, dst, shutdown, |relative| !is_hidden(relative) && is_match(relative))
}

fn copy_tree<F>(src: &Path, dst: &Path, shutdown: &AtomicBool, accept: F) -> Result<CopyReport, BuildError>
where
    F: Fn(&Path) -> bool,
{
    let mut report = CopyReport::default();
    if !src.exists() {
        return Ok(report);
    }

    for entry in WalkDir::new(src)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if shutdown.load(Ordering::Relaxed) {
            return Err(BuildError::Cancelled);
        }

        if !entry.file_type().is_file() {
            continue;
        }

        let src_path = entry.path();
        let relative = src_path.strip_prefix(src).unwrap_or(src_path);
        if !accept(relative) {
            continue;
        }

        let dst_path = dst.join(relative);
        report.bytes += copy_file(src_path, &dst_path)?;
        report.files += 1;
        report.written.push(dst_path);
    }

    Ok(report)
}

/// Recursively delete a directory; a missing directory is not an error
pub fn remove_dir_if_exists(path: &Path) -> Result<bool, BuildError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(BuildError::RemoveFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
