//! WordPress installation: download, unzip, rename, delete.
//!
//! The stages run in that order and each one overwrites whatever an earlier,
//! interrupted run left behind, so re-running the sequence converges. There
//! is no marker file: the presence of the runtime root is the only signal
//! that WordPress is installed.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use indicatif::{ProgressBar, ProgressStyle};
use zip::ZipArchive;

use crate::config::RUNTIME_ROOT;
use crate::copier::{copy_directory, remove_dir_if_exists, CopyReport};
use crate::error::BuildError;

/// Scratch folder holding the downloaded archive
pub const STAGING_DIR: &str = "tmp";

/// File name of the downloaded archive
pub const ARCHIVE_NAME: &str = "latest.zip";

/// Top-level folder inside the WordPress archive
pub const UNPACKED_DIR: &str = "wordpress";

/// Install runs only when nothing is installed yet and this is not a production build
#[inline]
pub fn should_install(runtime_root_exists: bool, production: bool) -> bool {
    !runtime_root_exists && !production
}

pub fn archive_path(root: &Path) -> PathBuf {
    root.join(STAGING_DIR).join(ARCHIVE_NAME)
}

/// Fetch the archive into `tmp/latest.zip`; returns the number of bytes written
pub fn download(url: &str, root: &Path, show_progress: bool) -> Result<u64, BuildError> {
    // The blocking client times out after 30s by default; archives take longer
    let client = reqwest::blocking::Client::builder()
        .timeout(None)
        .build()
        .map_err(|source| BuildError::DownloadFailed {
            url: url.to_string(),
            source,
        })?;
    fetch(&client, url, root, show_progress)
}

fn fetch(
    client: &reqwest::blocking::Client,
    url: &str,
    root: &Path,
    show_progress: bool,
) -> Result<u64, BuildError> {
    let failed = |source| BuildError::DownloadFailed {
        url: url.to_string(),
        source,
    };
    let mut response = client.get(url).send().map_err(failed)?;

    let status = response.status();
    if !status.is_success() {
        return Err(BuildError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let target = archive_path(root);
    let staging = root.join(STAGING_DIR);
    fs::create_dir_all(&staging).map_err(|source| BuildError::CreateDirFailed {
        path: staging.clone(),
        source,
    })?;
    let file = File::create(&target).map_err(|source| BuildError::WriteFailed {
        path: target.clone(),
        source,
    })?;

    let progress = if show_progress {
        let pb = response
            .content_length()
            .map_or_else(ProgressBar::new_spinner, ProgressBar::new);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    let mut writer = progress.wrap_write(BufWriter::new(file));
    let bytes = response.copy_to(&mut writer).map_err(failed)?;
    writer.flush().map_err(|source| BuildError::WriteFailed {
        path: target.clone(),
        source,
    })?;
    progress.finish_and_clear();

    tracing::debug!(url, bytes, path = %target.display(), "archive downloaded");
    Ok(bytes)
}

/// Extract `tmp/latest.zip` into the project root
pub fn unzip(root: &Path) -> Result<u64, BuildError> {
    let path = archive_path(root);
    let file = File::open(&path).map_err(|source| BuildError::ReadFailed {
        path: path.clone(),
        source,
    })?;
    extract_archive(BufReader::new(file), root).map_err(|e| match e {
        BuildError::InvalidArchive { source, .. } => BuildError::InvalidArchive { path, source },
        other => other,
    })
}

/// Extract every entry of a zip stream below `dest`. Entries whose names
/// would escape `dest` are skipped.
pub fn extract_archive<R: Read + Seek>(reader: R, dest: &Path) -> Result<u64, BuildError> {
    let invalid = |source| BuildError::InvalidArchive {
        path: dest.to_path_buf(),
        source,
    };
    let mut archive = ZipArchive::new(reader).map_err(invalid)?;
    let mut files = 0u64;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(invalid)?;
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!(name = entry.name(), "skipping archive entry with unsafe path");
            continue;
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|source| BuildError::CreateDirFailed {
                path: out_path.clone(),
                source,
            })?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|source| BuildError::CreateDirFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let write_failed = |source| BuildError::WriteFailed {
            path: out_path.clone(),
            source,
        };
        let mut out = File::create(&out_path).map_err(write_failed)?;
        io::copy(&mut entry, &mut out).map_err(write_failed)?;

        files += 1;
    }

    Ok(files)
}

/// Copy the unpacked `wordpress/` tree into the runtime root
pub fn rename(root: &Path, shutdown: &AtomicBool) -> Result<CopyReport, BuildError> {
    let unpacked = root.join(UNPACKED_DIR);
    if !unpacked.is_dir() {
        return Err(BuildError::ReadFailed {
            path: unpacked,
            source: io::Error::new(io::ErrorKind::NotFound, "unpacked archive not found"),
        });
    }
    copy_directory(&unpacked, &root.join(RUNTIME_ROOT), shutdown)
}

/// Remove the unpacked tree and the staging folder
pub fn delete(root: &Path) -> Result<(), BuildError> {
    remove_dir_if_exists(&root.join(UNPACKED_DIR))?;
    remove_dir_if_exists(&root.join(STAGING_DIR))?;
    Ok(())
}

/// Remove the runtime root and every installer leftover
pub fn hard_clean(root: &Path) -> Result<Vec<PathBuf>, BuildError> {
    let mut removed = Vec::new();
    for dir in [RUNTIME_ROOT, UNPACKED_DIR, STAGING_DIR] {
        let path = root.join(dir);
        if remove_dir_if_exists(&path)? {
            removed.push(path);
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::TcpListener;
    use std::thread;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn wordpress_zip() -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.add_directory("wordpress/wp-content/", options).unwrap();
        writer.start_file("wordpress/index.php", options).unwrap();
        writer.write_all(b"<?php // front").unwrap();
        writer.start_file("wordpress/wp-admin/admin.php", options).unwrap();
        writer.write_all(b"<?php // admin").unwrap();
        writer.start_file("../escape.txt", options).unwrap();
        writer.write_all(b"nope").unwrap();
        writer.finish().unwrap().into_inner()
    }

    /// Serve one HTTP response on a local port
    fn serve_once(status: &str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let status = status.to_string();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let head = format!(
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&body);
            }
        });
        format!("http://{addr}/latest.zip")
    }

    fn local_client() -> reqwest::blocking::Client {
        reqwest::blocking::Client::builder().no_proxy().build().unwrap()
    }

    #[test]
    fn test_download_unreachable_host() {
        let temp = TempDir::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/latest.zip", listener.local_addr().unwrap());
        drop(listener);

        let result = fetch(&local_client(), &url, temp.path(), false);

        assert!(matches!(result, Err(BuildError::DownloadFailed { .. })));
    }

    #[test]
    fn test_should_install() {
        assert!(should_install(false, false));
        assert!(!should_install(true, false));
        assert!(!should_install(false, true));
        assert!(!should_install(true, true));
    }

    #[test]
    fn test_extract_archive_skips_unsafe_entries() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("site");
        fs::create_dir_all(&dest).unwrap();

        let files = extract_archive(Cursor::new(wordpress_zip()), &dest).unwrap();

        assert_eq!(files, 2);
        assert_eq!(fs::read_to_string(dest.join("wordpress/index.php")).unwrap(), "<?php // front");
        assert!(dest.join("wordpress/wp-content").is_dir());
        assert!(!temp.path().join("escape.txt").exists());
    }

    #[test]
    fn test_extract_archive_rejects_garbage() {
        let temp = TempDir::new().unwrap();
        let result = extract_archive(Cursor::new(b"not a zip".to_vec()), temp.path());
        assert!(matches!(result, Err(BuildError::InvalidArchive { .. })));
    }

    #[test]
    fn test_download_writes_archive() {
        let temp = TempDir::new().unwrap();
        let url = serve_once("200 OK", wordpress_zip());

        let bytes = fetch(&local_client(), &url, temp.path(), false).unwrap();

        assert_eq!(bytes, wordpress_zip().len() as u64);
        assert_eq!(fs::read(archive_path(temp.path())).unwrap(), wordpress_zip());
    }

    #[test]
    fn test_download_http_error_is_fatal() {
        let temp = TempDir::new().unwrap();
        let url = serve_once("404 Not Found", b"missing".to_vec());

        let result = fetch(&local_client(), &url, temp.path(), false);

        assert!(matches!(result, Err(BuildError::HttpStatus { status: 404, .. })));
        assert!(!archive_path(temp.path()).exists());
    }

    #[test]
    fn test_full_sequence_then_hard_clean() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join(STAGING_DIR)).unwrap();
        fs::write(archive_path(root), wordpress_zip()).unwrap();
        let shutdown = AtomicBool::new(false);

        unzip(root).unwrap();
        let report = rename(root, &shutdown).unwrap();
        delete(root).unwrap();

        assert_eq!(report.files, 2);
        assert!(root.join("public/index.php").exists());
        assert!(root.join("public/wp-admin/admin.php").exists());
        assert!(!root.join(UNPACKED_DIR).exists());
        assert!(!root.join(STAGING_DIR).exists());

        // re-running a stage over existing output converges
        assert!(delete(root).is_ok());

        let removed = hard_clean(root).unwrap();
        assert_eq!(removed, vec![root.join(RUNTIME_ROOT)]);
        assert!(!root.join(RUNTIME_ROOT).exists());
    }

    #[test]
    fn test_rename_without_unpacked_tree_fails() {
        let temp = TempDir::new().unwrap();
        let shutdown = AtomicBool::new(false);
        assert!(rename(temp.path(), &shutdown).is_err());
    }
}
