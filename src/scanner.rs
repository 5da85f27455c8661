use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use walkdir::WalkDir;

use crate::compilers::Asset;
use crate::copier::is_hidden;
use crate::error::BuildError;
use crate::paths::SourceGlob;

/// Files under `base` accepted by `is_match`, as paths relative to `base`.
/// Hidden files and directories are left out. Walk order is by file name,
/// so results are deterministic.
pub fn scan<F>(base: &Path, is_match: F) -> Vec<PathBuf>
where
    F: Fn(&Path) -> bool,
{
    if !base.exists() {
        return Vec::new();
    }

    WalkDir::new(base)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let relative = e.path().strip_prefix(base).ok()?.to_path_buf();
            (!is_hidden(&relative) && is_match(&relative)).then_some(relative)
        })
        .collect()
}

/// Files matched by a source glob, relative to its base
pub fn scan_glob(glob: &SourceGlob) -> Result<Vec<PathBuf>, BuildError> {
    let matcher = glob.matcher()?;
    Ok(scan(&glob.base, |relative| matcher.is_match(relative)))
}

/// Read every matched file of a glob into memory, in scan order
pub fn read_glob(glob: &SourceGlob) -> Result<Vec<Asset>, BuildError> {
    let relatives = scan_glob(glob)?;
    read_assets(&glob.base, relatives)
}

/// Read files relative to `base` in parallel, keeping their order
pub fn read_assets(base: &Path, relatives: Vec<PathBuf>) -> Result<Vec<Asset>, BuildError> {
    relatives
        .into_par_iter()
        .map(|relative| {
            let origin = base.join(&relative);
            let contents = fs::read(&origin).map_err(|source| BuildError::ReadFailed {
                path: origin.clone(),
                source,
            })?;
            Ok(Asset::from_source(relative, origin, contents))
        })
        .collect()
}

/// Read one optional source file; `Ok(None)` when it does not exist
pub fn read_optional(path: &Path) -> Result<Option<Asset>, BuildError> {
    match fs::read(path) {
        Ok(contents) => {
            let name = path.file_name().map(PathBuf::from).unwrap_or_default();
            Ok(Some(Asset::from_source(name, path.to_path_buf(), contents)))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(BuildError::ReadFailed {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_scan_missing_base_is_empty() {
        let temp = TempDir::new().unwrap();
        assert!(scan(&temp.path().join("nope"), |_| true).is_empty());
    }

    #[test]
    fn test_scan_glob_relative_and_sorted() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "b.js", "b");
        touch(temp.path(), "a.js", "a");
        touch(temp.path(), "vendor/c.js", "c");
        touch(temp.path(), "notes.txt", "x");

        let glob = SourceGlob::new(temp.path().to_path_buf(), "**/*.js");
        let files = scan_glob(&glob).unwrap();

        assert_eq!(
            files,
            vec![
                PathBuf::from("a.js"),
                PathBuf::from("b.js"),
                PathBuf::from("vendor/c.js")
            ]
        );
    }

    #[test]
    fn test_scan_skips_hidden_paths() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "app.js", "app");
        touch(temp.path(), ".x.js", "hidden");
        touch(temp.path(), ".cache/y.js", "hidden");

        let glob = SourceGlob::new(temp.path().to_path_buf(), "**/*.js");
        assert_eq!(scan_glob(&glob).unwrap(), vec![PathBuf::from("app.js")]);
    }

    #[test]
    fn test_read_glob_loads_contents() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "fr_FR.po", "msgid \"\"");
        touch(temp.path(), "nested/de_DE.po", "ignored");

        let glob = SourceGlob::new(temp.path().to_path_buf(), "*.po");
        let assets = read_glob(&glob).unwrap();

        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].path, PathBuf::from("fr_FR.po"));
        assert_eq!(assets[0].contents, b"msgid \"\"");
        assert_eq!(assets[0].origin, temp.path().join("fr_FR.po"));
    }

    #[test]
    fn test_read_optional() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "functions.php", "<?php");

        let found = read_optional(&temp.path().join("functions.php")).unwrap().unwrap();
        assert_eq!(found.path, PathBuf::from("functions.php"));

        assert!(read_optional(&temp.path().join("missing.php")).unwrap().is_none());
    }
}
