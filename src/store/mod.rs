//! Key-addressed content store on the local filesystem

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info};

/// Error types for store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unable to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Stores files under a base directory by key
///
/// Keys use `/` separators. A failed copy leaves whatever was written in
/// place.
#[derive(Debug, Clone)]
pub struct LocalStore {
    base: PathBuf,
}

impl LocalStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Location a key maps to
    pub fn path_for(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.base.clone(), |path, segment| path.join(segment))
    }

    /// Copy `source` to `base/key`, creating intermediate directories
    pub fn store(&self, key: &str, source: &Path) -> Result<PathBuf, StoreError> {
        let output_path = self.path_for(key);

        let mut input = fs::File::open(source).map_err(|e| {
            error!("Unable to open {}: {}", source.display(), e);
            StoreError::Open {
                path: source.to_path_buf(),
                source: e,
            }
        })?;

        if let Some(dir) = output_path.parent() {
            debug!("Creating output directory {}", dir.display());
            fs::create_dir_all(dir).map_err(|e| {
                error!("Unable to create directory {}: {}", dir.display(), e);
                StoreError::CreateDir {
                    path: dir.to_path_buf(),
                    source: e,
                }
            })?;
        }

        let write_error = |e: io::Error| {
            error!("Unable to write {}: {}", output_path.display(), e);
            StoreError::Write {
                path: output_path.clone(),
                source: e,
            }
        };

        let mut output = fs::File::create(&output_path).map_err(write_error)?;
        let bytes = io::copy(&mut input, &mut output).map_err(write_error)?;

        info!("Stored {} ({} bytes)", output_path.display(), bytes);
        Ok(output_path)
    }

    /// Store every file below `root` under `prefix/<relative path>`
    pub fn store_tree(&self, prefix: &str, root: &Path) -> Result<Vec<PathBuf>, StoreError> {
        let files = files_under(root).map_err(|e| StoreError::Open {
            path: root.to_path_buf(),
            source: e,
        })?;

        let mut stored = Vec::with_capacity(files.len());
        for relative in files {
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            stored.push(self.store(&format!("{}/{}", prefix, key), &root.join(&relative))?);
        }
        Ok(stored)
    }
}

/// Every regular file below `root`, relative to it and sorted
pub(crate) fn files_under(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if let Ok(relative) = path.strip_prefix(root) {
                files.push(relative.to_path_buf());
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_creates_intermediate_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("artifact.tar");
        fs::write(&source, b"payload").unwrap();

        let store = LocalStore::new(dir.path().join("store"));
        let stored = store
            .store("project-artifacts/app/build/run1/artifact.tar", &source)
            .unwrap();

        assert_eq!(
            stored,
            dir.path()
                .join("store/project-artifacts/app/build/run1/artifact.tar")
        );
        assert_eq!(fs::read(&stored).unwrap(), b"payload");
    }

    #[test]
    fn test_store_tree_keeps_layout() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("output");
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::write(root.join("a.txt"), b"a").unwrap();
        fs::write(root.join("nested/b.txt"), b"b").unwrap();

        let store = LocalStore::new(dir.path().join("store"));
        let stored = store.store_tree("artifacts/run1", &root).unwrap();

        assert_eq!(stored.len(), 2);
        assert_eq!(
            fs::read(dir.path().join("store/artifacts/run1/nested/b.txt")).unwrap(),
            b"b"
        );
    }

    #[test]
    fn test_files_under_is_relative_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("b/c")).unwrap();
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        fs::write(dir.path().join("z.txt"), b"").unwrap();
        fs::write(dir.path().join("b/c/d.txt"), b"").unwrap();
        fs::write(dir.path().join("a.txt"), b"").unwrap();

        let files = files_under(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("a.txt"),
                PathBuf::from("b/c/d.txt"),
                PathBuf::from("z.txt"),
            ]
        );
    }

    #[test]
    fn test_store_tree_of_missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("store"));
        let result = store.store_tree("artifacts", &dir.path().join("missing"));
        assert!(matches!(result, Err(StoreError::Open { .. })));
    }

    #[test]
    fn test_store_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let result = store.store("key", &dir.path().join("missing"));
        assert!(matches!(result, Err(StoreError::Open { .. })));
    }
}
