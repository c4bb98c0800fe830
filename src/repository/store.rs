// src/repository/store.rs

//! Local package storage
//!
//! The mirror keeps no database: a platform directory's contents are its
//! state. All disk access by the engine goes through [`PackageStore`], and
//! decisions are made over a [`LocalSnapshot`] taken once per phase.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::hash::{self, HashAlgorithm};

/// Plain repodata file name
pub const REPODATA_JSON: &str = "repodata.json";
/// Compressed repodata file name
pub const REPODATA_JSON_BZ2: &str = "repodata.json.bz2";

/// Suffix for in-flight downloads
pub const PARTIAL_SUFFIX: &str = ".part";

/// Files in a platform directory that are metadata, not packages
const METADATA_FILES: [&str; 2] = [REPODATA_JSON, REPODATA_JSON_BZ2];

/// Whether a directory entry is mirror metadata rather than a package
pub fn is_metadata_file(file_name: &str) -> bool {
    METADATA_FILES.contains(&file_name)
}

/// Whether an upstream file name is safe to store in a platform directory
///
/// Only a single plain path component that is neither mirror metadata nor
/// an in-flight download is accepted.
pub fn is_package_file_name(file_name: &str) -> bool {
    !file_name.is_empty()
        && !file_name.starts_with('.')
        && !file_name.contains(['/', '\\', '\0'])
        && !file_name.ends_with(PARTIAL_SUFFIX)
        && !is_metadata_file(file_name)
        && Path::new(file_name).components().count() == 1
}

/// Name of the partial file used while downloading `file_name`
pub fn partial_name(file_name: &str) -> String {
    format!("{}{}", file_name, PARTIAL_SUFFIX)
}

/// Point-in-time listing of package files and their sizes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalSnapshot {
    files: BTreeMap<String, u64>,
}

impl LocalSnapshot {
    pub fn new<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        Self {
            files: files.into_iter().map(|(name, size)| (name.into(), size)).collect(),
        }
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.files.contains_key(file_name)
    }

    /// On-disk size of a file, if present
    pub fn size(&self, file_name: &str) -> Option<u64> {
        self.files.get(file_name).copied()
    }

    pub fn file_names(&self) -> impl Iterator<Item = &String> {
        self.files.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, u64)> {
        self.files.iter().map(|(name, size)| (name, *size))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Storage capability for one platform directory
pub trait PackageStore: Send + Sync {
    /// List package files (metadata files excluded)
    fn snapshot(&self) -> Result<LocalSnapshot>;

    /// Delete a package file; deleting a missing file is not an error
    fn remove(&self, file_name: &str) -> Result<()>;

    /// Hash a package file's content
    fn hash(&self, file_name: &str, algorithm: HashAlgorithm) -> Result<String>;

    /// Open the partial file for a download, truncating any previous one
    fn create_partial(&self, file_name: &str) -> Result<Box<dyn Write + Send>>;

    /// Atomically move a completed partial file into place
    fn commit_partial(&self, file_name: &str) -> Result<()>;

    /// Remove a partial file left by a failed download
    fn discard_partial(&self, file_name: &str);

    /// Read a metadata file, `None` when absent
    fn read_metadata(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Atomically replace a metadata file
    fn write_metadata(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Human-readable location for log messages
    fn location(&self) -> String;
}

/// A platform directory on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalDir {
    root: PathBuf,
}

impl LocalDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open a platform directory, creating it if needed
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let dir = Self::new(root);
        if !dir.root.exists() {
            debug!("Making directory: {}", dir.root.display());
        }
        fs::create_dir_all(&dir.root).map_err(|e| {
            Error::IoError(format!("Failed to create directory {}: {e}", dir.root.display()))
        })?;
        Ok(dir)
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }
}

impl PackageStore for LocalDir {
    fn snapshot(&self) -> Result<LocalSnapshot> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            // Not created yet: nothing mirrored
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LocalSnapshot::default()),
            Err(e) => {
                return Err(Error::IoError(format!(
                    "Failed to list {}: {e}",
                    self.root.display()
                )));
            }
        };

        let mut files = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                Error::IoError(format!("Failed to list {}: {e}", self.root.display()))
            })?;
            let metadata = entry.metadata().map_err(|e| {
                Error::IoError(format!("Failed to stat {}: {e}", entry.path().display()))
            })?;
            if !metadata.is_file() {
                continue;
            }

            let Ok(file_name) = entry.file_name().into_string() else {
                warn!("Skipping non-UTF-8 file name in {}", self.root.display());
                continue;
            };
            if is_metadata_file(&file_name) {
                continue;
            }
            files.insert(file_name, metadata.len());
        }

        Ok(LocalSnapshot { files })
    }

    fn remove(&self, file_name: &str) -> Result<()> {
        match fs::remove_file(self.path(file_name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::IoError(format!("Failed to remove {}: {e}", file_name))),
        }
    }

    fn hash(&self, file_name: &str, algorithm: HashAlgorithm) -> Result<String> {
        hash::hash_file(&self.path(file_name), algorithm)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {e}", file_name)))
    }

    fn create_partial(&self, file_name: &str) -> Result<Box<dyn Write + Send>> {
        let path = self.path(&partial_name(file_name));
        let file = File::create(&path).map_err(|e| {
            Error::IoError(format!("Failed to create file {}: {e}", path.display()))
        })?;
        Ok(Box::new(file))
    }

    fn commit_partial(&self, file_name: &str) -> Result<()> {
        let temp_path = self.path(&partial_name(file_name));
        let dest_path = self.path(file_name);
        fs::rename(&temp_path, &dest_path).map_err(|e| {
            Error::IoError(format!(
                "Failed to move {} to {}: {e}",
                temp_path.display(),
                dest_path.display()
            ))
        })
    }

    fn discard_partial(&self, file_name: &str) {
        let _ = fs::remove_file(self.path(&partial_name(file_name)));
    }

    fn read_metadata(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path(name)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::IoError(format!("Failed to read {}: {e}", name))),
        }
    }

    fn write_metadata(&self, name: &str, data: &[u8]) -> Result<()> {
        let temp_path = self.path(&format!(".{}.tmp", name));
        let dest_path = self.path(name);

        let mut file = File::create(&temp_path).map_err(|e| {
            Error::IoError(format!("Failed to create file {}: {e}", temp_path.display()))
        })?;
        file.write_all(data)
            .and_then(|()| file.sync_all())
            .map_err(|e| Error::IoError(format!("Failed to write {}: {e}", temp_path.display())))?;

        fs::rename(&temp_path, &dest_path).map_err(|e| {
            Error::IoError(format!(
                "Failed to move {} to {}: {e}",
                temp_path.display(),
                dest_path.display()
            ))
        })
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_skips_metadata_and_directories() {
        let temp = tempfile::tempdir().unwrap();
        let dir = LocalDir::create(temp.path().join("linux-64")).unwrap();

        fs::write(dir.path("a-1-0.tar.bz2"), b"12345").unwrap();
        fs::write(dir.path(REPODATA_JSON), b"{}").unwrap();
        fs::write(dir.path(REPODATA_JSON_BZ2), b"BZh9").unwrap();
        fs::create_dir(dir.path("nested")).unwrap();

        let snapshot = dir.snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.size("a-1-0.tar.bz2"), Some(5));
        assert!(!snapshot.contains(REPODATA_JSON));
    }

    #[test]
    fn test_partial_commit_and_discard() {
        let temp = tempfile::tempdir().unwrap();
        let dir = LocalDir::create(temp.path()).unwrap();

        let mut writer = dir.create_partial("a-1-0.tar.bz2").unwrap();
        writer.write_all(b"payload").unwrap();
        drop(writer);
        assert!(dir.path("a-1-0.tar.bz2.part").exists());

        dir.commit_partial("a-1-0.tar.bz2").unwrap();
        assert_eq!(fs::read(dir.path("a-1-0.tar.bz2")).unwrap(), b"payload");
        assert!(!dir.path("a-1-0.tar.bz2.part").exists());

        let writer = dir.create_partial("b-1-0.tar.bz2").unwrap();
        drop(writer);
        dir.discard_partial("b-1-0.tar.bz2");
        assert!(!dir.path("b-1-0.tar.bz2.part").exists());
        assert_eq!(dir.snapshot().unwrap().len(), 1);
    }

    #[test]
    fn test_snapshot_of_missing_directory_is_empty() {
        let temp = tempfile::tempdir().unwrap();
        let dir = LocalDir::new(temp.path().join("osx-64"));
        assert!(dir.snapshot().unwrap().is_empty());
        assert!(!temp.path().join("osx-64").exists());
    }

    #[test]
    fn test_package_file_names() {
        assert!(is_package_file_name("numpy-1.26.4-py312h8753938_0.conda"));
        assert!(is_package_file_name("a-1.0-0.tar.bz2"));

        assert!(!is_package_file_name(""));
        assert!(!is_package_file_name(".."));
        assert!(!is_package_file_name(".hidden.tar.bz2"));
        assert!(!is_package_file_name("../../escaped.tar.bz2"));
        assert!(!is_package_file_name("sub/a-1.0-0.tar.bz2"));
        assert!(!is_package_file_name("/tmp/a-1.0-0.tar.bz2"));
        assert!(!is_package_file_name("..\\a-1.0-0.tar.bz2"));
        assert!(!is_package_file_name(REPODATA_JSON));
        assert!(!is_package_file_name(REPODATA_JSON_BZ2));
        assert!(!is_package_file_name("a-1.0-0.tar.bz2.part"));
    }

    #[test]
    fn test_remove_missing_file_is_ok() {
        let temp = tempfile::tempdir().unwrap();
        let dir = LocalDir::create(temp.path()).unwrap();
        dir.remove("never-existed.tar.bz2").unwrap();
    }

    #[test]
    fn test_metadata_roundtrip() {
        let temp = tempfile::tempdir().unwrap();
        let dir = LocalDir::create(temp.path()).unwrap();

        assert!(dir.read_metadata(REPODATA_JSON).unwrap().is_none());
        dir.write_metadata(REPODATA_JSON, b"{\"packages\": {}}").unwrap();
        assert_eq!(
            dir.read_metadata(REPODATA_JSON).unwrap().unwrap(),
            b"{\"packages\": {}}"
        );
        assert!(!dir.path(".repodata.json.tmp").exists());
    }

    #[test]
    fn test_hash_file() {
        let temp = tempfile::tempdir().unwrap();
        let dir = LocalDir::create(temp.path()).unwrap();
        fs::write(dir.path("a.tar.bz2"), b"hello world").unwrap();
        assert_eq!(
            dir.hash("a.tar.bz2", HashAlgorithm::Md5).unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
        assert!(dir.hash("missing.tar.bz2", HashAlgorithm::Md5).is_err());
    }
}
