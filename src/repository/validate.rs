// src/repository/validate.rs

//! Local package validation
//!
//! [`validate`] classifies the files in a snapshot against repodata and
//! reports the bad ones; it never deletes. Deletion is the reconciler's job,
//! except for [`remove_blacklisted`] which removes blacklisted files
//! regardless of what metadata says about them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::metadata::{PackageMap, PackageRecord};
use super::store::{LocalSnapshot, PackageStore};
use crate::hash::{Checksum, HashAlgorithm};

/// How thoroughly local files are checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyMode {
    /// Size, plus sha256/md5 content hash when the record declares one
    #[default]
    Checksum,
    /// Size only; cannot detect same-size corruption
    Size,
}

impl FromStr for VerifyMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "checksum" => Ok(Self::Checksum),
            "size" => Ok(Self::Size),
            _ => Err(format!("unknown verify mode '{}' (expected checksum or size)", s)),
        }
    }
}

impl fmt::Display for VerifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Checksum => write!(f, "checksum"),
            Self::Size => write!(f, "size"),
        }
    }
}

/// Why a local file failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationMismatch {
    /// No metadata record for this file name
    Orphan,
    SizeMismatch { expected: u64, actual: u64 },
    ChecksumMismatch {
        algorithm: HashAlgorithm,
        expected: String,
        actual: String,
    },
    /// The file could not be read for hashing
    Unreadable(String),
}

impl fmt::Display for ValidationMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Orphan => write!(f, "not in upstream repodata"),
            Self::SizeMismatch { expected, actual } => {
                write!(f, "size mismatch: expected {} bytes, found {}", expected, actual)
            }
            Self::ChecksumMismatch {
                algorithm,
                expected,
                actual,
            } => write!(f, "{} mismatch: expected {}, found {}", algorithm, expected, actual),
            Self::Unreadable(msg) => write!(f, "unreadable: {}", msg),
        }
    }
}

/// Check one present file against its record
pub fn check_file(
    file_name: &str,
    actual_size: u64,
    record: &PackageRecord,
    store: &dyn PackageStore,
    mode: VerifyMode,
) -> Option<ValidationMismatch> {
    // A size mismatch settles it without reading the file
    if actual_size != record.size {
        return Some(ValidationMismatch::SizeMismatch {
            expected: record.size,
            actual: actual_size,
        });
    }

    if mode == VerifyMode::Size {
        return None;
    }

    let checksum = Checksum::from_record(record)?;
    match store.hash(file_name, checksum.algorithm) {
        Ok(actual) if actual == checksum.value => None,
        Ok(actual) => Some(ValidationMismatch::ChecksumMismatch {
            algorithm: checksum.algorithm,
            expected: checksum.value,
            actual,
        }),
        Err(e) => Some(ValidationMismatch::Unreadable(e.to_string())),
    }
}

/// Report invalid files in `snapshot` against `packages`
///
/// `packages` is the reference metadata: every snapshot file without a
/// record is an orphan.
pub fn validate(
    packages: &PackageMap,
    snapshot: &LocalSnapshot,
    store: &dyn PackageStore,
    mode: VerifyMode,
) -> BTreeMap<String, ValidationMismatch> {
    let mut invalid = BTreeMap::new();

    for (file_name, actual_size) in snapshot.iter() {
        let mismatch = match packages.get(file_name) {
            None => Some(ValidationMismatch::Orphan),
            Some(record) => check_file(file_name, actual_size, record, store, mode),
        };

        match mismatch {
            Some(mismatch) => {
                debug!("{} is invalid: {}", file_name, mismatch);
                invalid.insert(file_name.clone(), mismatch);
            }
            None => debug!("{} is valid", file_name),
        }
    }

    invalid
}

/// Delete every local file whose name is blacklisted
///
/// Returns the names actually removed. Failures are logged and skipped.
pub fn remove_blacklisted(
    blacklisted: &BTreeSet<String>,
    snapshot: &LocalSnapshot,
    store: &dyn PackageStore,
) -> Vec<String> {
    let mut removed = Vec::new();

    for file_name in snapshot.file_names().filter(|f| blacklisted.contains(*f)) {
        match store.remove(file_name) {
            Ok(()) => {
                info!("Removed blacklisted package {}", file_name);
                removed.push(file_name.clone());
            }
            Err(e) => warn!("Failed to remove blacklisted package {}: {}", file_name, e),
        }
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use crate::repository::store::memory::MemoryStore;
    use serde_json::json;

    fn packages(content: &[u8]) -> PackageMap {
        let raw = json!({
            "good-1.0-0.tar.bz2": {
                "name": "good", "version": "1.0", "size": content.len(),
                "md5": hash_bytes(HashAlgorithm::Md5, content),
            },
            "sizeonly-1.0-0.tar.bz2": {"name": "sizeonly", "version": "1.0", "size": 4},
        });
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_valid_files_are_not_reported() {
        let content = b"This is a package".to_vec();
        let store = MemoryStore::with_files([
            ("good-1.0-0.tar.bz2", content.clone()),
            ("sizeonly-1.0-0.tar.bz2", b"abcd".to_vec()),
        ]);
        let snapshot = store.snapshot().unwrap();

        let invalid = validate(&packages(&content), &snapshot, &store, VerifyMode::Checksum);
        assert!(invalid.is_empty());
    }

    #[test]
    fn test_orphan_is_reported() {
        let content = b"This is a package".to_vec();
        let store = MemoryStore::with_files([("bad-1-0.tar.bz2", b"This is a fake package".to_vec())]);
        let snapshot = store.snapshot().unwrap();

        let invalid = validate(&packages(&content), &snapshot, &store, VerifyMode::Checksum);
        assert_eq!(invalid.get("bad-1-0.tar.bz2"), Some(&ValidationMismatch::Orphan));
        // Reporting never deletes
        assert_eq!(store.names(), vec!["bad-1-0.tar.bz2"]);
    }

    #[test]
    fn test_size_mismatch_is_reported() {
        let content = b"This is a package".to_vec();
        let store = MemoryStore::with_files([("good-1.0-0.tar.bz2", b"short".to_vec())]);
        let snapshot = store.snapshot().unwrap();

        let invalid = validate(&packages(&content), &snapshot, &store, VerifyMode::Size);
        assert_eq!(
            invalid.get("good-1.0-0.tar.bz2"),
            Some(&ValidationMismatch::SizeMismatch {
                expected: content.len() as u64,
                actual: 5
            })
        );
    }

    #[test]
    fn test_checksum_mismatch_with_matching_size() {
        let content = b"This is a package".to_vec();
        let corrupt = b"This is a pAckage".to_vec();
        let store = MemoryStore::with_files([("good-1.0-0.tar.bz2", corrupt)]);
        let snapshot = store.snapshot().unwrap();

        let invalid = validate(&packages(&content), &snapshot, &store, VerifyMode::Checksum);
        assert!(matches!(
            invalid.get("good-1.0-0.tar.bz2"),
            Some(ValidationMismatch::ChecksumMismatch { algorithm: HashAlgorithm::Md5, .. })
        ));

        // Size-only mode cannot see same-size corruption
        let invalid = validate(&packages(&content), &snapshot, &store, VerifyMode::Size);
        assert!(invalid.is_empty());
    }

    #[test]
    fn test_remove_blacklisted_only_touches_blacklisted() {
        let store = MemoryStore::with_files([
            ("remove-1-0.tar.bz2", b"This is a blacklisted package".to_vec()),
            ("keep-1-0.tar.bz2", b"This is not a blacklisted package".to_vec()),
        ]);
        let snapshot = store.snapshot().unwrap();
        let blacklisted: BTreeSet<String> = ["remove-1-0.tar.bz2".to_string()].into();

        let removed = remove_blacklisted(&blacklisted, &snapshot, &store);
        assert_eq!(removed, vec!["remove-1-0.tar.bz2"]);
        assert_eq!(store.names(), vec!["keep-1-0.tar.bz2"]);
    }

    #[test]
    fn test_verify_mode_parse() {
        assert_eq!("Checksum".parse::<VerifyMode>().unwrap(), VerifyMode::Checksum);
        assert_eq!("size".parse::<VerifyMode>().unwrap(), VerifyMode::Size);
        assert!("md5".parse::<VerifyMode>().is_err());
    }
}
