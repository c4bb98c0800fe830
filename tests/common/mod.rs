// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use conda_mirror::hash::hash_bytes;
use conda_mirror::{Error, HashAlgorithm, PackageRecord, RepoIndex, Result, Upstream};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;

/// In-memory channel serving one platform's repodata and package bytes
pub struct FakeChannel {
    index: RepoIndex,
    content: HashMap<String, Vec<u8>>,
    failing: BTreeSet<String>,
    fetch_fails: bool,
    requests: Mutex<Vec<String>>,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self {
            index: serde_json::from_value(json!({
                "info": {"subdir": "linux-64", "arch": "x86_64"},
                "packages": {}
            }))
            .unwrap(),
            content: HashMap::new(),
            failing: BTreeSet::new(),
            fetch_fails: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Add a package named `name` whose file holds `size` filler bytes
    pub fn with_package(self, name: &str, size: usize) -> Self {
        let file_name = format!("{}-1.0-0.tar.bz2", name);
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        self.with_file(&file_name, name, data)
    }

    /// Add a package served under an arbitrary repodata key
    pub fn with_file(mut self, file_name: &str, name: &str, data: Vec<u8>) -> Self {
        let record: PackageRecord = serde_json::from_value(json!({
            "name": name,
            "version": "1.0",
            "build": "0",
            "build_number": 0,
            "depends": [],
            "license": "BSD",
            "size": data.len(),
            "md5": hash_bytes(HashAlgorithm::Md5, &data),
            "sha256": hash_bytes(HashAlgorithm::Sha256, &data),
            "subdir": "linux-64",
        }))
        .unwrap();
        self.index.packages.insert(file_name.to_string(), record);
        self.content.insert(file_name.to_string(), data);
        self
    }

    /// Make downloads of `file_name` fail with an HTTP error
    pub fn failing(mut self, file_name: &str) -> Self {
        self.failing.insert(file_name.to_string());
        self
    }

    /// Make every repodata fetch fail
    pub fn unreachable(mut self) -> Self {
        self.fetch_fails = true;
        self
    }

    pub fn index(&self) -> &RepoIndex {
        &self.index
    }

    pub fn content(&self, file_name: &str) -> &[u8] {
        &self.content[file_name]
    }

    /// File names requested through `open_package`, in order
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Upstream for FakeChannel {
    fn channel(&self) -> &str {
        "fake-channel"
    }

    fn fetch_index(&self, platform: &str) -> Result<RepoIndex> {
        if self.fetch_fails {
            return Err(Error::FetchError(format!("HTTP 503 for {}", platform)));
        }
        Ok(self.index.clone())
    }

    fn open_package(
        &self,
        _platform: &str,
        file_name: &str,
        _record: &PackageRecord,
    ) -> Result<Box<dyn Read + Send>> {
        self.requests.lock().unwrap().push(file_name.to_string());
        if self.failing.contains(file_name) {
            return Err(Error::DownloadError(format!("HTTP 500 for {}", file_name)));
        }
        let data = self
            .content
            .get(file_name)
            .ok_or_else(|| Error::DownloadError(format!("HTTP 404 for {}", file_name)))?;
        Ok(Box::new(Cursor::new(data.clone())))
    }
}

/// Create a temporary mirror with an empty platform directory
///
/// Returns (TempDir, platform_dir) - keep the TempDir alive to prevent cleanup.
pub fn setup_platform_dir(platform: &str) -> (TempDir, std::path::PathBuf) {
    let temp_dir = tempfile::tempdir().unwrap();
    let dir = temp_dir.path().join(platform);
    std::fs::create_dir_all(&dir).unwrap();
    (temp_dir, dir)
}

/// Sorted names of the regular files in `dir`
pub fn list_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    names
}

/// Package file names listed in the directory's repodata.json
pub fn indexed_packages(dir: &Path) -> Vec<String> {
    let data = std::fs::read(dir.join("repodata.json")).unwrap();
    RepoIndex::from_slice(&data)
        .unwrap()
        .packages
        .keys()
        .cloned()
        .collect()
}
