// src/repository/metadata.rs

//! Repodata data structures
//!
//! Mirrors the `repodata.json` document served by conda channels. Only the
//! fields the mirror reasons about are typed; every other record attribute is
//! kept in `extra` so a rewritten local index preserves it untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Package records keyed by file name (e.g. `twisted-16.0.0-py35_0.tar.bz2`)
pub type PackageMap = BTreeMap<String, PackageRecord>;

/// A platform's repodata.json document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoIndex {
    /// Channel-level metadata, carried through opaquely
    #[serde(default)]
    pub info: Map<String, Value>,
    #[serde(default)]
    pub packages: PackageMap,
}

impl RepoIndex {
    pub fn new(info: Map<String, Value>, packages: PackageMap) -> Self {
        Self { info, packages }
    }

    /// Parse a repodata.json body
    pub fn from_slice(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}

/// One distributable artifact described by repodata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    /// Platform subdirectory the record was published under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,
    /// Declared artifact size in bytes
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Remaining attributes (depends, license, build_number, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PackageRecord {
    /// Look up an attribute by its repodata key, as text
    ///
    /// Strings are returned as-is; numbers and booleans as their JSON text.
    /// Arrays, objects and nulls have no text form and return `None`.
    pub fn attribute(&self, key: &str) -> Option<String> {
        match key {
            "name" => Some(self.name.clone()),
            "version" => Some(self.version.clone()),
            "build" => self.build.clone(),
            "subdir" => self.subdir.clone(),
            "size" => Some(self.size.to_string()),
            "md5" => self.md5.clone(),
            "sha256" => self.sha256.clone(),
            _ => match self.extra.get(key)? {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPODATA: &str = r#"{
        "info": {"subdir": "linux-64", "arch": "x86_64"},
        "packages": {
            "zlib-1.2.11-0.tar.bz2": {
                "name": "zlib",
                "version": "1.2.11",
                "build": "0",
                "build_number": 0,
                "depends": [],
                "license": "zlib",
                "md5": "5eb63bbbe01eeed093cb22bb8f5acdc3",
                "size": 101,
                "subdir": "linux-64"
            },
            "numpy-1.11.0-py35_0.tar.bz2": {
                "name": "numpy",
                "version": "1.11.0",
                "build": "py35_0",
                "size": 6000000
            }
        },
        "repodata_version": 1
    }"#;

    #[test]
    fn test_parse_repodata() {
        let index = RepoIndex::from_slice(REPODATA.as_bytes()).unwrap();
        assert_eq!(index.packages.len(), 2);
        assert_eq!(index.info.get("subdir"), Some(&Value::String("linux-64".to_string())));

        let zlib = &index.packages["zlib-1.2.11-0.tar.bz2"];
        assert_eq!(zlib.name, "zlib");
        assert_eq!(zlib.size, 101);
        assert_eq!(zlib.build.as_deref(), Some("0"));
        assert!(zlib.extra.contains_key("depends"));
    }

    #[test]
    fn test_extra_fields_survive_serialization() {
        let index = RepoIndex::from_slice(REPODATA.as_bytes()).unwrap();
        let json = serde_json::to_string(&index).unwrap();
        let reparsed = RepoIndex::from_slice(json.as_bytes()).unwrap();
        assert_eq!(reparsed, index);
        assert!(json.contains("\"license\":\"zlib\""));
        // Unknown top-level keys are not carried over
        assert!(!json.contains("repodata_version"));
    }

    #[test]
    fn test_missing_sections_default_to_empty() {
        let index = RepoIndex::from_slice(b"{}").unwrap();
        assert!(index.info.is_empty());
        assert!(index.packages.is_empty());
    }

    #[test]
    fn test_attribute_lookup() {
        let index = RepoIndex::from_slice(REPODATA.as_bytes()).unwrap();
        let zlib = &index.packages["zlib-1.2.11-0.tar.bz2"];
        assert_eq!(zlib.attribute("name").as_deref(), Some("zlib"));
        assert_eq!(zlib.attribute("build_number").as_deref(), Some("0"));
        assert_eq!(zlib.attribute("license").as_deref(), Some("zlib"));
        assert_eq!(zlib.attribute("size").as_deref(), Some("101"));
        assert_eq!(zlib.attribute("depends"), None);
        assert_eq!(zlib.attribute("missing"), None);

        let numpy = &index.packages["numpy-1.11.0-py35_0.tar.bz2"];
        assert_eq!(numpy.attribute("subdir"), None);
    }
}
