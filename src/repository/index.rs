// src/repository/index.rs

//! Local repodata index
//!
//! After a pass, the mirror's `repodata.json` lists exactly the desired
//! packages that are present and verified, with the upstream `info` section
//! carried over. A bzip2 copy is written next to it.

use tracing::{debug, warn};

use super::metadata::{PackageMap, RepoIndex};
use super::store::{PackageStore, REPODATA_JSON, REPODATA_JSON_BZ2};
use crate::compression::{self, CompressionFormat};
use crate::error::{Error, Result};

/// Load the mirror's current index
///
/// Falls back to the bzip2 copy when the plain file is missing. A missing or
/// unparseable index is treated as empty, so a damaged mirror heals on the
/// next pass instead of failing it.
pub fn load_local_index(store: &dyn PackageStore) -> RepoIndex {
    match try_load(store) {
        Ok(Some(index)) => index,
        Ok(None) => {
            debug!("No local index in {}", store.location());
            RepoIndex::default()
        }
        Err(e) => {
            warn!("Ignoring unreadable local index in {}: {}", store.location(), e);
            RepoIndex::default()
        }
    }
}

fn try_load(store: &dyn PackageStore) -> Result<Option<RepoIndex>> {
    if let Some(data) = store.read_metadata(REPODATA_JSON)? {
        return parse(&data).map(Some);
    }

    if let Some(data) = store.read_metadata(REPODATA_JSON_BZ2)? {
        let plain = compression::decompress(&data, CompressionFormat::Bzip2)
            .map_err(|e| Error::ParseError(e.to_string()))?;
        return parse(&plain).map(Some);
    }

    Ok(None)
}

fn parse(data: &[u8]) -> Result<RepoIndex> {
    RepoIndex::from_slice(data).map_err(|e| Error::ParseError(format!("repodata.json: {e}")))
}

/// Build the index to publish: upstream records for `present` file names
///
/// `present` must only name files that exist locally and passed
/// verification; names without an upstream record are skipped.
pub fn build_index<'a, I>(upstream: &RepoIndex, present: I) -> RepoIndex
where
    I: IntoIterator<Item = &'a String>,
{
    let packages: PackageMap = present
        .into_iter()
        .filter_map(|file_name| {
            upstream
                .packages
                .get(file_name)
                .map(|record| (file_name.clone(), record.clone()))
        })
        .collect();

    RepoIndex::new(upstream.info.clone(), packages)
}

/// Persist `index` as repodata.json and repodata.json.bz2
///
/// Each file is replaced atomically by the store. The bzip2 copy goes first
/// so a failed write never leaves a new repodata.json beside a stale
/// compressed one.
pub fn write_index(store: &dyn PackageStore, index: &RepoIndex) -> Result<()> {
    let json = serde_json::to_vec_pretty(index)
        .map_err(|e| Error::ParseError(format!("Failed to serialize repodata: {e}")))?;
    let compressed = compression::compress(&json, CompressionFormat::Bzip2)
        .map_err(|e| Error::IoError(e.to_string()))?;

    store.write_metadata(REPODATA_JSON_BZ2, &compressed)?;
    store.write_metadata(REPODATA_JSON, &json)?;

    debug!(
        "Wrote index with {} packages to {}",
        index.packages.len(),
        store.location()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::store::memory::MemoryStore;
    use serde_json::json;

    fn upstream() -> RepoIndex {
        serde_json::from_value(json!({
            "info": {"subdir": "linux-64"},
            "packages": {
                "a-1.0-0.tar.bz2": {"name": "a", "version": "1.0", "size": 3},
                "b-1.0-0.tar.bz2": {"name": "b", "version": "1.0", "size": 4},
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_build_index_keeps_only_present() {
        let present = ["a-1.0-0.tar.bz2".to_string(), "stray.tar.bz2".to_string()];
        let index = build_index(&upstream(), &present);
        assert_eq!(index.packages.len(), 1);
        assert!(index.packages.contains_key("a-1.0-0.tar.bz2"));
        assert_eq!(index.info, upstream().info);
    }

    #[test]
    fn test_write_then_load() {
        let store = MemoryStore::default();
        write_index(&store, &upstream()).unwrap();

        let loaded = load_local_index(&store);
        assert_eq!(loaded, upstream());

        let bz2 = store.read_metadata(REPODATA_JSON_BZ2).unwrap().unwrap();
        let plain = compression::decompress(&bz2, CompressionFormat::Bzip2).unwrap();
        assert_eq!(RepoIndex::from_slice(&plain).unwrap().packages.len(), 2);
    }

    #[test]
    fn test_failed_bz2_write_keeps_previous_json() {
        let store = MemoryStore::default();
        store.write_metadata(REPODATA_JSON, b"{\"packages\": {}}").unwrap();
        store
            .read_only_metadata
            .lock()
            .unwrap()
            .push(REPODATA_JSON_BZ2.to_string());

        let err = write_index(&store, &upstream()).unwrap_err();
        assert!(matches!(err, Error::IoError(_)));
        assert_eq!(
            store.read_metadata(REPODATA_JSON).unwrap().unwrap(),
            b"{\"packages\": {}}"
        );
        assert!(load_local_index(&store).packages.is_empty());
    }

    #[test]
    fn test_load_falls_back_to_bz2() {
        let store = MemoryStore::default();
        let json = serde_json::to_vec(&upstream()).unwrap();
        let bz2 = compression::compress(&json, CompressionFormat::Bzip2).unwrap();
        store.write_metadata(REPODATA_JSON_BZ2, &bz2).unwrap();

        assert_eq!(load_local_index(&store).packages.len(), 2);
    }

    #[test]
    fn test_corrupt_index_is_empty() {
        let store = MemoryStore::default();
        store.write_metadata(REPODATA_JSON, b"{not json").unwrap();
        assert!(load_local_index(&store).packages.is_empty());
    }

    #[test]
    fn test_missing_index_is_empty() {
        let store = MemoryStore::default();
        assert_eq!(load_local_index(&store), RepoIndex::default());
    }
}
