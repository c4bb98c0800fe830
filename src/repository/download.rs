// src/repository/download.rs

//! Package download with streaming verification
//!
//! Bytes are written to `<file>.part` while being hashed. The partial file
//! is promoted to its final name only after size and checksum agree with the
//! record, so a final-named file in the mirror is always complete. Any
//! failure discards the partial.

use std::io::{Read, Write};
use tracing::debug;

use super::client::Upstream;
use super::metadata::PackageRecord;
use super::store::PackageStore;
use crate::error::{Error, Result};
use crate::hash::{Checksum, HashAlgorithm, Hasher};
use crate::progress::Reporter;

/// Default read size for package streams
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Download one package into `store`, verifying it on the way
///
/// Returns the number of bytes written.
pub fn download_package(
    upstream: &dyn Upstream,
    platform: &str,
    file_name: &str,
    record: &PackageRecord,
    store: &dyn PackageStore,
    chunk_size: usize,
    reporter: &dyn Reporter,
) -> Result<u64> {
    let result = fetch_to_partial(upstream, platform, file_name, record, store, chunk_size, reporter)
        .and_then(|written| {
            store.commit_partial(file_name)?;
            Ok(written)
        });

    match &result {
        Ok(written) => {
            debug!("Downloaded {} ({} bytes)", file_name, written);
            reporter.on_finish(file_name, None);
        }
        Err(e) => {
            store.discard_partial(file_name);
            reporter.on_finish(file_name, Some(&e.to_string()));
        }
    }

    result
}

fn fetch_to_partial(
    upstream: &dyn Upstream,
    platform: &str,
    file_name: &str,
    record: &PackageRecord,
    store: &dyn PackageStore,
    chunk_size: usize,
    reporter: &dyn Reporter,
) -> Result<u64> {
    let checksum = Checksum::from_record(record);
    let mut hasher = Hasher::new(
        checksum
            .as_ref()
            .map(|c| c.algorithm)
            .unwrap_or(HashAlgorithm::Sha256),
    );

    let mut source = upstream.open_package(platform, file_name, record)?;
    let mut dest = store.create_partial(file_name)?;

    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut written: u64 = 0;
    reporter.on_progress(file_name, 0, record.size);

    loop {
        let n = source
            .read(&mut buffer)
            .map_err(|e| Error::DownloadError(format!("{}: read failed: {}", file_name, e)))?;
        if n == 0 {
            break;
        }
        dest.write_all(&buffer[..n])
            .map_err(|e| Error::IoError(format!("{}: write failed: {}", file_name, e)))?;
        hasher.update(&buffer[..n]);
        written += n as u64;
        reporter.on_progress(file_name, written, record.size);
    }

    dest.flush()
        .map_err(|e| Error::IoError(format!("{}: flush failed: {}", file_name, e)))?;
    drop(dest);

    if written != record.size {
        return Err(Error::SizeMismatch {
            expected: record.size,
            actual: written,
        });
    }

    if let Some(checksum) = checksum {
        let actual = hasher.finalize();
        if actual != checksum.value {
            return Err(Error::ChecksumMismatch {
                expected: checksum.value,
                actual,
            });
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use crate::progress::{CallbackReporter, ReportEvent};
    use crate::repository::metadata::RepoIndex;
    use crate::repository::store::memory::MemoryStore;
    use serde_json::json;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    struct OneFile {
        served: Vec<u8>,
    }

    impl Upstream for OneFile {
        fn channel(&self) -> &str {
            "test"
        }

        fn fetch_index(&self, _platform: &str) -> Result<RepoIndex> {
            Ok(RepoIndex::default())
        }

        fn open_package(
            &self,
            _platform: &str,
            _file_name: &str,
            _record: &PackageRecord,
        ) -> Result<Box<dyn Read + Send>> {
            Ok(Box::new(Cursor::new(self.served.clone())))
        }
    }

    fn record_for(content: &[u8]) -> PackageRecord {
        serde_json::from_value(json!({
            "name": "a", "version": "1.0", "size": content.len(),
            "sha256": hash_bytes(HashAlgorithm::Sha256, content),
        }))
        .unwrap()
    }

    #[test]
    fn test_download_commits_verified_file() {
        let content = b"This is a package that spans several chunks".to_vec();
        let upstream = OneFile { served: content.clone() };
        let store = MemoryStore::default();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let reporter = CallbackReporter::new(move |e| sink.lock().unwrap().push(e));

        let written = download_package(
            &upstream,
            "linux-64",
            "a-1.0-0.tar.bz2",
            &record_for(&content),
            &store,
            8,
            &reporter,
        )
        .unwrap();

        assert_eq!(written, content.len() as u64);
        assert_eq!(store.names(), vec!["a-1.0-0.tar.bz2"]);

        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            ReportEvent::Progress { bytes_so_far, .. } if *bytes_so_far == content.len() as u64
        )));
        assert!(matches!(
            events.last(),
            Some(ReportEvent::Finished { error: None, .. })
        ));
    }

    #[test]
    fn test_truncated_stream_is_discarded() {
        let content = b"This is a package".to_vec();
        let upstream = OneFile { served: content[..5].to_vec() };
        let store = MemoryStore::default();
        let reporter = crate::progress::SilentReporter::new();

        let err = download_package(
            &upstream,
            "linux-64",
            "a-1.0-0.tar.bz2",
            &record_for(&content),
            &store,
            DEFAULT_CHUNK_SIZE,
            &reporter,
        )
        .unwrap_err();

        assert!(matches!(err, Error::SizeMismatch { actual: 5, .. }));
        assert!(store.names().is_empty());
        assert!(store.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_stream_is_discarded() {
        let content = b"This is a package".to_vec();
        let upstream = OneFile { served: b"This is a pAckage".to_vec() };
        let store = MemoryStore::default();
        let reporter = crate::progress::SilentReporter::new();

        let err = download_package(
            &upstream,
            "linux-64",
            "a-1.0-0.tar.bz2",
            &record_for(&content),
            &store,
            DEFAULT_CHUNK_SIZE,
            &reporter,
        )
        .unwrap_err();

        assert!(matches!(err, Error::ChecksumMismatch { .. }));
        assert!(err.is_package_scoped());
        assert!(store.names().is_empty());
    }
}
