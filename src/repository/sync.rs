// src/repository/sync.rs

//! Platform reconciliation
//!
//! [`mirror_platform`] brings one platform directory in line with upstream:
//!
//! 1. fetch upstream repodata, skipping entries that are not plain file names
//! 2. load the local index (missing or corrupt counts as empty)
//! 3. compute the desired set from the whitelist and blacklist
//! 4. snapshot the directory and classify every file
//! 5. delete blacklisted, stale, orphaned and invalid files
//! 6. compute the missing set
//! 7. download missing packages, optionally on a worker pool
//! 8. snapshot again and rebuild the index from verified files
//! 9. persist repodata.json and repodata.json.bz2
//!
//! Only the fetch and the index write can fail a platform. Everything
//! scoped to a single file is recorded in the [`PlatformReport`].

use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{Level, debug, info, warn};

use super::client::Upstream;
use super::download::{DEFAULT_CHUNK_SIZE, download_package};
use super::filter::PackageFilters;
use super::index::{build_index, load_local_index, write_index};
use super::metadata::{PackageMap, PackageRecord, RepoIndex};
use super::store::{LocalSnapshot, PackageStore, is_package_file_name};
use super::validate::{ValidationMismatch, VerifyMode, check_file, remove_blacklisted, validate};
use crate::error::{Error, Result};
use crate::progress::Reporter;

/// Per-platform settings for a reconciliation pass
#[derive(Debug, Clone)]
pub struct MirrorOptions {
    pub platform: String,
    pub verify: VerifyMode,
    pub chunk_size: usize,
    /// Download worker count; 1 downloads sequentially
    pub jobs: usize,
    /// Plan only: stop before deleting or downloading
    pub dry_run: bool,
}

impl MirrorOptions {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            verify: VerifyMode::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            jobs: 1,
            dry_run: false,
        }
    }
}

/// Why a local file is scheduled for deletion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalReason {
    /// Matched the blacklist
    Blacklisted,
    /// Known upstream but outside the desired set
    Stale,
    /// Not in upstream repodata at all
    Orphan,
    /// Desired, but the local copy failed verification
    Invalid(ValidationMismatch),
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blacklisted => write!(f, "blacklisted"),
            Self::Stale => write!(f, "no longer desired"),
            Self::Orphan => write!(f, "not in upstream repodata"),
            Self::Invalid(mismatch) => write!(f, "{}", mismatch),
        }
    }
}

/// What a pass intends to do, computed from one snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorPlan {
    /// Desired files not valid on disk
    pub to_download: BTreeSet<String>,
    /// Local files to delete, with the reason
    pub to_delete: BTreeMap<String, RemovalReason>,
    /// Desired files present on disk that were checked
    pub to_validate: BTreeSet<String>,
}

impl MirrorPlan {
    /// Classify `snapshot` against upstream and the desired set
    pub fn compute(
        upstream: &PackageMap,
        desired: &BTreeSet<String>,
        blacklisted: &BTreeSet<String>,
        snapshot: &LocalSnapshot,
        store: &dyn PackageStore,
        verify: VerifyMode,
    ) -> Self {
        let desired_packages: PackageMap = upstream
            .iter()
            .filter(|(file_name, _)| desired.contains(*file_name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let to_validate: BTreeSet<String> = snapshot
            .file_names()
            .filter(|f| desired.contains(*f))
            .cloned()
            .collect();

        let to_delete: BTreeMap<String, RemovalReason> =
            validate(&desired_packages, snapshot, store, verify)
                .into_iter()
                .map(|(file_name, mismatch)| {
                    let reason = if blacklisted.contains(&file_name) {
                        RemovalReason::Blacklisted
                    } else {
                        match mismatch {
                            ValidationMismatch::Orphan if upstream.contains_key(&file_name) => {
                                RemovalReason::Stale
                            }
                            ValidationMismatch::Orphan => RemovalReason::Orphan,
                            other => RemovalReason::Invalid(other),
                        }
                    };
                    (file_name, reason)
                })
                .collect();

        let to_download = desired
            .iter()
            .filter(|f| !snapshot.contains(f) || to_delete.contains_key(*f))
            .cloned()
            .collect();

        Self {
            to_download,
            to_delete,
            to_validate,
        }
    }

    /// Bytes the downloads will transfer, per upstream metadata
    pub fn download_size(&self, upstream: &PackageMap) -> u64 {
        self.to_download
            .iter()
            .filter_map(|f| upstream.get(f))
            .map(|r| r.size)
            .sum()
    }
}

/// Outcome of one platform pass
#[derive(Debug, Clone, Default)]
pub struct PlatformReport {
    pub platform: String,
    /// Records in upstream repodata
    pub upstream_count: usize,
    /// Records in the local index before this pass
    pub previously_indexed: usize,
    pub desired_count: usize,
    /// Upstream entries skipped because their key is not a plain file name
    pub rejected: Vec<String>,
    pub plan: MirrorPlan,
    pub deleted: Vec<(String, RemovalReason)>,
    pub delete_failures: Vec<(String, String)>,
    pub downloaded: Vec<String>,
    pub downloaded_bytes: u64,
    pub failed_downloads: Vec<(String, String)>,
    /// Records in the local index after this pass
    pub indexed: usize,
    pub dry_run: bool,
}

impl PlatformReport {
    /// Whether every desired package ended up mirrored
    pub fn is_complete(&self) -> bool {
        self.failed_downloads.is_empty() && self.delete_failures.is_empty()
    }
}

/// Aggregated outcome of a multi-platform run
#[derive(Debug, Default)]
pub struct MirrorSummary {
    pub reports: Vec<PlatformReport>,
    /// Platforms that could not be mirrored at all
    pub platform_errors: Vec<(String, String)>,
}

impl MirrorSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one `mirror_platform` call
    pub fn record(&mut self, platform: &str, result: Result<PlatformReport>) {
        match result {
            Ok(report) => self.reports.push(report),
            Err(e) => self.platform_errors.push((platform.to_string(), e.to_string())),
        }
    }

    /// True when a platform failed to fetch or persist its index
    pub fn has_fatal_errors(&self) -> bool {
        !self.platform_errors.is_empty()
    }

    pub fn total_downloaded(&self) -> usize {
        self.reports.iter().map(|r| r.downloaded.len()).sum()
    }

    pub fn total_deleted(&self) -> usize {
        self.reports.iter().map(|r| r.deleted.len()).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.reports.iter().map(|r| r.failed_downloads.len()).sum()
    }
}

/// Reconcile one platform directory with upstream
pub fn mirror_platform(
    upstream: &dyn Upstream,
    store: &dyn PackageStore,
    filters: &PackageFilters,
    options: &MirrorOptions,
    reporter: &dyn Reporter,
) -> Result<PlatformReport> {
    let platform = options.platform.as_str();
    if options.chunk_size == 0 || options.jobs == 0 {
        return Err(Error::ConfigError(
            "chunk size and job count must be positive".to_string(),
        ));
    }

    reporter.on_event(
        Level::INFO,
        &format!("Mirroring {}/{} into {}", upstream.channel(), platform, store.location()),
    );

    // 1-3
    let mut remote = upstream.fetch_index(platform)?;
    let upstream_count = remote.packages.len();
    let rejected = drop_unsafe_entries(&mut remote, platform, reporter);
    let local = load_local_index(store);
    let desired = filters.desired(&remote.packages);
    let blacklisted = filters.blacklisted(&remote.packages);
    debug!(
        "{}: {} upstream, {} desired, {} blacklisted, {} previously indexed",
        platform,
        remote.packages.len(),
        desired.len(),
        blacklisted.len(),
        local.packages.len()
    );

    // 4
    let snapshot = store.snapshot()?;
    let plan = MirrorPlan::compute(
        &remote.packages,
        &desired,
        &blacklisted,
        &snapshot,
        store,
        options.verify,
    );

    let mut report = PlatformReport {
        platform: platform.to_string(),
        upstream_count,
        rejected,
        previously_indexed: local.packages.len(),
        desired_count: desired.len(),
        plan: plan.clone(),
        dry_run: options.dry_run,
        ..Default::default()
    };

    if options.dry_run {
        reporter.on_event(
            Level::INFO,
            &format!(
                "{}: would delete {} and download {} packages ({} bytes)",
                platform,
                plan.to_delete.len(),
                plan.to_download.len(),
                plan.download_size(&remote.packages)
            ),
        );
        report.indexed = local.packages.len();
        return Ok(report);
    }

    // 5
    delete_planned(&plan, &blacklisted, &snapshot, store, reporter, &mut report);

    // 6-7
    let results = download_missing(upstream, store, &remote.packages, &plan, options, reporter);
    for (file_name, result) in results {
        match result {
            Ok(bytes) => {
                report.downloaded.push(file_name);
                report.downloaded_bytes += bytes;
            }
            Err(e) => {
                // Local I/O failures likely hit every download, so surface them louder
                let level = if e.is_package_scoped() { Level::WARN } else { Level::ERROR };
                reporter.on_event(level, &format!("Failed to download {}: {}", file_name, e));
                report.failed_downloads.push((file_name, e.to_string()));
            }
        }
    }

    // 8-9
    let fetched: BTreeSet<String> = report.downloaded.iter().cloned().collect();
    let final_snapshot = store.snapshot()?;
    let verified = verified_files(
        &remote.packages,
        &desired,
        &plan,
        &fetched,
        &final_snapshot,
        store,
        options,
    );
    let index = build_index(&remote, &verified);

    for dropped in local.packages.keys().filter(|f| !index.packages.contains_key(*f)) {
        debug!("{}: {} leaves the index", platform, dropped);
    }

    write_index(store, &index)?;
    report.indexed = index.packages.len();

    reporter.on_event(
        Level::INFO,
        &format!(
            "{}: {} indexed, {} downloaded, {} deleted, {} failed",
            platform,
            report.indexed,
            report.downloaded.len(),
            report.deleted.len(),
            report.failed_downloads.len()
        ),
    );

    Ok(report)
}

/// Remove upstream entries whose keys cannot be stored as a single file
///
/// Keys name files inside the platform directory, so anything with a path
/// separator, a parent reference or a metadata/partial name is refused.
fn drop_unsafe_entries(
    remote: &mut RepoIndex,
    platform: &str,
    reporter: &dyn Reporter,
) -> Vec<String> {
    let rejected: Vec<String> = remote
        .packages
        .keys()
        .filter(|f| !is_package_file_name(f))
        .cloned()
        .collect();

    for file_name in &rejected {
        remote.packages.remove(file_name);
        reporter.on_event(
            Level::WARN,
            &format!("{}: skipping upstream entry with unsafe file name {:?}", platform, file_name),
        );
    }
    rejected
}

fn delete_planned(
    plan: &MirrorPlan,
    blacklisted: &BTreeSet<String>,
    snapshot: &LocalSnapshot,
    store: &dyn PackageStore,
    reporter: &dyn Reporter,
    report: &mut PlatformReport,
) {
    for file_name in remove_blacklisted(blacklisted, snapshot, store) {
        report.deleted.push((file_name, RemovalReason::Blacklisted));
    }

    for (file_name, reason) in &plan.to_delete {
        if *reason == RemovalReason::Blacklisted {
            if !report.deleted.iter().any(|(f, _)| f == file_name) {
                report
                    .delete_failures
                    .push((file_name.clone(), "blacklisted file not removed".to_string()));
            }
            continue;
        }

        match store.remove(file_name) {
            Ok(()) => {
                info!("Removed {} ({})", file_name, reason);
                report.deleted.push((file_name.clone(), reason.clone()));
            }
            Err(e) => {
                reporter.on_event(
                    Level::WARN,
                    &format!("Failed to remove {}: {}", file_name, e),
                );
                report.delete_failures.push((file_name.clone(), e.to_string()));
            }
        }
    }
}

fn download_missing(
    upstream: &dyn Upstream,
    store: &dyn PackageStore,
    packages: &PackageMap,
    plan: &MirrorPlan,
    options: &MirrorOptions,
    reporter: &dyn Reporter,
) -> Vec<(String, Result<u64>)> {
    let work: Vec<_> = plan
        .to_download
        .iter()
        .filter_map(|f| packages.get(f).map(|record| (f.clone(), record)))
        .collect();

    if work.is_empty() {
        return Vec::new();
    }

    info!(
        "Downloading {} packages ({:.2} MB total)...",
        work.len(),
        plan.download_size(packages) as f64 / 1_048_576.0
    );

    let fetch = |(file_name, record): &(String, &PackageRecord)| {
        let result = download_package(
            upstream,
            &options.platform,
            file_name,
            record,
            store,
            options.chunk_size,
            reporter,
        );
        (file_name.clone(), result)
    };

    if options.jobs <= 1 {
        return work.iter().map(fetch).collect();
    }

    match rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs)
        .build()
    {
        // collect() returns only after every download has settled
        Ok(pool) => pool.install(|| work.par_iter().map(fetch).collect()),
        Err(e) => {
            warn!("Failed to start download pool ({}), downloading sequentially", e);
            work.iter().map(fetch).collect()
        }
    }
}

/// Desired files on disk that are known good after the pass
///
/// Files validated in step 4 and not deleted are trusted, as are files
/// whose download succeeded (they were verified while streaming). Anything
/// else, including a planned download that failed over a file that could
/// not be deleted, is checked again.
fn verified_files(
    packages: &PackageMap,
    desired: &BTreeSet<String>,
    plan: &MirrorPlan,
    fetched: &BTreeSet<String>,
    snapshot: &LocalSnapshot,
    store: &dyn PackageStore,
    options: &MirrorOptions,
) -> BTreeSet<String> {
    snapshot
        .iter()
        .filter(|(file_name, _)| desired.contains(*file_name))
        .filter(|(file_name, size)| {
            let Some(record) = packages.get(*file_name) else {
                return false;
            };
            let already_checked = plan.to_validate.contains(*file_name)
                && !plan.to_delete.contains_key(*file_name);
            if already_checked || fetched.contains(*file_name) {
                return *size == record.size;
            }
            check_file(file_name, *size, record, store, options.verify).is_none()
        })
        .map(|(file_name, _)| file_name.clone())
        .collect()
}
