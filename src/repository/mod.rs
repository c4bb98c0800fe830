// src/repository/mod.rs

//! Channel mirroring
//!
//! This module provides functionality for:
//! - Fetching channel repodata over HTTP
//! - Evaluating whitelist/blacklist rules against package records
//! - Validating local package files by size and checksum
//! - Downloading packages with streaming verification
//! - Reconciling a platform directory and rewriting its index

mod client;
mod download;
mod index;
mod metadata;

pub mod filter;
pub mod store;
pub mod sync;
pub mod validate;

// Re-export main types and functions
pub use client::{
    ChannelClient, ChannelUrls, DEFAULT_DOWNLOAD_BASE, DEFAULT_REPO_BASE, HttpOptions, Upstream,
};
pub use download::{DEFAULT_CHUNK_SIZE, download_package};
pub use filter::{FilterRule, MatchKind, PackageFilters, apply_filters, blacklisted, match_packages};
pub use index::{build_index, load_local_index, write_index};
pub use metadata::{PackageMap, PackageRecord, RepoIndex};
pub use store::{LocalDir, LocalSnapshot, PackageStore, REPODATA_JSON, REPODATA_JSON_BZ2};
pub use sync::{
    MirrorOptions, MirrorPlan, MirrorSummary, PlatformReport, RemovalReason, mirror_platform,
};
pub use validate::{ValidationMismatch, VerifyMode, remove_blacklisted, validate};
