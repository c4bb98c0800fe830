// src/lib.rs

//! conda-mirror
//!
//! Keeps a local directory in sync with a conda channel: fetches upstream
//! repodata, applies whitelist/blacklist rules, deletes stale or corrupt
//! packages, downloads what is missing and rewrites the local index.
//!
//! # Architecture
//!
//! - Filesystem as state: each platform directory is its own database
//! - Capabilities: the engine sees the network through [`Upstream`], the
//!   disk through [`PackageStore`] and the terminal through
//!   [`progress::Reporter`]
//! - Verify before publish: downloads land as `.part` files and are renamed
//!   only after size and checksum match
//! - Index follows disk: `repodata.json` lists exactly the verified files

pub mod compression;
pub mod config;
mod error;
pub mod hash;
pub mod progress;
pub mod repository;

pub use config::{ConfigFile, MirrorConfig};
pub use error::{Error, Result};
pub use hash::{Checksum, HashAlgorithm, Hasher};
pub use progress::{CallbackReporter, CliReporter, LogReporter, ReportEvent, Reporter, SilentReporter};
pub use repository::{
    ChannelClient, ChannelUrls, FilterRule, LocalDir, LocalSnapshot, MatchKind, MirrorOptions,
    MirrorPlan, MirrorSummary, PackageFilters, PackageRecord, PackageStore, PlatformReport,
    RemovalReason, RepoIndex, Upstream, ValidationMismatch, VerifyMode, mirror_platform,
};
