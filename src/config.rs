// src/config.rs
//! Mirror configuration
//!
//! Settings come from two places: an optional YAML file and the command
//! line. The file may carry everything; the command line overrides it.
//!
//! ```yaml
//! upstream-channel: conda-forge
//! target-directory: /srv/mirror/conda-forge
//! platforms: [linux-64, noarch]
//! num-threads: 4
//! verify: checksum
//! whitelist:
//!   - name: numpy
//!     version: "1.11.*"
//! blacklist:
//!   - license: "GPL*"
//! ```
//!
//! Version patterns should be quoted: YAML reads `1.10` as a float.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};
use crate::repository::{
    ChannelUrls, DEFAULT_CHUNK_SIZE, FilterRule, HttpOptions, PackageFilters, VerifyMode,
};

/// Platforms mirrored when `all` is requested
pub const DEFAULT_PLATFORMS: [&str; 5] = ["linux-64", "linux-32", "osx-64", "win-64", "win-32"];

/// A filter value as written in YAML
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl RuleValue {
    /// Text form used for matching
    pub fn as_text(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

/// One filter rule as written in YAML: attribute -> pattern
pub type RawRule = BTreeMap<String, RuleValue>;

/// YAML configuration file structure
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub whitelist: Vec<RawRule>,

    #[serde(default)]
    pub blacklist: Vec<RawRule>,

    pub upstream_channel: Option<String>,
    pub target_directory: Option<PathBuf>,

    #[serde(default)]
    pub platforms: Vec<String>,

    /// Base URL for repodata of named channels
    pub repo_base: Option<String>,

    /// Base URL for package downloads of named channels
    pub download_base: Option<String>,

    pub num_threads: Option<usize>,
    pub chunk_size: Option<usize>,

    /// Overall per-request timeout in seconds
    pub timeout: Option<u64>,

    pub verify: Option<String>,
}

impl ConfigFile {
    /// Load a config file from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::parse(&content).map_err(|e| match e {
            Error::ConfigError(msg) => Error::ConfigError(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Parse config file contents
    ///
    /// An empty document yields the default configuration.
    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }
}

/// Values given on the command line; `None` means not given
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub upstream_channel: Option<String>,
    pub target_directory: Option<PathBuf>,
    pub platforms: Vec<String>,
    pub num_threads: Option<usize>,
    pub chunk_size: Option<usize>,
    pub timeout: Option<u64>,
    pub verify: Option<VerifyMode>,
    pub dry_run: bool,
}

/// Fully resolved settings for a mirror run
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub urls: ChannelUrls,
    pub target_directory: PathBuf,
    /// Sorted, de-duplicated platform list with `all` expanded
    pub platforms: Vec<String>,
    pub filters: PackageFilters,
    pub num_threads: usize,
    pub chunk_size: usize,
    pub http: HttpOptions,
    pub verify: VerifyMode,
    pub dry_run: bool,
}

impl MirrorConfig {
    /// Merge a config file with command-line overrides and validate
    pub fn resolve(file: ConfigFile, cli: Overrides) -> Result<Self> {
        let channel = cli
            .upstream_channel
            .or(file.upstream_channel)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::ConfigError("No upstream channel given".to_string()))?;

        let target_directory = cli
            .target_directory
            .or(file.target_directory)
            .ok_or_else(|| Error::ConfigError("No target directory given".to_string()))?;

        let requested = if cli.platforms.is_empty() {
            file.platforms
        } else {
            cli.platforms
        };
        if requested.is_empty() {
            return Err(Error::ConfigError("No platforms given".to_string()));
        }
        let platforms = expand_platforms(&requested)?;

        let num_threads = positive("num-threads", cli.num_threads.or(file.num_threads), 1)?;
        let chunk_size = positive(
            "chunk-size",
            cli.chunk_size.or(file.chunk_size),
            DEFAULT_CHUNK_SIZE,
        )?;

        let mut http = HttpOptions::default();
        if let Some(secs) = cli.timeout.or(file.timeout) {
            if secs == 0 {
                return Err(Error::ConfigError("timeout must be positive".to_string()));
            }
            http.timeout = Duration::from_secs(secs);
        }

        let verify = match (cli.verify, file.verify) {
            (Some(mode), _) => mode,
            (None, Some(raw)) => raw.parse().map_err(Error::ConfigError)?,
            (None, None) => VerifyMode::default(),
        };

        let filters = PackageFilters::new(
            build_rules(&file.whitelist)?,
            build_rules(&file.blacklist)?,
        );

        Ok(Self {
            urls: ChannelUrls::new(
                &channel,
                file.repo_base.as_deref(),
                file.download_base.as_deref(),
            ),
            target_directory,
            platforms,
            filters,
            num_threads,
            chunk_size,
            http,
            verify,
            dry_run: cli.dry_run,
        })
    }
}

fn positive(key: &str, value: Option<usize>, default: usize) -> Result<usize> {
    match value {
        Some(0) => Err(Error::ConfigError(format!("{} must be positive", key))),
        Some(n) => Ok(n),
        None => Ok(default),
    }
}

/// Convert YAML rules into filter rules
pub fn build_rules(raw: &[RawRule]) -> Result<Vec<FilterRule>> {
    raw.iter()
        .map(|rule| FilterRule::new(rule.iter().map(|(key, value)| (key.clone(), value.as_text()))))
        .collect()
}

/// Expand `all` and normalize a requested platform list
pub fn expand_platforms(requested: &[String]) -> Result<Vec<String>> {
    let mut platforms = BTreeSet::new();
    let has_all = requested.iter().any(|p| p == "all");

    if has_all && requested.len() > 1 {
        warn!(
            "'all' was given with other platforms; mirroring the union of {:?} and {:?}",
            requested, DEFAULT_PLATFORMS
        );
    }

    for platform in requested {
        if platform == "all" {
            platforms.extend(DEFAULT_PLATFORMS.iter().map(|p| p.to_string()));
            continue;
        }
        validate_platform(platform)?;
        platforms.insert(platform.clone());
    }

    Ok(platforms.into_iter().collect())
}

/// A platform name becomes a directory name, so it must be a plain segment
fn validate_platform(platform: &str) -> Result<()> {
    let valid = !platform.is_empty()
        && platform
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && !platform.starts_with('-');
    if valid {
        Ok(())
    } else {
        Err(Error::ConfigError(format!("Invalid platform name: '{}'", platform)))
    }
}
