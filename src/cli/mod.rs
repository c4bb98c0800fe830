// src/cli/mod.rs
//! CLI definitions for conda-mirror
//!
//! This module contains the command-line interface definition using clap.
//! The run itself is implemented in the `commands` module.

use clap::Parser;
use conda_mirror::VerifyMode;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "conda-mirror")]
#[command(author = "conda-mirror Contributors")]
#[command(version)]
#[command(about = "Mirror a conda channel's metadata and packages to a local directory", long_about = None)]
pub struct Cli {
    /// Channel to mirror: a name on anaconda.org (conda-forge) or a full URL
    #[arg(long)]
    pub upstream_channel: Option<String>,

    /// Directory the mirror lives in; one subdirectory per platform
    #[arg(long)]
    pub target_directory: Option<PathBuf>,

    /// Platform(s) to mirror; 'all' means linux-64, linux-32, osx-64, win-64, win-32
    #[arg(long = "platform", num_args = 1..)]
    pub platforms: Vec<String>,

    /// YAML config file with whitelist/blacklist and defaults for the flags above
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of concurrent downloads
    #[arg(long)]
    pub num_threads: Option<usize>,

    /// Read size in bytes for package downloads
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Overall per-request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// How to validate local packages: checksum or size
    #[arg(long)]
    pub verify: Option<VerifyMode>,

    /// Show what would be deleted and downloaded without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    /// Default log filter for the chosen verbosity
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}
