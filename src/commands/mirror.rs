// src/commands/mirror.rs
//! Mirror command: reconcile every requested platform with upstream

use anyhow::{Result, bail};
use conda_mirror::config::{ConfigFile, MirrorConfig, Overrides};
use conda_mirror::progress::{CliReporter, LogReporter, Reporter};
use conda_mirror::{
    ChannelClient, LocalDir, MirrorOptions, MirrorSummary, PlatformReport, mirror_platform,
};
use tracing::{error, info};

use crate::cli::Cli;

fn overrides(cli: &Cli) -> Overrides {
    Overrides {
        upstream_channel: cli.upstream_channel.clone(),
        target_directory: cli.target_directory.clone(),
        platforms: cli.platforms.clone(),
        num_threads: cli.num_threads,
        chunk_size: cli.chunk_size,
        timeout: cli.timeout,
        verify: cli.verify,
        dry_run: cli.dry_run,
    }
}

/// Mirror the configured channel
///
/// Fails when the configuration is invalid or when any platform could not
/// be fetched or indexed. Individual package failures only show up in the
/// summary.
pub fn cmd_mirror(cli: &Cli) -> Result<()> {
    let file = match &cli.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };
    let config = MirrorConfig::resolve(file, overrides(cli))?;

    info!(
        "Going to look on {} for the following platforms: {:?}",
        config.urls.channel(),
        config.platforms
    );

    let client = ChannelClient::new(config.urls.clone(), &config.http)?;
    let reporter: Box<dyn Reporter> = if cli.quiet {
        Box::new(LogReporter::new())
    } else {
        Box::new(CliReporter::new())
    };

    let mut summary = MirrorSummary::new();
    for platform in &config.platforms {
        let options = MirrorOptions {
            platform: platform.clone(),
            verify: config.verify,
            chunk_size: config.chunk_size,
            jobs: config.num_threads,
            dry_run: config.dry_run,
        };

        let dir = config.target_directory.join(platform);
        let store = if config.dry_run {
            Ok(LocalDir::new(&dir))
        } else {
            LocalDir::create(&dir)
        };

        let result = store.and_then(|store| {
            mirror_platform(&client, &store, &config.filters, &options, reporter.as_ref())
        });
        if let Err(e) = &result {
            error!("Failed to mirror {}: {}", platform, e);
        }
        summary.record(platform, result);
    }

    print_summary(&summary);

    if summary.has_fatal_errors() {
        bail!(
            "{} of {} platform(s) could not be mirrored",
            summary.platform_errors.len(),
            config.platforms.len()
        );
    }
    Ok(())
}

fn print_report(report: &PlatformReport) {
    if report.dry_run {
        println!(
            "  [PLAN] {}: {} upstream, {} desired, would delete {}, would download {}",
            report.platform,
            report.upstream_count,
            report.desired_count,
            report.plan.to_delete.len(),
            report.plan.to_download.len()
        );
        for (file_name, reason) in &report.plan.to_delete {
            println!("      delete {} ({})", file_name, reason);
        }
        for file_name in &report.plan.to_download {
            println!("      download {}", file_name);
        }
        return;
    }

    let status = if report.is_complete() { "OK" } else { "PARTIAL" };
    println!(
        "  [{}] {}: {} indexed ({} before), {} downloaded ({:.2} MB), {} deleted",
        status,
        report.platform,
        report.indexed,
        report.previously_indexed,
        report.downloaded.len(),
        report.downloaded_bytes as f64 / 1_048_576.0,
        report.deleted.len()
    );
    for (file_name, message) in &report.failed_downloads {
        println!("      failed {}: {}", file_name, message);
    }
    for (file_name, message) in &report.delete_failures {
        println!("      could not delete {}: {}", file_name, message);
    }
    for file_name in &report.rejected {
        println!("      skipped unsafe upstream name {:?}", file_name);
    }
}

/// Print a human-readable run summary
fn print_summary(summary: &MirrorSummary) {
    println!("Mirror summary:");
    for report in &summary.reports {
        print_report(report);
    }
    for (platform, message) in &summary.platform_errors {
        println!("  [FAILED] {}: {}", platform, message);
    }
    println!(
        "Total: {} downloaded, {} deleted, {} failed",
        summary.total_downloaded(),
        summary.total_deleted(),
        summary.total_failed()
    );
}
