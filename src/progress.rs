// src/progress.rs

//! Progress and event reporting for mirror runs
//!
//! The reconciler and downloader never touch global output state. They are
//! handed a [`Reporter`] and push two kinds of information through it:
//! byte-level download progress and leveled status events.
//!
//! # Implementations
//!
//! - `CliReporter`: indicatif progress bars, one per in-flight download
//! - `LogReporter`: everything goes to tracing
//! - `SilentReporter`: no-op for scripted/quiet modes
//! - `CallbackReporter`: forwards [`ReportEvent`]s to a closure
//!
//! # Example
//!
//! ```ignore
//! use conda_mirror::progress::{LogReporter, Reporter};
//! use tracing::Level;
//!
//! let reporter = LogReporter::new();
//! reporter.on_event(Level::INFO, "Mirroring linux-64");
//! reporter.on_progress("zlib-1.2.11-0.tar.bz2", 1024, 4096);
//! reporter.on_finish("zlib-1.2.11-0.tar.bz2", None);
//! ```

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{Level, debug, error, info, trace, warn};

/// Reporting capability passed into the mirror engine
///
/// Implementations must be thread-safe: with a worker pool, several
/// downloads report concurrently.
pub trait Reporter: Send + Sync {
    /// Bytes transferred so far for one file, against the expected total
    fn on_progress(&self, file_name: &str, bytes_so_far: u64, bytes_total: u64);

    /// A status message at the given level
    fn on_event(&self, level: Level, message: &str);

    /// A download finished; `error` is set when it failed
    fn on_finish(&self, _file_name: &str, _error: Option<&str>) {}
}

/// No-op reporter
#[derive(Debug, Default)]
pub struct SilentReporter;

impl SilentReporter {
    pub fn new() -> Self {
        Self
    }
}

impl Reporter for SilentReporter {
    fn on_progress(&self, _file_name: &str, _bytes_so_far: u64, _bytes_total: u64) {}

    fn on_event(&self, _level: Level, _message: &str) {}
}

/// Forward an event to tracing at the matching level
fn log_event(level: Level, message: &str) {
    match level {
        Level::ERROR => error!("{}", message),
        Level::WARN => warn!("{}", message),
        Level::INFO => info!("{}", message),
        Level::DEBUG => debug!("{}", message),
        Level::TRACE => trace!("{}", message),
    }
}

/// Logging reporter
///
/// Events go to tracing at their own level. Progress is logged at debug
/// level roughly every tenth of a file, to avoid spam.
#[derive(Debug, Default)]
pub struct LogReporter {
    /// Last logged decile per file
    logged: Mutex<HashMap<String, u64>>,
}

impl LogReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reporter for LogReporter {
    fn on_progress(&self, file_name: &str, bytes_so_far: u64, bytes_total: u64) {
        if bytes_total == 0 {
            return;
        }
        let decile = (bytes_so_far.min(bytes_total) * 10) / bytes_total;
        let Ok(mut logged) = self.logged.lock() else {
            return;
        };
        let last = logged.entry(file_name.to_string()).or_insert(0);
        if decile > *last {
            *last = decile;
            debug!(
                "{}: {}% ({}/{})",
                file_name,
                decile * 10,
                bytes_so_far,
                bytes_total
            );
        }
    }

    fn on_event(&self, level: Level, message: &str) {
        log_event(level, message);
    }

    fn on_finish(&self, file_name: &str, error: Option<&str>) {
        if let Ok(mut logged) = self.logged.lock() {
            logged.remove(file_name);
        }
        match error {
            None => info!("{}: done", file_name),
            Some(msg) => warn!("{}: FAILED - {}", file_name, msg),
        }
    }
}

/// Terminal reporter with one progress bar per in-flight download
pub struct CliReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
    style: ProgressStyle,
}

impl CliReporter {
    pub fn new() -> Self {
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");

        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
            style,
        }
    }

    fn bar_for(&self, file_name: &str, bytes_total: u64) -> Option<ProgressBar> {
        let mut bars = self.bars.lock().ok()?;
        let bar = bars.entry(file_name.to_string()).or_insert_with(|| {
            let pb = self.multi.add(ProgressBar::new(bytes_total));
            pb.set_style(self.style.clone());
            pb.set_message(file_name.to_string());
            pb
        });
        Some(bar.clone())
    }
}

impl Default for CliReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for CliReporter {
    fn on_progress(&self, file_name: &str, bytes_so_far: u64, bytes_total: u64) {
        if let Some(pb) = self.bar_for(file_name, bytes_total) {
            if pb.length() != Some(bytes_total) {
                pb.set_length(bytes_total);
            }
            pb.set_position(bytes_so_far);
        }
    }

    fn on_event(&self, level: Level, message: &str) {
        // Status lines go above the bars; problems go to the log
        if level == Level::INFO {
            let _ = self.multi.println(message);
        } else {
            log_event(level, message);
        }
    }

    fn on_finish(&self, file_name: &str, error: Option<&str>) {
        let bar = self.bars.lock().ok().and_then(|mut bars| bars.remove(file_name));
        if let Some(pb) = bar {
            match error {
                None => pb.finish_with_message(format!("{} [done]", file_name)),
                Some(msg) => pb.abandon_with_message(format!("{} [FAILED: {}]", file_name, msg)),
            }
        }
    }
}

/// Events emitted by [`CallbackReporter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEvent {
    Progress {
        file_name: String,
        bytes_so_far: u64,
        bytes_total: u64,
    },
    Event {
        level: Level,
        message: String,
    },
    Finished {
        file_name: String,
        error: Option<String>,
    },
}

/// Callback-based reporter
pub struct CallbackReporter<F>
where
    F: Fn(ReportEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackReporter<F>
where
    F: Fn(ReportEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> Reporter for CallbackReporter<F>
where
    F: Fn(ReportEvent) + Send + Sync,
{
    fn on_progress(&self, file_name: &str, bytes_so_far: u64, bytes_total: u64) {
        (self.callback)(ReportEvent::Progress {
            file_name: file_name.to_string(),
            bytes_so_far,
            bytes_total,
        });
    }

    fn on_event(&self, level: Level, message: &str) {
        (self.callback)(ReportEvent::Event {
            level,
            message: message.to_string(),
        });
    }

    fn on_finish(&self, file_name: &str, error: Option<&str>) {
        (self.callback)(ReportEvent::Finished {
            file_name: file_name.to_string(),
            error: error.map(str::to_string),
        });
    }
}
