//! Structured logger with dry-run awareness and summary collection.
use std::path::PathBuf;
use std::sync::Mutex;

use super::subscriber::{DRY_RUN_TARGET, RESOURCE_TARGET, STAGE_TARGET};
use super::types::{Log, ResourceEntry, ResourceStatus};
use super::utils::log_file_path;

/// Implement the display methods of [`Log`] by delegating to inherent methods
/// of the same name on the implementing type.
///
/// `record_resource` is not included because its signature differs from the
/// `fn(&self, &str)` pattern shared by the display methods.
macro_rules! forward_log_methods {
    ($($method:ident),+ $(,)?) => {
        $(
            fn $method(&self, msg: &str) {
                self.$method(msg);
            }
        )+
    };
}

/// Structured logger with dry-run awareness and summary collection.
///
/// Every message and every resource outcome also lands in the run log
/// (`$CONVERGE_LOG_DIR/<command>.log`, default
/// `~/.cache/converge/<command>.log`) regardless of the verbose flag.
#[derive(Debug)]
pub struct Logger {
    resources: Mutex<Vec<ResourceEntry>>,
    log_file: Option<PathBuf>,
}

impl Logger {
    /// Create a new logger.
    ///
    /// Stores the log file path for display in the run summary.  The log file
    /// itself is created by [`init_subscriber`](super::subscriber::init_subscriber).
    #[must_use]
    pub fn new(command: &str) -> Self {
        Self {
            resources: Mutex::new(Vec::new()),
            log_file: log_file_path(command),
        }
    }

    /// Return the log file path, if available.
    #[cfg(test)]
    pub const fn log_path(&self) -> Option<&PathBuf> {
        self.log_file.as_ref()
    }

    /// Return a clone of all recorded entries.
    #[must_use]
    pub fn entries(&self) -> Vec<ResourceEntry> {
        self.resources.lock().map_or_else(|_| vec![], |g| g.clone())
    }

    /// Log an error message.
    pub fn error(&self, msg: &str) {
        tracing::error!("{msg}");
    }

    /// Log a warning message.
    pub fn warn(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    /// Log a stage header (major section).
    pub fn stage(&self, msg: &str) {
        tracing::info!(target: STAGE_TARGET, "{msg}");
    }

    /// Log an informational message.
    pub fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    /// Log a debug message (suppressed on console unless verbose; always
    /// written to the log file).
    pub fn debug(&self, msg: &str) {
        tracing::debug!("{msg}");
    }

    /// Log a dry-run action message.
    pub fn dry_run(&self, msg: &str) {
        tracing::info!(target: DRY_RUN_TARGET, "{msg}");
    }

    /// Record a resource result for the summary and the run log.
    pub fn record_resource(&self, id: &str, status: ResourceStatus, message: Option<&str>) {
        tracing::debug!(
            target: RESOURCE_TARGET,
            resource = id,
            outcome = status.label(),
            detail = message,
            "{id} {}",
            status.label()
        );
        if let Ok(mut guard) = self.resources.lock() {
            guard.push(ResourceEntry {
                id: id.to_string(),
                status,
                message: message.map(String::from),
            });
        }
    }

    /// Print one line per recorded resource, then the totals.
    ///
    /// Unchanged resources are listed only at debug level so that a
    /// converged host prints a short summary.
    pub fn print_summary(&self) {
        let entries = self.entries();
        if entries.is_empty() {
            return;
        }
        self.stage("Summary");

        let mut counts = [0_usize; 5];
        for entry in &entries {
            let slot = match entry.status {
                ResourceStatus::Changed => 0,
                ResourceStatus::Unchanged => 1,
                ResourceStatus::WouldChange => 2,
                ResourceStatus::Skipped => 3,
                ResourceStatus::Failed => 4,
            };
            if let Some(count) = counts.get_mut(slot) {
                *count += 1;
            }

            let (icon, color) = entry.status.style();
            let suffix = entry
                .message
                .as_ref()
                .map_or_else(String::new, |msg| format!(" ({msg})"));
            let line = format!("{color}{icon} {}{suffix}\x1b[0m", entry.id);
            if entry.status == ResourceStatus::Unchanged {
                self.debug(&line);
            } else {
                self.info(&line);
            }
        }

        let [changed, unchanged, would_change, skipped, failed] = counts;
        self.info(&format!(
            "{} resources: \x1b[32m{changed} changed\x1b[0m, \x1b[2m{unchanged} unchanged\x1b[0m, \x1b[37m{would_change} would change\x1b[0m, \x1b[33m{skipped} skipped\x1b[0m, \x1b[31m{failed} failed\x1b[0m",
            entries.len()
        ));

        if let Some(path) = &self.log_file {
            self.info(&format!("\x1b[2mlog: {}\x1b[0m", path.display()));
        }
    }
}

impl Log for Logger {
    forward_log_methods!(stage, info, debug, warn, error, dry_run);

    fn record_resource(&self, id: &str, status: ResourceStatus, message: Option<&str>) {
        self.record_resource(id, status, message);
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::logging::isolated_logger;
    use std::fs;

    #[test]
    fn logger_new_has_no_entries() {
        let (log, _tmp, _guard) = isolated_logger();
        assert!(log.entries().is_empty());
    }

    #[test]
    fn record_resource_with_message() {
        let (log, _tmp, _guard) = isolated_logger();
        log.record_resource(
            "Exec[gitolite_compile]",
            ResourceStatus::Skipped,
            Some("dependency File[/x] failed"),
        );
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "Exec[gitolite_compile]");
        assert_eq!(
            entries[0].message.as_deref(),
            Some("dependency File[/x] failed")
        );
    }

    #[test]
    fn log_trait_delegates_to_logger() {
        let (log, _tmp, _guard) = isolated_logger();
        let log_ref: &dyn Log = &log;
        log_ref.record_resource("via-trait", ResourceStatus::Unchanged, None);
        assert_eq!(log.entries().len(), 1);
    }

    #[test]
    fn debug_always_written_to_file() {
        let (log, _tmp, _guard) = isolated_logger();
        let marker = format!("debug-marker-{}", std::process::id());
        log.debug(&marker);
        let path = log.log_path().expect("log path should exist");
        let contents = fs::read_to_string(path).unwrap();
        assert!(contents.contains(&marker));
    }

    #[test]
    fn stage_written_to_file_with_arrow() {
        let (log, _tmp, _guard) = isolated_logger();
        log.stage("Applying resources");
        let contents = fs::read_to_string(log.log_path().expect("log path")).unwrap();
        assert!(contents.contains("==> Applying resources"));
    }

    #[test]
    fn dry_run_written_to_file() {
        let (log, _tmp, _guard) = isolated_logger();
        let marker = format!("dryrun-marker-{}", std::process::id());
        log.dry_run(&marker);
        let contents = fs::read_to_string(log.log_path().expect("log path")).unwrap();
        assert!(contents.contains("[dry run]"));
        assert!(contents.contains(&marker));
    }

    #[test]
    fn error_written_to_file() {
        let (log, _tmp, _guard) = isolated_logger();
        log.error("boom");
        let contents = fs::read_to_string(log.log_path().expect("log path")).unwrap();
        assert!(contents.contains("[error] boom"));
    }

    #[test]
    fn resource_outcome_written_to_file() {
        let (log, _tmp, _guard) = isolated_logger();
        log.record_resource(
            "File[/var/lib/gitolite/.gitolite.rc]",
            ResourceStatus::Changed,
            Some("was sha256 0123456789ab"),
        );
        let contents = fs::read_to_string(log.log_path().expect("log path")).unwrap();
        assert!(contents.contains(
            "changed      File[/var/lib/gitolite/.gitolite.rc] (was sha256 0123456789ab)"
        ));
    }

    #[test]
    fn summary_lists_resources_in_log_file() {
        let (log, _tmp, _guard) = isolated_logger();
        log.record_resource("Package[git]", ResourceStatus::Changed, None);
        log.record_resource("Exec[x]", ResourceStatus::Failed, Some("exit 1"));
        log.print_summary();
        let contents = fs::read_to_string(log.log_path().expect("log path")).unwrap();
        assert!(contents.contains("✓ Package[git]"));
        assert!(contents.contains("✗ Exec[x] (exit 1)"));
        assert!(contents.contains("2 resources: 1 changed, 0 unchanged"));
    }
}
