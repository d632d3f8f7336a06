//! Core logging types: resource entries, status, and the [`Log`] trait.

/// Per-resource result recorded for the run summary.
#[derive(Debug, Clone)]
pub struct ResourceEntry {
    /// Resource identifier (`Kind[name]`).
    pub id: String,
    /// Final status of the resource.
    pub status: ResourceStatus,
    /// Optional detail message (e.g. failure reason or blocking dependency).
    pub message: Option<String>,
}

/// Status of a converged resource, as shown in the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    /// Already in the desired state.
    Unchanged,
    /// Brought into the desired state during this run.
    Changed,
    /// Would have changed; the run is a dry run.
    WouldChange,
    /// Not attempted because a dependency did not converge.
    Skipped,
    /// Guard evaluation or apply failed.
    Failed,
}

impl ResourceStatus {
    /// Lower-case label, matching the run report's `outcome` field.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Changed => "changed",
            Self::WouldChange => "would_change",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    /// Summary icon and ANSI colour.
    pub(super) const fn style(self) -> (&'static str, &'static str) {
        match self {
            Self::Unchanged => ("·", "\x1b[2m"),
            Self::Changed => ("✓", "\x1b[32m"),
            Self::WouldChange => ("~", "\x1b[37m"),
            Self::Skipped => ("○", "\x1b[33m"),
            Self::Failed => ("✗", "\x1b[31m"),
        }
    }
}

/// Abstraction over logging backends.
///
/// [`Logger`](super::logger::Logger) is the production implementation; the
/// engine only sees `&dyn Log` so tests can substitute a silent recorder.
pub trait Log: Send + Sync {
    /// Log a stage header (major section).
    fn stage(&self, msg: &str);
    /// Log an informational message.
    fn info(&self, msg: &str);
    /// Log a debug message (may be suppressed on console).
    fn debug(&self, msg: &str);
    /// Log a warning message.
    fn warn(&self, msg: &str);
    /// Log an error message.
    fn error(&self, msg: &str);
    /// Log a dry-run action message.
    fn dry_run(&self, msg: &str);
    /// Record a resource result for the summary.
    fn record_resource(&self, id: &str, status: ResourceStatus, message: Option<&str>);
}
