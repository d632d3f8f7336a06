//! Per-resource outcomes and the aggregated run report.
use serde::Serialize;

use crate::error::{ApplyError, GuardEvaluationError, SkippedDueToDependency};
use crate::logging::ResourceStatus;

use super::spec::ResourceId;

/// Why a resource failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceFailure {
    /// The guard (explicit or built-in state check) could not decide.
    Guard(GuardEvaluationError),
    /// The applier ran and failed.
    Apply(ApplyError),
}

impl std::fmt::Display for ResourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Guard(e) => write!(f, "{e}"),
            Self::Apply(e) => write!(f, "{e}"),
        }
    }
}

/// Outcome of converging one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Already in the desired state, or the guard was satisfied.
    Unchanged,
    /// The applier brought the resource into the desired state.
    Changed,
    /// Dry run: the applier would have run.
    WouldChange,
    /// Guard evaluation or apply failed.
    Failed(ResourceFailure),
    /// Not attempted because a dependency failed or was skipped.
    Skipped(SkippedDueToDependency),
}

impl Outcome {
    /// Lower-case label used in machine-readable output.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Changed => "changed",
            Self::WouldChange => "would_change",
            Self::Failed(_) => "failed",
            Self::Skipped(_) => "skipped",
        }
    }

    /// Summary status for the logger.
    #[must_use]
    pub const fn status(&self) -> ResourceStatus {
        match self {
            Self::Unchanged => ResourceStatus::Unchanged,
            Self::Changed => ResourceStatus::Changed,
            Self::WouldChange => ResourceStatus::WouldChange,
            Self::Failed(_) => ResourceStatus::Failed,
            Self::Skipped(_) => ResourceStatus::Skipped,
        }
    }

    /// Whether the resource changed (or would have, in a dry run).
    ///
    /// Watchers of a resource with this outcome are refreshed.
    #[must_use]
    pub const fn is_change(&self) -> bool {
        matches!(self, Self::Changed | Self::WouldChange)
    }

    /// Whether dependents of this resource must be skipped.
    #[must_use]
    pub const fn blocks_dependents(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Skipped(_))
    }
}

/// One line of the run report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    /// The resource.
    pub resource: ResourceId,
    /// What happened to it.
    pub outcome: Outcome,
    /// Free-form detail: failure reason, blocking dependency, applier note.
    pub detail: Option<String>,
}

/// Serialised shape of a [`ReportEntry`].
#[derive(Serialize)]
struct ReportRecord<'a> {
    resource: String,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
}

impl Serialize for ReportEntry {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ReportRecord {
            resource: self.resource.to_string(),
            outcome: self.outcome.label(),
            detail: self.detail.as_deref(),
        }
        .serialize(serializer)
    }
}

/// Counts per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    /// Already in the desired state.
    pub unchanged: usize,
    /// Converged by this run.
    pub changed: usize,
    /// Would have changed (dry run).
    pub would_change: usize,
    /// Guard or apply failures.
    pub failed: usize,
    /// Not attempted because a dependency did not converge.
    pub skipped: usize,
}

impl Summary {
    /// Total number of resources.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.unchanged + self.changed + self.would_change + self.failed + self.skipped
    }
}

/// Every resource of a run with its outcome, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RunReport {
    entries: Vec<ReportEntry>,
}

impl RunReport {
    /// Append an entry.
    pub fn push(&mut self, entry: ReportEntry) {
        self.entries.push(entry);
    }

    /// Entries in execution order.
    #[must_use]
    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    /// Entry for `id`, if it was part of the run.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| &e.resource == id)
    }

    /// Outcome for `id`, if it was part of the run.
    #[must_use]
    pub fn outcome(&self, id: &ResourceId) -> Option<&Outcome> {
        self.get(id).map(|e| &e.outcome)
    }

    /// Count outcomes.
    #[must_use]
    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for entry in &self.entries {
            match entry.outcome {
                Outcome::Unchanged => summary.unchanged += 1,
                Outcome::Changed => summary.changed += 1,
                Outcome::WouldChange => summary.would_change += 1,
                Outcome::Failed(_) => summary.failed += 1,
                Outcome::Skipped(_) => summary.skipped += 1,
            }
        }
        summary
    }

    /// Whether any resource failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e.outcome, Outcome::Failed(_)))
    }

    /// Process exit status: `0` when nothing failed, `1` otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(self.has_failures())
    }

    /// Pretty-printed JSON list of `{resource, outcome, detail}` records.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
