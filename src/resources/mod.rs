//! Appliers: the only place host side effects occur.
//!
//! Each resource kind is handled by an [`Applier`] following the
//! check-then-apply pattern: [`Applier::current_state`] is a read-only probe
//! and [`Applier::apply`] makes the change.  The engine never calls `apply`
//! for a resource whose state is [`ResourceState::Correct`].
pub mod cron;
pub mod exec;
pub mod file;
pub mod package;
pub mod user;

use std::collections::HashMap;

use anyhow::Result;

use crate::engine::{Context, PlannedResource, ResourceKind};

/// State of a resource on the host.
///
/// # Examples
///
/// ```
/// use gitolite_converge::resources::ResourceState;
///
/// let missing = ResourceState::Missing;
/// let wrong = ResourceState::Incorrect { current: "mode 0644".into() };
///
/// assert_ne!(missing, ResourceState::Correct);
/// assert_ne!(wrong, missing);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState {
    /// Resource does not exist or is not present.
    Missing,
    /// Resource exists and matches the desired state.
    Correct,
    /// Resource exists but does not match the desired state.
    Incorrect {
        /// Description of the current value.
        current: String,
    },
}

/// Result of applying a resource change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceChange {
    /// Resource was created, updated or removed.
    Applied,
    /// Resource turned out to be correct already (no change made).
    AlreadyCorrect,
}

/// Check-then-apply capability for one resource kind.
pub trait Applier: Send + Sync + std::fmt::Debug {
    /// Reject attributes this applier cannot act on.
    ///
    /// Called before the guard and the state probe.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid attribute.
    fn validate(&self, _resource: &PlannedResource, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    /// Probe the current state of `resource` without side effects.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be determined; the engine records
    /// it as a guard evaluation failure.
    fn current_state(&self, resource: &PlannedResource, ctx: &Context) -> Result<ResourceState>;

    /// Bring `resource` into its desired state.
    ///
    /// # Errors
    ///
    /// Returns an error if the change fails.  Appliers may raise a typed
    /// [`ApplyError`](crate::error::ApplyError), which the engine keeps as-is.
    fn apply(&self, resource: &PlannedResource, ctx: &Context) -> Result<ResourceChange>;
}

/// Maps resource kinds to their appliers.
#[derive(Debug)]
pub struct ApplierRegistry {
    appliers: HashMap<ResourceKind, Box<dyn Applier>>,
}

impl ApplierRegistry {
    /// A registry with no appliers.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            appliers: HashMap::new(),
        }
    }

    /// Register (or replace) the applier for `kind`.
    pub fn register(&mut self, kind: ResourceKind, applier: Box<dyn Applier>) {
        self.appliers.insert(kind, applier);
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, kind: ResourceKind, applier: impl Applier + 'static) -> Self {
        self.register(kind, Box::new(applier));
        self
    }

    /// Applier for `kind`, if registered.
    #[must_use]
    pub fn get(&self, kind: ResourceKind) -> Option<&dyn Applier> {
        self.appliers.get(&kind).map(AsRef::as_ref)
    }
}

impl Default for ApplierRegistry {
    /// Every built-in applier.
    fn default() -> Self {
        Self::empty()
            .with(ResourceKind::Package, package::PackageApplier)
            .with(ResourceKind::User, user::UserApplier)
            .with(ResourceKind::File, file::FileApplier)
            .with(ResourceKind::Directory, file::FileApplier)
            .with(ResourceKind::Concat, file::FileApplier)
            .with(ResourceKind::Fragment, file::FileApplier)
            .with(ResourceKind::Cron, cron::CronApplier)
            .with(ResourceKind::Exec, exec::ExecApplier)
    }
}

/// The `ensure` attribute, or `default` when unset.
pub(crate) fn ensure_of(resource: &PlannedResource, default: &str) -> String {
    resource
        .spec
        .attributes
        .get_str("ensure")
        .unwrap_or_else(|| default.to_string())
}


#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_every_kind() {
        let registry = ApplierRegistry::default();
        for kind in ResourceKind::ALL {
            assert!(registry.get(kind).is_some(), "no applier for {kind}");
        }
    }

    #[test]
    fn empty_registry_has_no_appliers() {
        assert!(ApplierRegistry::empty().get(ResourceKind::Exec).is_none());
    }

    #[test]
    fn ensure_of_defaults() {
        use crate::engine::ResourceSpec;
        let r = test_helpers::planned(ResourceSpec::new(ResourceKind::Package, "git"));
        assert_eq!(ensure_of(&r, "present"), "present");
        let r = test_helpers::planned(
            ResourceSpec::new(ResourceKind::Package, "git").with("ensure", "absent"),
        );
        assert_eq!(ensure_of(&r, "present"), "absent");
    }
}
