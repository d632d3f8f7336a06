//! The convergence engine.
//!
//! [`Engine::apply`] turns a declared resource list into a [`RunPlan`] and
//! converges each resource in dependency order:
//!
//! 1. skip it if a dependency failed or was skipped;
//! 2. have its applier validate the attributes;
//! 3. evaluate its explicit guard;
//! 4. ask its applier for the current state;
//! 5. apply (or, in a dry run, report that it would).
//!
//! Per-resource failures are recorded in the [`RunReport`] and never abort
//! the run; only plan construction errors are fatal.
pub mod guard;
pub mod plan;
pub mod report;
pub mod spec;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ApplyError, GuardEvaluationError, PlanError, SkippedDueToDependency};
use crate::exec::Executor;
use crate::logging::Log;
use crate::operations::{FileSystemOps, SystemFileSystemOps};
use crate::platform::Platform;
use crate::resources::{ApplierRegistry, ResourceChange, ResourceState};

pub use guard::GuardVerdict;
pub use plan::{Fragment, PlannedResource, RunPlan};
pub use report::{Outcome, ReportEntry, ResourceFailure, RunReport, Summary};
pub use spec::{AttrValue, Attributes, Guard, ResourceId, ResourceKind, ResourceSpec};

/// Shared context for a convergence run.
pub struct Context {
    /// Logger for output and per-resource recording.
    pub log: Arc<dyn Log>,
    /// Detected platform information.
    pub platform: Arc<Platform>,
    /// Whether to perform a dry run (report without applying).
    pub dry_run: bool,
    /// Command executor (for testing or real system calls).
    pub executor: Arc<dyn Executor>,
    /// Filesystem operation abstraction (injectable for testing).
    pub fs_ops: Arc<dyn FileSystemOps>,
    /// Deadline for exec resources and guard commands without their own
    /// `timeout` attribute.
    pub exec_timeout: Option<Duration>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("log", &"<dyn Log>")
            .field("platform", &self.platform)
            .field("dry_run", &self.dry_run)
            .field("executor", &"<dyn Executor>")
            .field("fs_ops", &"<dyn FileSystemOps>")
            .field("exec_timeout", &self.exec_timeout)
            .finish()
    }
}

impl Context {
    /// Creates a context operating on the real filesystem with no default
    /// exec timeout.
    #[must_use]
    pub fn new(
        log: Arc<dyn Log>,
        platform: Arc<Platform>,
        executor: Arc<dyn Executor>,
        dry_run: bool,
    ) -> Self {
        Self {
            log,
            platform,
            dry_run,
            executor,
            fs_ops: Arc::new(SystemFileSystemOps),
            exec_timeout: None,
        }
    }

    /// Replace the filesystem implementation.
    #[must_use]
    pub fn with_fs_ops(mut self, fs_ops: Arc<dyn FileSystemOps>) -> Self {
        self.fs_ops = fs_ops;
        self
    }

    /// Set the default exec deadline.
    #[must_use]
    pub const fn with_exec_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.exec_timeout = timeout;
        self
    }

    /// Deadline for commands run on behalf of `spec`, guard commands
    /// included: its `timeout` attribute, else the run default.
    ///
    /// # Errors
    ///
    /// Returns an error if `timeout` is not a non-negative integer.
    pub fn deadline_for(&self, spec: &ResourceSpec) -> anyhow::Result<Option<Duration>> {
        Ok(spec
            .attributes
            .get_u64("timeout")?
            .map(Duration::from_secs)
            .or(self.exec_timeout))
    }
}

/// Converges resource lists using a set of appliers.
#[derive(Debug, Default)]
pub struct Engine {
    registry: ApplierRegistry,
}

impl Engine {
    /// Create an engine dispatching to `registry`.
    #[must_use]
    pub const fn new(registry: ApplierRegistry) -> Self {
        Self { registry }
    }

    /// Plan and converge `specs`.
    ///
    /// # Errors
    ///
    /// Returns a [`PlanError`] (cycle, duplicate, unresolved reference) before
    /// any resource is touched.  Per-resource failures are reported in the
    /// returned [`RunReport`] instead.
    pub fn apply(&self, specs: Vec<ResourceSpec>, ctx: &Context) -> Result<RunReport, PlanError> {
        let plan = RunPlan::build(specs)?;
        Ok(self.execute(&plan, ctx))
    }

    /// Converge every resource of `plan` in order.
    pub fn execute(&self, plan: &RunPlan, ctx: &Context) -> RunReport {
        ctx.log
            .stage(&format!("Converging {} resource(s)", plan.len()));

        let mut outcomes: Vec<Option<Outcome>> = vec![None; plan.len()];
        let mut report = RunReport::default();

        for resource in plan.ordered() {
            let id = resource.id();
            let (outcome, detail) = self.converge(resource, plan, &outcomes, ctx);
            log_outcome(ctx, &id, &outcome, detail.as_deref());
            ctx.log
                .record_resource(&id.to_string(), outcome.status(), detail.as_deref());
            if let Some(slot) = outcomes.get_mut(resource.declared_at) {
                *slot = Some(outcome.clone());
            }
            report.push(ReportEntry {
                resource: id,
                outcome,
                detail,
            });
        }
        report
    }

    fn converge(
        &self,
        resource: &PlannedResource,
        plan: &RunPlan,
        outcomes: &[Option<Outcome>],
        ctx: &Context,
    ) -> (Outcome, Option<String>) {
        let id = resource.id();
        let outcome_of = |i: usize| outcomes.get(i).and_then(Option::as_ref);

        if let Some(blocker) = resource
            .depends_on
            .iter()
            .copied()
            .find(|&d| outcome_of(d).is_some_and(Outcome::blocks_dependents))
        {
            let dependency = plan
                .resources()
                .get(blocker)
                .map_or_else(|| id.clone(), PlannedResource::id);
            let skipped = SkippedDueToDependency { dependency };
            let detail = skipped.to_string();
            return (Outcome::Skipped(skipped), Some(detail));
        }

        let refreshed = resource
            .watches
            .iter()
            .any(|&w| outcome_of(w).is_some_and(Outcome::is_change));

        let Some(applier) = self.registry.get(resource.spec.kind) else {
            return apply_failure(ApplyError::NoApplier { resource: id });
        };
        if let Err(e) = applier.validate(resource, ctx) {
            return apply_failure(into_apply_error(e, id));
        }

        if let Some(g) = &resource.spec.guard {
            let cwd = resource.spec.attributes.get_str("cwd").map(PathBuf::from);
            let deadline = match ctx.deadline_for(&resource.spec) {
                Ok(deadline) => deadline,
                Err(e) => return guard_failure(id, format!("{e:#}")),
            };
            match guard::evaluate(g, refreshed, cwd.as_deref(), deadline, ctx) {
                GuardVerdict::Satisfied => {
                    return (Outcome::Unchanged, Some("guard satisfied".to_string()));
                }
                GuardVerdict::Indeterminate(reason) => return guard_failure(id, reason),
                GuardVerdict::MustRun => {}
            }
        }

        let detail = match applier.current_state(resource, ctx) {
            Ok(ResourceState::Correct) => return (Outcome::Unchanged, None),
            Ok(ResourceState::Missing) => None,
            Ok(ResourceState::Incorrect { current }) => Some(format!("was {current}")),
            Err(e) => {
                // Appliers raise a typed apply error when the desired state
                // itself cannot be produced.
                return match e.downcast::<ApplyError>() {
                    Ok(typed) => apply_failure(typed),
                    Err(other) => guard_failure(id, format!("{other:#}")),
                };
            }
        };

        if ctx.dry_run {
            return (Outcome::WouldChange, detail);
        }

        match applier.apply(resource, ctx) {
            Ok(ResourceChange::Applied) => (Outcome::Changed, detail),
            Ok(ResourceChange::AlreadyCorrect) => (Outcome::Unchanged, None),
            Err(e) => apply_failure(into_apply_error(e, id)),
        }
    }
}

fn guard_failure(resource: ResourceId, reason: String) -> (Outcome, Option<String>) {
    let err = GuardEvaluationError { resource, reason };
    let detail = err.reason.clone();
    (Outcome::Failed(ResourceFailure::Guard(err)), Some(detail))
}

fn apply_failure(err: ApplyError) -> (Outcome, Option<String>) {
    let detail = match &err {
        ApplyError::Failed { reason, .. } => reason.clone(),
        other => other.to_string(),
    };
    (Outcome::Failed(ResourceFailure::Apply(err)), Some(detail))
}

/// Keep typed apply errors raised by appliers; wrap anything else.
fn into_apply_error(err: anyhow::Error, resource: ResourceId) -> ApplyError {
    match err.downcast::<ApplyError>() {
        Ok(typed) => typed,
        Err(other) => ApplyError::Failed {
            resource,
            reason: format!("{other:#}"),
        },
    }
}

fn log_outcome(ctx: &Context, id: &ResourceId, outcome: &Outcome, detail: Option<&str>) {
    let suffix = detail.map_or_else(String::new, |d| format!(" ({d})"));
    match outcome {
        Outcome::Unchanged => ctx.log.debug(&format!("{id} unchanged{suffix}")),
        Outcome::Changed => ctx.log.info(&format!("{id} changed{suffix}")),
        Outcome::WouldChange => ctx.log.dry_run(&format!("would converge {id}{suffix}")),
        Outcome::Failed(e) => ctx.log.error(&e.to_string()),
        Outcome::Skipped(s) => ctx.log.warn(&format!("{id} {s}")),
    }
}


#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use super::*;
    use crate::operations::MockFileSystemOps;
    use crate::resources::Applier;
    use crate::resources::test_helpers::MockExecutor;
    use test_helpers::context_with;

    /// Applier whose state and failures are scripted per resource name.
    #[derive(Debug, Default)]
    struct ScriptedApplier {
        correct: HashSet<String>,
        failing: HashSet<String>,
        unreadable: HashSet<String>,
        visited: Mutex<Vec<String>>,
        applied: Mutex<Vec<String>>,
    }

    impl ScriptedApplier {
        fn correct(mut self, name: &str) -> Self {
            self.correct.insert(name.to_string());
            self
        }

        fn failing(mut self, name: &str) -> Self {
            self.failing.insert(name.to_string());
            self
        }

        fn unreadable(mut self, name: &str) -> Self {
            self.unreadable.insert(name.to_string());
            self
        }
    }

    impl Applier for Arc<ScriptedApplier> {
        fn current_state(
            &self,
            resource: &PlannedResource,
            _ctx: &Context,
        ) -> anyhow::Result<ResourceState> {
            let name = &resource.spec.name;
            self.visited.lock().unwrap().push(name.clone());
            if self.unreadable.contains(name) {
                anyhow::bail!("cannot read state of {name}");
            }
            Ok(if self.correct.contains(name) {
                ResourceState::Correct
            } else {
                ResourceState::Missing
            })
        }

        fn apply(&self, resource: &PlannedResource, _ctx: &Context) -> anyhow::Result<ResourceChange> {
            let name = &resource.spec.name;
            self.applied.lock().unwrap().push(name.clone());
            if self.failing.contains(name) {
                anyhow::bail!("exit status 1");
            }
            Ok(ResourceChange::Applied)
        }
    }

    fn scripted_engine(applier: &Arc<ScriptedApplier>) -> Engine {
        Engine::new(ApplierRegistry::empty().with(ResourceKind::Exec, Arc::clone(applier)))
    }

    fn ctx() -> Context {
        context_with(
            Arc::new(MockExecutor::with_responses(vec![])),
            Arc::new(MockFileSystemOps::new()),
        )
    }

    fn exec(name: &str) -> ResourceSpec {
        ResourceSpec::new(ResourceKind::Exec, name)
    }

    fn id(name: &str) -> ResourceId {
        ResourceId::new(ResourceKind::Exec, name)
    }

    fn outcomes(report: &RunReport) -> HashMap<String, &'static str> {
        report
            .entries()
            .iter()
            .map(|e| (e.resource.name.clone(), e.outcome.label()))
            .collect()
    }

    #[test]
    fn visits_every_resource_once_in_dependency_order() {
        let applier = Arc::new(ScriptedApplier::default());
        let engine = scripted_engine(&applier);
        let specs = vec![
            exec("compile").requires(id("setup")),
            exec("setup").requires(id("package")),
            exec("package"),
            exec("unrelated"),
        ];
        let report = engine.apply(specs, &ctx()).unwrap();

        let visited = applier.visited.lock().unwrap().clone();
        assert_eq!(visited, ["package", "setup", "compile", "unrelated"]);
        assert_eq!(report.entries().len(), 4);
        assert!(
            report
                .entries()
                .iter()
                .all(|e| e.outcome == Outcome::Changed)
        );
    }

    #[test]
    fn cycle_fails_before_any_side_effect() {
        let applier = Arc::new(ScriptedApplier::default());
        let engine = scripted_engine(&applier);
        let err = engine
            .apply(
                vec![
                    exec("first"),
                    exec("a").requires(id("b")),
                    exec("b").requires(id("a")),
                ],
                &ctx(),
            )
            .unwrap_err();
        assert!(matches!(err, PlanError::Cycle(_)));
        assert!(applier.visited.lock().unwrap().is_empty());
        assert!(applier.applied.lock().unwrap().is_empty());
    }

    #[test]
    fn correct_state_is_unchanged_without_apply() {
        let applier = Arc::new(ScriptedApplier::default().correct("a"));
        let report = scripted_engine(&applier)
            .apply(vec![exec("a")], &ctx())
            .unwrap();
        assert_eq!(report.outcome(&id("a")), Some(&Outcome::Unchanged));
        assert!(applier.applied.lock().unwrap().is_empty());
    }

    #[test]
    fn failure_isolation_skips_dependents_only() {
        let applier = Arc::new(ScriptedApplier::default().failing("a"));
        let specs = vec![
            exec("a"),
            exec("c").requires(id("a")),
            exec("e").requires(id("c")),
            exec("d"),
        ];
        let report = scripted_engine(&applier).apply(specs, &ctx()).unwrap();

        let got = outcomes(&report);
        assert_eq!(got["a"], "failed");
        assert_eq!(got["c"], "skipped");
        assert_eq!(got["e"], "skipped");
        assert_eq!(got["d"], "changed");
        assert_eq!(report.exit_code(), 1);

        let Outcome::Skipped(skip) = report.outcome(&id("e")).unwrap() else {
            panic!("expected skip");
        };
        assert_eq!(skip.dependency, id("c"));
        assert_eq!(*applier.applied.lock().unwrap(), ["a", "d"]);
    }

    #[test]
    fn apply_failure_detail_carries_reason() {
        let applier = Arc::new(ScriptedApplier::default().failing("a"));
        let report = scripted_engine(&applier)
            .apply(vec![exec("a")], &ctx())
            .unwrap();
        let entry = report.get(&id("a")).unwrap();
        assert_eq!(entry.detail.as_deref(), Some("exit status 1"));
        assert!(matches!(
            entry.outcome,
            Outcome::Failed(ResourceFailure::Apply(ApplyError::Failed { .. }))
        ));
    }

    #[test]
    fn unreadable_state_is_guard_evaluation_error() {
        let applier = Arc::new(ScriptedApplier::default().unreadable("a"));
        let report = scripted_engine(&applier)
            .apply(vec![exec("a"), exec("b").requires(id("a"))], &ctx())
            .unwrap();
        assert!(matches!(
            report.outcome(&id("a")),
            Some(Outcome::Failed(ResourceFailure::Guard(_)))
        ));
        assert_eq!(outcomes(&report)["b"], "skipped");
        assert!(applier.applied.lock().unwrap().is_empty());
    }

    #[test]
    fn refresh_only_runs_when_watched_resource_changed() {
        let applier = Arc::new(ScriptedApplier::default());
        let specs = vec![
            exec("rc").notifies(id("compile")),
            exec("compile").guarded(Guard::RefreshOnly),
        ];
        let report = scripted_engine(&applier).apply(specs, &ctx()).unwrap();
        assert_eq!(report.outcome(&id("compile")), Some(&Outcome::Changed));
        assert_eq!(*applier.applied.lock().unwrap(), ["rc", "compile"]);
    }

    #[test]
    fn guard_command_gets_resource_timeout() {
        let applier = Arc::new(ScriptedApplier::default());
        let executor = Arc::new(MockExecutor::fail());
        let ctx = context_with(executor.clone(), Arc::new(MockFileSystemOps::new()))
            .with_exec_timeout(Some(Duration::from_secs(600)));
        let specs = vec![
            exec("setup")
                .with("timeout", 30_i64)
                .guarded(Guard::Unless("test -d /var/lib/gitolite/.gitolite".to_string())),
        ];
        let report = scripted_engine(&applier).apply(specs, &ctx).unwrap();
        assert_eq!(report.outcome(&id("setup")), Some(&Outcome::Changed));
        assert_eq!(executor.timeouts(), [Some(Duration::from_secs(30))]);
    }

    #[test]
    fn refresh_only_stays_idle_when_watched_resource_unchanged() {
        let applier = Arc::new(ScriptedApplier::default().correct("rc"));
        let specs = vec![
            exec("rc"),
            exec("compile")
                .subscribes(id("rc"))
                .guarded(Guard::RefreshOnly),
        ];
        let report = scripted_engine(&applier).apply(specs, &ctx()).unwrap();
        assert_eq!(report.outcome(&id("compile")), Some(&Outcome::Unchanged));
        assert!(applier.applied.lock().unwrap().is_empty());
    }

    #[test]
    fn dry_run_reports_would_change_and_propagates_refresh() {
        let applier = Arc::new(ScriptedApplier::default());
        let mut ctx = ctx();
        ctx.dry_run = true;
        let specs = vec![
            exec("rc").notifies(id("compile")),
            exec("compile").guarded(Guard::RefreshOnly),
        ];
        let report = scripted_engine(&applier).apply(specs, &ctx).unwrap();
        assert_eq!(report.outcome(&id("rc")), Some(&Outcome::WouldChange));
        assert_eq!(report.outcome(&id("compile")), Some(&Outcome::WouldChange));
        assert!(applier.applied.lock().unwrap().is_empty());
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn satisfied_guard_skips_state_check() {
        let applier = Arc::new(ScriptedApplier::default());
        let ctx = context_with(
            Arc::new(MockExecutor::with_responses(vec![])),
            Arc::new(MockFileSystemOps::new().with_dir("/var/lib/gitolite/.gitolite")),
        );
        let specs = vec![exec("setup").guarded(Guard::Creates(
            "/var/lib/gitolite/.gitolite".to_string(),
        ))];
        let report = scripted_engine(&applier).apply(specs, &ctx).unwrap();
        assert_eq!(report.outcome(&id("setup")), Some(&Outcome::Unchanged));
        assert!(applier.visited.lock().unwrap().is_empty());
    }

    #[test]
    fn indeterminate_guard_fails_resource() {
        let applier = Arc::new(ScriptedApplier::default());
        let ctx = context_with(
            Arc::new(MockExecutor::with_responses(vec![])),
            Arc::new(MockFileSystemOps::new().with_unreadable("/locked")),
        );
        let specs = vec![exec("setup").guarded(Guard::Creates("/locked".to_string()))];
        let report = scripted_engine(&applier).apply(specs, &ctx).unwrap();
        assert!(matches!(
            report.outcome(&id("setup")),
            Some(Outcome::Failed(ResourceFailure::Guard(_)))
        ));
    }

    #[test]
    fn missing_applier_fails_resource() {
        let engine = Engine::new(ApplierRegistry::empty());
        let report = engine.apply(vec![exec("a")], &ctx()).unwrap();
        assert!(matches!(
            report.outcome(&id("a")),
            Some(Outcome::Failed(ResourceFailure::Apply(ApplyError::NoApplier { .. })))
        ));
    }

    #[test]
    fn typed_apply_error_is_preserved() {
        let err = anyhow::Error::new(ApplyError::TimedOut {
            resource: id("slow"),
            seconds: 5,
        });
        assert_eq!(
            into_apply_error(err, id("other")),
            ApplyError::TimedOut {
                resource: id("slow"),
                seconds: 5
            }
        );
    }

    #[test]
    fn directory_guard_prevents_create() {
        let fs = Arc::new(MockFileSystemOps::new().with_dir("/srv/git"));
        let ctx = context_with(Arc::new(MockExecutor::with_responses(vec![])), fs.clone());
        let report = Engine::default()
            .apply(
                vec![ResourceSpec::new(ResourceKind::Directory, "/srv/git")],
                &ctx,
            )
            .unwrap();
        assert_eq!(report.entries()[0].outcome, Outcome::Unchanged);
        assert!(fs.calls().is_empty(), "create must not be invoked");
    }

    #[test]
    fn second_apply_is_idempotent() {
        let fs = Arc::new(MockFileSystemOps::new());
        let ctx = context_with(Arc::new(MockExecutor::with_responses(vec![])), fs.clone());
        let specs = vec![
            ResourceSpec::new(ResourceKind::Directory, "/srv/scripts").with("mode", "0755"),
            ResourceSpec::new(ResourceKind::File, "/srv/scripts/hello.sh")
                .with("content", "echo hello\n")
                .with("mode", "0700")
                .requires(ResourceId::new(ResourceKind::Directory, "/srv/scripts")),
        ];
        let engine = Engine::default();

        let first = engine.apply(specs.clone(), &ctx).unwrap();
        assert_eq!(first.summary().changed, 2);

        let second = engine.apply(specs, &ctx).unwrap();
        assert_eq!(second.summary().unchanged, 2);
        assert_eq!(second.summary().total(), 2);
    }

    #[test]
    fn concat_assembles_fragments_in_order_key_sequence() {
        let fs = Arc::new(MockFileSystemOps::new().with_dir("/srv"));
        let ctx = context_with(Arc::new(MockExecutor::with_responses(vec![])), fs.clone());
        let fragment = |name: &str, order: &str, content: &str| {
            ResourceSpec::new(ResourceKind::Fragment, name)
                .with("target", "/srv/upgrade-repos.sh")
                .with("order", order)
                .with("content", content)
        };
        let specs = vec![
            fragment("twenty", "20", "c\n"),
            ResourceSpec::new(ResourceKind::Concat, "/srv/upgrade-repos.sh").with("mode", "0700"),
            fragment("zero", "00", "a\n"),
            fragment("ten", "10", "b\n"),
        ];
        let report = Engine::default().apply(specs, &ctx).unwrap();
        assert!(!report.has_failures(), "{report:?}");
        assert_eq!(fs.content("/srv/upgrade-repos.sh").unwrap(), "a\nb\nc\n");
    }
}
