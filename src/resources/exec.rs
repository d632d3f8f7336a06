//! Shell command applier.
use std::path::PathBuf;

use anyhow::{Result, bail};

use super::{Applier, ResourceChange, ResourceState};
use crate::engine::{Context, PlannedResource};
use crate::error::ApplyError;

/// Runs a command through `/bin/sh -c`.
///
/// An exec has no state of its own; whether it runs is decided entirely by
/// its guard.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecApplier;

impl Applier for ExecApplier {
    fn validate(&self, resource: &PlannedResource, ctx: &Context) -> Result<()> {
        let attrs = &resource.spec.attributes;
        attrs.require_str("command")?;
        if let Some(cwd) = attrs.get_str("cwd")
            && !cwd.starts_with('/')
        {
            bail!("cwd '{cwd}' must be absolute");
        }
        ctx.deadline_for(&resource.spec).map(|_| ())
    }

    fn current_state(&self, _resource: &PlannedResource, _ctx: &Context) -> Result<ResourceState> {
        Ok(ResourceState::Missing)
    }

    fn apply(&self, resource: &PlannedResource, ctx: &Context) -> Result<ResourceChange> {
        let attrs = &resource.spec.attributes;
        let command = attrs.require_str("command")?;
        let cwd = attrs.get_str("cwd").map(PathBuf::from);
        let timeout = ctx.deadline_for(&resource.spec)?;

        ctx.log.debug(&format!("running: {command}"));
        let result = ctx
            .executor
            .run_shell(&command, cwd.as_deref(), timeout)?;

        if result.timed_out {
            return Err(ApplyError::TimedOut {
                resource: resource.id(),
                seconds: timeout.map_or(0, |t| t.as_secs()),
            }
            .into());
        }
        for line in result.stdout.lines().filter(|l| !l.trim().is_empty()) {
            ctx.log.debug(line);
        }
        if !result.success {
            let stderr = result.stderr.trim();
            let code = result
                .code
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            if stderr.is_empty() {
                bail!("command exited with status {code}");
            }
            bail!("command exited with status {code}: {stderr}");
        }
        Ok(ResourceChange::Applied)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::engine::test_helpers::context_with;
    use crate::engine::{ResourceKind, ResourceSpec};
    use crate::operations::MockFileSystemOps;
    use crate::resources::test_helpers::{MockExecutor, planned};
    use std::sync::Arc;
    use std::time::Duration;

    fn setup(exec: MockExecutor) -> (Context, Arc<MockExecutor>) {
        let exec = Arc::new(exec);
        (
            context_with(exec.clone(), Arc::new(MockFileSystemOps::new())),
            exec,
        )
    }

    fn gitolite_setup() -> ResourceSpec {
        ResourceSpec::new(ResourceKind::Exec, "gitolite_setup")
            .with("command", "su gitolite -c 'gitolite setup'")
            .with("cwd", "/var/lib/gitolite")
    }

    #[test]
    fn exec_is_always_missing() {
        let (ctx, exec) = setup(MockExecutor::with_responses(vec![]));
        assert_eq!(
            ExecApplier
                .current_state(&planned(gitolite_setup()), &ctx)
                .unwrap(),
            ResourceState::Missing
        );
        assert_eq!(exec.call_count(), 0);
    }

    #[test]
    fn apply_runs_command_through_shell() {
        let (ctx, exec) = setup(MockExecutor::ok(""));
        let change = ExecApplier.apply(&planned(gitolite_setup()), &ctx).unwrap();
        assert_eq!(change, ResourceChange::Applied);
        assert_eq!(exec.calls(), ["/bin/sh -c su gitolite -c 'gitolite setup'"]);
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let (ctx, _) = setup(MockExecutor::fail());
        let err = ExecApplier
            .apply(&planned(gitolite_setup()), &ctx)
            .unwrap_err();
        assert!(err.to_string().contains("exited with status 1"));
    }

    #[test]
    fn timeout_attribute_wins_over_default() {
        let (ctx, exec) = setup(MockExecutor::ok(""));
        let ctx = ctx.with_exec_timeout(Some(Duration::from_secs(600)));
        let spec = gitolite_setup().with("timeout", 30_i64);
        ExecApplier.apply(&planned(spec), &ctx).unwrap();
        assert_eq!(exec.timeouts(), [Some(Duration::from_secs(30))]);
    }

    #[test]
    fn default_timeout_used_when_unset() {
        let (ctx, exec) = setup(MockExecutor::ok(""));
        let ctx = ctx.with_exec_timeout(Some(Duration::from_secs(600)));
        ExecApplier.apply(&planned(gitolite_setup()), &ctx).unwrap();
        assert_eq!(exec.timeouts(), [Some(Duration::from_secs(600))]);
    }

    #[test]
    fn timeout_raises_typed_error() {
        let (ctx, _) = setup(MockExecutor::ok("").with_timeout());
        let spec = gitolite_setup().with("timeout", 5_i64);
        let err = ExecApplier.apply(&planned(spec), &ctx).unwrap_err();
        let typed = err.downcast::<ApplyError>().unwrap();
        assert!(matches!(typed, ApplyError::TimedOut { seconds: 5, .. }));
    }

    #[test]
    fn missing_command_rejected() {
        let (ctx, _) = setup(MockExecutor::with_responses(vec![]));
        let spec = ResourceSpec::new(ResourceKind::Exec, "noop");
        assert!(ExecApplier.validate(&planned(spec), &ctx).is_err());
    }

    #[test]
    fn relative_cwd_rejected() {
        let (ctx, _) = setup(MockExecutor::with_responses(vec![]));
        let spec = gitolite_setup().with("cwd", "relative");
        assert!(ExecApplier.validate(&planned(spec), &ctx).is_err());
    }
}
