//! Guard evaluation.
//!
//! A guard answers one question for a resource: must its action run?  The
//! answer is tri-state; [`GuardVerdict::Indeterminate`] is surfaced by the
//! engine as a [`GuardEvaluationError`](crate::error::GuardEvaluationError)
//! instead of being guessed either way.
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::Context;
use super::spec::Guard;

/// Result of evaluating a guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    /// Nothing to do; the resource is reported unchanged.
    Satisfied,
    /// The action must run.
    MustRun,
    /// The guard could not decide (unreadable path, unspawnable command).
    Indeterminate(String),
}

/// Evaluate `guard`.
///
/// `refreshed` tells whether any watched resource changed during this run;
/// only [`Guard::RefreshOnly`] consults it.  `cwd` is the working directory
/// for `unless`/`onlyif` commands and the base for relative `creates` paths;
/// `deadline` bounds those commands the same way it bounds the resource's own.
pub fn evaluate(
    guard: &Guard,
    refreshed: bool,
    cwd: Option<&Path>,
    deadline: Option<Duration>,
    ctx: &Context,
) -> GuardVerdict {
    match guard {
        Guard::Creates(path) => {
            let path = resolve(path, cwd);
            match ctx.fs_ops.metadata(&path) {
                Ok(Some(_)) => GuardVerdict::Satisfied,
                Ok(None) => GuardVerdict::MustRun,
                Err(e) => GuardVerdict::Indeterminate(format!(
                    "cannot stat {}: {e}",
                    path.display()
                )),
            }
        }
        Guard::Unless(command) => match command_succeeds(command, cwd, deadline, ctx) {
            Ok(true) => GuardVerdict::Satisfied,
            Ok(false) => GuardVerdict::MustRun,
            Err(reason) => GuardVerdict::Indeterminate(reason),
        },
        Guard::Onlyif(command) => match command_succeeds(command, cwd, deadline, ctx) {
            Ok(true) => GuardVerdict::MustRun,
            Ok(false) => GuardVerdict::Satisfied,
            Err(reason) => GuardVerdict::Indeterminate(reason),
        },
        Guard::RefreshOnly => {
            if refreshed {
                GuardVerdict::MustRun
            } else {
                GuardVerdict::Satisfied
            }
        }
        Guard::All(inner) => {
            // Evaluated in order; the first non-must-run verdict decides.
            for g in inner {
                match evaluate(g, refreshed, cwd, deadline, ctx) {
                    GuardVerdict::MustRun => {}
                    other => return other,
                }
            }
            GuardVerdict::MustRun
        }
    }
}

fn resolve(path: &str, cwd: Option<&Path>) -> PathBuf {
    let path = Path::new(path);
    match cwd {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

/// Run a guard command; `Err` carries the reason it could not be decided.
fn command_succeeds(
    command: &str,
    cwd: Option<&Path>,
    deadline: Option<Duration>,
    ctx: &Context,
) -> Result<bool, String> {
    let result = ctx
        .executor
        .run_shell(command, cwd, deadline)
        .map_err(|e| format!("cannot run '{command}': {e:#}"))?;
    if result.timed_out {
        return Err(format!("'{command}' timed out"));
    }
    Ok(result.success)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::engine::test_helpers::context_with;
    use crate::operations::MockFileSystemOps;
    use crate::resources::test_helpers::MockExecutor;
    use std::sync::Arc;

    fn fs_ctx(fs: MockFileSystemOps) -> Context {
        context_with(Arc::new(MockExecutor::with_responses(vec![])), Arc::new(fs))
    }

    fn exec_ctx(exec: MockExecutor) -> (Context, Arc<MockExecutor>) {
        let exec = Arc::new(exec);
        let ctx = context_with(exec.clone(), Arc::new(MockFileSystemOps::new()));
        (ctx, exec)
    }

    #[test]
    fn creates_satisfied_when_path_exists() {
        let ctx = fs_ctx(MockFileSystemOps::new().with_dir("/var/lib/gitolite/.gitolite"));
        let guard = Guard::Creates("/var/lib/gitolite/.gitolite".to_string());
        assert_eq!(evaluate(&guard, false, None, None, &ctx), GuardVerdict::Satisfied);
    }

    #[test]
    fn creates_must_run_when_path_missing() {
        let ctx = fs_ctx(MockFileSystemOps::new());
        let guard = Guard::Creates("/nope".to_string());
        assert_eq!(evaluate(&guard, false, None, None, &ctx), GuardVerdict::MustRun);
    }

    #[test]
    fn creates_indeterminate_when_stat_fails() {
        let ctx = fs_ctx(MockFileSystemOps::new().with_unreadable("/root/secret"));
        let guard = Guard::Creates("/root/secret".to_string());
        assert!(matches!(
            evaluate(&guard, false, None, None, &ctx),
            GuardVerdict::Indeterminate(reason) if reason.contains("/root/secret")
        ));
    }

    #[test]
    fn creates_relative_path_resolved_against_cwd() {
        let ctx = fs_ctx(MockFileSystemOps::new().with_file("/srv/marker", ""));
        let guard = Guard::Creates("marker".to_string());
        assert_eq!(
            evaluate(&guard, false, Some(Path::new("/srv")), None, &ctx),
            GuardVerdict::Satisfied
        );
    }

    #[test]
    fn unless_success_is_satisfied() {
        let (ctx, _) = exec_ctx(MockExecutor::ok(""));
        let guard = Guard::Unless("test -d /x".to_string());
        assert_eq!(evaluate(&guard, false, None, None, &ctx), GuardVerdict::Satisfied);
    }

    #[test]
    fn unless_failure_must_run() {
        let (ctx, _) = exec_ctx(MockExecutor::fail());
        let guard = Guard::Unless("test -d /x".to_string());
        assert_eq!(evaluate(&guard, false, None, None, &ctx), GuardVerdict::MustRun);
    }

    #[test]
    fn onlyif_inverts_unless() {
        let (ctx, _) = exec_ctx(MockExecutor::ok(""));
        let guard = Guard::Onlyif("true".to_string());
        assert_eq!(evaluate(&guard, false, None, None, &ctx), GuardVerdict::MustRun);

        let (ctx, _) = exec_ctx(MockExecutor::fail());
        assert_eq!(evaluate(&guard, false, None, None, &ctx), GuardVerdict::Satisfied);
    }

    #[test]
    fn unspawnable_command_is_indeterminate() {
        let (ctx, _) = exec_ctx(MockExecutor::with_responses(vec![]).with_spawn_error());
        let guard = Guard::Unless("whatever".to_string());
        assert!(matches!(
            evaluate(&guard, false, None, None, &ctx),
            GuardVerdict::Indeterminate(_)
        ));
    }

    #[test]
    fn guard_command_runs_with_deadline() {
        let (ctx, exec) = exec_ctx(MockExecutor::ok(""));
        let guard = Guard::Unless("test -d /x".to_string());
        let deadline = Some(Duration::from_secs(30));
        evaluate(&guard, false, None, deadline, &ctx);
        assert_eq!(exec.timeouts(), [deadline]);
    }

    #[test]
    fn timed_out_guard_is_indeterminate() {
        let (ctx, _) = exec_ctx(MockExecutor::ok("").with_timeout());
        let guard = Guard::Onlyif("sleep 60".to_string());
        assert!(matches!(
            evaluate(&guard, false, None, Some(Duration::from_secs(1)), &ctx),
            GuardVerdict::Indeterminate(reason) if reason.contains("timed out")
        ));
    }

    #[test]
    fn refresh_only_follows_watched_changes() {
        let ctx = fs_ctx(MockFileSystemOps::new());
        assert_eq!(
            evaluate(&Guard::RefreshOnly, true, None, None, &ctx),
            GuardVerdict::MustRun
        );
        assert_eq!(
            evaluate(&Guard::RefreshOnly, false, None, None, &ctx),
            GuardVerdict::Satisfied
        );
    }

    #[test]
    fn all_requires_every_inner_guard_to_run() {
        let (ctx, exec) = exec_ctx(MockExecutor::fail());
        let guard = Guard::All(vec![
            Guard::Unless("test -d /home/git/.gitolite".to_string()),
            Guard::Creates("/home/git/.gitolite".to_string()),
        ]);
        assert_eq!(evaluate(&guard, false, None, None, &ctx), GuardVerdict::MustRun);
        assert_eq!(exec.call_count(), 1);
    }

    #[test]
    fn all_short_circuits_on_satisfied() {
        let (ctx, exec) = exec_ctx(MockExecutor::ok(""));
        let guard = Guard::All(vec![
            Guard::Unless("test -d /x".to_string()),
            Guard::Onlyif("never evaluated".to_string()),
        ]);
        assert_eq!(evaluate(&guard, false, None, None, &ctx), GuardVerdict::Satisfied);
        assert_eq!(exec.call_count(), 1);
    }

    #[test]
    fn empty_all_must_run() {
        let ctx = fs_ctx(MockFileSystemOps::new());
        assert_eq!(
            evaluate(&Guard::All(vec![]), false, None, None, &ctx),
            GuardVerdict::MustRun
        );
    }
}
