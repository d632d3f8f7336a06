//! Subcommand entry points and the context they share.
pub mod apply;
pub mod gitolite;
pub mod plan;
pub mod version;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::engine::{Context, Engine, ResourceSpec, RunReport};
use crate::exec::SystemExecutor;
use crate::logging::Logger;
use crate::platform::Platform;

/// Build the engine context for a real run.
#[must_use]
pub fn build_context(global: &GlobalOpts, log: &Arc<Logger>, platform: Platform) -> Context {
    Context::new(
        log.clone(),
        Arc::new(platform),
        Arc::new(SystemExecutor),
        global.dry_run,
    )
    .with_exec_timeout(global.exec_timeout.map(Duration::from_secs))
}

/// Converge `specs`, emit the report, and bail if any resource failed.
///
/// # Errors
///
/// Returns an error if the resources cannot be planned, the report cannot
/// be written, or one or more resources failed.
pub fn converge_to_completion(
    specs: Vec<ResourceSpec>,
    global: &GlobalOpts,
    ctx: &Context,
    log: &Logger,
) -> Result<()> {
    if global.dry_run {
        log.dry_run("no changes will be made");
    }
    let report = Engine::default().apply(specs, ctx)?;
    emit_report(&report, global, log)?;

    let count = report.summary().failed;
    if count > 0 {
        anyhow::bail!("{count} resource(s) failed");
    }
    Ok(())
}

/// Print the report in the requested format and write `--report` if given.
///
/// # Errors
///
/// Returns an error if the report cannot be serialised or written.
#[allow(clippy::print_stdout)]
pub fn emit_report(report: &RunReport, global: &GlobalOpts, log: &Logger) -> Result<()> {
    match global.format {
        OutputFormat::Text => log.print_summary(),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }
    if let Some(path) = &global.report {
        std::fs::write(path, report.to_json()? + "\n")
            .with_context(|| format!("writing report to {}", path.display()))?;
        log.debug(&format!("report written to {}", path.display()));
    }
    Ok(())
}
