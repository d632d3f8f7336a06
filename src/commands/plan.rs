//! Command: print the run order of a manifest.
use std::path::Path;

use anyhow::{Context as _, Result};

use crate::cli::{GlobalOpts, OutputFormat, PlanOpts};
use crate::config::manifest;
use crate::engine::RunPlan;
use crate::error::ConvergeError;
use crate::logging::Logger;

/// Load the manifest at `path` and order it.
fn resolve(path: &Path) -> Result<RunPlan, ConvergeError> {
    Ok(RunPlan::build(manifest::load(path)?)?)
}

/// Run the plan command: resolve and print the run order.
///
/// # Errors
///
/// Returns an error if the manifest cannot be loaded or contains a cycle,
/// a duplicate, or an unresolved reference.
#[allow(clippy::print_stdout)]
pub fn run(global: &GlobalOpts, opts: &PlanOpts, log: &Logger) -> Result<()> {
    log.stage("Loading manifest");
    let plan = resolve(&opts.manifest)
        .with_context(|| format!("planning {}", opts.manifest.display()))?;
    let order: Vec<String> = plan.ordered().map(|r| r.id().to_string()).collect();

    match global.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&order)?),
        OutputFormat::Text => {
            log.stage(&format!("Run order ({} resource(s))", order.len()));
            for (i, id) in order.iter().enumerate() {
                println!("{:>3}. {id}", i + 1);
            }
        }
    }
    Ok(())
}
