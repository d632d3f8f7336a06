//! Command: converge a resource manifest.
use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::cli::{ApplyOpts, GlobalOpts};
use crate::config::manifest;
use crate::logging::Logger;
use crate::platform::Platform;

/// Run the apply command.
///
/// # Errors
///
/// Returns an error if the manifest cannot be loaded or planned, or if any
/// resource fails to converge.
pub fn run(global: &GlobalOpts, opts: &ApplyOpts, log: &Arc<Logger>) -> Result<()> {
    log.info(&format!("converge {}", super::version::version()));
    let platform = Platform::detect();
    log.debug(&format!(
        "platform: {} on {}",
        platform.family, platform.hostname
    ));

    log.stage("Loading manifest");
    let specs = manifest::load(&opts.manifest)
        .with_context(|| format!("loading {}", opts.manifest.display()))?;
    log.info(&format!(
        "loaded {} resource(s) from {}",
        specs.len(),
        opts.manifest.display()
    ));

    let ctx = super::build_context(global, log, platform);
    super::converge_to_completion(specs, global, &ctx, log)
}
