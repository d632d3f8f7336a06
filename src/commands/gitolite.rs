//! Command: converge the gitolite host profile.
use std::sync::Arc;

use anyhow::Result;

use crate::cli::{GitoliteOpts, GlobalOpts};
use crate::config::gitolite::GitoliteParams;
use crate::config::{manifest, validation};
use crate::gitolite::build_manifest;
use crate::logging::Logger;
use crate::platform::Platform;

/// Run the gitolite command: build the host manifest from parameters and
/// either print it or converge it.
///
/// # Errors
///
/// Returns an error if the parameters are invalid, the manifest cannot be
/// rendered, or any resource fails to converge.
#[allow(clippy::print_stdout)]
pub fn run(global: &GlobalOpts, opts: &GitoliteOpts, log: &Arc<Logger>) -> Result<()> {
    let platform = Platform::detect();

    log.stage("Loading parameters");
    let params = GitoliteParams::load(opts.params.as_deref())?
        .with_default_hostname(&platform.hostname);
    let source = opts.params.as_ref().map_or_else(
        || "defaults".to_string(),
        |p| p.display().to_string(),
    );

    let warnings = validation::validate(&params, &source)?;
    if !warnings.is_empty() {
        log.warn(&format!(
            "found {} configuration warning(s):",
            warnings.len()
        ));
        for warning in &warnings {
            log.warn(&format!(
                "  {} [{}]: {}",
                warning.source, warning.item, warning.message
            ));
        }
    }

    let specs = build_manifest(&params);
    log.info(&format!(
        "gitolite user {} at {}, {} resource(s)",
        params.user,
        params.userhome.display(),
        specs.len()
    ));

    if opts.render {
        print!("{}", manifest::to_toml(&specs)?);
        return Ok(());
    }

    let ctx = super::build_context(global, log, platform);
    super::converge_to_completion(specs, global, &ctx, log)
}
