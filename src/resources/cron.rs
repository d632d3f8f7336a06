//! Crontab entry applier.
//!
//! Managed entries are tagged with a marker comment carrying the resource
//! name; the schedule line directly follows its marker:
//!
//! ```text
//! # converge: fetch gitolite repos upstream
//! 0 * * * * /var/lib/gitolite/upgrade-repos.sh
//! ```
use anyhow::{Result, bail};

use super::{Applier, ResourceChange, ResourceState, ensure_of};
use crate::engine::{Context, PlannedResource};
use crate::exec::Executor;

const MARKER_PREFIX: &str = "# converge: ";

const SCHEDULE_FIELDS: [&str; 5] = ["minute", "hour", "monthday", "month", "weekday"];

/// Desired entry: the schedule line, or `None` when the entry must be absent.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Desired {
    user: String,
    line: Option<String>,
}

fn desired(resource: &PlannedResource) -> Result<Desired> {
    let attrs = &resource.spec.attributes;
    let user = attrs.get_str("user").unwrap_or_else(|| "root".to_string());
    if user.is_empty() {
        bail!("user must not be empty");
    }
    let line = match ensure_of(resource, "present").as_str() {
        "present" => {
            let command = attrs.require_str("command")?;
            if command.contains('\n') {
                bail!("command must be a single line");
            }
            let mut fields: Vec<String> = SCHEDULE_FIELDS
                .iter()
                .map(|f| attrs.get_str(f).unwrap_or_else(|| "*".to_string()))
                .collect();
            if let Some(bad) = fields.iter().find(|f| f.is_empty() || f.contains(' ')) {
                bail!("invalid schedule field '{bad}'");
            }
            fields.push(command);
            Some(fields.join(" "))
        }
        "absent" => None,
        other => bail!("invalid ensure '{other}' (expected present or absent)"),
    };
    Ok(Desired { user, line })
}

fn marker(name: &str) -> String {
    format!("{MARKER_PREFIX}{name}")
}

/// Current crontab of `user`; a user without one has an empty crontab.
fn read_crontab(user: &str, executor: &dyn Executor) -> Result<String> {
    let result = executor.run_unchecked("crontab", &["-l", "-u", user])?;
    if result.success {
        return Ok(result.stdout);
    }
    let stderr = result.stderr.trim();
    if stderr.is_empty() || stderr.contains("no crontab") {
        return Ok(String::new());
    }
    bail!("crontab -l -u {user} failed: {stderr}")
}

/// Schedule line under the marker for `name`, if the entry exists.
fn find_entry<'a>(crontab: &'a str, name: &str) -> Option<&'a str> {
    let marker = marker(name);
    let mut lines = crontab.lines();
    lines.find(|l| l.trim_end() == marker)?;
    Some(lines.next().unwrap_or_default())
}

/// `crontab` with the entry for `name` removed and `line` appended if given.
fn rewrite(crontab: &str, name: &str, line: Option<&str>) -> String {
    let marker = marker(name);
    let mut out = Vec::new();
    let mut skip_next = false;
    for current in crontab.lines() {
        if skip_next {
            skip_next = false;
            continue;
        }
        if current.trim_end() == marker {
            skip_next = true;
            continue;
        }
        out.push(current);
    }
    if let Some(line) = line {
        out.push(&marker);
        out.push(line);
    }
    let mut text = out.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    text
}

/// Adds, updates and removes marker-tagged crontab entries.
#[derive(Debug, Default, Clone, Copy)]
pub struct CronApplier;

impl Applier for CronApplier {
    fn validate(&self, resource: &PlannedResource, _ctx: &Context) -> Result<()> {
        if resource.spec.name.contains('\n') {
            bail!("cron name must be a single line");
        }
        desired(resource).map(|_| ())
    }

    fn current_state(&self, resource: &PlannedResource, ctx: &Context) -> Result<ResourceState> {
        let want = desired(resource)?;
        let crontab = read_crontab(&want.user, ctx.executor.as_ref())?;
        let existing = find_entry(&crontab, &resource.spec.name);
        Ok(match (want.line.as_deref(), existing) {
            (None, None) => ResourceState::Correct,
            (None, Some(_)) => ResourceState::Incorrect {
                current: "present".to_string(),
            },
            (Some(_), None) => ResourceState::Missing,
            (Some(line), Some(current)) if line == current => ResourceState::Correct,
            (Some(_), Some(current)) => ResourceState::Incorrect {
                current: current.to_string(),
            },
        })
    }

    fn apply(&self, resource: &PlannedResource, ctx: &Context) -> Result<ResourceChange> {
        let want = desired(resource)?;
        let executor = ctx.executor.as_ref();
        let crontab = read_crontab(&want.user, executor)?;
        let updated = rewrite(&crontab, &resource.spec.name, want.line.as_deref());
        if updated == crontab {
            return Ok(ResourceChange::AlreadyCorrect);
        }
        executor.run_with_stdin("crontab", &["-u", &want.user, "-"], &updated)?;
        Ok(ResourceChange::Applied)
    }
}
