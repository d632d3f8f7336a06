//! Local user account applier.
use anyhow::{Result, bail};

use super::{Applier, ResourceChange, ResourceState, ensure_of};
use crate::engine::{Context, PlannedResource};
use crate::exec::Executor;

/// One `passwd` database entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    /// Login name.
    pub name: String,
    /// Numeric user id.
    pub uid: u32,
    /// Primary group id.
    pub gid: u32,
    /// GECOS field.
    pub comment: String,
    /// Home directory.
    pub home: String,
    /// Login shell.
    pub shell: String,
}

impl PasswdEntry {
    /// Parse a `name:x:uid:gid:gecos:home:shell` line.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.trim_end().split(':');
        let name = fields.next()?.to_string();
        let _password = fields.next()?;
        let uid = fields.next()?.parse().ok()?;
        let gid = fields.next()?.parse().ok()?;
        Some(Self {
            name,
            uid,
            gid,
            comment: fields.next()?.to_string(),
            home: fields.next()?.to_string(),
            shell: fields.next().unwrap_or_default().to_string(),
        })
    }
}

/// Look up `name` in the user database.
///
/// # Errors
///
/// Returns an error if `getent` cannot be spawned or fails with a message.
pub fn lookup(name: &str, executor: &dyn Executor) -> Result<Option<PasswdEntry>> {
    let result = executor.run_unchecked("getent", &["passwd", name])?;
    if result.success {
        return Ok(result.stdout.lines().next().and_then(PasswdEntry::parse));
    }
    // An unknown key is a silent non-zero exit.
    if result.stderr.trim().is_empty() {
        return Ok(None);
    }
    bail!(
        "getent passwd {name} failed (exit {}): {}",
        result.code.unwrap_or(-1),
        result.stderr.trim()
    )
}

/// Desired user properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Desired {
    present: bool,
    comment: Option<String>,
    home: Option<String>,
    shell: Option<String>,
    managehome: bool,
    system: bool,
}

fn desired(resource: &PlannedResource) -> Result<Desired> {
    let attrs = &resource.spec.attributes;
    let present = match ensure_of(resource, "present").as_str() {
        "present" => true,
        "absent" => false,
        other => bail!("invalid ensure '{other}' (expected present or absent)"),
    };
    Ok(Desired {
        present,
        comment: attrs.get_str("comment"),
        home: attrs.get_str("home"),
        shell: attrs.get_str("shell"),
        managehome: attrs.get_bool("managehome")?.unwrap_or(false),
        system: attrs.get_bool("system")?.unwrap_or(false),
    })
}

/// First property of `entry` that differs from `want`, described.
fn drift(entry: &PasswdEntry, want: &Desired) -> Option<String> {
    let checks = [
        ("comment", &want.comment, &entry.comment),
        ("home", &want.home, &entry.home),
        ("shell", &want.shell, &entry.shell),
    ];
    checks.into_iter().find_map(|(label, wanted, actual)| {
        wanted
            .as_ref()
            .filter(|w| *w != actual)
            .map(|_| format!("{label} {actual}"))
    })
}

/// Creates, modifies and removes local user accounts.
#[derive(Debug, Default, Clone, Copy)]
pub struct UserApplier;

impl Applier for UserApplier {
    fn validate(&self, resource: &PlannedResource, _ctx: &Context) -> Result<()> {
        desired(resource).map(|_| ())
    }

    fn current_state(&self, resource: &PlannedResource, ctx: &Context) -> Result<ResourceState> {
        let want = desired(resource)?;
        let entry = lookup(&resource.spec.name, ctx.executor.as_ref())?;
        Ok(match (want.present, entry) {
            (false, None) => ResourceState::Correct,
            (false, Some(e)) => ResourceState::Incorrect {
                current: format!("present (uid {})", e.uid),
            },
            (true, None) => ResourceState::Missing,
            (true, Some(e)) => drift(&e, &want)
                .map_or(ResourceState::Correct, |current| ResourceState::Incorrect { current }),
        })
    }

    fn apply(&self, resource: &PlannedResource, ctx: &Context) -> Result<ResourceChange> {
        let name = resource.spec.name.as_str();
        let want = desired(resource)?;
        let executor = ctx.executor.as_ref();
        let existing = lookup(name, executor)?;

        if !want.present {
            if existing.is_none() {
                return Ok(ResourceChange::AlreadyCorrect);
            }
            let mut args = Vec::new();
            if want.managehome {
                args.push("-r");
            }
            args.push(name);
            executor.run("userdel", &args)?;
            return Ok(ResourceChange::Applied);
        }

        let mut args: Vec<&str> = Vec::new();
        if let Some(comment) = &want.comment {
            args.extend(["-c", comment.as_str()]);
        }
        if let Some(home) = &want.home {
            args.extend(["-d", home.as_str()]);
        }
        if let Some(shell) = &want.shell {
            args.extend(["-s", shell.as_str()]);
        }

        if existing.is_some() {
            if want.managehome && want.home.is_some() {
                args.push("-m");
            }
            args.push(name);
            executor.run("usermod", &args)?;
        } else {
            args.push(if want.managehome { "-m" } else { "-M" });
            if want.system {
                args.push("-r");
            }
            args.push(name);
            executor.run("useradd", &args)?;
        }
        Ok(ResourceChange::Applied)
    }
}
