//! Package applier.
use anyhow::{Result, bail};

use super::{Applier, ResourceChange, ResourceState, ensure_of};
use crate::engine::{Context, PlannedResource};
use crate::exec::Executor;
use crate::platform::OsFamily;

/// Supported package managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    /// Debian family (apt-get, queried through dpkg).
    Apt,
    /// Red Hat family (dnf, queried through rpm).
    Dnf,
    /// Arch Linux (pacman).
    Pacman,
}

impl std::fmt::Display for PackageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Apt => write!(f, "apt"),
            Self::Dnf => write!(f, "dnf"),
            Self::Pacman => write!(f, "pacman"),
        }
    }
}

impl PackageManager {
    /// Package manager for an OS family, if supported.
    #[must_use]
    pub const fn for_family(family: OsFamily) -> Option<Self> {
        match family {
            OsFamily::Debian => Some(Self::Apt),
            OsFamily::RedHat => Some(Self::Dnf),
            OsFamily::Arch => Some(Self::Pacman),
            OsFamily::Unknown => None,
        }
    }

    /// Program that installs and removes packages.
    #[must_use]
    pub const fn program(self) -> &'static str {
        match self {
            Self::Apt => "apt-get",
            Self::Dnf => "dnf",
            Self::Pacman => "pacman",
        }
    }

    /// Installed version of `name`, or `None` if not installed.
    ///
    /// # Errors
    ///
    /// Returns an error if the query command cannot be spawned.
    pub fn installed_version(self, name: &str, executor: &dyn Executor) -> Result<Option<String>> {
        let result = match self {
            Self::Apt => executor.run_unchecked(
                "dpkg-query",
                &["-W", "-f=${Status} ${Version}", name],
            )?,
            Self::Dnf => executor.run_unchecked("rpm", &["-q", "--qf", "%{VERSION}-%{RELEASE}", name])?,
            Self::Pacman => executor.run_unchecked("pacman", &["-Q", name])?,
        };
        if !result.success {
            return Ok(None);
        }
        let out = result.stdout.trim();
        Ok(match self {
            // "install ok installed 2.0-1"; removed-but-configured packages
            // report "deinstall ok config-files".
            Self::Apt => out
                .strip_prefix("install ok installed")
                .map(|v| v.trim().to_string()),
            Self::Dnf => Some(out.to_string()),
            Self::Pacman => out.split_whitespace().nth(1).map(String::from),
        })
    }

    /// Whether a newer version of the installed package `name` is available.
    ///
    /// # Errors
    ///
    /// Returns an error if the query command cannot be spawned.
    pub fn upgrade_available(self, name: &str, executor: &dyn Executor) -> Result<bool> {
        match self {
            Self::Apt => {
                let result = executor.run_unchecked("apt-cache", &["policy", name])?;
                let field = |key: &str| {
                    result
                        .stdout
                        .lines()
                        .find_map(|l| l.trim().strip_prefix(key).map(|v| v.trim().to_string()))
                };
                Ok(matches!(
                    (field("Installed:"), field("Candidate:")),
                    (Some(installed), Some(candidate))
                        if candidate != "(none)" && installed != candidate
                ))
            }
            Self::Dnf => {
                // `check-update` exits 100 when updates are available.
                let result = executor.run_unchecked("dnf", &["-q", "check-update", name])?;
                Ok(result.code == Some(100))
            }
            Self::Pacman => {
                let result = executor.run_unchecked("pacman", &["-Qu", name])?;
                Ok(result.success && !result.stdout.trim().is_empty())
            }
        }
    }

    fn install(self, name: &str, executor: &dyn Executor) -> Result<()> {
        match self {
            Self::Apt => executor.run(
                "env",
                &[
                    "DEBIAN_FRONTEND=noninteractive",
                    "apt-get",
                    "install",
                    "-y",
                    "-q",
                    name,
                ],
            )?,
            Self::Dnf => executor.run("dnf", &["install", "-y", "-q", name])?,
            Self::Pacman => executor.run("pacman", &["-S", "--needed", "--noconfirm", name])?,
        };
        Ok(())
    }

    fn upgrade(self, name: &str, executor: &dyn Executor) -> Result<()> {
        match self {
            Self::Apt => executor.run(
                "env",
                &[
                    "DEBIAN_FRONTEND=noninteractive",
                    "apt-get",
                    "install",
                    "-y",
                    "-q",
                    "--only-upgrade",
                    name,
                ],
            )?,
            Self::Dnf => executor.run("dnf", &["upgrade", "-y", "-q", name])?,
            Self::Pacman => executor.run("pacman", &["-S", "--noconfirm", name])?,
        };
        Ok(())
    }

    fn remove(self, name: &str, executor: &dyn Executor) -> Result<()> {
        match self {
            Self::Apt => executor.run(
                "env",
                &["DEBIAN_FRONTEND=noninteractive", "apt-get", "remove", "-y", "-q", name],
            )?,
            Self::Dnf => executor.run("dnf", &["remove", "-y", "-q", name])?,
            Self::Pacman => executor.run("pacman", &["-R", "--noconfirm", name])?,
        };
        Ok(())
    }
}

/// Desired package state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ensure {
    Present,
    Latest,
    Absent,
}

fn parse_ensure(resource: &PlannedResource) -> Result<Ensure> {
    match ensure_of(resource, "present").as_str() {
        "present" | "installed" => Ok(Ensure::Present),
        "latest" => Ok(Ensure::Latest),
        "absent" | "purged" => Ok(Ensure::Absent),
        other => bail!("invalid ensure '{other}' (expected present, installed, latest or absent)"),
    }
}

fn manager(ctx: &Context) -> Result<PackageManager> {
    PackageManager::for_family(ctx.platform.family).ok_or_else(|| {
        anyhow::anyhow!(
            "no supported package manager for OS family '{}'",
            ctx.platform.family
        )
    })
}

/// Installs, upgrades and removes system packages.
#[derive(Debug, Default, Clone, Copy)]
pub struct PackageApplier;

impl Applier for PackageApplier {
    fn validate(&self, resource: &PlannedResource, ctx: &Context) -> Result<()> {
        parse_ensure(resource)?;
        let pm = manager(ctx)?;
        if !ctx.executor.which(pm.program()) {
            bail!("{pm} package manager not found: '{}' is not on PATH", pm.program());
        }
        Ok(())
    }

    fn current_state(&self, resource: &PlannedResource, ctx: &Context) -> Result<ResourceState> {
        let name = &resource.spec.name;
        let pm = manager(ctx)?;
        let installed = pm.installed_version(name, ctx.executor.as_ref())?;
        Ok(match (parse_ensure(resource)?, installed) {
            (Ensure::Absent, None) | (Ensure::Present, Some(_)) => ResourceState::Correct,
            (Ensure::Absent, Some(version)) => ResourceState::Incorrect {
                current: format!("installed {version}"),
            },
            (Ensure::Present | Ensure::Latest, None) => ResourceState::Missing,
            (Ensure::Latest, Some(version)) => {
                if pm.upgrade_available(name, ctx.executor.as_ref())? {
                    ResourceState::Incorrect {
                        current: format!("installed {version}"),
                    }
                } else {
                    ResourceState::Correct
                }
            }
        })
    }

    fn apply(&self, resource: &PlannedResource, ctx: &Context) -> Result<ResourceChange> {
        let name = &resource.spec.name;
        let pm = manager(ctx)?;
        let executor = ctx.executor.as_ref();
        match parse_ensure(resource)? {
            Ensure::Present => pm.install(name, executor)?,
            Ensure::Latest => {
                if pm.installed_version(name, executor)?.is_some() {
                    pm.upgrade(name, executor)?;
                } else {
                    pm.install(name, executor)?;
                }
            }
            Ensure::Absent => pm.remove(name, executor)?,
        }
        ctx.log.debug(&format!("{pm}: converged package {name}"));
        Ok(ResourceChange::Applied)
    }
}
