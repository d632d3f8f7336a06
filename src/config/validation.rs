//! Checks on gitolite parameters before a manifest is built from them.
//!
//! Hard problems are returned as [`ConfigError`]s; soft ones as
//! [`ValidationWarning`]s which the caller logs and otherwise ignores.
use std::path::Path;

use super::gitolite::GitoliteParams;
use crate::error::ConfigError;

/// Minimum length for octal mode strings.
const OCTAL_MODE_MIN_LEN: usize = 3;

/// Maximum length for octal mode strings.
const OCTAL_MODE_MAX_LEN: usize = 4;

/// Log destinations gitolite understands.
const KNOWN_LOG_DESTS: &[&str] = &["normal", "repo-log", "syslog"];

/// Package `ensure` values the package applier accepts.
const KNOWN_PACKAGE_ENSURES: &[&str] = &["present", "installed", "latest", "absent", "purged"];

/// A validation warning detected during configuration loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    /// The configuration source (e.g., "gitolite.toml").
    pub source: String,
    /// The specific item or section that triggered the warning.
    pub item: String,
    /// Human-readable warning message.
    pub message: String,
}

impl ValidationWarning {
    /// Create a warning about `item` in `source`.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        item: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            item: item.into(),
            message: message.into(),
        }
    }
}

/// Validate an octal mode string such as `0077` or `755`.
///
/// Returns a description of the problem, or `None` if the mode is valid.
#[must_use]
pub fn validate_octal_mode(mode: &str) -> Option<String> {
    if !mode.chars().all(|c| c.is_ascii_digit()) {
        return Some(format!("'{mode}' must contain only digits"));
    }
    if !(OCTAL_MODE_MIN_LEN..=OCTAL_MODE_MAX_LEN).contains(&mode.len()) {
        return Some(format!(
            "'{mode}' must be {OCTAL_MODE_MIN_LEN} or {OCTAL_MODE_MAX_LEN} digits"
        ));
    }
    mode.chars()
        .find(|c| !('0'..='7').contains(c))
        .map(|c| format!("'{mode}' has invalid octal digit '{c}'"))
}

fn invalid(name: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParameter {
        name: name.to_string(),
        message: message.into(),
    }
}

fn require_absolute(name: &str, path: &Path) -> Result<(), ConfigError> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(invalid(
            name,
            format!("'{}' must be an absolute path", path.display()),
        ))
    }
}

/// Validate `params`, returning soft warnings on success.
///
/// `source` names the parameter file in warnings.
///
/// # Errors
///
/// Returns the first hard error: conflicting admin keys, an empty user,
/// relative paths, an invalid umask or an unknown package `ensure`.
pub fn validate(params: &GitoliteParams, source: &str) -> Result<Vec<ValidationWarning>, ConfigError> {
    if params.admin_key().is_some() && params.admin_key_source().is_some() {
        return Err(ConfigError::ConflictingAdminKey);
    }
    if params.user.trim().is_empty() {
        return Err(invalid("user", "must not be empty"));
    }
    if params.user.contains(char::is_whitespace) || params.user.contains(':') {
        return Err(invalid("user", format!("'{}' is not a valid user name", params.user)));
    }
    require_absolute("userhome", &params.userhome)?;
    require_absolute("reporoot", &params.reporoot())?;
    if let Some(problem) = validate_octal_mode(&params.umask) {
        return Err(invalid("umask", problem));
    }
    if !KNOWN_PACKAGE_ENSURES.contains(&params.package_ensure.as_str()) {
        return Err(invalid(
            "package_ensure",
            format!(
                "'{}' is not one of {}",
                params.package_ensure,
                KNOWN_PACKAGE_ENSURES.join(", ")
            ),
        ));
    }

    let mut warnings = Vec::new();
    if params.reporoot() == params.userhome {
        warnings.push(ValidationWarning::new(
            source,
            "reporoot",
            "reporoot equals userhome; repositories will mix with gitolite's own files",
        ));
    }
    for dest in &params.log_dest {
        if !KNOWN_LOG_DESTS.contains(&dest.as_str()) {
            warnings.push(ValidationWarning::new(
                source,
                "log_dest",
                format!("unknown log destination '{dest}'"),
            ));
        }
    }
    if params.commands.is_empty() {
        warnings.push(ValidationWarning::new(
            source,
            "commands",
            "no commands enabled; remote users cannot run any gitolite command",
        ));
    }
    if let Some(key) = params.admin_key()
        && !key.trim_start().starts_with("ssh-")
        && !key.trim_start().starts_with("ecdsa-")
    {
        warnings.push(ValidationWarning::new(
            source,
            "admin_key",
            "does not look like an OpenSSH public key",
        ));
    }
    if params.fetch_cron && !params.user_ensure {
        warnings.push(ValidationWarning::new(
            source,
            "fetch_cron",
            "fetch cron enabled but the gitolite user is not managed here",
        ));
    }
    Ok(warnings)
}
