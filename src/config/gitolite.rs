//! Parameters of a gitolite installation.
//!
//! Loaded from an optional TOML file; every field has a default so an empty
//! (or absent) file describes the stock installation.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_user() -> String {
    "gitolite".to_string()
}

fn default_userhome() -> PathBuf {
    PathBuf::from("/var/lib/gitolite")
}

const fn default_true() -> bool {
    true
}

fn default_umask() -> String {
    "0077".to_string()
}

fn default_git_config_keys() -> String {
    ".*".to_string()
}

fn default_log_dest() -> Vec<String> {
    vec!["normal".to_string()]
}

fn default_roles() -> Vec<String> {
    vec!["READERS".to_string(), "WRITERS".to_string()]
}

fn default_commands() -> Vec<String> {
    [
        "help",
        "desc",
        "info",
        "perms",
        "writable",
        "ssh-authkeys",
        "git-config",
        "daemon",
        "gitweb",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_package_ensure() -> String {
    "present".to_string()
}

fn default_package_name() -> String {
    "gitolite3".to_string()
}

/// Settings for one gitolite host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitoliteParams {
    /// Service account owning the repositories.
    #[serde(default = "default_user")]
    pub user: String,
    /// Home directory of the service account.
    #[serde(default = "default_userhome")]
    pub userhome: PathBuf,
    /// Where repositories live; `<userhome>/repositories` when unset.
    #[serde(default)]
    pub reporoot: Option<PathBuf>,
    /// Create the service account, its `.ssh` directory and key pair.
    #[serde(default = "default_true")]
    pub user_ensure: bool,
    /// `UMASK` for new repositories, as an octal string.
    #[serde(default = "default_umask")]
    pub umask: String,
    /// Regex of git config keys users may set.
    #[serde(default = "default_git_config_keys")]
    pub git_config_keys: String,
    /// Log extra details.
    #[serde(default)]
    pub log_extra: bool,
    /// Log destinations (`normal`, `repo-log`, `syslog`).
    #[serde(default = "default_log_dest")]
    pub log_dest: Vec<String>,
    /// Roles usable in wild repositories.
    #[serde(default = "default_roles")]
    pub roles: Vec<String>,
    /// Text shown by the `info` command.
    #[serde(default)]
    pub site_info: Option<String>,
    /// Hostname used by mirroring; the host's own name when unset.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Directory with site-local commands and triggers.
    #[serde(default)]
    pub local_code: Option<String>,
    /// Extra `%RC` keys, rendered verbatim as Perl values.
    #[serde(default)]
    pub additional_gitoliterc: BTreeMap<String, String>,
    /// Extra variables outside `%RC`, rendered verbatim as Perl values.
    #[serde(default)]
    pub additional_gitoliterc_notrc: BTreeMap<String, String>,
    /// Commands enabled for remote users.
    #[serde(default = "default_commands")]
    pub commands: Vec<String>,
    /// `ensure` of the gitolite package.
    #[serde(default = "default_package_ensure")]
    pub package_ensure: String,
    /// Name of the gitolite package.
    #[serde(default = "default_package_name")]
    pub package_name: String,
    /// Further packages to install alongside gitolite.
    #[serde(default)]
    pub additional_packages: Vec<String>,
    /// Path or `file://` URL of the initial admin public key.
    #[serde(default)]
    pub admin_key_source: Option<String>,
    /// Literal initial admin public key.
    #[serde(default)]
    pub admin_key: Option<String>,
    /// Install the cron job fetching upstream mirrors.
    #[serde(default)]
    pub fetch_cron: bool,
}

impl Default for GitoliteParams {
    fn default() -> Self {
        Self {
            user: default_user(),
            userhome: default_userhome(),
            reporoot: None,
            user_ensure: true,
            umask: default_umask(),
            git_config_keys: default_git_config_keys(),
            log_extra: false,
            log_dest: default_log_dest(),
            roles: default_roles(),
            site_info: None,
            hostname: None,
            local_code: None,
            additional_gitoliterc: BTreeMap::new(),
            additional_gitoliterc_notrc: BTreeMap::new(),
            commands: default_commands(),
            package_ensure: default_package_ensure(),
            package_name: default_package_name(),
            additional_packages: Vec::new(),
            admin_key_source: None,
            admin_key: None,
            fetch_cron: false,
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.trim().is_empty())
}

impl GitoliteParams {
    /// Load parameters from `path`, or defaults when no path is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::InvalidManifest {
            file: path.display().to_string(),
            message: e.message().to_string(),
        })
    }

    /// Fill `hostname` with `host` when it was not configured.
    #[must_use]
    pub fn with_default_hostname(mut self, host: &str) -> Self {
        if non_empty(self.hostname.as_ref()).is_none() {
            self.hostname = Some(host.to_string());
        }
        self
    }

    /// Effective repository root.
    #[must_use]
    pub fn reporoot(&self) -> PathBuf {
        self.reporoot
            .clone()
            .unwrap_or_else(|| self.default_reporoot())
    }

    /// `<userhome>/repositories`, where `gitolite setup` puts repositories.
    #[must_use]
    pub fn default_reporoot(&self) -> PathBuf {
        self.userhome.join("repositories")
    }

    /// Whether repositories are relocated out of the home directory.
    #[must_use]
    pub fn relocates_repositories(&self) -> bool {
        self.reporoot() != self.default_reporoot()
    }

    /// Admin key source, ignoring blank values.
    #[must_use]
    pub fn admin_key_source(&self) -> Option<&str> {
        non_empty(self.admin_key_source.as_ref())
    }

    /// Literal admin key, ignoring blank values.
    #[must_use]
    pub fn admin_key(&self) -> Option<&str> {
        non_empty(self.admin_key.as_ref())
    }

    /// Site info, ignoring blank values.
    #[must_use]
    pub fn site_info(&self) -> Option<&str> {
        non_empty(self.site_info.as_ref())
    }

    /// Local code directory, ignoring blank values.
    #[must_use]
    pub fn local_code(&self) -> Option<&str> {
        non_empty(self.local_code.as_ref())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn empty_file_yields_defaults() {
        let params: GitoliteParams = toml::from_str("").unwrap();
        assert_eq!(params, GitoliteParams::default());
        assert_eq!(params.user, "gitolite");
        assert_eq!(params.umask, "0077");
        assert_eq!(params.commands.len(), 9);
        assert_eq!(
            params.reporoot(),
            PathBuf::from("/var/lib/gitolite/repositories")
        );
        assert!(!params.relocates_repositories());
    }

    #[test]
    fn reporoot_follows_userhome() {
        let params: GitoliteParams = toml::from_str("userhome = \"/tmp/git\"").unwrap();
        assert_eq!(params.reporoot(), PathBuf::from("/tmp/git/repositories"));
    }

    #[test]
    fn custom_reporoot_relocates() {
        let params: GitoliteParams = toml::from_str("reporoot = \"/srv/gitolite\"").unwrap();
        assert!(params.relocates_repositories());
    }

    #[test]
    fn blank_admin_key_is_unset() {
        let params: GitoliteParams =
            toml::from_str("admin_key = \"\"\nadmin_key_source = \" \"").unwrap();
        assert_eq!(params.admin_key(), None);
        assert_eq!(params.admin_key_source(), None);
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<GitoliteParams>("usr = \"git\"").is_err());
    }

    #[test]
    fn hostname_defaults_to_host() {
        let params = GitoliteParams::default().with_default_hostname("git01");
        assert_eq!(params.hostname.as_deref(), Some("git01"));
        let params = GitoliteParams {
            hostname: Some("mirror".to_string()),
            ..GitoliteParams::default()
        }
        .with_default_hostname("git01");
        assert_eq!(params.hostname.as_deref(), Some("mirror"));
    }

    #[test]
    fn load_without_path_is_default() {
        assert_eq!(GitoliteParams::load(None).unwrap(), GitoliteParams::default());
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "user = \"git\"\nfetch_cron = true").unwrap();
        let params = GitoliteParams::load(Some(file.path())).unwrap();
        assert_eq!(params.user, "git");
        assert!(params.fetch_cron);
    }
}
