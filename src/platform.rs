//! Host platform detection.
use std::fmt;

/// Linux distribution family, as far as package management is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    /// Debian, Ubuntu and derivatives (apt/dpkg).
    Debian,
    /// Fedora, RHEL, CentOS and derivatives (dnf/rpm).
    RedHat,
    /// Arch Linux and derivatives (pacman).
    Arch,
    /// Anything not recognised.
    Unknown,
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debian => write!(f, "debian"),
            Self::RedHat => write!(f, "redhat"),
            Self::Arch => write!(f, "arch"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Platform information for the current host.
#[derive(Debug, Clone)]
pub struct Platform {
    /// Distribution family, selecting the package manager.
    pub family: OsFamily,
    /// Local host name, the default for the gitolite rc `HOSTNAME`.
    pub hostname: String,
}

impl Platform {
    /// Detect the current platform.
    pub fn detect() -> Self {
        let family = std::fs::read_to_string("/etc/os-release")
            .map_or(OsFamily::Unknown, |content| parse_os_release(&content));
        Self {
            family,
            hostname: local_hostname(),
        }
    }

    /// Create a platform with explicit values.
    #[must_use]
    pub fn new(family: OsFamily, hostname: &str) -> Self {
        Self {
            family,
            hostname: hostname.to_string(),
        }
    }
}

/// Classify an `/etc/os-release` file by its `ID` and `ID_LIKE` keys.
#[must_use]
pub fn parse_os_release(content: &str) -> OsFamily {
    let mut ids: Vec<String> = Vec::new();
    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.trim() == "ID" || key.trim() == "ID_LIKE" {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            ids.extend(value.split_whitespace().map(str::to_ascii_lowercase));
        }
    }

    for id in &ids {
        match id.as_str() {
            "debian" | "ubuntu" => return OsFamily::Debian,
            "rhel" | "fedora" | "centos" | "rocky" | "almalinux" => return OsFamily::RedHat,
            "arch" | "archlinux" | "manjaro" => return OsFamily::Arch,
            _ => {}
        }
    }
    OsFamily::Unknown
}

#[cfg(unix)]
pub(crate) fn local_hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(not(unix))]
pub(crate) fn local_hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_detect_has_hostname() {
        let p = Platform::detect();
        assert!(!p.hostname.is_empty());
    }

    #[test]
    fn ubuntu_is_debian_family() {
        let content = "NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\nVERSION_ID=\"24.04\"\n";
        assert_eq!(parse_os_release(content), OsFamily::Debian);
    }

    #[test]
    fn rocky_is_redhat_family() {
        let content = "ID=\"rocky\"\nID_LIKE=\"rhel centos fedora\"\n";
        assert_eq!(parse_os_release(content), OsFamily::RedHat);
    }

    #[test]
    fn arch_is_arch_family() {
        assert_eq!(parse_os_release("ID=arch\n"), OsFamily::Arch);
    }

    #[test]
    fn id_like_is_consulted() {
        let content = "ID=linuxmint\nID_LIKE=\"ubuntu debian\"\n";
        assert_eq!(parse_os_release(content), OsFamily::Debian);
    }

    #[test]
    fn unknown_distribution() {
        assert_eq!(parse_os_release("ID=alpine\n"), OsFamily::Unknown);
        assert_eq!(parse_os_release(""), OsFamily::Unknown);
    }

    #[test]
    fn family_display() {
        assert_eq!(OsFamily::Debian.to_string(), "debian");
        assert_eq!(OsFamily::RedHat.to_string(), "redhat");
    }
}
