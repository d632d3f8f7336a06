//! Log file location, ANSI stripping, and timestamps.
use std::fs;
use std::path::PathBuf;

/// Overrides the directory run logs are written to.
pub(super) const LOG_DIR_ENV: &str = "CONVERGE_LOG_DIR";

/// Remove CSI escape sequences (`ESC [ params final`) and bare `ESC x` pairs.
pub(super) fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\x1b' {
            out.push(c);
            continue;
        }
        if chars.next_if_eq(&'[').is_some() {
            // Parameter and intermediate bytes, then one final byte.
            while chars.next_if(|p| !('@'..='~').contains(p)).is_some() {}
        }
        chars.next();
    }
    out
}

/// Directory holding run logs, created on demand.
///
/// `$CONVERGE_LOG_DIR` wins; otherwise `$XDG_CACHE_HOME/converge` (falling
/// back to `~/.cache/converge`).
pub(super) fn log_dir() -> Option<PathBuf> {
    let dir = match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => std::env::var_os("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".cache")))?
            .join("converge"),
    };
    fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Log file for one subcommand: `<log dir>/<command>.log`.
pub(super) fn log_file_path(command: &str) -> Option<PathBuf> {
    Some(log_dir()?.join(format!("{command}.log")))
}

/// Current UTC time rendered with a [`chrono`] format string.
pub(super) fn utc_now(format: &str) -> String {
    chrono::Utc::now().format(format).to_string()
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn strip_ansi_removes_sgr() {
        assert_eq!(strip_ansi("\x1b[32m✓ Package[git]\x1b[0m"), "✓ Package[git]");
    }

    #[test]
    fn strip_ansi_removes_cursor_movement_and_escape_pairs() {
        assert_eq!(strip_ansi("\x1b[2KExec[x]"), "Exec[x]");
        assert_eq!(strip_ansi("a\x1bMb"), "ab");
    }

    #[test]
    fn strip_ansi_leaves_plain_text() {
        assert_eq!(strip_ansi("was sha256 0123abcd"), "was sha256 0123abcd");
        assert_eq!(strip_ansi(""), "");
    }

    #[test]
    fn utc_now_follows_format() {
        let stamp = utc_now("%H:%M:%S");
        assert_eq!(stamp.len(), 8);
        assert_eq!(&stamp[2..3], ":");
        assert_eq!(utc_now("%Y").len(), 4);
    }
}
