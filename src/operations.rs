//! Filesystem operation abstractions for dependency injection.
//!
//! Provides the [`FileSystemOps`] trait so that file appliers and guards can
//! be unit-tested without touching the real filesystem.  Production code uses
//! [`SystemFileSystemOps`]; tests use `MockFileSystemOps`.

use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};

/// Type of a filesystem entry (symlinks are not followed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

/// Metadata of an existing filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    /// Entry type.
    pub kind: EntryKind,
    /// Permission bits (`0o7777` mask).
    pub mode: u32,
    /// Owning user name, if resolvable.
    pub owner: Option<String>,
    /// Owning group name, if resolvable.
    pub group: Option<String>,
}

/// Abstraction over the filesystem operations performed by appliers.
pub trait FileSystemOps: Send + Sync + std::fmt::Debug {
    /// Metadata of `path` without following symlinks; `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if existence cannot be determined (e.g. permission
    /// denied on a parent directory).
    fn metadata(&self, path: &Path) -> std::io::Result<Option<EntryMeta>>;

    /// Read the whole file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;

    /// Write `contents` to `path`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()>;

    /// Create `path` and any missing parents.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;

    /// Set the permission bits of `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if permissions cannot be changed.
    fn set_mode(&self, path: &Path, mode: u32) -> std::io::Result<()>;

    /// Change owner and/or group of `path` by name.
    ///
    /// # Errors
    ///
    /// Returns an error if a name does not resolve or the change is refused.
    fn chown(&self, path: &Path, owner: Option<&str>, group: Option<&str>) -> Result<()>;

    /// Read the target of the symbolic link at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is not a symlink or cannot be read.
    fn read_link(&self, path: &Path) -> std::io::Result<PathBuf>;

    /// Create a symbolic link at `link` pointing to `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot be created.
    fn symlink(&self, target: &Path, link: &Path) -> std::io::Result<()>;

    /// Remove the file, symlink or directory tree at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails.
    fn remove(&self, path: &Path) -> std::io::Result<()>;
}

/// Production [`FileSystemOps`] implementation that delegates to [`std::fs`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFileSystemOps;

impl FileSystemOps for SystemFileSystemOps {
    fn metadata(&self, path: &Path) -> std::io::Result<Option<EntryMeta>> {
        let meta = match std::fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let file_type = meta.file_type();
        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        Ok(Some(unix_meta(kind, &meta)))
    }

    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()> {
        std::fs::write(path, contents)
    }

    fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(path)
    }

    #[cfg(unix)]
    fn set_mode(&self, path: &Path, mode: u32) -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
    }

    #[cfg(not(unix))]
    fn set_mode(&self, _path: &Path, _mode: u32) -> std::io::Result<()> {
        Ok(())
    }

    #[cfg(unix)]
    fn chown(&self, path: &Path, owner: Option<&str>, group: Option<&str>) -> Result<()> {
        use nix::unistd::{Group, User};

        let uid = owner
            .map(|name| {
                User::from_name(name)
                    .with_context(|| format!("looking up user {name}"))?
                    .map(|u| u.uid)
                    .ok_or_else(|| anyhow::anyhow!("no such user: {name}"))
            })
            .transpose()?;
        let gid = group
            .map(|name| {
                Group::from_name(name)
                    .with_context(|| format!("looking up group {name}"))?
                    .map(|g| g.gid)
                    .ok_or_else(|| anyhow::anyhow!("no such group: {name}"))
            })
            .transpose()?;
        nix::unistd::chown(path, uid, gid)
            .with_context(|| format!("chown {}", path.display()))
    }

    #[cfg(not(unix))]
    fn chown(&self, _path: &Path, _owner: Option<&str>, _group: Option<&str>) -> Result<()> {
        anyhow::bail!("ownership changes are only supported on Unix")
    }

    fn read_link(&self, path: &Path) -> std::io::Result<PathBuf> {
        std::fs::read_link(path)
    }

    #[cfg(unix)]
    fn symlink(&self, target: &Path, link: &Path) -> std::io::Result<()> {
        std::os::unix::fs::symlink(target, link)
    }

    #[cfg(not(unix))]
    fn symlink(&self, _target: &Path, _link: &Path) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "symlinks are only supported on Unix",
        ))
    }

    fn remove(&self, path: &Path) -> std::io::Result<()> {
        let meta = std::fs::symlink_metadata(path)?;
        if meta.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        }
    }
}

#[cfg(unix)]
fn unix_meta(kind: EntryKind, meta: &std::fs::Metadata) -> EntryMeta {
    use nix::unistd::{Gid, Group, Uid, User};
    use std::os::unix::fs::MetadataExt;

    EntryMeta {
        kind,
        mode: meta.mode() & 0o7777,
        owner: User::from_uid(Uid::from_raw(meta.uid()))
            .ok()
            .flatten()
            .map(|u| u.name),
        group: Group::from_gid(Gid::from_raw(meta.gid()))
            .ok()
            .flatten()
            .map(|g| g.name),
    }
}

#[cfg(not(unix))]
fn unix_meta(kind: EntryKind, _meta: &std::fs::Metadata) -> EntryMeta {
    EntryMeta {
        kind,
        mode: 0,
        owner: None,
        group: None,
    }
}

/// In-memory [`FileSystemOps`] for unit tests.
///
/// Pre-populate entries with the builder methods, then inspect
/// [`calls`](Self::calls) to assert which mutations were performed.
///
/// ```ignore
/// let fs = MockFileSystemOps::new()
///     .with_dir("/srv/git")
///     .with_file("/srv/git/.gitolite.rc", "%RC = ();");
/// ```
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockFileSystemOps {
    entries: std::sync::Mutex<std::collections::BTreeMap<PathBuf, MockEntry>>,
    calls: std::sync::Mutex<Vec<String>>,
    unreadable: Vec<PathBuf>,
}

#[cfg(test)]
#[derive(Debug, Clone)]
struct MockEntry {
    meta: EntryMeta,
    content: Vec<u8>,
    link: Option<PathBuf>,
}

#[cfg(test)]
impl MockFileSystemOps {
    /// Create an empty mock filesystem.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, path: PathBuf, kind: EntryKind, content: Vec<u8>, link: Option<PathBuf>) {
        let mode = if kind == EntryKind::Directory { 0o755 } else { 0o644 };
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(
                path,
                MockEntry {
                    meta: EntryMeta {
                        kind,
                        mode,
                        owner: Some("root".to_string()),
                        group: Some("root".to_string()),
                    },
                    content,
                    link,
                },
            );
    }

    /// Add a directory.
    #[must_use]
    pub fn with_dir(self, path: impl Into<PathBuf>) -> Self {
        self.insert(path.into(), EntryKind::Directory, Vec::new(), None);
        self
    }

    /// Add a regular file with `content`.
    #[must_use]
    pub fn with_file(self, path: impl Into<PathBuf>, content: &str) -> Self {
        self.insert(path.into(), EntryKind::File, content.as_bytes().to_vec(), None);
        self
    }

    /// Make `metadata` fail for `path` with permission denied.
    #[must_use]
    pub fn with_unreadable(mut self, path: impl Into<PathBuf>) -> Self {
        self.unreadable.push(path.into());
        self
    }

    /// Override ownership and mode of an existing entry.
    #[must_use]
    pub fn with_meta(self, path: &str, mode: u32, owner: &str, group: &str) -> Self {
        if let Some(entry) = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get_mut(Path::new(path))
        {
            entry.meta.mode = mode;
            entry.meta.owner = Some(owner.to_string());
            entry.meta.group = Some(group.to_string());
        }
        self
    }

    /// Mutating calls performed so far, e.g. `"create_dir_all /srv"`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Current content of a file, if present.
    #[must_use]
    pub fn content(&self, path: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(Path::new(path))
            .map(|e| String::from_utf8_lossy(&e.content).to_string())
    }

    fn record(&self, call: String) {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(call);
    }

    fn with_entry<T>(
        &self,
        path: &Path,
        f: impl FnOnce(&mut MockEntry) -> T,
    ) -> std::io::Result<T> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get_mut(path)
            .map(f)
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))
    }
}

#[cfg(test)]
impl FileSystemOps for MockFileSystemOps {
    fn metadata(&self, path: &Path) -> std::io::Result<Option<EntryMeta>> {
        if self.unreadable.iter().any(|p| p == path) {
            return Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        }
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(path)
            .map(|e| e.meta.clone()))
    }

    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        self.with_entry(path, |e| e.content.clone())
    }

    fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()> {
        self.record(format!("write {}", path.display()));
        let existing = self.with_entry(path, |e| e.content = contents.to_vec());
        if existing.is_err() {
            self.insert(path.to_path_buf(), EntryKind::File, contents.to_vec(), None);
        }
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        self.record(format!("create_dir_all {}", path.display()));
        if self.with_entry(path, |_| ()).is_err() {
            self.insert(path.to_path_buf(), EntryKind::Directory, Vec::new(), None);
        }
        Ok(())
    }

    fn set_mode(&self, path: &Path, mode: u32) -> std::io::Result<()> {
        self.record(format!("set_mode {} {mode:o}", path.display()));
        self.with_entry(path, |e| e.meta.mode = mode)
    }

    fn chown(&self, path: &Path, owner: Option<&str>, group: Option<&str>) -> Result<()> {
        self.record(format!(
            "chown {} {}:{}",
            path.display(),
            owner.unwrap_or(""),
            group.unwrap_or("")
        ));
        self.with_entry(path, |e| {
            if let Some(o) = owner {
                e.meta.owner = Some(o.to_string());
            }
            if let Some(g) = group {
                e.meta.group = Some(g.to_string());
            }
        })?;
        Ok(())
    }

    fn read_link(&self, path: &Path) -> std::io::Result<PathBuf> {
        self.with_entry(path, |e| e.link.clone())?
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::InvalidInput))
    }

    fn symlink(&self, target: &Path, link: &Path) -> std::io::Result<()> {
        self.record(format!("symlink {} -> {}", link.display(), target.display()));
        self.insert(
            link.to_path_buf(),
            EntryKind::Symlink,
            Vec::new(),
            Some(target.to_path_buf()),
        );
        Ok(())
    }

    fn remove(&self, path: &Path) -> std::io::Result<()> {
        self.record(format!("remove {}", path.display()));
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))
    }
}

/// Ensure the parent directory of `path` exists.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn ensure_parent_dir(fs: &dyn FileSystemOps, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs.create_dir_all(parent)
            .with_context(|| format!("create parent: {}", parent.display()))?;
    }
    Ok(())
}
