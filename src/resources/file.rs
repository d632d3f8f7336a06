//! File-family applier: files, directories, links, and concat targets.
//!
//! Content drift is detected by comparing SHA-256 digests of the current and
//! desired bytes.  A concat's desired content is its fragments, already sorted
//! by order key at plan time, joined in sequence.
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use sha2::{Digest as _, Sha256};

use super::{Applier, ResourceChange, ResourceState, ensure_of};
use crate::engine::{Context, Fragment, PlannedResource, ResourceKind};
use crate::error::ApplyError;
use crate::operations::{EntryKind, EntryMeta, FileSystemOps, ensure_parent_dir};

/// Desired filesystem entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ensure {
    File,
    Directory,
    Link,
    Absent,
}

/// Desired state of one path, parsed from attributes.
#[derive(Debug, Clone)]
struct Desired {
    path: PathBuf,
    ensure: Ensure,
    mode: Option<u32>,
    owner: Option<String>,
    group: Option<String>,
    target: Option<PathBuf>,
}

fn parse_mode(value: &str) -> Result<u32> {
    let mode = u32::from_str_radix(value.trim_start_matches("0o"), 8)
        .with_context(|| format!("mode '{value}' is not an octal number"))?;
    if mode > 0o7777 {
        bail!("mode '{value}' is out of range");
    }
    Ok(mode)
}

/// Local path named by a `source` attribute (plain path or `file://` URL).
fn source_path(source: &str) -> Result<PathBuf> {
    if let Some(path) = source.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if source.contains("://") {
        bail!("unsupported source '{source}': only local paths and file:// URLs");
    }
    Ok(PathBuf::from(source))
}

fn check_content_source(content: Option<&String>, source: Option<&String>) -> Result<()> {
    if content.is_some() && source.is_some() {
        bail!("content and source are mutually exclusive");
    }
    if let Some(source) = source {
        source_path(source)?;
    }
    Ok(())
}

fn desired(resource: &PlannedResource) -> Result<Desired> {
    let attrs = &resource.spec.attributes;
    let default_ensure = match resource.spec.kind {
        ResourceKind::Directory => "directory",
        _ => "file",
    };
    let ensure = match ensure_of(resource, default_ensure).as_str() {
        "file" | "present" => Ensure::File,
        "directory" => Ensure::Directory,
        "link" => Ensure::Link,
        "absent" => Ensure::Absent,
        other => bail!("invalid ensure '{other}' (expected file, directory, link or absent)"),
    };
    if resource.spec.kind == ResourceKind::Concat && !matches!(ensure, Ensure::File | Ensure::Absent)
    {
        bail!("a concat target can only be present or absent");
    }
    let target = attrs.get_str("target").map(PathBuf::from);
    if ensure == Ensure::Link && target.is_none() {
        bail!("ensure 'link' requires a target");
    }
    let path = PathBuf::from(attrs.get_str("path").unwrap_or_else(|| resource.spec.name.clone()));
    if path.is_relative() {
        bail!("path '{}' must be absolute", path.display());
    }
    check_content_source(
        attrs.get_str("content").as_ref(),
        attrs.get_str("source").as_ref(),
    )?;
    Ok(Desired {
        path,
        ensure,
        mode: attrs.get_str("mode").as_deref().map(parse_mode).transpose()?,
        owner: attrs.get_str("owner"),
        group: attrs.get_str("group"),
        target,
    })
}

fn fragment_bytes(fragment: &Fragment, fs: &dyn FileSystemOps) -> Result<Vec<u8>> {
    match (&fragment.content, &fragment.source) {
        (Some(content), _) => Ok(content.as_bytes().to_vec()),
        (None, Some(source)) => {
            let path = source_path(source)?;
            fs.read(&path)
                .with_context(|| format!("reading {} for {}", path.display(), fragment.id))
        }
        (None, None) => Ok(Vec::new()),
    }
}

/// Desired file bytes, or `None` when content is not managed.
fn desired_content(resource: &PlannedResource, fs: &dyn FileSystemOps) -> Result<Option<Vec<u8>>> {
    if resource.spec.kind == ResourceKind::Concat {
        let mut out = Vec::new();
        for fragment in &resource.fragments {
            out.extend(fragment_bytes(fragment, fs)?);
        }
        return Ok(Some(out));
    }
    let attrs = &resource.spec.attributes;
    if let Some(content) = attrs.get_str("content") {
        return Ok(Some(content.into_bytes()));
    }
    if let Some(source) = attrs.get_str("source") {
        let path = source_path(&source)?;
        let bytes = fs
            .read(&path)
            .with_context(|| format!("reading source {}", path.display()))?;
        return Ok(Some(bytes));
    }
    Ok(None)
}

/// A missing or unreadable source leaves nothing to converge to, so it is
/// reported as a failed apply rather than an undecidable state.
fn unconvergeable(resource: &PlannedResource, err: &anyhow::Error) -> anyhow::Error {
    ApplyError::Failed {
        resource: resource.id(),
        reason: format!("{err:#}"),
    }
    .into()
}

fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

const fn kind_label(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::File => "file",
        EntryKind::Directory => "directory",
        EntryKind::Symlink => "link",
    }
}

/// First mode/owner/group difference, described.
fn metadata_drift(meta: &EntryMeta, want: &Desired) -> Option<String> {
    if let Some(mode) = want.mode
        && meta.mode != mode
    {
        return Some(format!("mode {:04o}", meta.mode));
    }
    if let Some(owner) = &want.owner
        && meta.owner.as_ref() != Some(owner)
    {
        return Some(format!("owner {}", meta.owner.as_deref().unwrap_or("?")));
    }
    if let Some(group) = &want.group
        && meta.group.as_ref() != Some(group)
    {
        return Some(format!("group {}", meta.group.as_deref().unwrap_or("?")));
    }
    None
}

fn stat(fs: &dyn FileSystemOps, path: &Path) -> Result<Option<EntryMeta>> {
    fs.metadata(path)
        .with_context(|| format!("cannot stat {}", path.display()))
}

/// Bring mode and ownership of an existing path in line with `want`.
fn fix_metadata(fs: &dyn FileSystemOps, want: &Desired) -> Result<()> {
    let Some(meta) = stat(fs, &want.path)? else {
        bail!("{} vanished while converging", want.path.display());
    };
    let owner = want
        .owner
        .as_deref()
        .filter(|o| meta.owner.as_deref() != Some(*o));
    let group = want
        .group
        .as_deref()
        .filter(|g| meta.group.as_deref() != Some(*g));
    if owner.is_some() || group.is_some() {
        fs.chown(&want.path, owner, group)?;
    }
    if let Some(mode) = want.mode
        && meta.mode != mode
    {
        fs.set_mode(&want.path, mode)
            .with_context(|| format!("chmod {:o} {}", mode, want.path.display()))?;
    }
    Ok(())
}

/// Remove `path` unless it is a real directory.
fn replace_non_directory(fs: &dyn FileSystemOps, path: &Path, meta: &EntryMeta) -> Result<()> {
    if meta.kind == EntryKind::Directory {
        bail!("refusing to replace directory {}", path.display());
    }
    fs.remove(path)
        .with_context(|| format!("remove existing: {}", path.display()))
}

/// Converges files, directories, links, and concat targets; fragments are
/// folded into their concat and never touch the host themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileApplier;

impl Applier for FileApplier {
    fn validate(&self, resource: &PlannedResource, _ctx: &Context) -> Result<()> {
        if resource.spec.kind == ResourceKind::Fragment {
            let attrs = &resource.spec.attributes;
            return check_content_source(
                attrs.get_str("content").as_ref(),
                attrs.get_str("source").as_ref(),
            );
        }
        desired(resource).map(|_| ())
    }

    fn current_state(&self, resource: &PlannedResource, ctx: &Context) -> Result<ResourceState> {
        if resource.spec.kind == ResourceKind::Fragment {
            return Ok(ResourceState::Correct);
        }
        let fs = ctx.fs_ops.as_ref();
        let want = desired(resource)?;
        let Some(meta) = stat(fs, &want.path)? else {
            return Ok(if want.ensure == Ensure::Absent {
                ResourceState::Correct
            } else {
                ResourceState::Missing
            });
        };

        let expected_kind = match want.ensure {
            Ensure::Absent => {
                return Ok(ResourceState::Incorrect {
                    current: kind_label(meta.kind).to_string(),
                });
            }
            Ensure::File => EntryKind::File,
            Ensure::Directory => EntryKind::Directory,
            Ensure::Link => EntryKind::Symlink,
        };
        if meta.kind != expected_kind {
            return Ok(ResourceState::Incorrect {
                current: kind_label(meta.kind).to_string(),
            });
        }

        if want.ensure == Ensure::Link {
            let current = fs
                .read_link(&want.path)
                .with_context(|| format!("cannot read link {}", want.path.display()))?;
            return Ok(if Some(&current) == want.target.as_ref() {
                ResourceState::Correct
            } else {
                ResourceState::Incorrect {
                    current: format!("link to {}", current.display()),
                }
            });
        }

        if want.ensure == Ensure::File
            && let Some(content) =
                desired_content(resource, fs).map_err(|e| unconvergeable(resource, &e))?
        {
            let existing = fs
                .read(&want.path)
                .with_context(|| format!("cannot read {}", want.path.display()))?;
            let current = digest(&existing);
            if current != digest(&content) {
                return Ok(ResourceState::Incorrect {
                    current: format!("sha256 {}", current.get(..12).unwrap_or(&current)),
                });
            }
        }

        Ok(metadata_drift(&meta, &want)
            .map_or(ResourceState::Correct, |current| ResourceState::Incorrect { current }))
    }

    fn apply(&self, resource: &PlannedResource, ctx: &Context) -> Result<ResourceChange> {
        if resource.spec.kind == ResourceKind::Fragment {
            return Ok(ResourceChange::AlreadyCorrect);
        }
        let fs = ctx.fs_ops.as_ref();
        let want = desired(resource)?;
        let existing = stat(fs, &want.path)?;

        match want.ensure {
            Ensure::Absent => {
                if existing.is_none() {
                    return Ok(ResourceChange::AlreadyCorrect);
                }
                fs.remove(&want.path)
                    .with_context(|| format!("remove {}", want.path.display()))?;
                return Ok(ResourceChange::Applied);
            }
            Ensure::Directory => {
                if let Some(meta) = existing.as_ref().filter(|m| m.kind != EntryKind::Directory) {
                    replace_non_directory(fs, &want.path, meta)?;
                }
                fs.create_dir_all(&want.path)
                    .with_context(|| format!("create directory {}", want.path.display()))?;
            }
            Ensure::Link => {
                if let Some(meta) = &existing {
                    replace_non_directory(fs, &want.path, meta)?;
                }
                ensure_parent_dir(fs, &want.path)?;
                let target = want.target.as_deref().unwrap_or_else(|| Path::new(""));
                fs.symlink(target, &want.path)
                    .with_context(|| format!("create link: {}", want.path.display()))?;
                return Ok(ResourceChange::Applied);
            }
            Ensure::File => {
                if let Some(meta) = existing.as_ref().filter(|m| m.kind != EntryKind::File) {
                    replace_non_directory(fs, &want.path, meta)?;
                }
                let content =
                    desired_content(resource, fs).map_err(|e| unconvergeable(resource, &e))?;
                let must_write = match (&content, &existing) {
                    (_, Some(meta)) if meta.kind != EntryKind::File => true,
                    (_, None) => true,
                    (Some(bytes), Some(_)) => !fs
                        .read(&want.path)
                        .is_ok_and(|current| digest(&current) == digest(bytes)),
                    (None, Some(_)) => false,
                };
                if must_write {
                    ensure_parent_dir(fs, &want.path)?;
                    fs.write(&want.path, content.as_deref().unwrap_or_default())
                        .with_context(|| format!("write {}", want.path.display()))?;
                }
            }
        }

        fix_metadata(fs, &want)?;
        Ok(ResourceChange::Applied)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::engine::test_helpers::context_with;
    use crate::engine::{ResourceSpec, RunPlan};
    use crate::operations::MockFileSystemOps;
    use crate::resources::test_helpers::{MockExecutor, planned};
    use std::sync::Arc;

    fn ctx(fs: &Arc<MockFileSystemOps>) -> Context {
        context_with(Arc::new(MockExecutor::with_responses(vec![])), fs.clone())
    }

    fn file(path: &str) -> ResourceSpec {
        ResourceSpec::new(ResourceKind::File, path)
    }

    #[test]
    fn parse_mode_accepts_octal_strings() {
        assert_eq!(parse_mode("0700").unwrap(), 0o700);
        assert_eq!(parse_mode("755").unwrap(), 0o755);
        assert!(parse_mode("0899").is_err());
        assert!(parse_mode("77777").is_err());
    }

    #[test]
    fn source_path_strips_file_scheme() {
        assert_eq!(
            source_path("file:///etc/keys/admin.pub").unwrap(),
            PathBuf::from("/etc/keys/admin.pub")
        );
        assert!(source_path("puppet:///modules/x").is_err());
    }

    #[test]
    fn missing_file_is_missing() {
        let fs = Arc::new(MockFileSystemOps::new());
        let state = FileApplier
            .current_state(&planned(file("/srv/a").with("content", "x")), &ctx(&fs))
            .unwrap();
        assert_eq!(state, ResourceState::Missing);
    }

    #[test]
    fn content_drift_detected_by_digest() {
        let fs = Arc::new(MockFileSystemOps::new().with_file("/srv/a", "old"));
        let state = FileApplier
            .current_state(&planned(file("/srv/a").with("content", "new")), &ctx(&fs))
            .unwrap();
        assert!(matches!(state, ResourceState::Incorrect { current } if current.starts_with("sha256 ")));
    }

    #[test]
    fn mode_drift_detected() {
        let fs = Arc::new(MockFileSystemOps::new().with_file("/srv/a", "x"));
        let spec = file("/srv/a").with("content", "x").with("mode", "0700");
        let state = FileApplier.current_state(&planned(spec), &ctx(&fs)).unwrap();
        assert_eq!(
            state,
            ResourceState::Incorrect {
                current: "mode 0644".to_string()
            }
        );
    }

    #[test]
    fn owner_drift_detected() {
        let fs = Arc::new(
            MockFileSystemOps::new()
                .with_dir("/var/lib/gitolite/.ssh")
                .with_meta("/var/lib/gitolite/.ssh", 0o700, "root", "root"),
        );
        let spec = ResourceSpec::new(ResourceKind::Directory, "/var/lib/gitolite/.ssh")
            .with("owner", "gitolite")
            .with("mode", "0700");
        let state = FileApplier.current_state(&planned(spec), &ctx(&fs)).unwrap();
        assert_eq!(
            state,
            ResourceState::Incorrect {
                current: "owner root".to_string()
            }
        );
    }

    #[test]
    fn apply_writes_content_and_mode() {
        let fs = Arc::new(MockFileSystemOps::new().with_dir("/srv"));
        let spec = file("/srv/.gitolite.rc")
            .with("content", "%RC = ();\n")
            .with("mode", "0700")
            .with("owner", "gitolite");
        FileApplier.apply(&planned(spec), &ctx(&fs)).unwrap();
        assert_eq!(fs.content("/srv/.gitolite.rc").unwrap(), "%RC = ();\n");
        let calls = fs.calls();
        assert!(calls.contains(&"write /srv/.gitolite.rc".to_string()));
        assert!(calls.contains(&"set_mode /srv/.gitolite.rc 700".to_string()));
        assert!(calls.contains(&"chown /srv/.gitolite.rc gitolite:".to_string()));
    }

    #[test]
    fn apply_copies_source_file() {
        let fs = Arc::new(
            MockFileSystemOps::new()
                .with_file("/etc/keys/admin.pub", "ssh-ed25519 AAAA admin")
                .with_dir("/home/git/.gitolite/keydir"),
        );
        let spec = file("/home/git/.gitolite/keydir/admin@init0.pub")
            .with("source", "file:///etc/keys/admin.pub");
        FileApplier.apply(&planned(spec), &ctx(&fs)).unwrap();
        assert_eq!(
            fs.content("/home/git/.gitolite/keydir/admin@init0.pub")
                .unwrap(),
            "ssh-ed25519 AAAA admin"
        );
    }

    #[test]
    fn unreadable_source_is_an_apply_failure() {
        let fs = Arc::new(MockFileSystemOps::new().with_file("/k.pub", "old"));
        let spec = file("/k.pub").with("source", "/missing/admin.pub");
        let err = FileApplier
            .current_state(&planned(spec), &ctx(&fs))
            .unwrap_err();
        let typed = err.downcast::<ApplyError>().unwrap();
        assert!(matches!(
            typed,
            ApplyError::Failed { ref reason, .. } if reason.contains("/missing/admin.pub")
        ));
    }

    #[test]
    fn content_and_source_are_exclusive() {
        let fs = Arc::new(MockFileSystemOps::new());
        let spec = file("/k.pub").with("content", "a").with("source", "/b");
        let err = FileApplier.validate(&planned(spec), &ctx(&fs)).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn relative_path_rejected() {
        let fs = Arc::new(MockFileSystemOps::new());
        assert!(
            FileApplier
                .validate(&planned(file("relative/path")), &ctx(&fs))
                .is_err()
        );
    }

    #[test]
    fn link_created_to_target() {
        let fs = Arc::new(MockFileSystemOps::new().with_dir("/var/lib/gitolite"));
        let spec = file("/var/lib/gitolite/repositories")
            .with("ensure", "link")
            .with("target", "/srv/git");
        let resource = planned(spec);
        assert_eq!(
            FileApplier.current_state(&resource, &ctx(&fs)).unwrap(),
            ResourceState::Missing
        );
        FileApplier.apply(&resource, &ctx(&fs)).unwrap();
        assert_eq!(
            FileApplier.current_state(&resource, &ctx(&fs)).unwrap(),
            ResourceState::Correct
        );
    }

    #[test]
    fn link_refuses_to_replace_directory() {
        let fs = Arc::new(MockFileSystemOps::new().with_dir("/var/lib/gitolite/repositories"));
        let spec = file("/var/lib/gitolite/repositories")
            .with("ensure", "link")
            .with("target", "/srv/git");
        let err = FileApplier.apply(&planned(spec), &ctx(&fs)).unwrap_err();
        assert!(err.to_string().contains("refusing to replace directory"));
    }

    #[test]
    fn link_without_target_rejected() {
        let fs = Arc::new(MockFileSystemOps::new());
        let spec = file("/x").with("ensure", "link");
        assert!(FileApplier.validate(&planned(spec), &ctx(&fs)).is_err());
    }

    #[test]
    fn absent_removes_existing_file() {
        let fs = Arc::new(MockFileSystemOps::new().with_file("/tmp/stale", "x"));
        let resource = planned(file("/tmp/stale").with("ensure", "absent"));
        assert!(matches!(
            FileApplier.current_state(&resource, &ctx(&fs)).unwrap(),
            ResourceState::Incorrect { .. }
        ));
        FileApplier.apply(&resource, &ctx(&fs)).unwrap();
        assert_eq!(fs.calls(), ["remove /tmp/stale"]);
    }

    #[test]
    fn directory_created_with_mode() {
        let fs = Arc::new(MockFileSystemOps::new());
        let spec = ResourceSpec::new(ResourceKind::Directory, "/var/lib/gitolite/scripts")
            .with("mode", "0750");
        FileApplier.apply(&planned(spec), &ctx(&fs)).unwrap();
        assert_eq!(
            fs.calls(),
            [
                "create_dir_all /var/lib/gitolite/scripts",
                "set_mode /var/lib/gitolite/scripts 750"
            ]
        );
    }

    #[test]
    fn concat_reads_fragment_sources() {
        let fs = Arc::new(
            MockFileSystemOps::new()
                .with_dir("/srv")
                .with_file("/etc/snippets/body.sh", "git fetch\n"),
        );
        let plan = RunPlan::build(vec![
            ResourceSpec::new(ResourceKind::Concat, "/srv/upgrade.sh"),
            ResourceSpec::new(ResourceKind::Fragment, "body")
                .with("target", "/srv/upgrade.sh")
                .with("order", "10")
                .with("source", "/etc/snippets/body.sh"),
            ResourceSpec::new(ResourceKind::Fragment, "header")
                .with("target", "/srv/upgrade.sh")
                .with("order", "00")
                .with("content", "#!/bin/sh\n"),
        ])
        .unwrap();
        let concat = &plan.resources()[0];
        FileApplier.apply(concat, &ctx(&fs)).unwrap();
        assert_eq!(
            fs.content("/srv/upgrade.sh").unwrap(),
            "#!/bin/sh\ngit fetch\n"
        );
        assert_eq!(
            FileApplier.current_state(concat, &ctx(&fs)).unwrap(),
            ResourceState::Correct
        );
    }

    #[test]
    fn fragment_is_always_correct() {
        let fs = Arc::new(MockFileSystemOps::new());
        let plan = RunPlan::build(vec![
            ResourceSpec::new(ResourceKind::Concat, "/x"),
            ResourceSpec::new(ResourceKind::Fragment, "f").with("target", "/x"),
        ])
        .unwrap();
        assert_eq!(
            FileApplier
                .current_state(&plan.resources()[1], &ctx(&fs))
                .unwrap(),
            ResourceState::Correct
        );
    }
}
