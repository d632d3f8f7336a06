//! Desired state of a gitolite host, expressed as a resource list.
//!
//! [`build_manifest`] turns [`GitoliteParams`] into the resources the engine
//! converges: the package, the service account and its key pair, the
//! `gitolite setup` run, the rc file with its compile triggers, the mirror
//! upgrade script and its cron job, and optional repository relocation and
//! admin key provisioning.
pub mod rc;

use std::path::Path;

use crate::config::gitolite::GitoliteParams;
use crate::engine::{Guard, ResourceId, ResourceKind, ResourceSpec};

/// Name of the `gitolite setup` exec.
pub const SETUP: &str = "gitolite_setup";
/// Name of the `gitolite compile` exec.
pub const COMPILE: &str = "gitolite_compile";
/// Name of the post-compile trigger exec.
pub const POST_COMPILE: &str = "gitolite_trigger_post_compile";
/// Name of the upstream fetch cron job.
pub const FETCH_CRON: &str = "fetch gitolite repos upstream";

const UPGRADE_HEADER: &str = "#!/bin/sh
# Fetch upstream changes into mirrored gitolite repositories.
# Each following section updates one repository.
set -e
";

/// Quote `value` for a POSIX shell.
fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Run `command` as `user` through a login shell.
fn as_user(user: &str, command: &str) -> String {
    format!("su -l {user} -s /bin/sh -c {}", sh_quote(command))
}

fn path_str(path: &Path) -> String {
    path.display().to_string()
}

fn exec_id(name: &str) -> ResourceId {
    ResourceId::new(ResourceKind::Exec, name)
}

/// Attach `notify` edges to the compile and post-compile execs.
fn notify_compile(spec: ResourceSpec) -> ResourceSpec {
    spec.notifies(exec_id(COMPILE))
        .notifies(exec_id(POST_COMPILE))
}

/// Resources converging a gitolite host configured by `params`.
///
/// `params` should have passed
/// [`validation::validate`](crate::config::validation::validate).
#[must_use]
pub fn build_manifest(params: &GitoliteParams) -> Vec<ResourceSpec> {
    let user = params.user.as_str();
    let home = &params.userhome;
    let home_str = path_str(home);
    let package = ResourceId::new(ResourceKind::Package, params.package_name.clone());
    let user_id = ResourceId::new(ResourceKind::User, user);
    let mut specs = Vec::new();

    specs.push(
        ResourceSpec::new(ResourceKind::Package, params.package_name.clone())
            .with("ensure", params.package_ensure.as_str())
            .with("tag", "gitolite"),
    );
    let mut seen = vec![params.package_name.clone()];
    for extra in &params.additional_packages {
        if !seen.contains(extra) {
            seen.push(extra.clone());
            specs.push(ResourceSpec::new(ResourceKind::Package, extra.clone()));
        }
    }

    if params.user_ensure {
        let ssh_dir = home.join(".ssh");
        let key = ssh_dir.join("id_ed25519");
        specs.push(
            ResourceSpec::new(ResourceKind::User, user)
                .with("ensure", "present")
                .with("comment", "gitolite user")
                .with("home", home_str.as_str())
                .with("managehome", true)
                .with("system", true)
                .before(exec_id(SETUP)),
        );
        specs.push(
            ResourceSpec::new(ResourceKind::Directory, path_str(&ssh_dir))
                .with("ensure", "directory")
                .with("owner", user)
                .with("group", user)
                .with("mode", "0700")
                .requires(user_id.clone()),
        );
        let key_str = path_str(&key);
        specs.push(
            ResourceSpec::new(ResourceKind::Exec, "gitolite ssh key")
                .with(
                    "command",
                    as_user(
                        user,
                        &format!("ssh-keygen -q -t ed25519 -N '' -f {}", sh_quote(&key_str)),
                    ),
                )
                .guarded(Guard::Creates(key_str))
                .requires(ResourceId::new(ResourceKind::Directory, path_str(&ssh_dir))),
        );
    }

    let rc_path = path_str(&home.join(".gitolite.rc"));
    let mut rc = notify_compile(
        ResourceSpec::new(ResourceKind::File, rc_path)
            .with("content", rc::render(params))
            .with("mode", "0700")
            .with("owner", user)
            .before(exec_id(SETUP)),
    );
    if params.user_ensure {
        rc = rc.requires(user_id.clone());
    }
    specs.push(rc);

    let admin_dir = home.join(".gitolite");
    specs.push(
        ResourceSpec::new(ResourceKind::Exec, SETUP)
            .with("command", as_user(user, "gitolite setup -a admin"))
            .with("cwd", home_str.as_str())
            .guarded(Guard::All(vec![
                Guard::Unless(format!("test -d {}", sh_quote(&path_str(&admin_dir)))),
                Guard::Creates(path_str(&admin_dir)),
            ]))
            .requires(package),
    );

    let mut compile = ResourceSpec::new(ResourceKind::Exec, COMPILE)
        .with("command", as_user(user, "gitolite compile"))
        .guarded(Guard::RefreshOnly)
        .requires(exec_id(SETUP));

    if params.relocates_repositories() {
        let reporoot = path_str(&params.reporoot());
        let default_root = path_str(&params.default_reporoot());
        let still_a_directory = format!(
            "test -d {0} -a ! -L {0}",
            sh_quote(&default_root)
        );
        let mut dir = ResourceSpec::new(ResourceKind::Directory, reporoot.clone())
            .with("ensure", "directory")
            .with("owner", user)
            .with("mode", "0700");
        if params.user_ensure {
            dir = dir.requires(user_id);
        }
        specs.push(dir);
        specs.push(
            ResourceSpec::new(ResourceKind::Exec, "gitolite: move repositories")
                .with(
                    "command",
                    format!("mv {}/* {}/", sh_quote(&default_root), sh_quote(&reporoot)),
                )
                .guarded(Guard::Onlyif(still_a_directory.clone()))
                .requires(exec_id(SETUP))
                .requires(ResourceId::new(ResourceKind::Directory, reporoot.clone())),
        );
        specs.push(
            ResourceSpec::new(ResourceKind::Exec, "gitolite: remove repositories directory")
                .with("command", format!("rmdir {}", sh_quote(&default_root)))
                .guarded(Guard::Onlyif(still_a_directory))
                .requires(exec_id("gitolite: move repositories")),
        );
        specs.push(
            ResourceSpec::new(ResourceKind::File, default_root.clone())
                .with("ensure", "link")
                .with("target", reporoot)
                .requires(exec_id("gitolite: remove repositories directory")),
        );
        compile = compile.requires(ResourceId::new(ResourceKind::File, default_root));
    }

    specs.push(compile);
    specs.push(
        ResourceSpec::new(ResourceKind::Exec, POST_COMPILE)
            .with("command", as_user(user, "gitolite trigger POST_COMPILE"))
            .guarded(Guard::RefreshOnly)
            .requires(exec_id(COMPILE)),
    );

    let keydir = admin_dir.join("keydir");
    if let Some(source) = params.admin_key_source() {
        specs.push(notify_compile(
            ResourceSpec::new(ResourceKind::File, path_str(&keydir.join("admin@init0.pub")))
                .with("source", source)
                .with("owner", user)
                .with("mode", "0644")
                .requires(exec_id(SETUP)),
        ));
    }
    if let Some(key) = params.admin_key() {
        specs.push(notify_compile(
            ResourceSpec::new(ResourceKind::File, path_str(&keydir.join("admin@init1.pub")))
                .with("content", format!("{}\n", key.trim_end()))
                .with("owner", user)
                .with("mode", "0644")
                .requires(exec_id(SETUP)),
        ));
    }

    let mut scripts = ResourceSpec::new(ResourceKind::Directory, path_str(&home.join("scripts")))
        .with("ensure", "directory")
        .with("owner", user)
        .with("mode", "0755");
    if params.user_ensure {
        scripts = scripts.requires(ResourceId::new(ResourceKind::User, user));
    }
    specs.push(scripts);

    let upgrade = path_str(&home.join("upgrade-repos.sh"));
    specs.push(
        ResourceSpec::new(ResourceKind::Concat, upgrade.clone())
            .with("mode", "0700")
            .with("owner", "root")
            .with("group", "root"),
    );
    specs.push(
        ResourceSpec::new(ResourceKind::Fragment, format!("{upgrade} header"))
            .with("target", upgrade.as_str())
            .with("order", "00")
            .with("content", UPGRADE_HEADER),
    );
    specs.push(
        ResourceSpec::new(ResourceKind::Cron, FETCH_CRON)
            .with("ensure", if params.fetch_cron { "present" } else { "absent" })
            .with("user", "root")
            .with("command", upgrade.as_str())
            .with("minute", "0")
            .requires(ResourceId::new(ResourceKind::Concat, upgrade)),
    );

    specs
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::engine::RunPlan;
    use std::path::PathBuf;

    fn find<'a>(specs: &'a [ResourceSpec], id: &str) -> &'a ResourceSpec {
        let id: ResourceId = id.parse().unwrap();
        specs
            .iter()
            .find(|s| s.id() == id)
            .unwrap_or_else(|| panic!("{id} not in manifest"))
    }

    fn has(specs: &[ResourceSpec], id: &str) -> bool {
        let id: ResourceId = id.parse().unwrap();
        specs.iter().any(|s| s.id() == id)
    }

    fn attr(spec: &ResourceSpec, key: &str) -> String {
        spec.attributes.get_str(key).unwrap_or_default()
    }

    fn defaults() -> Vec<ResourceSpec> {
        build_manifest(&GitoliteParams::default().with_default_hostname("myhostname"))
    }

    #[test]
    fn default_manifest_plans() {
        let plan = RunPlan::build(defaults()).unwrap();
        assert!(!plan.is_empty());
    }

    #[test]
    fn package_carries_ensure_and_tag() {
        let specs = defaults();
        let pkg = find(&specs, "Package[gitolite3]");
        assert_eq!(attr(pkg, "ensure"), "present");
        assert_eq!(attr(pkg, "tag"), "gitolite");
    }

    #[test]
    fn setup_runs_as_user_once() {
        let specs = defaults();
        let setup = find(&specs, "Exec[gitolite_setup]");
        assert!(attr(setup, "command").starts_with("su "));
        assert_eq!(
            setup.require,
            ["Package[gitolite3]".parse::<ResourceId>().unwrap()]
        );
        let Some(Guard::All(guards)) = &setup.guard else {
            panic!("setup guard is not a conjunction");
        };
        assert!(matches!(&guards[0], Guard::Unless(c) if c.starts_with("test -d") && c.ends_with(".gitolite'")));
        assert!(matches!(&guards[1], Guard::Creates(p) if p.ends_with(".gitolite")));
    }

    #[test]
    fn compile_execs_are_refresh_only() {
        let specs = defaults();
        for name in ["Exec[gitolite_compile]", "Exec[gitolite_trigger_post_compile]"] {
            let exec = find(&specs, name);
            assert!(attr(exec, "command").starts_with("su "));
            assert_eq!(exec.guard, Some(Guard::RefreshOnly));
        }
    }

    #[test]
    fn rc_file_notifies_compile() {
        let specs = defaults();
        let rc = find(&specs, "File[/var/lib/gitolite/.gitolite.rc]");
        assert_eq!(attr(rc, "mode"), "0700");
        assert_eq!(attr(rc, "owner"), "gitolite");
        assert_eq!(
            rc.notify,
            [
                exec_id(COMPILE),
                exec_id(POST_COMPILE),
            ]
        );
        assert!(attr(rc, "content").contains("HOSTNAME"));
    }

    #[test]
    fn scripts_and_upgrade_script() {
        let specs = defaults();
        let scripts = find(&specs, "Directory[/var/lib/gitolite/scripts]");
        assert_eq!(attr(scripts, "mode"), "0755");
        assert_eq!(attr(scripts, "owner"), "gitolite");

        let concat = find(&specs, "Concat[/var/lib/gitolite/upgrade-repos.sh]");
        assert_eq!(attr(concat, "mode"), "0700");
        assert_eq!(attr(concat, "owner"), "root");
        assert_eq!(attr(concat, "group"), "root");

        let header = find(&specs, "Fragment[/var/lib/gitolite/upgrade-repos.sh header]");
        assert_eq!(attr(header, "target"), "/var/lib/gitolite/upgrade-repos.sh");
        assert_eq!(attr(header, "order"), "00");
    }

    #[test]
    fn user_resources_when_managed() {
        let specs = defaults();
        let user = find(&specs, "User[gitolite]");
        assert_eq!(attr(user, "comment"), "gitolite user");
        assert_eq!(attr(user, "home"), "/var/lib/gitolite");
        assert_eq!(attr(user, "managehome"), "true");
        assert_eq!(attr(user, "system"), "true");
        assert_eq!(user.before, [exec_id(SETUP)]);

        let ssh = find(&specs, "Directory[/var/lib/gitolite/.ssh]");
        assert_eq!(attr(ssh, "mode"), "0700");
        assert_eq!(attr(ssh, "group"), "gitolite");
        assert_eq!(ssh.require, ["User[gitolite]".parse::<ResourceId>().unwrap()]);

        let key = find(&specs, "Exec[gitolite ssh key]");
        assert!(attr(key, "command").contains("-t ed25519"));
        assert_eq!(
            key.guard,
            Some(Guard::Creates("/var/lib/gitolite/.ssh/id_ed25519".to_string()))
        );
    }

    #[test]
    fn no_user_resources_without_user_ensure() {
        let params = GitoliteParams {
            user_ensure: false,
            ..GitoliteParams::default()
        };
        let specs = build_manifest(&params);
        assert!(!has(&specs, "User[gitolite]"));
        assert!(!has(&specs, "Directory[/var/lib/gitolite/.ssh]"));
        assert!(!has(&specs, "Exec[gitolite ssh key]"));
        RunPlan::build(specs).unwrap();
    }

    #[test]
    fn cron_absent_by_default_present_when_enabled() {
        let specs = defaults();
        assert_eq!(attr(find(&specs, "Cron[fetch gitolite repos upstream]"), "ensure"), "absent");

        let params = GitoliteParams {
            fetch_cron: true,
            ..GitoliteParams::default()
        };
        let specs = build_manifest(&params);
        let cron = find(&specs, "Cron[fetch gitolite repos upstream]");
        assert_eq!(attr(cron, "ensure"), "present");
        assert_eq!(attr(cron, "user"), "root");
        assert_eq!(attr(cron, "command"), "/var/lib/gitolite/upgrade-repos.sh");
    }

    #[test]
    fn relocated_reporoot_moves_and_links() {
        let params = GitoliteParams {
            reporoot: Some(PathBuf::from("/srv/gitolite")),
            ..GitoliteParams::default()
        };
        let specs = build_manifest(&params);
        let dir = find(&specs, "Directory[/srv/gitolite]");
        assert_eq!(attr(dir, "owner"), "gitolite");
        assert_eq!(attr(dir, "mode"), "0700");
        assert!(attr(find(&specs, "Exec[gitolite: move repositories]"), "command").starts_with("mv "));
        assert!(
            attr(find(&specs, "Exec[gitolite: remove repositories directory]"), "command")
                .starts_with("rmdir")
        );
        let link = find(&specs, "File[/var/lib/gitolite/repositories]");
        assert_eq!(attr(link, "ensure"), "link");
        assert_eq!(attr(link, "target"), "/srv/gitolite");
        RunPlan::build(specs).unwrap();
    }

    #[test]
    fn default_reporoot_is_not_relocated() {
        assert!(!has(&defaults(), "Exec[gitolite: move repositories]"));
    }

    #[test]
    fn additional_packages_deduplicated() {
        let params = GitoliteParams {
            additional_packages: vec!["somepackage".into(), "gitolite3".into(), "somepackage".into()],
            ..GitoliteParams::default()
        };
        let specs = build_manifest(&params);
        let packages = specs.iter().filter(|s| s.kind == ResourceKind::Package).count();
        assert_eq!(packages, 2);
        assert!(has(&specs, "Package[somepackage]"));
    }

    #[test]
    fn custom_user_and_home() {
        let params = GitoliteParams {
            user: "better_user".to_string(),
            userhome: PathBuf::from("/tmp/git"),
            ..GitoliteParams::default()
        };
        let specs = build_manifest(&params);
        assert!(has(&specs, "User[better_user]"));
        assert!(has(&specs, "File[/tmp/git/.gitolite.rc]"));
        assert!(attr(find(&specs, "Exec[gitolite_setup]"), "command").contains("better_user"));
    }

    #[test]
    fn admin_key_source_file() {
        let params = GitoliteParams {
            admin_key_source: Some("file://somewhere".to_string()),
            ..GitoliteParams::default()
        };
        let specs = build_manifest(&params);
        let key = find(&specs, "File[/var/lib/gitolite/.gitolite/keydir/admin@init0.pub]");
        assert_eq!(attr(key, "source"), "file://somewhere");
        assert_eq!(key.notify.len(), 2);
        assert!(!has(&specs, "File[/var/lib/gitolite/.gitolite/keydir/admin@init1.pub]"));
    }

    #[test]
    fn admin_key_content_file() {
        let params = GitoliteParams {
            admin_key: Some("blah_fasel".to_string()),
            ..GitoliteParams::default()
        };
        let specs = build_manifest(&params);
        let key = find(&specs, "File[/var/lib/gitolite/.gitolite/keydir/admin@init1.pub]");
        assert_eq!(attr(key, "content"), "blah_fasel\n");
    }

    #[test]
    fn no_admin_key_by_default() {
        let specs = defaults();
        assert!(!specs.iter().any(|s| s.name.contains("keydir")));
    }

    #[test]
    fn sh_quote_escapes_single_quotes() {
        assert_eq!(sh_quote("it's"), r"'it'\''s'");
    }
}
