#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
//! Integration tests for converging resource manifests.
//!
//! These tests run the engine against a temporary directory and the real
//! `/bin/sh`, covering idempotence, failure isolation, timeouts, dry runs,
//! and refresh propagation.

mod common;

use common::{TestHost, TestHostBuilder, mode_of};
use gitolite_converge::config::manifest;
use gitolite_converge::engine::{
    Engine, Guard, Outcome, ResourceFailure, ResourceId, ResourceKind, ResourceSpec,
};
use gitolite_converge::error::{ApplyError, PlanError};

fn id(kind: ResourceKind, name: &str) -> ResourceId {
    ResourceId::new(kind, name)
}

/// Directory, file, concat with two fragments, and a guarded exec.
fn site(host: &TestHost) -> Vec<ResourceSpec> {
    let dir = host.path_str("srv");
    let file = host.path_str("srv/motd");
    let concat = host.path_str("srv/script.sh");
    let marker = host.path_str("srv/initialised");
    vec![
        ResourceSpec::new(ResourceKind::Directory, dir.clone()).with("mode", "0755"),
        ResourceSpec::new(ResourceKind::File, file)
            .with("content", "hello\n")
            .with("mode", "0600")
            .requires(id(ResourceKind::Directory, &dir)),
        ResourceSpec::new(ResourceKind::Concat, concat.clone())
            .with("mode", "0700")
            .requires(id(ResourceKind::Directory, &dir)),
        ResourceSpec::new(ResourceKind::Fragment, "script body")
            .with("target", concat.clone())
            .with("order", "10")
            .with("content", "echo body\n"),
        ResourceSpec::new(ResourceKind::Fragment, "script header")
            .with("target", concat)
            .with("order", "00")
            .with("content", "#!/bin/sh\n"),
        ResourceSpec::new(ResourceKind::Exec, "initialise")
            .with("command", format!("touch '{marker}'"))
            .guarded(Guard::Creates(marker))
            .requires(id(ResourceKind::Directory, &dir)),
    ]
}

#[test]
fn first_apply_changes_then_second_apply_is_idempotent() {
    let host = TestHost::new();

    let first = host.converge(site(&host));
    assert!(!first.has_failures(), "{:?}", first.entries());
    let summary = first.summary();
    assert_eq!(summary.total(), 6);
    // Fragments never change anything themselves.
    assert_eq!(summary.changed, 4);
    assert_eq!(summary.unchanged, 2);

    assert_eq!(host.read("srv/motd"), "hello\n");
    assert_eq!(host.read("srv/script.sh"), "#!/bin/sh\necho body\n");
    assert!(host.exists("srv/initialised"));
    assert_eq!(mode_of(&host.path("srv/motd")), 0o600);
    assert_eq!(mode_of(&host.path("srv/script.sh")), 0o700);

    let second = host.converge(site(&host));
    let summary = second.summary();
    assert_eq!(summary.unchanged, 6, "{:?}", second.entries());
    assert_eq!(summary.changed, 0);
    assert_eq!(second.exit_code(), 0);
}

#[test]
fn drifted_file_content_is_restored() {
    let host = TestHost::new();
    host.converge(site(&host));
    host.write("srv/motd", "tampered\n");

    let report = host.converge(site(&host));
    let motd = id(ResourceKind::File, &host.path_str("srv/motd"));
    assert_eq!(report.outcome(&motd), Some(&Outcome::Changed));
    assert!(report.get(&motd).unwrap().detail.as_deref().unwrap().starts_with("was sha256 "));
    assert_eq!(host.read("srv/motd"), "hello\n");
}

#[test]
fn failure_skips_dependents_but_not_independent_resources() {
    let host = TestHost::new();
    let independent = host.path_str("independent");
    let dependent = host.path_str("dependent");
    let specs = vec![
        ResourceSpec::new(ResourceKind::Exec, "broken").with("command", "echo oops >&2; exit 3"),
        ResourceSpec::new(ResourceKind::File, dependent)
            .with("content", "never\n")
            .requires(id(ResourceKind::Exec, "broken")),
        ResourceSpec::new(ResourceKind::Exec, "after dependent")
            .with("command", "true")
            .requires(id(ResourceKind::File, &host.path_str("dependent"))),
        ResourceSpec::new(ResourceKind::File, independent).with("content", "still here\n"),
    ];

    let report = host.converge(specs);

    let broken = id(ResourceKind::Exec, "broken");
    let entry = report.get(&broken).unwrap();
    assert!(matches!(
        &entry.outcome,
        Outcome::Failed(ResourceFailure::Apply(ApplyError::Failed { .. }))
    ));
    assert_eq!(
        entry.detail.as_deref(),
        Some("command exited with status 3: oops")
    );

    let dependent = report
        .outcome(&id(ResourceKind::File, &host.path_str("dependent")))
        .unwrap();
    assert!(matches!(dependent, Outcome::Skipped(s) if s.dependency == broken));
    // Transitive: blocked by the skipped file, not the failed exec.
    let transitive = report
        .outcome(&id(ResourceKind::Exec, "after dependent"))
        .unwrap();
    assert!(matches!(transitive, Outcome::Skipped(s) if s.dependency.kind == ResourceKind::File));

    assert_eq!(
        report.outcome(&id(ResourceKind::File, &host.path_str("independent"))),
        Some(&Outcome::Changed)
    );
    assert!(!host.exists("dependent"));
    assert_eq!(host.read("independent"), "still here\n");

    assert!(report.has_failures());
    assert_eq!(report.exit_code(), 1);
    let json = report.to_json().unwrap();
    assert!(json.contains(r#""outcome": "failed""#));
    assert!(json.contains(r#""outcome": "skipped""#));
}

#[test]
fn exec_exceeding_timeout_is_killed_and_reported() {
    let host = TestHost::new();
    let specs = vec![
        ResourceSpec::new(ResourceKind::Exec, "slow")
            .with("command", "sleep 5")
            .with("timeout", 1_i64),
    ];

    let report = host.converge(specs);

    let slow = id(ResourceKind::Exec, "slow");
    let entry = report.get(&slow).unwrap();
    assert!(matches!(
        &entry.outcome,
        Outcome::Failed(ResourceFailure::Apply(ApplyError::TimedOut { seconds: 1, .. }))
    ));
    assert!(entry.detail.as_deref().unwrap().contains("timed out"));
}

#[test]
fn default_exec_timeout_applies_without_attribute() {
    let host = TestHostBuilder::new().exec_timeout(1).build();
    let specs = vec![ResourceSpec::new(ResourceKind::Exec, "slow").with("command", "sleep 5")];

    let report = host.converge(specs);

    assert!(matches!(
        report.outcome(&id(ResourceKind::Exec, "slow")),
        Some(Outcome::Failed(ResourceFailure::Apply(ApplyError::TimedOut { .. })))
    ));
}

#[test]
fn dry_run_reports_would_change_and_touches_nothing() {
    let host = TestHostBuilder::new().dry_run().build();
    let dir = host.path_str("srv");
    let file = host.path_str("srv/config");
    let specs = vec![
        ResourceSpec::new(ResourceKind::Directory, dir.clone()),
        ResourceSpec::new(ResourceKind::File, file.clone())
            .with("content", "x = 1\n")
            .requires(id(ResourceKind::Directory, &dir)),
        ResourceSpec::new(ResourceKind::Exec, "reload")
            .with("command", format!("touch '{}'", host.path_str("reloaded")))
            .guarded(Guard::RefreshOnly)
            .subscribes(id(ResourceKind::File, &file)),
        ResourceSpec::new(ResourceKind::Exec, "idle")
            .with("command", "true")
            .guarded(Guard::RefreshOnly),
    ];

    let report = host.converge(specs);

    assert_eq!(
        report.outcome(&id(ResourceKind::File, &file)),
        Some(&Outcome::WouldChange)
    );
    // A would-be change still refreshes its watchers.
    assert_eq!(
        report.outcome(&id(ResourceKind::Exec, "reload")),
        Some(&Outcome::WouldChange)
    );
    assert_eq!(
        report.outcome(&id(ResourceKind::Exec, "idle")),
        Some(&Outcome::Unchanged)
    );
    assert_eq!(report.summary().would_change, 3);
    assert!(!host.exists("srv"));
    assert!(!host.exists("reloaded"));
    assert_eq!(report.exit_code(), 0);
}

#[test]
fn cycle_is_rejected_before_anything_runs() {
    let host = TestHost::new();
    let marker = host.path_str("ran");
    let specs = vec![
        ResourceSpec::new(ResourceKind::Exec, "a")
            .with("command", format!("touch '{marker}'"))
            .requires(id(ResourceKind::Exec, "b")),
        ResourceSpec::new(ResourceKind::Exec, "b")
            .with("command", format!("touch '{marker}'"))
            .requires(id(ResourceKind::Exec, "a")),
    ];

    let (ctx, _log) = host.context();
    let err = Engine::default().apply(specs, &ctx).unwrap_err();

    let PlanError::Cycle(cycle) = err else {
        panic!("expected a cycle, got {err:?}");
    };
    assert_eq!(cycle.path.len(), 2);
    assert!(!host.exists("ran"));
}

#[test]
fn notified_refresh_only_exec_runs_once_across_runs() {
    let host = TestHost::new();
    let log_file = host.path_str("refresh.log");
    let specs = || {
        vec![
            ResourceSpec::new(ResourceKind::File, host.path_str("app.conf"))
                .with("content", "port = 80\n")
                .notifies(id(ResourceKind::Exec, "restart")),
            ResourceSpec::new(ResourceKind::Exec, "restart")
                .with("command", format!("echo restarted >> '{log_file}'"))
                .guarded(Guard::RefreshOnly),
        ]
    };

    let first = host.converge(specs());
    assert_eq!(
        first.outcome(&id(ResourceKind::Exec, "restart")),
        Some(&Outcome::Changed)
    );

    let second = host.converge(specs());
    let restart = second.get(&id(ResourceKind::Exec, "restart")).unwrap();
    assert_eq!(restart.outcome, Outcome::Unchanged);
    assert_eq!(restart.detail.as_deref(), Some("guard satisfied"));

    assert_eq!(host.read("refresh.log"), "restarted\n");
}

#[test]
fn unless_guard_runs_in_cwd() {
    let host = TestHost::new();
    host.write("work/present", "");
    let cwd = host.path_str("work");
    let specs = vec![
        ResourceSpec::new(ResourceKind::Exec, "skipped by unless")
            .with("command", "touch ran")
            .with("cwd", cwd.clone())
            .guarded(Guard::Unless("test -f present".to_string())),
        ResourceSpec::new(ResourceKind::Exec, "allowed by onlyif")
            .with("command", "touch ran-onlyif")
            .with("cwd", cwd)
            .guarded(Guard::Onlyif("test -f present".to_string())),
    ];

    let report = host.converge(specs);

    assert_eq!(
        report.outcome(&id(ResourceKind::Exec, "skipped by unless")),
        Some(&Outcome::Unchanged)
    );
    assert_eq!(
        report.outcome(&id(ResourceKind::Exec, "allowed by onlyif")),
        Some(&Outcome::Changed)
    );
    assert!(!host.exists("work/ran"));
    assert!(host.exists("work/ran-onlyif"));
}

#[test]
fn link_and_absent_files_converge() {
    let host = TestHost::new();
    host.write("real/data", "payload");
    host.write("stale", "remove me");
    let link = host.path_str("alias");
    let specs = vec![
        ResourceSpec::new(ResourceKind::File, link.clone())
            .with("ensure", "link")
            .with("target", host.path_str("real")),
        ResourceSpec::new(ResourceKind::File, host.path_str("stale")).with("ensure", "absent"),
    ];

    let report = host.converge(specs);

    assert!(!report.has_failures(), "{:?}", report.entries());
    assert_eq!(
        std::fs::read_link(&link).unwrap(),
        host.path("real")
    );
    assert_eq!(host.read("alias/data"), "payload");
    assert!(!host.exists("stale"));
}

#[test]
fn json_and_yaml_manifests_load_and_converge() {
    let host = TestHost::new();
    let json_target = host.path_str("from-json");
    let yaml_target = host.path_str("from-yaml");
    host.write(
        "site.json",
        &format!(
            r#"[{{"kind": "file", "name": "{json_target}", "attributes": {{"content": "json\n"}}}}]"#
        ),
    );
    host.write(
        "site.yaml",
        &format!(
            "resource:\n  - kind: file\n    name: {yaml_target}\n    attributes:\n      content: \"yaml\\n\"\n"
        ),
    );

    let mut specs = manifest::load(&host.path("site.json")).unwrap();
    specs.extend(manifest::load(&host.path("site.yaml")).unwrap());
    assert_eq!(specs.len(), 2);

    let report = host.converge(specs);

    assert_eq!(report.summary().changed, 2);
    assert_eq!(host.read("from-json"), "json\n");
    assert_eq!(host.read("from-yaml"), "yaml\n");
}

#[test]
fn verbose_exec_and_guard_finish_within_timeout() {
    let host = TestHost::new();
    let marker = host.path_str("done");
    let specs = vec![
        ResourceSpec::new(ResourceKind::Exec, "noisy")
            .with(
                "command",
                format!("head -c 200000 /dev/zero | tr '\\0' x; touch '{marker}'"),
            )
            .with("timeout", 20_i64)
            .guarded(Guard::Onlyif("head -c 200000 /dev/zero | tr '\\0' y".to_string())),
    ];

    let report = host.converge(specs);

    assert_eq!(
        report.outcome(&id(ResourceKind::Exec, "noisy")),
        Some(&Outcome::Changed),
        "{:?}",
        report.entries()
    );
    assert!(host.exists("done"));
}

#[test]
fn missing_source_fails_apply_and_skips_dependents() {
    let host = TestHost::new();
    let key = host.path_str("keydir/admin.pub");
    let specs = vec![
        ResourceSpec::new(ResourceKind::File, key.clone())
            .with("source", host.path_str("nowhere/admin.pub")),
        ResourceSpec::new(ResourceKind::Exec, "compile")
            .with("command", "true")
            .requires(id(ResourceKind::File, &key)),
    ];

    let report = host.converge(specs);

    let entry = report.get(&id(ResourceKind::File, &key)).unwrap();
    assert!(matches!(
        &entry.outcome,
        Outcome::Failed(ResourceFailure::Apply(ApplyError::Failed { .. }))
    ));
    assert!(entry.detail.as_deref().unwrap().contains("nowhere/admin.pub"));
    assert!(matches!(
        report.outcome(&id(ResourceKind::Exec, "compile")),
        Some(Outcome::Skipped(_))
    ));
    assert!(!host.exists("keydir/admin.pub"));
}
