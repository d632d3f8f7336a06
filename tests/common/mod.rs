// Shared helpers for integration tests.
//
// Provides a temporary-directory-backed host root and a fluent builder so
// each integration test can converge real files and commands in isolation
// without repeating filesystem boilerplate.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use gitolite_converge::engine::{Context, Engine, ResourceSpec, RunReport};
use gitolite_converge::exec::SystemExecutor;
use gitolite_converge::logging::Logger;
use gitolite_converge::platform::{OsFamily, Platform};

/// An isolated host root backed by a [`tempfile::TempDir`].
///
/// The directory is automatically deleted when dropped.
pub struct TestHost {
    /// Temporary directory standing in for the managed filesystem.
    pub root: tempfile::TempDir,
    dry_run: bool,
    exec_timeout: Option<Duration>,
}

impl TestHost {
    /// Create an empty host root.
    pub fn new() -> Self {
        TestHostBuilder::new().build()
    }

    /// Absolute path of `rel` under the host root.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }

    /// [`path`](Self::path) as a string, for use in resource names.
    pub fn path_str(&self, rel: &str) -> String {
        self.path(rel).display().to_string()
    }

    /// Read a file under the host root.
    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path(rel)).expect("read file under host root")
    }

    /// Whether `rel` exists under the host root.
    pub fn exists(&self, rel: &str) -> bool {
        self.path(rel).exists()
    }

    /// Write `content` to `rel` under the host root, creating parents.
    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dir");
        }
        std::fs::write(&path, content).expect("write file");
        path
    }

    /// Engine context running real commands against the real filesystem.
    pub fn context(&self) -> (Context, Arc<Logger>) {
        let log = Arc::new(Logger::new("integration-test"));
        let ctx = Context::new(
            log.clone(),
            Arc::new(Platform::new(OsFamily::Debian, "testhost")),
            Arc::new(SystemExecutor),
            self.dry_run,
        )
        .with_exec_timeout(self.exec_timeout);
        (ctx, log)
    }

    /// Converge `specs` with the default appliers.
    pub fn converge(&self, specs: Vec<ResourceSpec>) -> RunReport {
        let (ctx, _log) = self.context();
        Engine::default()
            .apply(specs, &ctx)
            .expect("resources should plan")
    }
}

/// Fluent builder for [`TestHost`].
pub struct TestHostBuilder {
    dry_run: bool,
    exec_timeout: Option<Duration>,
}

impl TestHostBuilder {
    /// Begin building a host with real (non dry-run) application.
    pub fn new() -> Self {
        Self {
            dry_run: false,
            exec_timeout: None,
        }
    }

    /// Only report what would change.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Default deadline for exec resources.
    pub fn exec_timeout(mut self, seconds: u64) -> Self {
        self.exec_timeout = Some(Duration::from_secs(seconds));
        self
    }

    /// Finish building.
    pub fn build(self) -> TestHost {
        TestHost {
            root: tempfile::tempdir().expect("create temp dir"),
            dry_run: self.dry_run,
            exec_timeout: self.exec_timeout,
        }
    }
}

/// Mode bits of `path`.
#[cfg(unix)]
pub fn mode_of(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt as _;
    std::fs::metadata(path).expect("stat").permissions().mode() & 0o7777
}
