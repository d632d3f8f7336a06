//! Domain-specific error types for the convergence engine.
//!
//! Library modules return typed errors built with [`thiserror`]; command
//! handlers at the CLI boundary convert them to [`anyhow::Error`] via `?`.
//!
//! # Error hierarchy
//!
//! ```text
//! ConvergeError
//! ├── Config(ConfigError)   : manifest loading, gitolite parameter validation
//! └── Plan(PlanError)       : duplicate ids, unresolved references, cycles
//!
//! per-resource (recorded in the run report, never abort a run):
//! ├── GuardEvaluationError  : a guard could not decide
//! ├── ApplyError            : the applier failed
//! └── SkippedDueToDependency
//! ```

use thiserror::Error;

use crate::engine::spec::ResourceId;

/// Top-level error type for the convergence engine.
#[derive(Error, Debug)]
pub enum ConvergeError {
    /// Configuration-related error (manifest parsing, parameter validation).
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The resource set could not be turned into a run plan.
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),
}

/// Errors that arise from loading manifests and validating parameters.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The manifest file extension is not one of toml, json, yaml, yml.
    #[error("Unsupported manifest format '{0}': expected .toml, .json, .yaml or .yml")]
    UnsupportedFormat(String),

    /// The manifest could not be parsed.
    #[error("Invalid manifest {file}: {message}")]
    InvalidManifest {
        /// Manifest file name.
        file: String,
        /// Parser message.
        message: String,
    },

    /// The admin key was supplied both as literal content and as a source.
    #[error("admin_key and admin_key_source are mutually exclusive")]
    ConflictingAdminKey,

    /// A parameter holds a value that cannot be used.
    #[error("Invalid parameter '{name}': {message}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Why the value is unusable.
        message: String,
    },

    /// An I/O error occurred while reading a configuration file.
    #[error("IO error reading config file {path}: {source}")]
    Io {
        /// Path to the file that could not be read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Errors raised while building a [`RunPlan`](crate::engine::plan::RunPlan).
///
/// Every variant is detected before any resource is touched.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PlanError {
    /// The dependency graph is not acyclic.
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// Two resources share the same identifier.
    #[error("Duplicate resource declaration: {0}")]
    DuplicateResource(ResourceId),

    /// A relationship names a resource that is not declared.
    #[error("{resource} references undeclared resource {dependency}")]
    UnknownDependency {
        /// Resource holding the reference.
        resource: ResourceId,
        /// The missing resource.
        dependency: ResourceId,
    },

    /// A fragment targets a concat that is not declared.
    #[error("{fragment} targets undeclared concat '{target}'")]
    UnknownFragmentTarget {
        /// The orphaned fragment.
        fragment: ResourceId,
        /// Path named by the fragment's `target` attribute.
        target: String,
    },
}

/// The dependency graph contains a cycle; `path` lists one offending loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Dependency cycle detected: {}", format_cycle(.path))]
pub struct CycleError {
    /// Resources forming the cycle, in edge order.
    pub path: Vec<ResourceId>,
}

fn format_cycle(path: &[ResourceId]) -> String {
    let mut parts: Vec<String> = path.iter().map(ToString::to_string).collect();
    if let Some(first) = path.first() {
        parts.push(first.to_string());
    }
    parts.join(" → ")
}

/// A guard could not decide whether its resource must run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("guard for {resource} could not be evaluated: {reason}")]
pub struct GuardEvaluationError {
    /// Resource whose guard failed.
    pub resource: ResourceId,
    /// Human-readable cause (e.g. `cannot stat /path: permission denied`).
    pub reason: String,
}

/// The underlying action for a resource failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// The applier returned an error (bad exit status, permission denied, …).
    #[error("{resource} failed: {reason}")]
    Failed {
        /// Resource whose action failed.
        resource: ResourceId,
        /// Cause, including command stderr where there is any.
        reason: String,
    },

    /// An exec-kind resource exceeded its deadline and was killed.
    #[error("{resource} timed out after {seconds}s")]
    TimedOut {
        /// The killed exec.
        resource: ResourceId,
        /// Deadline that was exceeded.
        seconds: u64,
    },

    /// No applier is registered for the resource kind.
    #[error("no applier registered for {resource}")]
    NoApplier {
        /// Resource of the unhandled kind.
        resource: ResourceId,
    },
}

/// A resource was not attempted because a dependency did not converge.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("skipped: dependency {dependency} did not converge")]
pub struct SkippedDueToDependency {
    /// The failed or skipped dependency that blocked this resource.
    pub dependency: ResourceId,
}
