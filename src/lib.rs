//! Declarative host convergence engine with a gitolite host profile.
//!
//! A resource list (packages, users, files, directories, execs, cron
//! entries, and concat files assembled from fragments) is resolved into a
//! dependency-ordered run plan and converged once, idempotently.
//!
//! The public API is organised into layers:
//!
//! - **[`engine`]**: resource model, run plan, guards, convergence loop and report
//! - **[`resources`]**: per-kind appliers, the only code touching the host
//! - **[`config`]**: manifest loading, gitolite parameters and their validation
//! - **[`gitolite`]**: the gitolite host manifest and `.gitolite.rc` rendering
//! - **[`commands`]**: top-level subcommand orchestration (`apply`, `plan`, `gitolite`)
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod gitolite;
pub mod logging;
pub mod operations;
pub mod platform;
pub mod resources;
