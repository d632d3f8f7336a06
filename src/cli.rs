//! Command-line interface definitions.
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Top-level CLI entry point for the convergence engine.
#[derive(Parser, Debug)]
#[command(
    name = "converge",
    about = "Declarative host convergence for gitolite servers",
    version
)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalOpts,
}

/// Output format of the run report.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable summary
    #[default]
    Text,
    /// JSON list of `{resource, outcome, detail}` on stdout
    Json,
}

/// Options shared across all subcommands.
#[derive(Parser, Debug, Clone)]
pub struct GlobalOpts {
    /// Preview changes without applying
    #[arg(short = 'd', long, global = true)]
    pub dry_run: bool,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,

    /// Also write the JSON report to this file
    #[arg(long, value_name = "PATH", global = true)]
    pub report: Option<PathBuf>,

    /// Default deadline in seconds for exec resources without a `timeout`
    #[arg(long, value_name = "SECONDS", global = true)]
    pub exec_timeout: Option<u64>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Converge the host to a resource manifest
    Apply(ApplyOpts),
    /// Print the resolved run order without touching the host
    Plan(PlanOpts),
    /// Converge (or render) a gitolite installation
    Gitolite(GitoliteOpts),
    /// Print version information
    Version,
}

impl Command {
    /// Name used for the log file of this command.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Apply(_) => "apply",
            Self::Plan(_) => "plan",
            Self::Gitolite(_) => "gitolite",
            Self::Version => "version",
        }
    }
}

/// Options for the `apply` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ApplyOpts {
    /// Manifest file (.toml, .json, .yaml or .yml)
    pub manifest: PathBuf,
}

/// Options for the `plan` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct PlanOpts {
    /// Manifest file (.toml, .json, .yaml or .yml)
    pub manifest: PathBuf,
}

/// Options for the `gitolite` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct GitoliteOpts {
    /// TOML file with gitolite parameters (defaults when omitted)
    #[arg(long, value_name = "FILE")]
    pub params: Option<PathBuf>,

    /// Print the generated manifest as TOML instead of applying it
    #[arg(long)]
    pub render: bool,
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_apply_manifest() {
        let cli = Cli::parse_from(["converge", "apply", "site.toml"]);
        assert!(
            matches!(&cli.command, Command::Apply(opts) if opts.manifest == PathBuf::from("site.toml"))
        );
        assert_eq!(cli.command.name(), "apply");
    }

    #[test]
    fn parse_dry_run_short() {
        let cli = Cli::parse_from(["converge", "-d", "apply", "site.toml"]);
        assert!(cli.global.dry_run);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "converge",
            "apply",
            "site.yaml",
            "--dry-run",
            "--format",
            "json",
            "--report",
            "/tmp/report.json",
            "--exec-timeout",
            "300",
        ]);
        assert!(cli.global.dry_run);
        assert_eq!(cli.global.format, OutputFormat::Json);
        assert_eq!(cli.global.report, Some(PathBuf::from("/tmp/report.json")));
        assert_eq!(cli.global.exec_timeout, Some(300));
    }

    #[test]
    fn format_defaults_to_text() {
        let cli = Cli::parse_from(["converge", "plan", "site.toml"]);
        assert_eq!(cli.global.format, OutputFormat::Text);
        assert!(matches!(cli.command, Command::Plan(_)));
    }

    #[test]
    fn parse_gitolite_render() {
        let cli = Cli::parse_from(["converge", "gitolite", "--params", "git.toml", "--render"]);
        assert!(matches!(
            &cli.command,
            Command::Gitolite(opts) if opts.render && opts.params == Some(PathBuf::from("git.toml"))
        ));
    }

    #[test]
    fn gitolite_params_optional() {
        let cli = Cli::parse_from(["converge", "gitolite"]);
        assert!(matches!(&cli.command, Command::Gitolite(opts) if opts.params.is_none()));
    }

    #[test]
    fn apply_requires_manifest() {
        assert!(Cli::try_parse_from(["converge", "apply"]).is_err());
    }

    #[test]
    fn parse_version() {
        let cli = Cli::parse_from(["converge", "version"]);
        assert!(matches!(cli.command, Command::Version));
    }

    #[test]
    fn parse_verbose() {
        let cli = Cli::parse_from(["converge", "-v", "version"]);
        assert!(cli.verbose);
    }

    #[test]
    fn invalid_format_rejected() {
        assert!(Cli::try_parse_from(["converge", "--format", "xml", "version"]).is_err());
    }
}
