//! `converge` command-line entry point.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use gitolite_converge::{cli, commands, logging};

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let command = args.command.name();
    logging::init_subscriber(args.verbose, command);
    let log = Arc::new(logging::Logger::new(command));

    match &args.command {
        cli::Command::Apply(opts) => commands::apply::run(&args.global, opts, &log),
        cli::Command::Plan(opts) => commands::plan::run(&args.global, opts, &log),
        cli::Command::Gitolite(opts) => commands::gitolite::run(&args.global, opts, &log),
        cli::Command::Version => {
            commands::version::run();
            Ok(())
        }
    }
}
