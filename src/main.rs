use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use oradock_provision::cli::{Cli, Command};
use oradock_provision::{commands, logging};

fn main() -> Result<()> {
    let _ = enable_ansi_support::enable_ansi_support();
    let args = Cli::parse();

    match &args.command {
        Command::Completions(opts) => {
            commands::completions::run(opts);
            Ok(())
        }
        Command::Version => {
            commands::version::run();
            Ok(())
        }
        Command::Apply(_) | Command::Check(_) | Command::Plan => run_logged(&args),
    }
}

/// Commands that touch configuration or the host get a log file.
fn run_logged(args: &Cli) -> Result<()> {
    let command = args.command.log_name();
    logging::init_subscriber(args.verbose, command);
    let log = Arc::new(logging::Logger::new(command));

    let result = match &args.command {
        Command::Apply(opts) => commands::apply::run(&args.global, opts, &log),
        Command::Check(opts) => commands::check::run(&args.global, opts, &log),
        Command::Plan => commands::plan::run(&args.global, &log),
        Command::Completions(_) | Command::Version => Ok(()),
    };
    if let Err(e) = &result {
        log.error(&format!("{e:#}"));
    }
    result
}
