//! Command-line interface definition.
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Top-level CLI entry point for the provisioning engine.
#[derive(Parser, Debug)]
#[command(
    name = "oradock-provision",
    about = "Idempotent single-host provisioning for oradock",
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

/// Options shared across all subcommands.
#[derive(Parser, Debug, Clone)]
pub struct GlobalOpts {
    /// Configuration file (default: $ORADOCK_PROVISION_CONFIG or /etc/oradock/provision.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bring the host to the configured state
    Apply(ApplyOpts),
    /// Report which steps would change the host, without changing it
    Check(CheckOpts),
    /// List the steps in run order
    Plan,
    /// Generate shell completions
    Completions(CompletionsOpts),
    /// Print version information
    Version,
}

impl Command {
    /// Name used for the log file of this invocation.
    #[must_use]
    pub const fn log_name(&self) -> &'static str {
        match self {
            Self::Apply(_) => "apply",
            Self::Check(_) => "check",
            Self::Plan => "plan",
            Self::Completions(_) => "completions",
            Self::Version => "version",
        }
    }
}

/// Options for the `apply` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ApplyOpts {
    /// Keep running the remaining steps after a failure
    #[arg(long)]
    pub continue_on_error: bool,

    /// Abort a step that runs longer than this many seconds
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub step_timeout: Option<u64>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Options for the `check` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct CheckOpts {
    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Options for the `completions` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct CompletionsOpts {
    /// Target shell
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
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
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_apply_defaults() {
        let cli = Cli::parse_from(["oradock-provision", "apply"]);
        let Command::Apply(opts) = cli.command else {
            panic!("expected apply");
        };
        assert!(!opts.continue_on_error);
        assert!(opts.step_timeout.is_none());
        assert!(!opts.json);
        assert!(cli.global.config.is_none());
    }

    #[test]
    fn parse_apply_flags() {
        let cli = Cli::parse_from([
            "oradock-provision",
            "apply",
            "--continue-on-error",
            "--step-timeout",
            "900",
            "--json",
        ]);
        let Command::Apply(opts) = cli.command else {
            panic!("expected apply");
        };
        assert!(opts.continue_on_error);
        assert_eq!(opts.step_timeout, Some(900));
        assert!(opts.json);
    }

    #[test]
    fn zero_step_timeout_is_rejected() {
        assert!(Cli::try_parse_from(["oradock-provision", "apply", "--step-timeout", "0"]).is_err());
    }

    #[test]
    fn parse_global_config_after_subcommand() {
        let cli = Cli::parse_from(["oradock-provision", "check", "--config", "/tmp/p.toml"]);
        assert_eq!(cli.global.config, Some(PathBuf::from("/tmp/p.toml")));
        assert!(matches!(cli.command, Command::Check(_)));
    }

    #[test]
    fn parse_verbose() {
        let cli = Cli::parse_from(["oradock-provision", "-v", "plan"]);
        assert!(cli.verbose);
        assert_eq!(cli.command.log_name(), "plan");
    }

    #[test]
    fn parse_completions_shell() {
        let cli = Cli::parse_from(["oradock-provision", "completions", "bash"]);
        let Command::Completions(opts) = cli.command else {
            panic!("expected completions");
        };
        assert_eq!(opts.shell, clap_complete::Shell::Bash);
    }

    #[test]
    fn parse_version() {
        let cli = Cli::parse_from(["oradock-provision", "version"]);
        assert!(matches!(cli.command, Command::Version));
    }
}
