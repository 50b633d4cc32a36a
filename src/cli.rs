use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::ClockGuard;
use crate::logging::LogArgs;

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Number of worker processes (default: online CPUs)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Busy phase duration in milliseconds (1-10000, default: 125)
    #[arg(long)]
    pub msbusy: Option<u64>,

    /// Sleep phase duration in milliseconds (1-10000, default: 62)
    #[arg(long)]
    pub mssleep: Option<u64>,

    /// Stop each worker after N bogo operations (0 = unlimited)
    #[arg(long)]
    pub ops: Option<u64>,

    /// Run time limit (e.g. 30s, 5m, 1h, 2d; bare number = seconds)
    #[arg(short = 't', long)]
    pub timeout: Option<String>,

    /// How the shared reference time is synchronized between workers
    #[arg(long = "clock-guard", value_enum)]
    pub clock_guard: Option<ClockGuard>,
}

#[derive(Debug, Parser)]
#[command(
    name = "syncload",
    about = "Run worker processes that synchronize CPU load spikes"
)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(flatten)]
    pub load: LoadArgs,

    /// Configuration file path (default: /etc/syncload.toml)
    #[arg(long = "config", global = true)]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub log: LogArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the busy operations and settings a run would use, without starting workers
    Probe,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_load_options() {
        let cli = Cli::try_parse_from([
            "syncload",
            "-w",
            "4",
            "--msbusy",
            "100",
            "--mssleep",
            "50",
            "--ops",
            "3",
            "-t",
            "10s",
            "--clock-guard",
            "barrier",
        ])
        .unwrap();
        assert_eq!(cli.load.workers, Some(4));
        assert_eq!(cli.load.msbusy, Some(100));
        assert_eq!(cli.load.mssleep, Some(50));
        assert_eq!(cli.load.ops, Some(3));
        assert_eq!(cli.load.timeout.as_deref(), Some("10s"));
        assert_eq!(cli.load.clock_guard, Some(ClockGuard::Barrier));
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_probe() {
        let cli = Cli::try_parse_from(["syncload", "probe", "--log-level", "debug"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Probe)));
        assert!(cli.load.msbusy.is_none());
    }
}
