// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `forkpool`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "forkpool",
    version,
    about = "Run shell commands in parallel, one forked worker process each.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `FORKPOOL_CONFIG`, else `Forkpool.toml` in the current
    /// working directory if it exists.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FORKPOOL_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Run and wait every N commands instead of all at once.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub pool: Option<u32>,

    /// Let workers report their own results instead of joining them.
    #[arg(long)]
    pub detach: bool,

    /// Scheduling priority (nice value) for every worker.
    #[arg(
        long,
        value_name = "N",
        default_value_t = 0,
        allow_negative_numbers = true,
        value_parser = clap::value_parser!(i32).range(-20..=20)
    )]
    pub priority: i32,

    /// Process title for every worker.
    #[arg(long, value_name = "STR")]
    pub title: Option<String>,

    /// Parse + validate, print what would run, but don't execute anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Shell commands, each run with `sh -c` in its own worker.
    #[arg(value_name = "COMMAND", required = true)]
    pub commands: Vec<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_and_commands() {
        let args = CliArgs::try_parse_from([
            "forkpool",
            "--pool",
            "2",
            "--priority",
            "-5",
            "--detach",
            "echo a",
            "echo b",
        ])
        .unwrap();

        assert_eq!(args.pool, Some(2));
        assert_eq!(args.priority, -5);
        assert!(args.detach);
        assert_eq!(args.commands, vec!["echo a", "echo b"]);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(CliArgs::try_parse_from(["forkpool", "--pool", "0", "true"]).is_err());
        assert!(CliArgs::try_parse_from(["forkpool", "--priority", "30", "true"]).is_err());
        assert!(CliArgs::try_parse_from(["forkpool"]).is_err());
    }
}
