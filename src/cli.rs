//! Command-line interface definitions using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use applog::demo::DemoConfig;
use applog::logging::{AggregatorArgs, AggregatorConfig, Level};
use applog::paths;
use applog::worker::{Latency, WorkerArgs};

/// Multi-process log aggregation with a worker pool demo.
#[derive(Parser, Debug)]
#[command(name = "applog")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Disable colored output.
    #[arg(long, env = "NO_COLOR", global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the sample application: a worker pool logging into one file.
    Demo(DemoArgs),

    /// Put synthetic records into an existing log queue.
    #[command(hide = true)]
    Emit(EmitArgs),

    /// Aggregator process entry point.
    #[command(hide = true)]
    InternalAggregator(AggregatorArgs),

    /// Worker process entry point.
    #[command(hide = true)]
    InternalWorker(WorkerArgs),
}

/// Arguments for the demo command.
#[derive(Parser, Debug)]
pub struct DemoArgs {
    /// Path to the log file (truncated on start).
    #[arg(long, env = "APPLOG_LOG_FILE", default_value = paths::DEFAULT_LOG_FILE)]
    pub logfile: PathBuf,

    /// Also log to stdout.
    #[arg(long, env = "APPLOG_STDOUT")]
    pub stdout: bool,

    /// Log level (debug, info, warning, error, critical).
    #[arg(long, env = "APPLOG_LOG_LEVEL", default_value_t = Level::Debug)]
    pub log_level: Level,

    /// How long the aggregator waits for a record before exiting (0 or less waits forever).
    #[arg(
        long,
        env = "APPLOG_TIMEOUT_SEC",
        default_value_t = 5,
        allow_negative_numbers = true
    )]
    pub timeout_sec: i64,

    /// Number of worker processes.
    #[arg(long, default_value_t = 10)]
    pub workers: usize,

    /// Number of work items to dispatch.
    #[arg(long, default_value_t = 100)]
    pub tasks: usize,

    /// Give up collecting responses after this many seconds.
    #[arg(long, default_value_t = 10)]
    pub max_wait_sec: u64,

    /// Shortest simulated computation time.
    #[arg(long, default_value_t = 100)]
    pub min_latency_ms: u64,

    /// Longest simulated computation time.
    #[arg(long, default_value_t = 1000)]
    pub max_latency_ms: u64,
}

impl DemoArgs {
    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig::new()
            .with_level(self.log_level)
            .with_file(&self.logfile)
            .with_console(self.stdout)
            .with_timeout_secs(self.timeout_sec)
    }

    pub fn demo_config(&self) -> DemoConfig {
        DemoConfig::new()
            .with_workers(self.workers)
            .with_tasks(self.tasks)
            .with_max_wait(Duration::from_secs(self.max_wait_sec))
    }

    pub fn latency(&self) -> Latency {
        Latency::from_millis(self.min_latency_ms, self.max_latency_ms)
    }
}

/// Arguments for the emit command.
#[derive(Parser, Debug)]
pub struct EmitArgs {
    /// Log queue socket to connect to.
    #[arg(long)]
    pub queue: PathBuf,

    /// Number of records to send.
    #[arg(long, default_value_t = 1000)]
    pub count: usize,

    /// Process name stamped on the records.
    #[arg(long, default_value = "emit")]
    pub process_name: String,

    /// Level of every record.
    #[arg(long, default_value_t = Level::Info)]
    pub level: Level,
}

#[cfg(test)]
mod tests {
    use super::*;
    use applog::spawn::{AGGREGATOR_COMMAND, WORKER_COMMAND};
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_demo_defaults() {
        let cli = Cli::try_parse_from(["applog", "demo"]).unwrap();
        let Commands::Demo(args) = cli.command else {
            panic!("Expected demo command");
        };
        assert_eq!(args.logfile, PathBuf::from("applog.txt"));
        assert!(!args.stdout);
        assert_eq!(args.log_level, Level::Debug);
        assert_eq!(args.timeout_sec, 5);
        assert_eq!(args.workers, 10);
        assert_eq!(args.tasks, 100);
        assert_eq!(args.latency(), Latency::from_millis(100, 1000));
    }

    #[test]
    fn test_demo_flags() {
        let cli = Cli::try_parse_from([
            "applog",
            "demo",
            "--logfile",
            "/tmp/out.txt",
            "--stdout",
            "--log-level",
            "WARN",
            "--timeout-sec",
            "-1",
        ])
        .unwrap();
        let Commands::Demo(args) = cli.command else {
            panic!("Expected demo command");
        };
        let config = args.aggregator_config();
        assert!(config.console);
        assert_eq!(config.level, Level::Warning);
        assert_eq!(config.log_file, PathBuf::from("/tmp/out.txt"));
        assert!(config.idle_timeout.is_none());
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        assert!(Cli::try_parse_from(["applog", "demo", "--log-level", "loud"]).is_err());
    }

    #[test]
    fn test_internal_commands_match_spawn_names() {
        let cli = Cli::try_parse_from([
            "applog",
            AGGREGATOR_COMMAND,
            "--log-file",
            "out.txt",
            "--timeout-sec",
            "0",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::InternalAggregator(_)));

        let cli = Cli::try_parse_from(["applog", WORKER_COMMAND, "--worker-id", "3"]).unwrap();
        match cli.command {
            Commands::InternalWorker(args) => assert_eq!(args.worker_id, 3),
            other => panic!("Expected internal worker, got {:?}", other),
        }
    }
}
