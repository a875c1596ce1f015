//! applog - multi-process logging demo

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};

use applog::logging::aggregator;
use applog::logging::{FLUSH_TIMEOUT, Level, LogAggregator, LogBinding, QueueAddr};
use applog::worker::{self, WorkerConfig};
use applog::{critical, demo};

use cli::{Cli, Commands, DemoArgs, EmitArgs};

/// Program entry point: parses CLI arguments, dispatches the selected
/// command, and prints the error chain before exiting with status 1.
fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        owo_colors::set_override(false);
    }

    let result = match &cli.command {
        Commands::Demo(args) => cmd_demo(args),
        Commands::Emit(args) => cmd_emit(args),
        Commands::InternalAggregator(args) => aggregator::run_aggregator_main(args)
            .map(|_| ())
            .context("aggregator failed"),
        Commands::InternalWorker(args) => worker::run_worker_main(args)
            .with_context(|| format!("worker {} failed", args.worker_id)),
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// Run the sample application under a fresh aggregator.
fn cmd_demo(args: &DemoArgs) -> Result<()> {
    println!("using log_level {}", args.log_level);

    tracing::debug!("this line won't appear anywhere, because the log isn't configured yet");
    let mut aggregator = LogAggregator::start(args.aggregator_config())
        .with_context(|| format!("failed to start logging to {}", args.logfile.display()))?;
    tracing::debug!("aggregator started");

    let workers = WorkerConfig::from_binding(aggregator.binding()).with_latency(args.latency());
    tracing::debug!("running demo");
    let report = demo::run(&args.demo_config(), &workers);
    match &report {
        Ok(report) => tracing::debug!(
            received = report.received,
            sent = report.sent,
            "demo completed"
        ),
        Err(e) => critical!(error = %e, "demo failed"),
    }

    tracing::debug!("closing logger");
    aggregator.close();

    let report = report?;
    println!("received {}/{} responses", report.received, report.sent);
    Ok(())
}

/// Send `count` records into an existing queue, then flush.
fn cmd_emit(args: &EmitArgs) -> Result<()> {
    let addr = QueueAddr::new(&args.queue);
    let binding = LogBinding::connect(&addr, args.level, &args.process_name)
        .with_context(|| format!("cannot connect to log queue {}", args.queue.display()))?;

    tracing::subscriber::with_default(binding.subscriber(), || {
        for i in 0..args.count {
            match args.level {
                Level::Debug => tracing::debug!(n = i, "emitted record"),
                Level::Info => tracing::info!(n = i, "emitted record"),
                Level::Warning => tracing::warn!(n = i, "emitted record"),
                Level::Error => tracing::error!(n = i, "emitted record"),
                Level::Critical => critical!(n = i, "emitted record"),
            }
        }
    });

    if !binding.flush(FLUSH_TIMEOUT) {
        anyhow::bail!(
            "{} could not deliver its records within {:?}",
            args.process_name,
            FLUSH_TIMEOUT
        );
    }
    Ok(())
}
