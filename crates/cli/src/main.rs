//! Analytics engine CLI
//!
//! Runs one engine worker over a JSON-lines file, stdin or (with the `kafka`
//! feature) a Kafka topic, and inspects engine configuration.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use commands::{ConfigCommand, RunArgs};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "analytics-engine",
    version,
    about = "Keyed event-time window and pattern engine for website analytics",
    long_about = "Keyed event-time window and pattern engine for website analytics.\n\n\
                  Reads tracker events, aggregates them into windowed metrics,\n\
                  detects behavioural patterns and writes metric and alert\n\
                  records, checkpointing its state for exact recovery."
)]
struct Cli {
    /// Engine configuration file (YAML)
    #[arg(
        short,
        long,
        global = true,
        env = "ANALYTICS_CONFIG",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `processor=debug,info`
    #[arg(long, global = true, env = "RUST_LOG", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a worker until its input ends or Ctrl-C is pressed
    #[command(name = "run")]
    Run(RunArgs),

    /// Inspect the effective configuration
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    let result = match cli.command {
        Commands::Run(args) => args.execute(cli.config.as_deref()).await,
        Commands::Config { command } => command.execute(cli.config.as_deref()),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "Exiting with error");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Logs go to stderr; stdout carries output records
fn init_tracing(filter: &str, json: bool) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
