use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use solcov::cli;
use solcov::config::Config;

/// solcov: Solidity coverage instrumentation and event-log aggregation.
#[derive(Parser)]
#[command(name = "solcov", version, about)]
struct Cli {
    /// Project root holding `.solcover.json` and the contracts directory.
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    /// Only log errors.
    #[arg(long, global = true)]
    silent: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Instrument every contract and write the zeroed coverage map.
    Instrument {
        /// Directory holding the `.sol` sources.
        #[arg(long)]
        contracts_dir: Option<PathBuf>,

        /// Additional files to leave uninstrumented.
        #[arg(long = "skip")]
        skip: Vec<String>,

        /// Where instrumented copies are written.
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Fold the recorded event log into the coverage map.
    Report {
        /// Event log, one JSON record per line.
        #[arg(long)]
        events: Option<PathBuf>,

        /// Output path for the aggregated report.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show totals and per-file coverage of an aggregated report.
    Summary {
        /// Report to read (default: the configured output).
        file: Option<PathBuf>,

        /// Sort by line rate ascending (show worst files first).
        #[arg(long)]
        sort_by_coverage: bool,
    },

    /// Show uncovered lines for one source file.
    Uncovered {
        /// Path or file name as stored in the report.
        source_file: String,

        /// Report to read (default: the configured output).
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.project).context("Failed to load configuration")?;
    config.silent |= cli.silent;
    init_logging(config.silent);

    let output = match cli.command {
        Commands::Instrument {
            contracts_dir,
            skip,
            out_dir,
        } => {
            if let Some(dir) = contracts_dir {
                config.contracts_dir = dir;
            }
            if let Some(dir) = out_dir {
                config.instrumented_dir = dir;
            }
            config.skip_files.extend(skip);
            cli::cmd_instrument(&cli.project, &config)?
        }
        Commands::Report { events, output } => {
            if let Some(events) = events {
                config.events_file = events;
            }
            if let Some(output) = output {
                config.output = output;
            }
            cli::cmd_report(&cli.project, &config)?
        }
        Commands::Summary {
            file,
            sort_by_coverage,
        } => {
            let file = file.unwrap_or_else(|| Config::resolve(&cli.project, &config.output));
            cli::cmd_summary(&file, sort_by_coverage)?
        }
        Commands::Uncovered { source_file, file } => {
            let file = file.unwrap_or_else(|| Config::resolve(&cli.project, &config.output));
            cli::cmd_uncovered(&file, &source_file)?
        }
    };

    if !config.silent {
        print!("{output}");
    }
    Ok(())
}

fn init_logging(silent: bool) {
    let filter = if silent {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
