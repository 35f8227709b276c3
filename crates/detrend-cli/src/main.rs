mod commands;
mod progress;
mod summary;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "detrend", about = "CCD calibration and aperture photometry pipeline")]
#[command(version)]
struct Cli {
    /// Enable debug output
    #[arg(short, long, alias = "debug", global = true)]
    verbose: bool,

    /// Worker threads (defaults to one per core)
    #[arg(short = 'j', long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detrend one day of one CCD: masters, science quadrants, photometry
    Run(commands::run::RunArgs),
    /// Build bias and flat masters for a period
    Calib(commands::calib::CalibArgs),
    /// Print or save the default run config
    Config(commands::config::ConfigArgs),
    /// Show the header and planes of an artifact
    Info(commands::info::InfoArgs),
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }

    match &cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Calib(args) => commands::calib::run(args),
        Commands::Config(args) => commands::config::run(args).map(|_| ExitCode::SUCCESS),
        Commands::Info(args) => commands::info::run(args).map(|_| ExitCode::SUCCESS),
    }
}
