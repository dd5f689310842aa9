//! Entry point: parses arguments, sets up logging, and hands off to the
//! engine (C9). Mapping engine errors to process exit codes lives here so
//! the engine itself stays a library-shaped `Result`-returning function.

mod cli;
mod engine;
mod error;
mod loadflag;
mod payload;
mod platform;
mod report;
mod topology;
mod watchdog;
mod worker;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Args;
use engine::EngineConfig;

fn init_tracing(verbose: u8, quiet: bool) {
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose, args.quiet);

    let config = match EngineConfig::try_from(&args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(e.exit_code());
        }
    };
    match engine::run(config) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!(error = %e, "ignis terminated abnormally");
            std::process::exit(e.exit_code());
        }
    }
}
