// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

mod error;
mod layout;
mod power;
mod simulate;
mod utils;

use clap::{Parser, Subcommand};
use error::result_to_exit_code;
use std::process::ExitCode;

/// Rear camera CLI - pipeline simulation, power sequences and buffer layouts
#[derive(Parser)]
#[command(name = "rearcam")]
#[command(version)]
#[command(about = "Rear camera CLI - pipeline simulation, power sequences and buffer layouts")]
#[command(long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (use RUST_LOG=trace for per-frame detail)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Print results in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline on a simulated board through one reverse-gear cycle
    Simulate(simulate::Args),

    /// Decode power-sequence word arrays
    Power(power::Args),

    /// Print the plane layout of every pool buffer
    Layout(layout::Args),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Simulate(args) => simulate::execute(args, cli.json),
        Commands::Power(args) => power::execute(args, cli.json),
        Commands::Layout(args) => layout::execute(args, cli.json),
    };

    result_to_exit_code(result)
}

/// Initialize env_logger based on verbosity flags
fn init_logging(verbose: bool, quiet: bool) {
    let env = env_logger::Env::default();

    let env = if quiet {
        env.default_filter_or("error")
    } else if verbose {
        env.default_filter_or("debug")
    } else {
        env.default_filter_or("info")
    };

    env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_target(false)
        .init();

    log::debug!("Logging initialized");
}
