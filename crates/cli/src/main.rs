use std::process::ExitCode;

use clap::Parser;

mod commands;
mod config;
mod printer;

use commands::Command;
use sluice_runtime::{PROGRAM_NAME, logging};

#[derive(Debug, Parser)]
#[command(
    name = PROGRAM_NAME,
    version,
    about = "Parallel streaming bulk loader",
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

fn main() -> ExitCode {
    logging::init().ok();

    let cli = Cli::parse();
    match cli.command {
        Command::Load(args) => commands::load::run(args),
        Command::Check(args) => commands::check::run(args),
    }
}
