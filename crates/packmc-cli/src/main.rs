mod cli;
mod commands;
mod config;
mod error;
mod logging;

use clap::Parser;
use cli::{Cli, Commands};
use error::Result;

fn main() {
    let cli = Cli::parse();
    if let Err(error) = run(cli) {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    logging::setup_logging(cli.verbose, cli.quiet, cli.log_file.clone())?;

    match &cli.command {
        Commands::Casino(args) => commands::casino::execute(args),
        Commands::Preview(args) => commands::preview::execute(args),
    }
}
