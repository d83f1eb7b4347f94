use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const ABOUT: &str = "packmc - Monte Carlo sampling of particle packings in the isothermal-isobaric ensemble, with hard and soft anisotropic shapes in a deformable triclinic box.";
const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(name = "packmc", version, about = ABOUT, help_template = HELP_TEMPLATE)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the Monte Carlo sampling described by a run configuration file.
    Casino(CasinoArgs),
    /// Summarize the starting configuration without running any cycles.
    Preview(PreviewArgs),
}

/// Arguments for the `casino` subcommand.
#[derive(Args, Debug)]
pub struct CasinoArgs {
    /// Path to the run configuration file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub input: PathBuf,

    /// Start from a stored RAMSNAP packing instead of the configured
    /// initial lattice.
    #[arg(long, value_name = "PATH", conflicts_with = "continue_from")]
    pub start_from: Option<PathBuf>,

    /// Continue a disrupted run from a stored RAMSNAP packing, restoring
    /// step sizes and the cycle offset from its auxiliary data.
    #[arg(long = "continue", value_name = "PATH")]
    pub continue_from: Option<PathBuf>,
}

/// Arguments for the `preview` subcommand.
#[derive(Args, Debug)]
pub struct PreviewArgs {
    /// Path to the run configuration file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub input: PathBuf,

    /// Preview a stored RAMSNAP packing instead of the configured lattice.
    #[arg(long, value_name = "PATH")]
    pub start_from: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli_parsing() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn casino_args_parse() {
        let cli = Cli::parse_from(["packmc", "casino", "-i", "run.toml", "--continue", "old.ramsnap", "-vv"]);
        match cli.command {
            Commands::Casino(args) => {
                assert_eq!(args.input, PathBuf::from("run.toml"));
                assert_eq!(args.continue_from, Some(PathBuf::from("old.ramsnap")));
                assert!(args.start_from.is_none());
            }
            _ => panic!("expected casino subcommand"),
        }
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn start_from_and_continue_conflict() {
        let result = Cli::try_parse_from([
            "packmc",
            "casino",
            "-i",
            "run.toml",
            "--start-from",
            "a.ramsnap",
            "--continue",
            "b.ramsnap",
        ]);
        assert!(result.is_err(), "clap should reject conflicting flags");
    }
}
