use std::process::ExitCode;

use clap::Parser;
use gridfe::{cli, logger};

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();
    let settings = cli::load_settings(&args);

    // Initialize session log (overwrites previous session log)
    let level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        settings.log_level
    };
    logger::init(level);

    cli::run(args, settings)
}
