// src/main.rs

use clap::Parser;
use tracing::error;

use rundag::cli::CliArgs;
use rundag::logging::init_logging;

fn main() {
    let args = CliArgs::parse();

    if let Err(e) = init_logging(args.log_level) {
        eprintln!("failed to initialise logging: {e}");
        std::process::exit(2);
    }

    match rundag::run(&args) {
        Ok(outcome) => {
            if !outcome.result.is_null() {
                println!("{}", outcome.result);
            }
            if !outcome.ok {
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!(error = %e, "invocation failed");
            std::process::exit(2);
        }
    }
}
