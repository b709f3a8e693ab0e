#![forbid(unsafe_code)]

//! psync CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = cli_app::Cli::parse();
    if let Err(e) = cli_app::run(&args) {
        eprintln!("psync: {e}");
        std::process::exit(1);
    }
}
