//! saltpipe binary: one relay instance per process.

use std::process::ExitCode;

use clap::Parser;
use saltpipe_relay::{cli, Args};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match cli::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("saltpipe: {e}");
            ExitCode::FAILURE
        }
    }
}
