//! `orbitscope`: operator entry point for batch orbit-capture analysis.

mod cli;
mod run;

use std::process::ExitCode;

use clap::Parser;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    orbitscope_observability::init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run(args) => run::execute(args).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "orbitscope failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
