//! Command-line surface.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use orbitscope_batch::ExportFormat;
use orbitscope_infra::config::parse_timeout_secs;

#[derive(Debug, Parser)]
#[command(name = "orbitscope", version, about = "Batch orbit-capture analysis")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Analyse capture files and optionally export the results
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Capture files to analyse, one job each
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Jobs in flight at once [env: ORBITSCOPE_CONCURRENCY, default 4]
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Engine program, called as `PROGRAM [ENGINE_ARG]... FILE`
    #[arg(long, env = "ORBITSCOPE_ENGINE")]
    pub engine: Option<String>,

    /// Extra argument passed to the engine before the file (repeatable)
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    pub engine_args: Vec<String>,

    /// Per-job engine timeout in seconds
    #[arg(long, env = "ORBITSCOPE_ENGINE_TIMEOUT_SECS", value_parser = parse_timeout_secs)]
    pub engine_timeout: Option<Duration>,

    /// Retry every failed job once after the batch settles
    #[arg(long)]
    pub retry_failed: bool,

    /// Export format: json, csv or visual
    #[arg(long, requires = "out")]
    pub export: Option<ExportFormat>,

    /// Export destination
    #[arg(long, requires = "export")]
    pub out: Option<PathBuf>,

    /// Replace an existing export file
    #[arg(long)]
    pub force: bool,

    /// Do not emit audit records
    #[arg(long)]
    pub no_audit: bool,
}
