use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tflow::errors::TflowError;
use tflow::options::OptionValue;

mod cmd;

#[derive(Parser)]
#[command(name = "tflow")]
#[command(version, about = "Resumable orchestrator for long-running external tools")]
pub struct Cli {
    /// run, track, analyze, read, test, stop, clean or print_settings
    pub mode: String,

    /// Segment or pipe to dispatch. Falls back to jobtype.dat in the project directory.
    #[arg(short = 't', long)]
    pub job_type: Option<String>,

    /// Log file for the job, relative to its working directory
    #[arg(short, long)]
    pub out_file: Option<String>,

    #[arg(short, long)]
    pub verbose: bool,

    /// Rerun jobs whose log already reports completion
    #[arg(long, value_parser = parse_bool)]
    pub overwrite: Option<bool>,

    /// Actually delete files in clean mode
    #[arg(long)]
    pub confirm: bool,

    #[arg(long)]
    pub project_dir: Option<PathBuf>,

    /// Path to tflow.toml. Defaults to the project directory, then the user config directory.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_parser = parse_bool)]
    pub is_paired_reads: Option<bool>,

    #[arg(long)]
    pub read_type: Option<String>,

    #[arg(long)]
    pub label: Option<String>,

    #[arg(long)]
    pub max_cpu: Option<String>,

    #[arg(long, value_parser = parse_bool)]
    pub print_test_output: Option<bool>,

    /// Extra step option as KEY=VALUE. Repeatable.
    #[arg(short = 's', long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// print_settings as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_bool(token: &str) -> Result<bool, String> {
    OptionValue::parse_flexible_bool(token)
        .ok_or_else(|| format!("'{}' is not a boolean (True/False/T/F/1/0)", token))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cmd::run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", console::style("Error:").red().bold(), e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "tflow=debug" } else { "tflow=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<TflowError>()
        .map(TflowError::exit_code)
        .unwrap_or(1)
}
