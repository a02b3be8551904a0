//! Achlys CLI: run the attacker-controlled-NaN pass over a serialized IR
//! module.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use achlys_analysis::AnalysisSession;
use achlys_core::errors::{AnalysisError, ErrorCode};
use achlys_core::ir::Module;
use achlys_core::AchlysConfig;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("failed to read `{path}`: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to write `{path}`: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse module JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}

impl CliError {
    fn code(&self) -> &'static str {
        match self {
            Self::Read { .. } => "CLI_READ_FAILED",
            Self::Write { .. } => "CLI_WRITE_FAILED",
            Self::Parse(_) => "CLI_PARSE_FAILED",
            Self::Analysis(e) => e.error_code(),
        }
    }
}

#[derive(Parser)]
#[command(name = "achlys")]
#[command(about = "Detect attacker-controlled NaN hazards in IR modules")]
#[command(version)]
struct Cli {
    /// Path to the IR module (JSON).
    module: PathBuf,

    /// Log density: 0 silent, 1 function, 2 block, 3 instruction,
    /// 4 real-time (unbuffered).
    #[arg(long, default_value_t = 0)]
    verbose: u8,

    /// Insert fault-injection hooks after each retained hazard.
    #[arg(long)]
    do_fault_injection: bool,

    /// Write the hazard report as JSON to this path.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Write the (possibly rewritten) module as JSON to this path.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn run(cli: Cli) -> Result<(), CliError> {
    let text = fs::read_to_string(&cli.module).map_err(|source| CliError::Read {
        path: cli.module.display().to_string(),
        source,
    })?;
    let module: Module = serde_json::from_str(&text)?;

    let config = AchlysConfig {
        verbose: cli.verbose,
        do_fault_injection: cli.do_fault_injection,
    };

    let mut outcome = AnalysisSession::new(module, config).run()?;
    outcome.log.flush();

    if let Some(path) = &cli.report {
        let json = outcome.report.to_json()?;
        fs::write(path, json).map_err(|source| CliError::Write {
            path: path.display().to_string(),
            source,
        })?;
    }

    if let Some(path) = &cli.output {
        let json = serde_json::to_string_pretty(&outcome.module)?;
        fs::write(path, json).map_err(|source| CliError::Write {
            path: path.display().to_string(),
            source,
        })?;
    }

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error[{}]: {}", error.code(), error);
            ExitCode::FAILURE
        }
    }
}
