//! Command-line entry point for the output stage: creates the next SoS
//! release for one continent and appends every requested module's results.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use tracing::{error, info};

use sos_output::config::{RunPaths, RunType, VariableMetadata};
use sos_output::modules::{parse_module_list, ModuleKind};
use sos_output::orchestrator::{self, OutputError, RunConfig, RunReport};
use sos_output::upload::{LocalDirSink, UploadSink};

#[derive(Debug, Parser)]
#[command(name = "sos-output", version, about)]
struct Cli {
    /// Continent configuration file, resolved under the input directory
    /// unless absolute.
    #[arg(long, default_value = "continent.json")]
    continent_json: PathBuf,

    /// Index into the continent configuration array.
    #[arg(long, env = "AWS_BATCH_JOB_ARRAY_INDEX")]
    index: usize,

    /// Either "constrained" or "unconstrained".
    #[arg(long, default_value = "unconstrained")]
    run_type: RunType,

    /// Comma-separated modules to append. Defaults to the standard set.
    #[arg(long)]
    modules: Option<String>,

    /// Root all data directories under one base instead of the container
    /// mounts. Individual directory flags still override.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Input directory holding `sos/` priors and `swot/` observations.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Reach-scale FLPE results directory.
    #[arg(long)]
    flpe: Option<PathBuf>,

    /// Basin-scale integrator results directory.
    #[arg(long)]
    moi: Option<PathBuf>,

    /// Diagnostics results directory.
    #[arg(long)]
    diagnostics: Option<PathBuf>,

    /// Offline discharge results directory.
    #[arg(long)]
    offline: Option<PathBuf>,

    /// Validation results directory.
    #[arg(long)]
    validation: Option<PathBuf>,

    /// Lake discharge results directory.
    #[arg(long)]
    lakeflow: Option<PathBuf>,

    /// Sediment concentration results directory.
    #[arg(long)]
    ssc: Option<PathBuf>,

    /// Directory the new archive version is written to.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Variable metadata JSON overlay.
    #[arg(long)]
    metadata: Option<PathBuf>,

    /// Copy the finalized release into this directory tree.
    #[arg(long)]
    upload_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let start = Instant::now();
    match execute(&cli) {
        Ok(report) => {
            info!(
                continent = report.continent.as_str(),
                version = report.version.as_str(),
                appended = report.appended(),
                modules = report.outcomes.len(),
                elapsed = ?start.elapsed(),
                "output run complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, elapsed = ?start.elapsed(), "output run failed");
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: &Cli) -> Result<RunReport, OutputError> {
    let paths = resolve_paths(cli);
    let modules = match &cli.modules {
        Some(list) => parse_module_list(list)?,
        None => ModuleKind::DEFAULT_SET.to_vec(),
    };
    let metadata = match &cli.metadata {
        Some(path) => VariableMetadata::load(path)?,
        None => VariableMetadata::empty(),
    };
    let continent_json = if cli.continent_json.is_absolute() {
        cli.continent_json.clone()
    } else {
        paths.input.join(&cli.continent_json)
    };
    let upload = cli
        .upload_dir
        .as_ref()
        .map(|dir| Box::new(LocalDirSink::new(dir.clone())) as Box<dyn UploadSink>);

    let config = RunConfig {
        continent_json,
        index: cli.index,
        run_type: cli.run_type,
        modules,
        paths,
        metadata,
        upload,
    };
    orchestrator::run(&config)
}

fn resolve_paths(cli: &Cli) -> RunPaths {
    let mut paths = match &cli.data_dir {
        Some(base) => RunPaths::under(base),
        None => RunPaths::default(),
    };
    if let Some(dir) = &cli.input {
        paths.input = dir.clone();
    }
    if let Some(dir) = &cli.flpe {
        paths.flpe = dir.clone();
    }
    if let Some(dir) = &cli.moi {
        paths.moi = dir.clone();
    }
    if let Some(dir) = &cli.diagnostics {
        paths.diagnostics = dir.clone();
    }
    if let Some(dir) = &cli.offline {
        paths.offline = dir.clone();
    }
    if let Some(dir) = &cli.validation {
        paths.validation = dir.clone();
    }
    if let Some(dir) = &cli.lakeflow {
        paths.lakeflow = dir.clone();
    }
    if let Some(dir) = &cli.ssc {
        paths.ssc = dir.clone();
    }
    if let Some(dir) = &cli.output {
        paths.output = dir.clone();
    }
    paths
}
