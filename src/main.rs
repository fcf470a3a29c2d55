use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wms_jobstate::background::TaskOutcome;
use wms_jobstate::config::{AppConfig, CliConfig, FileConfig};
use wms_jobstate::job_store::JobId;
use wms_jobstate::metrics;
use wms_jobstate::status::RawStatusChanges;
use wms_jobstate::{Dispatched, JobStateService, WmsError};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the SQLite databases.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Maximum number of reschedules per job.
    #[clap(long)]
    pub max_rescheduling: Option<u32>,

    /// Print the Prometheus metrics after the command completes.
    #[clap(long)]
    pub dump_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply the status reports found in a JSON file, shaped as
    /// {job_id: {timestamp: {"Status": ..., "MinorStatus": ..., "Source": ...}}}.
    SetStatus {
        #[clap(long, value_parser = parse_path)]
        input: PathBuf,

        /// Apply every status without checking the transitions.
        #[clap(long)]
        force: bool,
    },

    /// Reschedule the given jobs.
    Reschedule {
        #[clap(required = true)]
        job_ids: Vec<JobId>,

        #[clap(long)]
        reset_counter: bool,
    },

    /// Remove the given jobs from every store.
    Remove {
        #[clap(required = true)]
        job_ids: Vec<JobId>,
    },

    /// Shows the status history of a job.
    History { job_id: JobId },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn finish<T: Serialize>(dispatched: Dispatched<T>) -> Result<()> {
    print_json(&dispatched.result)?;
    let outcomes = dispatched
        .background
        .await
        .context("Background work panicked")?;
    for (name, outcome) in &outcomes {
        match outcome {
            TaskOutcome::Succeeded => info!("Background task {} done", name),
            other => error!("Background task {} did not succeed: {:?}", name, other),
        }
    }
    Ok(())
}

/// Print the per-job failures carried by an error before returning it.
fn report_failures(e: WmsError) -> anyhow::Error {
    if let WmsError::NoJobsUpdated(failed) | WmsError::RescheduleFailed(failed) = &e {
        if let Err(print_err) = print_json(failed) {
            error!("Failed to print failures: {:#}", print_err);
        }
    }
    e.into()
}

async fn run(service: &JobStateService, command: Command) -> Result<()> {
    match command {
        Command::SetStatus { input, force } => {
            let content = std::fs::read_to_string(&input)
                .with_context(|| format!("Failed to read status file: {:?}", input))?;
            let changes: RawStatusChanges = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse status file: {:?}", input))?;
            let dispatched = service
                .set_job_status(changes, force)
                .await
                .map_err(report_failures)?;
            finish(dispatched).await
        }
        Command::Reschedule {
            job_ids,
            reset_counter,
        } => {
            let dispatched = service
                .reschedule_jobs(&job_ids, reset_counter)
                .await
                .map_err(report_failures)?;
            finish(dispatched).await
        }
        Command::Remove { job_ids } => {
            let dispatched = service.remove_jobs(&job_ids).await?;
            finish(dispatched).await
        }
        Command::History { job_id } => {
            let records = service.job_history(job_id).await?;
            print_json(&records)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        max_rescheduling: cli_args.max_rescheduling,
    };
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    metrics::init_metrics();
    let service = JobStateService::open(&app_config)?;

    let result = run(&service, cli_args.command).await;
    service.shutdown().await;

    if cli_args.dump_metrics {
        print!("{}", metrics::encode_metrics()?);
    }
    result
}
