use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use std::{fmt::Debug, path::PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use genome_map_jobs::app::build_orchestrator;
use genome_map_jobs::config;
use genome_map_jobs::job_store::{JobStore, SequenceReference, SqliteJobStore};
use genome_map_jobs::notifications::{render_message, LoggingMailer};
use genome_map_jobs::orchestrator::{
    JobOrchestrator, LaunchRequest, PhaseWorker, StatusReport, TaskQueue,
};

/// Interval between status polls while waiting for jobs to finish.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
#[command(version, about = "Runs genome alignment jobs")]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding one result directory per job.
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub data_dir: Option<PathBuf>,

    /// Path to the jobs database. Defaults to <data-dir>/jobs.db.
    #[clap(long, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Aligner executable handed to the wrapper.
    #[clap(long)]
    pub aligner_path: Option<String>,

    /// Wrapper script that runs the aligner.
    #[clap(long)]
    pub wrapper_path: Option<String>,

    /// Number of aligner threads.
    #[clap(long)]
    pub threads: Option<u32>,

    /// Public base URL of the web application.
    #[clap(long)]
    pub web_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch a job and process it until it reaches a terminal state.
    Run {
        job_id: String,

        /// Target sequence: a local path, or an http(s)/ftp URL.
        #[clap(long)]
        target: Option<String>,

        /// Query sequence. Without it the target is compared against itself.
        #[clap(long)]
        query: Option<String>,

        /// Contact address for the completion notification.
        #[clap(long)]
        email: Option<String>,
    },

    /// Print the status of a job.
    Status { job_id: String },

    /// Reconcile jobs interrupted by a previous process and run resumable ones.
    Recover,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            data_dir: args.data_dir.clone(),
            db_path: args.db_path.clone(),
            aligner_path: args.aligner_path.clone(),
            wrapper_path: args.wrapper_path.clone(),
            threads: args.threads,
            web_url: args.web_url.clone(),
        }
    }
}

fn print_status(job_id: &str, report: &StatusReport) {
    match report {
        StatusReport::Known { status, error } => {
            let error = error
                .as_deref()
                .map(|e| render_message(e, job_id))
                .unwrap_or_default();
            println!("{}\t{}\t{}", job_id, status, error);
        }
        StatusReport::Unknown => println!("{}\tunknown\t", job_id),
    }
}

/// Poll until every job in `job_ids` is terminal, or until Ctrl-C.
async fn wait_for_jobs(orchestrator: &JobOrchestrator, job_ids: &[String]) -> Result<()> {
    let mut pending: HashSet<&str> = job_ids.iter().map(String::as_str).collect();
    loop {
        pending.retain(|job_id| match orchestrator.status(job_id) {
            Ok(report) => !report.is_terminal() && report != StatusReport::Unknown,
            Err(e) => {
                error!("Job {}: failed to read status: {:#}", job_id, e);
                false
            }
        });
        if pending.is_empty() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                warn!("Interrupted while {} jobs are still running", pending.len());
                return Ok(());
            }
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

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  data_dir: {:?}", app_config.data_dir);
    info!("  db_path: {:?}", app_config.db_path);
    info!("  aligner: {} ({} threads)", app_config.aligner_path, app_config.threads);

    let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(&app_config.db_path)?);

    let (queue, receiver) = TaskQueue::new();
    let orchestrator = Arc::new(build_orchestrator(
        &app_config,
        store,
        Arc::new(queue),
        Arc::new(LoggingMailer),
    )?);

    let shutdown = CancellationToken::new();
    let worker = PhaseWorker::new(orchestrator.clone(), receiver);
    let worker_handle = tokio::spawn(worker.run(shutdown.child_token()));

    let watched = match cli_args.command {
        Command::Status { job_id } => {
            print_status(&job_id, &orchestrator.status(&job_id)?);
            Vec::new()
        }
        Command::Run {
            job_id,
            target,
            query,
            email,
        } => {
            orchestrator.launch(LaunchRequest {
                job_id: job_id.clone(),
                email,
                target: target.as_deref().map(SequenceReference::from_input),
                query: query.as_deref().map(SequenceReference::from_input),
            })?;
            vec![job_id]
        }
        Command::Recover => {
            let report = orchestrator.recover_interrupted()?;
            for job_id in &report.failed {
                print_status(job_id, &orchestrator.status(job_id)?);
            }
            report.resumed
        }
    };

    wait_for_jobs(&orchestrator, &watched).await?;
    shutdown.cancel();
    if let Err(e) = worker_handle.await {
        error!("Phase worker terminated abnormally: {}", e);
    }

    for job_id in &watched {
        print_status(job_id, &orchestrator.status(job_id)?);
    }
    Ok(())
}
