//! docwarden-server: recovery trigger endpoints and operator commands.

mod routes;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast;

use docwarden::db::default_database_path;
use docwarden::logging::{self, LoggingError};
use docwarden::recovery::UnconfiguredWorker;
use docwarden::{
    Config, ContinuationWorker, Database, DatabaseError, DispatchError, DocwardenError,
    HttpContinuationWorker, IntegrityHealer, IntegrityValidator, RecoveryScheduler,
    StuckTaskDetector,
};

use routes::AppState;

#[derive(Parser)]
#[command(name = "docwarden-server")]
#[command(about = "Stuck-task recovery and consistency checks for the document pipeline")]
#[command(version)]
struct Cli {
    /// Path to a JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP endpoints and run the periodic detector
    Serve,

    /// Run one detection pass
    Detect {
        /// List stuck tasks without releasing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Check consolidated content against page counts
    Validate {
        /// Validate a single job
        #[arg(long)]
        job: Option<String>,
    },

    /// Request remediation for one job
    Heal {
        #[arg(long)]
        job: String,
    },

    /// Show the recovery log
    History {
        /// Only entries for this job
        #[arg(long)]
        job: Option<String>,

        /// Maximum number of entries across all jobs
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Docwarden(#[from] DocwardenError),

    #[error("Failed to initialize logging: {0}")]
    Logging(#[from] LoggingError),

    #[error("No database path configured and no home directory found")]
    NoDatabasePath,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

impl From<DatabaseError> for CliError {
    fn from(e: DatabaseError) -> Self {
        Self::Docwarden(e.into())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let config = docwarden::load_or_default(cli.config.as_deref()).map_err(DocwardenError::from)?;
    logging::init(&config.logging)?;

    let db_path = config
        .database
        .path
        .clone()
        .or_else(default_database_path)
        .ok_or(CliError::NoDatabasePath)?;
    tracing::debug!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path)?;

    let detector = Arc::new(StuckTaskDetector::new(
        db.clone(),
        build_worker(&config)?,
        config.detector.stuck_threshold(),
    ));

    match cli.command {
        Commands::Serve => {
            serve(&config, db, detector).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Detect { dry_run: true } => {
            print_json(&detector.scan()?)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Detect { dry_run: false } => match detector.detect_and_recover().await {
            Ok(report) => {
                print_json(&report)?;
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                print_json(&serde_json::json!({
                    "error": e.to_string(),
                    "worker_id": e.worker_id(),
                }))?;
                Ok(ExitCode::FAILURE)
            }
        },
        Commands::Validate { job: Some(job_id) } => {
            let issue = IntegrityValidator::new(db)
                .validate_one(&job_id)
                .map_err(DocwardenError::from)?;
            print_json(&issue)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate { job: None } => {
            let issues = IntegrityValidator::new(db)
                .validate_all()
                .map_err(DocwardenError::from)?;
            print_json(&issues)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::History { job, limit } => {
            print_json(&detector.history(job.as_deref(), limit)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Heal { job } => {
            let outcome = IntegrityHealer::new(IntegrityValidator::new(db)).heal(&job);
            print_json(&outcome)?;
            Ok(if outcome.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn build_worker(config: &Config) -> Result<Arc<dyn ContinuationWorker>, CliError> {
    match HttpContinuationWorker::from_config(&config.worker) {
        Ok(worker) => {
            tracing::info!(endpoint = worker.endpoint(), "Continuation worker configured");
            Ok(Arc::new(worker))
        }
        Err(DocwardenError::Dispatch(DispatchError::NotConfigured)) => {
            tracing::warn!("No continuation worker configured; recovered jobs will not be resumed");
            Ok(Arc::new(UnconfiguredWorker))
        }
        Err(e) => Err(e.into()),
    }
}

async fn serve(
    config: &Config,
    db: Database,
    detector: Arc<StuckTaskDetector>,
) -> Result<(), CliError> {
    let (trigger_tx, trigger_rx) = broadcast::channel(4);
    let interval = config.detector.interval();
    if interval.is_some() && !detector.can_dispatch() {
        tracing::warn!("No continuation worker configured; recovery scheduler not started");
    }
    let scheduler = match interval.filter(|_| detector.can_dispatch()) {
        Some(interval) => {
            let scheduler = RecoveryScheduler::new(Arc::clone(&detector), interval);
            let handle = scheduler.start(trigger_rx)?;
            tracing::info!(interval_secs = interval.as_secs(), "Recovery scheduler started");
            Some((scheduler, handle))
        }
        None => {
            tracing::info!("Recovery scheduler disabled");
            None
        }
    };

    let state = AppState {
        detector,
        validator: Arc::new(IntegrityValidator::new(db.clone())),
        healer: Arc::new(IntegrityHealer::new(IntegrityValidator::new(db))),
    };

    let listener = tokio::net::TcpListener::bind(config.server.bind).await?;
    tracing::info!(addr = %config.server.bind, "Listening");

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some((scheduler, handle)) = scheduler {
        scheduler.stop();
        let _ = trigger_tx.send(());
        if handle.join().is_err() {
            tracing::error!("Recovery scheduler thread panicked");
        }
    }

    tracing::info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
