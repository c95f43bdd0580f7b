//! Command-line binding for the batch engine.
//!
//! `run` creates a batch from local files, drives it until it settles, and
//! prints the final batch and item snapshots as JSON. Exit codes: 0 success,
//! 2 permission denied, 3 not found, 4 illegal state transition, 5 upstream
//! unavailable.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use sievelet::{
    content_hash, BatchController, BatchStatus, CandidateFile, EngineConfig, HttpAnalyzer,
    InMemoryStateStore, LocalObjectStore, OwnerId, SieveletError,
};

/// Batch resume screening engine
#[derive(Parser)]
#[command(name = "sievelet")]
#[command(about = "Batch resume screening engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a batch from local files and drive it until it settles
    Run {
        /// Owner identity for the batch
        #[arg(long, default_value = "local")]
        owner: String,

        /// Path to the job description text file
        #[arg(long)]
        job_description: PathBuf,

        /// Candidate files to screen
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print the content digest of a file
    Hash {
        /// File to hash
        file: PathBuf,
    },
}

fn exit_code(err: &SieveletError) -> i32 {
    match err {
        SieveletError::PermissionDenied(_) => 2,
        SieveletError::BatchNotFound(_) | SieveletError::ItemNotFound(_) => 3,
        SieveletError::IllegalTransition { .. } => 4,
        SieveletError::Upstream(_) => 5,
        _ => 1,
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sievelet=info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(exit_code(&e));
    }
}

async fn run(cli: Cli) -> sievelet::Result<()> {
    match cli.command {
        Commands::Hash { file } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            println!("{}", content_hash(&bytes));
            Ok(())
        }
        Commands::Run {
            owner,
            job_description,
            files,
        } => run_batch(OwnerId(owner), job_description, files).await,
    }
}

async fn run_batch(
    owner: OwnerId,
    job_description: PathBuf,
    files: Vec<PathBuf>,
) -> sievelet::Result<()> {
    let config = EngineConfig::from_env()?;
    let endpoint = config.analyzer_endpoint.clone().ok_or_else(|| {
        SieveletError::Upstream("SIEVELET_ANALYZER_ENDPOINT is not set".to_string())
    })?;

    let analyzer = Arc::new(HttpAnalyzer::new(
        endpoint,
        config.analyzer_api_key.clone(),
        config.analyzer_timeout_ms,
    ));
    let store = Arc::new(InMemoryStateStore::new());
    let objects = Arc::new(LocalObjectStore::new(config.storage_bucket.clone()));
    let controller = BatchController::new(store, objects, analyzer, config);

    let jd = tokio::fs::read_to_string(&job_description)
        .await
        .with_context(|| format!("reading {}", job_description.display()))?;

    let mut candidates = Vec::with_capacity(files.len());
    for path in files {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                SieveletError::Validation(format!("{} has no filename", path.display()))
            })?;
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        candidates.push(CandidateFile { filename, bytes });
    }

    let batch_id = controller.create_batch(&owner, &jd, candidates).await?;
    let _watchdog = controller.spawn_watchdog();

    // Observers poll persisted state; so does the CLI.
    let batch = loop {
        let batch = controller.get_batch(&owner, batch_id).await?;
        if batch.status != BatchStatus::Running {
            break batch;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    };

    let items = controller.list_items(&owner, batch_id, None).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "batch": batch,
            "items": items,
        }))?
    );
    Ok(())
}
