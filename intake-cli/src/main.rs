use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use intake::{
    default_config_path, load_config, IngestQueue, IntakeError, ItemEvent, ItemStatus,
    SourceFile, StatusCounts,
};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(name = "intake", version, about = "Upload files and follow their processing")]
struct Args {
    /// Files or directories to upload. Directories are walked recursively.
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Config file (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Folder to file every record under
    #[arg(long)]
    folder: Option<i64>,

    /// Override queue.maxConcurrent
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Retry failed items up to this many rounds
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// Emit logs and item events as JSON lines
    #[arg(long)]
    json: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Intake(#[from] IntakeError),

    #[error("No config file given and no platform config directory found")]
    NoConfigPath,

    #[error("Failed to walk '{path}': {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("No files found to upload")]
    NoFiles,

    #[error("Failed to install Ctrl-C handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.verbose, args.json) {
        eprintln!("{}", e);
        return ExitCode::from(2);
    }

    match run(args).await {
        Ok(counts) if counts.failed == 0 && counts.active() == 0 => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(2)
        }
    }
}

fn init_logging(verbose: bool, json: bool) -> Result<(), CliError> {
    tracing_log::LogTracer::init().map_err(|e| CliError::Logging(e.to_string()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_writer(std::io::stderr)),
        )
    } else {
        tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_target(false).with_writer(std::io::stderr)),
        )
    };
    result.map_err(|e| CliError::Logging(e.to_string()))
}

async fn run(args: Args) -> Result<StatusCounts, CliError> {
    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path().ok_or(CliError::NoConfigPath)?,
    };
    info!("Loading config from {}", config_path.display());

    let mut config = load_config(&config_path).map_err(IntakeError::from)?;
    if args.folder.is_some() {
        config.queue.folder_id = args.folder;
    }
    if let Some(max) = args.max_concurrent {
        config.queue.max_concurrent = max.max(1);
    }

    let sources = collect_sources(&args.paths).await?;
    if sources.is_empty() {
        return Err(CliError::NoFiles);
    }

    let queue = Arc::new(IngestQueue::from_config(&config)?);

    let signal_queue = Arc::clone(&queue);
    ctrlc::set_handler(move || {
        warn!("Interrupted, releasing all channels");
        signal_queue.shutdown();
    })?;

    let renderer = spawn_renderer(&queue, args.json);
    queue.submit(sources).map_err(IntakeError::from)?;

    let mut counts = queue.wait_until_settled().await;
    let mut round = 0;
    while counts.failed > 0 && round < args.retries && !queue.is_shutdown() {
        round += 1;
        info!(round, failed = counts.failed, "Retrying failed items");
        for item in queue.snapshot() {
            if item.status == ItemStatus::Failed {
                queue.retry(&item.id).map_err(IntakeError::from)?;
            }
        }
        counts = queue.wait_until_settled().await;
    }

    queue.shutdown();
    renderer.abort();

    if !args.json {
        print_summary(&queue);
    }
    info!(
        completed = counts.completed,
        failed = counts.failed,
        unfinished = counts.active(),
        "Done"
    );
    Ok(counts)
}

/// Expands directory arguments into the regular files below them, skipping
/// hidden entries. Explicit file arguments are always kept.
async fn collect_sources(paths: &[PathBuf]) -> Result<Vec<SourceFile>, CliError> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let walker = WalkDir::new(path)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()));
            for entry in walker {
                let entry = entry.map_err(|e| CliError::Walk {
                    path: path.clone(),
                    source: e,
                })?;
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(path.clone());
        }
    }

    let mut sources = Vec::with_capacity(files.len());
    for file in files {
        sources.push(SourceFile::from_path(&file).await?);
    }
    Ok(sources)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

/// Prints the live view: one line whenever an item's status line changes, or
/// every event as JSON.
fn spawn_renderer(queue: &IngestQueue, json: bool) -> JoinHandle<()> {
    let mut rx = queue.subscribe();
    tokio::spawn(async move {
        let mut shown: HashMap<String, String> = HashMap::new();
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Live view fell behind");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            if json {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!(error = %e, "Failed to encode item event"),
                }
                continue;
            }

            match &event {
                ItemEvent::Added { item } | ItemEvent::Updated { item } => {
                    let line = format!("[{:>3}%] {}: {}", item.progress, item.filename, item.display_text);
                    if shown.get(&item.id) != Some(&line) {
                        println!("{}", line);
                        shown.insert(item.id.clone(), line);
                    }
                }
                ItemEvent::Removed { id, .. } => {
                    shown.remove(id);
                }
            }
        }
    })
}

fn print_summary(queue: &IngestQueue) {
    println!();
    for item in queue.items() {
        println!("{:<10} {}  {}", item.status.as_str(), item.filename, item.display_text);
    }
}
