mod config;
mod day_folder;
mod error;
mod excel_sink;
mod forwarder;
mod mapping;
mod pipeline;
mod processed;
mod readiness;
mod remote;
mod watcher;

use clap::Parser;
use config::{Config, PathsConfig, ResolvedPaths};
use day_folder::{Clock, SystemClock, day_label};
use error::SetupError;
use excel_sink::ExcelLedger;
use forwarder::HttpForwarder;
use pipeline::Pipeline;
use processed::{ProcessedSet, ProcessedStore};
use remote::HttpDocumentApi;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use watcher::{ArrivalWatcher, WatchSettings};

/// Watch dated folders for incoming invoice PDFs and push them through
/// extraction, the ERP and the Excel ledger.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Config file; created on first run when paths are given
    #[arg(long, env = "MONITOR_CONFIG", default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Folder holding one YYYY-MM-DD subfolder per day
    #[arg(long)]
    watch_root: Option<PathBuf>,

    /// Folder the Excel ledgers are written under
    #[arg(long)]
    output_root: Option<PathBuf>,

    /// Log file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn supplied_paths(&self) -> PathsConfig {
        PathsConfig {
            watch_root: self.watch_root.clone(),
            output_root: self.output_root.clone(),
            log_file: self.log_file.clone(),
        }
    }
}

/// Merge cached and command-line paths, writing new ones back to the config file.
fn load_config(args: &Args) -> Result<(Config, ResolvedPaths), SetupError> {
    let mut cfg = Config::load_or_default(&args.config)?;
    let supplied = args.supplied_paths();
    if !supplied.is_empty() {
        Config::remember_paths(&args.config, &supplied)?;
        supplied.overlay(&mut cfg.paths);
    }
    let paths = cfg.resolved_paths()?;
    Ok((cfg, paths))
}

fn init_tracing(log_file: &Path) -> Result<(), SetupError> {
    if let Some(dir) = log_file.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| SetupError::LogFile {
            path: log_file.to_path_buf(),
            source,
        })?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(|source| SetupError::LogFile {
            path: log_file.to_path_buf(),
            source,
        })?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();
    Ok(())
}

fn build_watcher(cfg: &Config, paths: &ResolvedPaths) -> Result<ArrivalWatcher, SetupError> {
    if !paths.watch_root.is_dir() {
        return Err(SetupError::WatchRootMissing(paths.watch_root.clone()));
    }

    let client = remote::build_client(&cfg.api)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let pipeline = Pipeline::new(
        Arc::new(HttpDocumentApi::new(client.clone(), &cfg.api)),
        Arc::new(HttpForwarder::new(client, &cfg.api)),
        Arc::new(ExcelLedger::new(
            paths.output_root.clone(),
            cfg.ledger.bucket.clone(),
            cfg.ledger.file_name.clone(),
        )),
        clock.clone(),
    );

    let processed = match &cfg.dedupe.store_path {
        Some(store_path) => {
            let store = ProcessedStore::open(store_path)?;
            info!(
                store = %store_path.display(),
                recorded_today = store.count_for_day(&day_label(clock.today()))?,
                "Using persistent processed-file store"
            );
            ProcessedSet::with_store(store)
        }
        None => ProcessedSet::new(),
    };

    Ok(ArrivalWatcher::new(
        paths.watch_root.clone(),
        WatchSettings::from(&cfg.watch),
        pipeline,
        processed,
        clock,
    ))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let (cfg, paths) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error getting paths: {e}");
            return Err(e.into());
        }
    };
    init_tracing(&paths.log_file)?;

    info!(folder = %paths.watch_root.display(), "PDF monitor folder");
    info!(folder = %paths.output_root.display(), "Base output folder");
    info!(file = %paths.log_file.display(), "Log file");
    info!(
        base_url = %cfg.api.base_url,
        timeout_secs = cfg.api.timeout_secs,
        "Remote services"
    );

    let mut watcher = match build_watcher(&cfg, &paths) {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, "Startup failed");
            return Err(e.into());
        }
    };

    watcher
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Could not listen for interrupt signal");
                std::future::pending::<()>().await;
            }
            info!("Interrupt received, shutting down");
        })
        .await;

    info!("Stopped monitoring");
    Ok(())
}
