pub mod commands;
pub mod data;
pub mod engine;
pub mod errors;
pub mod models;
pub mod utils;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::data::cache::FetchCache;
use crate::engine::pipeline::PipelineContext;
use crate::errors::AppError;
use crate::models::config::PipelineConfig;
use crate::models::result::AnalysisReport;

/// Overrides the data directory.
pub const DATA_DIR_ENV: &str = "STOCK_INSIGHT_DATA_DIR";
/// Path of the JSON pipeline configuration.
pub const CONFIG_ENV: &str = "STOCK_INSIGHT_CONFIG";

/// Shared application state, accessible from all commands.
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub data_dir: PathBuf,
    pub fetch_cache: Arc<FetchCache>,
    /// Configuration used when a command does not supply its own.
    pub config: PipelineConfig,
}

impl AppState {
    /// Open (or create) the model store under `data_dir`.
    pub fn open(data_dir: PathBuf, config: PipelineConfig) -> Result<Self, AppError> {
        prepare_data_dir(&data_dir)?;
        let db_path = data_dir.join("insight.db");
        let db_path_str = db_path.to_string_lossy().to_string();
        let conn = data::storage::initialize_database(&db_path_str)?;
        info!("Database ready at {}", db_path_str);

        Ok(AppState {
            db: Arc::new(Mutex::new(conn)),
            data_dir,
            fetch_cache: Arc::new(FetchCache::new()),
            config,
        })
    }

    pub fn pipeline_context(&self) -> PipelineContext {
        PipelineContext {
            db: Arc::clone(&self.db),
            fetch_cache: Arc::clone(&self.fetch_cache),
            data_dir: self.data_dir.clone(),
        }
    }
}

/// Create the data directory and its sub-directories.
fn prepare_data_dir(dir: &Path) -> Result<(), AppError> {
    for sub in ["raw", "processed", "reports"] {
        fs::create_dir_all(dir.join(sub))
            .map_err(|e| AppError::FileWrite(format!("{}: {}", dir.join(sub).display(), e)))?;
    }
    Ok(())
}

/// Resolve the application data directory.
fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    resolve_data_path().unwrap_or_else(|| PathBuf::from("./data"))
}

/// Platform-aware data directory.
fn resolve_data_path() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let base = exe.parent()?;

    if cfg!(debug_assertions) {
        // In dev: walk up from target/debug to the project root
        let mut dir = base.to_path_buf();
        for _ in 0..2 {
            dir = dir.parent()?.to_path_buf();
        }
        Some(dir.join("data"))
    } else {
        Some(base.join("data"))
    }
}

fn config_path(data_dir: &Path) -> PathBuf {
    std::env::var(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.join("config.json"))
}

/// Initialise logging, load configuration and run one analysis.
pub async fn run() -> Result<AnalysisReport, AppError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting stock insight pipeline");

    let data_dir = get_data_dir();
    let config = PipelineConfig::load(&config_path(&data_dir))?;
    info!(
        "Config: symbols={:?}, range={}..{}",
        config.symbols, config.start_date, config.end_date
    );

    let state = AppState::open(data_dir, config)?;
    commands::run_analysis(&state, None).await
}
