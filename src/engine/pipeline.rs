use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::{error, info};

use super::forecaster::{Forecaster, SequenceRegressor};
use super::insights::generate_insights;
use super::metrics::summarize_scenarios;
use super::portfolio::PortfolioSimulator;
use super::processor::Processor;
use crate::data::cache::FetchCache;
use crate::data::fetcher::{FetchBatch, FetchRequest, Fetcher};
use crate::data::loader;
use crate::data::source::{MarketDataSource, SentimentSource};
use crate::errors::AppError;
use crate::models::config::PipelineConfig;
use crate::models::result::{AnalysisReport, PortfolioReport, SymbolReport};
use crate::utils::export;

/// Shared resources a run reads and writes.
pub struct PipelineContext {
    pub db: Arc<Mutex<Connection>>,
    pub fetch_cache: Arc<FetchCache>,
    /// Root of `raw/`, `processed/` and `reports/`.
    pub data_dir: PathBuf,
}

/// Run-level input checks, done before anything is fetched.
pub fn validate_run(config: &PipelineConfig) -> Result<(), AppError> {
    config.validate()?;
    config.weights.validate()?;
    if let Some((symbol, _)) = config.weights.iter().find(|(s, _)| !config.symbols.contains(*s)) {
        return Err(AppError::InvalidWeights(format!(
            "{} is weighted but not in the symbol list",
            symbol
        )));
    }
    Ok(())
}

/// Fetch → process → forecast → insights → simulate, collecting per-unit
/// failures in the order they happen.
pub async fn run_pipeline<M, S, R>(
    config: &PipelineConfig,
    fetcher: &Fetcher<M, S>,
    ctx: &PipelineContext,
) -> Result<AnalysisReport, AppError>
where
    M: MarketDataSource,
    S: SentimentSource,
    R: SequenceRegressor + 'static,
{
    validate_run(config)?;
    let stamp = Utc::now().date_naive();

    let request = FetchRequest::new(&config.symbols, config.start_date, config.end_date);
    let batch = match ctx.fetch_cache.get(&request) {
        Some(batch) => {
            info!("Using cached fetch for {} symbols", request.symbols.len());
            batch
        }
        None => {
            let batch = fetcher.fetch(&request).await;
            if config.persist_outputs {
                persist_raw(ctx, &batch, stamp);
            }
            ctx.fetch_cache.insert(&request, batch)
        }
    };
    let mut failures = batch.failures.clone();

    let raw = batch.series.clone();
    let metadata = batch.metadata.clone();
    let processor = Processor::new(config.processing.clone());
    let forecaster = Forecaster::new(config.forecast.clone());
    let db = ctx.db.clone();

    let (processed, mut forecasts, forecast_failures) = tokio::task::spawn_blocking(move || {
        let processed = processor.process(&raw, &metadata);
        let conn = db.blocking_lock();
        let (forecasts, forecast_failures) = forecaster.forecast_all::<R>(&conn, &processed.series, &metadata);
        (processed, forecasts, forecast_failures)
    })
    .await
    .map_err(|e| AppError::Internal(format!("Task join error: {}", e)))?;

    info!(
        "Processed {} of {} series, {} forecasts",
        processed.usable().count(),
        processed.series.len(),
        forecasts.len()
    );
    failures.extend(processed.failures.iter().cloned());
    failures.extend(forecast_failures);

    if config.persist_outputs {
        if let Err(e) = loader::save_processed(&ctx.data_dir.join("processed"), &processed.series, stamp) {
            error!("Error saving processed data: {}", e);
        }
    }

    let (mut insights, insight_failures) = generate_insights(processed.series.keys(), &batch.metadata);
    failures.extend(insight_failures);

    let simulator = PortfolioSimulator::new(&processed.series, &batch.metadata);
    let (scenarios, sim_failure) = simulator.simulate_or_empty(&config.weights);
    failures.extend(sim_failure);
    let summaries = summarize_scenarios(&scenarios);
    for s in &summaries {
        info!("{} final value: {:.4}", s.scenario, s.final_value);
    }

    let symbols: Vec<SymbolReport> = processed
        .series
        .into_iter()
        .map(|(symbol, series)| SymbolReport {
            metadata: batch.metadata.get_or_default(&symbol),
            forecast: forecasts.remove(&symbol),
            insight: insights.remove(&symbol).unwrap_or_default(),
            series,
            symbol,
        })
        .collect();

    let report = AnalysisReport {
        run_id: uuid::Uuid::new_v4().to_string(),
        fetch_date: batch.metadata.fetch_date.clone(),
        symbols,
        portfolio: PortfolioReport {
            weights: config.weights.clone(),
            scenarios,
            summaries,
        },
        failures,
    };

    if config.persist_outputs {
        if let Err(e) = export::export_report(&report, &ctx.data_dir.join("reports")) {
            error!("Error exporting report: {}", e);
        }
    }

    info!(
        "Run {} complete: {} symbols, {} failures",
        report.run_id,
        report.symbols.len(),
        report.failures.len()
    );
    Ok(report)
}

fn persist_raw(ctx: &PipelineContext, batch: &FetchBatch, stamp: chrono::NaiveDate) {
    if let Err(e) = loader::save_raw(&ctx.data_dir.join("raw"), &batch.series, &batch.metadata, stamp) {
        error!("Error saving raw data: {}", e);
    }
}
