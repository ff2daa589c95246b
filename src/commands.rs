use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::info;

use crate::data::fetcher::{FetchRequest, Fetcher};
use crate::data::loader;
use crate::data::source::{MarketDataSource, MomentumSentiment};
use crate::data::storage;
use crate::data::yahoo::YahooFinanceSource;
use crate::engine::lstm::LstmRegressor;
use crate::engine::pipeline::run_pipeline;
use crate::errors::AppError;
use crate::models::config::PipelineConfig;
use crate::models::forecast::ModelInfo;
use crate::models::metadata::RunMetadata;
use crate::models::result::AnalysisReport;
use crate::models::series::SymbolSeries;
use crate::AppState;

// ── Analysis Commands ──

/// Run the full pipeline against the live market data source.
pub async fn run_analysis(state: &AppState, config: Option<PipelineConfig>) -> Result<AnalysisReport, AppError> {
    let config = config.map(PipelineConfig::normalized).unwrap_or_else(|| state.config.clone());
    let source = Arc::new(YahooFinanceSource::new(&config.fetch)?);
    analyze_with_source(state, config, source).await
}

/// Run the full pipeline against any market data source. Sentiment is the
/// momentum proxy over the same source.
pub async fn analyze_with_source<M: MarketDataSource>(
    state: &AppState,
    config: PipelineConfig,
    source: Arc<M>,
) -> Result<AnalysisReport, AppError> {
    info!("Running analysis: symbols={:?}", config.symbols);
    let sentiment = MomentumSentiment::new(Arc::clone(&source), config.fetch.sentiment_lookback_days);
    let fetcher = Fetcher::new(source, sentiment);
    run_pipeline::<_, _, LstmRegressor>(&config, &fetcher, &state.pipeline_context()).await
}

/// Load the processed series written by earlier runs.
pub async fn load_processed(state: &AppState) -> Result<BTreeMap<String, SymbolSeries>, AppError> {
    let dir = state.data_dir.join("processed");
    let (series, _) = tokio::task::spawn_blocking(move || loader::load_dir(&dir))
        .await
        .map_err(|e| AppError::Internal(format!("Task join error: {}", e)))??;
    Ok(series)
}

/// Load the raw series and run metadata written by earlier runs.
pub async fn load_raw(state: &AppState) -> Result<(BTreeMap<String, SymbolSeries>, RunMetadata), AppError> {
    let dir = state.data_dir.join("raw");
    tokio::task::spawn_blocking(move || loader::load_dir(&dir))
        .await
        .map_err(|e| AppError::Internal(format!("Task join error: {}", e)))?
}

// ── Model Commands ──

pub async fn list_models(state: &AppState) -> Result<Vec<ModelInfo>, AppError> {
    let db = state.db.lock().await;
    storage::list_models(&db)
}

/// Drop a symbol's cached model so the next run retrains it.
pub async fn delete_model(state: &AppState, symbol: &str) -> Result<bool, AppError> {
    let symbol = symbol.trim().to_uppercase();
    info!("Deleting cached model for {}", symbol);
    let db = state.db.lock().await;
    storage::delete_model(&db, &symbol)
}

// ── Cache Commands ──

/// Forget the memoised fetch for one request. Returns whether it existed.
pub async fn invalidate_fetch_cache(
    state: &AppState,
    symbols: Vec<String>,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<bool, AppError> {
    if symbols.is_empty() {
        return Err(AppError::EmptySymbolSet);
    }
    let removed = state.fetch_cache.invalidate(&FetchRequest::new(&symbols, start, end));
    info!("Fetch cache invalidation for {:?}: removed={}", symbols, removed);
    Ok(removed)
}

/// Forget every memoised fetch. Returns how many entries were dropped.
pub async fn clear_fetch_cache(state: &AppState) -> Result<usize, AppError> {
    let count = state.fetch_cache.len();
    state.fetch_cache.clear();
    info!("Cleared {} fetch cache entries", count);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::source::tests::{daily_bars, MockSource};
    use crate::models::portfolio::PortfolioWeights;

    fn test_config() -> PipelineConfig {
        let mut weights = BTreeMap::new();
        weights.insert("AAPL".to_string(), 1.0);
        let mut config = PipelineConfig {
            symbols: vec!["aapl".to_string()],
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            weights: PortfolioWeights::new(weights),
            ..Default::default()
        };
        config.forecast.window = 5;
        config.forecast.hidden_size = 3;
        config.forecast.num_layers = 1;
        config.forecast.epochs = 1;
        config.forecast.horizon = 2;
        config.normalized()
    }

    fn mock_source() -> Arc<MockSource> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let closes: Vec<f64> = (0..70).map(|i| 50.0 + (i as f64 * 0.3).cos() + i as f64 * 0.1).collect();
        Arc::new(MockSource::default().with("AAPL", daily_bars(start, &closes, &[500.0; 70])))
    }

    #[tokio::test]
    async fn test_analysis_then_model_management() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(dir.path().to_path_buf(), test_config()).unwrap();

        let report = analyze_with_source(&state, state.config.clone(), mock_source()).await.unwrap();
        assert!(report.symbols[0].forecast.is_some());

        let models = list_models(&state).await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].symbol, "AAPL");
        assert_eq!(models[0].window, 5);

        assert!(delete_model(&state, "aapl").await.unwrap());
        assert!(!delete_model(&state, "AAPL").await.unwrap());
        assert!(list_models(&state).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persisted_series_can_be_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(dir.path().to_path_buf(), test_config()).unwrap();
        analyze_with_source(&state, state.config.clone(), mock_source()).await.unwrap();

        let processed = load_processed(&state).await.unwrap();
        assert_eq!(processed["AAPL"].len(), 70);

        let (raw, metadata) = load_raw(&state).await.unwrap();
        assert_eq!(raw["AAPL"].len(), 70);
        assert!(metadata.symbols.contains_key("AAPL"));
    }

    #[tokio::test]
    async fn test_cache_invalidation() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(dir.path().to_path_buf(), test_config()).unwrap();
        let config = state.config.clone();
        analyze_with_source(&state, config.clone(), mock_source()).await.unwrap();
        assert_eq!(state.fetch_cache.len(), 1);

        let removed = invalidate_fetch_cache(&state, vec!["aapl".to_string()], config.start_date, config.end_date)
            .await
            .unwrap();
        assert!(removed);
        assert!(state.fetch_cache.is_empty());

        assert!(matches!(
            invalidate_fetch_cache(&state, Vec::new(), config.start_date, config.end_date).await,
            Err(AppError::EmptySymbolSet)
        ));

        analyze_with_source(&state, config, mock_source()).await.unwrap();
        assert_eq!(clear_fetch_cache(&state).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_processed_dir_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(dir.path().to_path_buf(), test_config()).unwrap();
        assert!(matches!(load_processed(&state).await, Err(AppError::NoData(_))));
    }
}
