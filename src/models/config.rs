use std::collections::BTreeMap;
use std::path::Path;

use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::portfolio::PortfolioWeights;
use crate::errors::AppError;

/// Market data source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Base URL of the chart API (e.g. `https://query1.finance.yahoo.com`).
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Calendar days of history used by the momentum sentiment proxy.
    pub sentiment_lookback_days: i64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            base_url: "https://query1.finance.yahoo.com".to_string(),
            user_agent: "stock-insight/0.1".to_string(),
            timeout_secs: 30,
            sentiment_lookback_days: 7,
        }
    }
}

/// Cleaning and enrichment parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Returns beyond this many standard deviations are replaced.
    pub outlier_std_multiplier: f64,
    pub volatility_window: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        ProcessingConfig {
            outlier_std_multiplier: 5.0,
            volatility_window: 20,
        }
    }
}

/// Sequence model and rollout parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Input window length; also the minimum series length to forecast.
    pub window: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Business days to forecast.
    pub horizon: usize,
    /// Seed for weight initialisation.
    pub seed: u64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        ForecastConfig {
            window: 60,
            hidden_size: 50,
            num_layers: 2,
            epochs: 5,
            batch_size: 32,
            learning_rate: 0.001,
            horizon: 10,
            seed: 42,
        }
    }
}

/// Top-level pipeline configuration, loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub symbols: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub weights: PortfolioWeights,
    pub fetch: FetchConfig,
    pub processing: ProcessingConfig,
    pub forecast: ForecastConfig,
    /// Write raw/processed series and reports under the data directory.
    pub persist_outputs: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let end_date = Utc::now().date_naive();
        let symbols = vec!["AAPL".to_string(), "TSLA".to_string()];
        let mut weights = BTreeMap::new();
        weights.insert(symbols[0].clone(), 1.0);
        PipelineConfig {
            symbols,
            start_date: end_date - Duration::days(365),
            end_date,
            weights: PortfolioWeights::new(weights),
            fetch: FetchConfig::default(),
            processing: ProcessingConfig::default(),
            forecast: ForecastConfig::default(),
            persist_outputs: true,
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            return Ok(Self::default().normalized());
        }
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)
            .map_err(|e| AppError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        Ok(config.normalized())
    }

    /// Upper-case and de-duplicate symbols, keeping their order.
    pub fn normalized(mut self) -> Self {
        let mut seen = Vec::with_capacity(self.symbols.len());
        for s in &self.symbols {
            let s = s.trim().to_uppercase();
            if !s.is_empty() && !seen.contains(&s) {
                seen.push(s);
            }
        }
        self.symbols = seen;
        self.weights = PortfolioWeights::new(self.weights.0);
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.symbols.is_empty() {
            return Err(AppError::EmptySymbolSet);
        }
        if self.start_date >= self.end_date {
            return Err(AppError::InvalidConfig(format!(
                "start_date {} must be before end_date {}",
                self.start_date, self.end_date
            )));
        }
        let f = &self.forecast;
        if f.window == 0 || f.horizon == 0 || f.epochs == 0 || f.hidden_size == 0 {
            return Err(AppError::InvalidConfig(
                "forecast window, horizon, epochs and hidden_size must be non-zero".into(),
            ));
        }
        if f.num_layers == 0 || f.batch_size == 0 {
            return Err(AppError::InvalidConfig(
                "forecast num_layers and batch_size must be non-zero".into(),
            ));
        }
        if self.processing.volatility_window < 2 {
            return Err(AppError::InvalidConfig("volatility_window must be at least 2".into()));
        }
        Ok(())
    }
}
