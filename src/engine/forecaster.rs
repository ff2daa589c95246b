use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate, Utc, Weekday};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, info, warn};

use super::indicators::check_data_len;
use crate::data::storage;
use crate::errors::{AppError, Stage, UnitFailure};
use crate::models::config::ForecastConfig;
use crate::models::forecast::{ForecastSeries, MinMaxScaler, ModelArtifact};
use crate::models::metadata::RunMetadata;
use crate::models::series::SymbolSeries;

/// Any model mapping a window of scaled values to the next scaled value.
pub trait SequenceRegressor: Serialize + DeserializeOwned + Send + Sized {
    fn from_config(config: &ForecastConfig) -> Self;

    /// Train on `(window, next value)` pairs. Returns the final training loss.
    fn fit(&mut self, windows: &[Vec<f64>], targets: &[f64], config: &ForecastConfig) -> Result<f64, AppError>;

    fn predict(&self, window: &[f64]) -> f64;
}

/// Trains or loads per-symbol models and produces hype-adjusted forecasts.
pub struct Forecaster {
    config: ForecastConfig,
}

impl Forecaster {
    pub fn new(config: ForecastConfig) -> Self {
        Forecaster { config }
    }

    /// Forecast every non-empty series. Ineligible symbols are skipped
    /// without a failure; anything else that goes wrong is recorded.
    pub fn forecast_all<R: SequenceRegressor>(
        &self,
        conn: &Connection,
        series: &BTreeMap<String, SymbolSeries>,
        metadata: &RunMetadata,
    ) -> (BTreeMap<String, ForecastSeries>, Vec<UnitFailure>) {
        let mut forecasts = BTreeMap::new();
        let mut failures = Vec::new();

        for (symbol, s) in series.iter().filter(|(_, s)| !s.is_empty()) {
            let hype = metadata.get_or_default(symbol).hype_score;
            match self.forecast_symbol::<R>(conn, s, hype) {
                Ok(Some(forecast)) => {
                    forecasts.insert(symbol.clone(), forecast);
                }
                Ok(None) => {}
                Err(AppError::InsufficientData { needed, available }) => {
                    info!(
                        "Skipping forecast for {}: need {} observations, got {}",
                        symbol, needed, available
                    );
                }
                Err(e) => {
                    error!("Error predicting for {}: {}", symbol, e);
                    failures.push(UnitFailure::for_symbol(symbol, Stage::Forecast, &e));
                }
            }
        }

        (forecasts, failures)
    }

    /// `Ok(None)` when the series is shorter than the window.
    pub fn forecast_symbol<R: SequenceRegressor>(
        &self,
        conn: &Connection,
        series: &SymbolSeries,
        hype_score: f64,
    ) -> Result<Option<ForecastSeries>, AppError> {
        let window = self.config.window;
        if series.len() < window {
            info!(
                "{}: {} observations, below the {}-day window; no forecast",
                series.symbol,
                series.len(),
                window
            );
            return Ok(None);
        }

        let closes = series.closes();
        if closes.iter().any(|c| !c.is_finite()) {
            return Err(AppError::Computation(format!(
                "{}: close series has missing values",
                series.symbol
            )));
        }
        let Some(last_date) = series.last_date() else {
            return Ok(None);
        };

        let (model, scaler, from_cache) = match storage::load_model::<R>(conn, &series.symbol)? {
            Some(artifact) if artifact.window == window => {
                info!("Using cached model for {}", series.symbol);
                (artifact.model, artifact.scaler, true)
            }
            Some(artifact) => {
                warn!(
                    "Cached model for {} uses window {}, retraining for {}",
                    series.symbol, artifact.window, window
                );
                let (model, scaler) = self.train::<R>(conn, &series.symbol, &closes)?;
                (model, scaler, false)
            }
            None => {
                let (model, scaler) = self.train::<R>(conn, &series.symbol, &closes)?;
                (model, scaler, false)
            }
        };

        let scaled = scaler.transform(&closes);
        let seed = scaled[scaled.len() - window..].to_vec();
        let predicted = scaler.inverse_transform(&rollout(&model, seed, self.config.horizon));

        let hype_multiplier = 1.0 + hype_score / 100.0;
        let values: Vec<f64> = predicted.iter().map(|p| p * hype_multiplier).collect();
        if values.iter().any(|v| !v.is_finite()) {
            return Err(AppError::Computation(format!(
                "{}: forecast produced non-finite values",
                series.symbol
            )));
        }

        Ok(Some(ForecastSeries {
            symbol: series.symbol.clone(),
            dates: next_business_days(last_date, self.config.horizon),
            values,
            hype_multiplier,
            from_cache,
        }))
    }

    fn train<R: SequenceRegressor>(
        &self,
        conn: &Connection,
        symbol: &str,
        closes: &[f64],
    ) -> Result<(R, MinMaxScaler), AppError> {
        let window = self.config.window;
        check_data_len(closes.len(), window + 1)?;

        let scaler = MinMaxScaler::fit(closes);
        let (windows, targets) = sliding_windows(&scaler.transform(closes), window);

        let mut model = R::from_config(&self.config);
        let final_loss = model.fit(&windows, &targets, &self.config)?;
        info!(
            "Trained model for {} on {} windows, final loss {:.6}",
            symbol,
            windows.len(),
            final_loss
        );

        let artifact = ModelArtifact {
            symbol: symbol.to_string(),
            model,
            scaler,
            window,
            final_loss,
            trained_at: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        storage::save_model(conn, &artifact)?;
        Ok((artifact.model, scaler))
    }
}

/// Every full window and the value that follows it.
pub fn sliding_windows(values: &[f64], window: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
    if window == 0 || values.len() <= window {
        return (Vec::new(), Vec::new());
    }
    let windows = (window..values.len()).map(|i| values[i - window..i].to_vec()).collect();
    let targets = values[window..].to_vec();
    (windows, targets)
}

/// Predict `horizon` steps, feeding each prediction back as the newest input.
pub fn rollout<R: SequenceRegressor>(model: &R, mut window: Vec<f64>, horizon: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(horizon);
    for _ in 0..horizon {
        let next = model.predict(&window);
        out.push(next);
        if !window.is_empty() {
            window.rotate_left(1);
            let newest = window.len() - 1;
            window[newest] = next;
        }
    }
    out
}

/// The `n` weekdays following `after`.
pub fn next_business_days(after: NaiveDate, n: usize) -> Vec<NaiveDate> {
    let mut dates = Vec::with_capacity(n);
    let mut day = after;
    while dates.len() < n {
        day += Duration::days(1);
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            dates.push(day);
        }
    }
    dates
}
