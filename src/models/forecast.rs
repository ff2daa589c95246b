use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Forward forecast for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSeries {
    pub symbol: String,
    /// Business days following the last observation.
    pub dates: Vec<NaiveDate>,
    /// Hype-adjusted price predictions.
    pub values: Vec<f64>,
    /// `1 + hype_score / 100`.
    pub hype_multiplier: f64,
    /// True when the model came from the artifact store.
    pub from_cache: bool,
}

/// Min-max scaler over a single column, mapping the fitted range to [0, 1].
/// A zero range scales by one, leaving values shifted by the minimum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub min: f64,
    pub max: f64,
}

impl MinMaxScaler {
    pub fn fit(values: &[f64]) -> Self {
        let min = values.iter().copied().filter(|v| !v.is_nan()).fold(f64::INFINITY, f64::min);
        let max = values
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(f64::NEG_INFINITY, f64::max);
        if min.is_finite() && max.is_finite() {
            MinMaxScaler { min, max }
        } else {
            MinMaxScaler { min: 0.0, max: 1.0 }
        }
    }

    fn range(&self) -> f64 {
        let range = self.max - self.min;
        if range == 0.0 {
            1.0
        } else {
            range
        }
    }

    pub fn transform(&self, values: &[f64]) -> Vec<f64> {
        let range = self.range();
        values.iter().map(|v| (v - self.min) / range).collect()
    }

    pub fn inverse_transform(&self, values: &[f64]) -> Vec<f64> {
        let range = self.range();
        values.iter().map(|v| v * range + self.min).collect()
    }
}

/// Everything needed to regenerate a forecast without retraining.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact<R> {
    pub symbol: String,
    pub model: R,
    pub scaler: MinMaxScaler,
    pub window: usize,
    /// Mean training loss of the final epoch.
    pub final_loss: f64,
    pub trained_at: String,
}

/// Store listing entry for a cached model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub symbol: String,
    pub window: usize,
    pub final_loss: f64,
    pub trained_at: String,
}
