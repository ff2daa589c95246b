use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Tolerance used when checking that weights sum to one.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Portfolio weights keyed by symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortfolioWeights(pub BTreeMap<String, f64>);

impl PortfolioWeights {
    pub fn new(weights: BTreeMap<String, f64>) -> Self {
        PortfolioWeights(
            weights
                .into_iter()
                .map(|(symbol, w)| (symbol.trim().to_uppercase(), w))
                .collect(),
        )
    }

    pub fn sum(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }

    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.0.get(symbol).copied()
    }

    /// Reject empty sets, weights outside [0, 1] and sums away from 1.0.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.0.is_empty() {
            return Err(AppError::EmptySymbolSet);
        }
        for (symbol, w) in &self.0 {
            if !w.is_finite() || *w < 0.0 || *w > 1.0 {
                return Err(AppError::InvalidWeights(format!(
                    "weight for {} must be within [0, 1], got {}",
                    symbol, w
                )));
            }
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(AppError::InvalidWeights(format!(
                "weights must sum to 1.0, got {:.4}",
                sum
            )));
        }
        Ok(())
    }
}

/// The three simulated scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    Base,
    HypeShock,
    Crash,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 3] = [ScenarioKind::Base, ScenarioKind::HypeShock, ScenarioKind::Crash];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioKind::Base => "base",
            ScenarioKind::HypeShock => "hype_shock",
            ScenarioKind::Crash => "crash",
        }
    }
}

impl std::fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cumulative-return curves for all scenarios on a shared date index.
/// An empty set means the simulation was unavailable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSet {
    pub dates: Vec<NaiveDate>,
    pub base: Vec<f64>,
    pub hype_shock: Vec<f64>,
    pub crash: Vec<f64>,
    /// Uniform multiplier applied to the base return stream in `hype_shock`.
    pub hype_multiplier: f64,
}

impl ScenarioSet {
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn curve(&self, kind: ScenarioKind) -> &[f64] {
        match kind {
            ScenarioKind::Base => &self.base,
            ScenarioKind::HypeShock => &self.hype_shock,
            ScenarioKind::Crash => &self.crash,
        }
    }

    pub fn last_value(&self, kind: ScenarioKind) -> Option<f64> {
        self.curve(kind).last().copied()
    }
}

/// Headline statistics of one scenario curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSummary {
    pub scenario: ScenarioKind,
    pub final_value: f64,
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
}
