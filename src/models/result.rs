use serde::{Deserialize, Serialize};

use super::forecast::ForecastSeries;
use super::metadata::SymbolMetadata;
use super::portfolio::{PortfolioWeights, ScenarioSet, ScenarioSummary};
use super::series::SymbolSeries;
use crate::errors::UnitFailure;

/// Everything the presentation layer needs for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolReport {
    pub symbol: String,
    pub series: SymbolSeries,
    pub metadata: SymbolMetadata,
    /// `None` when the symbol was not eligible or forecasting failed.
    pub forecast: Option<ForecastSeries>,
    pub insight: String,
}

/// Portfolio section of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioReport {
    pub weights: PortfolioWeights,
    /// Empty when the simulation was unavailable.
    pub scenarios: ScenarioSet,
    pub summaries: Vec<ScenarioSummary>,
}

/// Complete results of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub run_id: String,
    pub fetch_date: String,
    pub symbols: Vec<SymbolReport>,
    pub portfolio: PortfolioReport,
    /// Per-unit failures, in the order they happened.
    pub failures: Vec<UnitFailure>,
}
