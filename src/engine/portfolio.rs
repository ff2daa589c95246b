use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use tracing::{error, info};

use crate::errors::{AppError, Stage, UnitFailure};
use crate::models::metadata::RunMetadata;
use crate::models::portfolio::{PortfolioWeights, ScenarioSet};
use crate::models::series::SymbolSeries;

/// Sentiment sensitivity of the hype-shock scenario.
pub const HYPE_SHOCK_SENTIMENT_FACTOR: f64 = 2.0;
/// Return dampening of the crash scenario.
pub const CRASH_RETURN_FACTOR: f64 = 0.9;

/// Combines per-symbol daily returns into scenario curves.
pub struct PortfolioSimulator<'a> {
    series: &'a BTreeMap<String, SymbolSeries>,
    metadata: &'a RunMetadata,
}

impl<'a> PortfolioSimulator<'a> {
    pub fn new(series: &'a BTreeMap<String, SymbolSeries>, metadata: &'a RunMetadata) -> Self {
        PortfolioSimulator { series, metadata }
    }

    /// Dates present in every non-empty weighted series.
    pub fn shared_dates(&self, weights: &PortfolioWeights) -> Vec<NaiveDate> {
        let mut shared: Option<BTreeSet<NaiveDate>> = None;
        for (symbol, _) in weights.iter() {
            let Some(series) = self.series.get(symbol).filter(|s| !s.is_empty()) else {
                continue;
            };
            let dates: BTreeSet<NaiveDate> = series.dates().into_iter().collect();
            shared = Some(match shared {
                Some(acc) => acc.intersection(&dates).copied().collect(),
                None => dates,
            });
        }
        shared.map(|s| s.into_iter().collect()).unwrap_or_default()
    }

    /// `1 + Σ weight × sentiment × 2`; unknown symbols are neutral.
    pub fn hype_multiplier(&self, weights: &PortfolioWeights) -> f64 {
        1.0 + weights
            .iter()
            .map(|(symbol, w)| w * self.metadata.get_or_default(symbol).sentiment * HYPE_SHOCK_SENTIMENT_FACTOR)
            .sum::<f64>()
    }

    /// Weighted daily return on `dates`. Missing symbols and undefined
    /// returns contribute zero.
    pub fn portfolio_returns(&self, weights: &PortfolioWeights, dates: &[NaiveDate]) -> Vec<f64> {
        let mut total = vec![0.0; dates.len()];
        for (symbol, &w) in weights.iter() {
            let Some(series) = self.series.get(symbol) else {
                continue;
            };
            let by_date: HashMap<NaiveDate, f64> =
                series.records.iter().map(|r| (r.date, r.daily_return)).collect();
            for (i, date) in dates.iter().enumerate() {
                let r = by_date.get(date).copied().unwrap_or(0.0);
                if r.is_finite() {
                    total[i] += w * r;
                }
            }
        }
        total
    }

    /// Base, hype-shock and crash curves. Weights are validated before
    /// anything is computed.
    pub fn simulate(&self, weights: &PortfolioWeights) -> Result<ScenarioSet, AppError> {
        weights.validate()?;

        let dates = self.shared_dates(weights);
        if dates.is_empty() {
            return Err(AppError::SimulationFailed(
                "no dates shared by the weighted series".into(),
            ));
        }

        let returns = self.portfolio_returns(weights, &dates);
        let hype_multiplier = self.hype_multiplier(weights);

        let base = cumulative_growth(&returns, 1.0);
        let hype_shock = cumulative_growth(&returns, hype_multiplier);
        let crash = cumulative_growth(&returns, CRASH_RETURN_FACTOR);

        if [&base, &hype_shock, &crash].iter().any(|c| c.iter().any(|v| !v.is_finite())) {
            return Err(AppError::SimulationFailed("scenario curve is not finite".into()));
        }

        info!(
            "Simulated {} days, hype multiplier {:.3}",
            dates.len(),
            hype_multiplier
        );
        Ok(ScenarioSet {
            dates,
            base,
            hype_shock,
            crash,
            hype_multiplier,
        })
    }

    /// Like [`simulate`](Self::simulate) but degrades to an empty set and
    /// a recorded failure.
    pub fn simulate_or_empty(&self, weights: &PortfolioWeights) -> (ScenarioSet, Option<UnitFailure>) {
        match self.simulate(weights) {
            Ok(set) => (set, None),
            Err(e) => {
                error!("Error simulating portfolio: {}", e);
                (
                    ScenarioSet::default(),
                    Some(UnitFailure::for_portfolio(Stage::Simulate, &e)),
                )
            }
        }
    }
}

/// `cumprod(1 + r × factor)`.
pub fn cumulative_growth(returns: &[f64], factor: f64) -> Vec<f64> {
    let mut value = 1.0;
    returns
        .iter()
        .map(|r| {
            value *= 1.0 + r * factor;
            value
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::errors::FailureKind;
    use crate::models::bar::DailyBar;
    use crate::models::metadata::SymbolMetadata;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    fn series_with_returns(symbol: &str, start_offset: i64, returns: &[f64]) -> SymbolSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(start_offset);
        let bars: Vec<DailyBar> = (0..returns.len())
            .map(|i| DailyBar {
                date: start + Duration::days(i as i64),
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1.0,
            })
            .collect();
        let mut series = SymbolSeries::from_bars(symbol, &bars);
        for (record, r) in series.records.iter_mut().zip(returns) {
            record.daily_return = *r;
        }
        series
    }

    fn weights(pairs: &[(&str, f64)]) -> PortfolioWeights {
        PortfolioWeights::new(pairs.iter().map(|(s, w)| (s.to_string(), *w)).collect())
    }

    fn metadata(pairs: &[(&str, f64)]) -> RunMetadata {
        let mut m = RunMetadata::default();
        for (s, sentiment) in pairs {
            m.symbols.insert(
                s.to_string(),
                SymbolMetadata {
                    sentiment: *sentiment,
                    ..Default::default()
                },
            );
        }
        m
    }

    #[test]
    fn test_scenarios_relationships() {
        let mut data = BTreeMap::new();
        data.insert("A".to_string(), series_with_returns("A", 0, &[0.01, -0.02, 0.03]));
        data.insert("B".to_string(), series_with_returns("B", 0, &[0.02, 0.01, -0.01]));
        let meta = metadata(&[("A", 0.4), ("B", -0.2)]);
        let w = weights(&[("A", 0.6), ("B", 0.4)]);

        let sim = PortfolioSimulator::new(&data, &meta);
        let set = sim.simulate(&w).unwrap();

        assert!(approx_eq(set.hype_multiplier, 1.32, 1e-12));
        let r = sim.portfolio_returns(&w, &set.dates);
        assert!(approx_eq(r[0], 0.014, 1e-12));

        let mut base = 1.0;
        let mut hype = 1.0;
        let mut crash = 1.0;
        for (i, ri) in r.iter().enumerate() {
            base *= 1.0 + ri;
            hype *= 1.0 + ri * 1.32;
            crash *= 1.0 + ri * 0.9;
            assert!(approx_eq(set.base[i], base, 1e-12));
            assert!(approx_eq(set.hype_shock[i], hype, 1e-12));
            assert!(approx_eq(set.crash[i], crash, 1e-12));
        }
    }

    #[test]
    fn test_invalid_weights_rejected_before_curves() {
        let mut data = BTreeMap::new();
        data.insert("A".to_string(), series_with_returns("A", 0, &[0.01]));
        data.insert("B".to_string(), series_with_returns("B", 0, &[0.01]));
        let meta = RunMetadata::default();
        let sim = PortfolioSimulator::new(&data, &meta);

        let err = sim.simulate(&weights(&[("A", 0.3), ("B", 0.3)])).unwrap_err();
        assert!(matches!(err, AppError::InvalidWeights(_)));

        let (set, failure) = sim.simulate_or_empty(&weights(&[("A", 0.3), ("B", 0.3)]));
        assert!(set.is_empty());
        assert_eq!(failure.unwrap().kind, FailureKind::InvalidInput);
    }

    #[test]
    fn test_shared_index_is_intersection() {
        let mut data = BTreeMap::new();
        data.insert("A".to_string(), series_with_returns("A", 0, &[0.01, 0.01, 0.01, 0.01]));
        data.insert("B".to_string(), series_with_returns("B", 2, &[0.01, 0.01, 0.01]));
        let meta = RunMetadata::default();
        let sim = PortfolioSimulator::new(&data, &meta);
        let dates = sim.shared_dates(&weights(&[("A", 0.5), ("B", 0.5)]));
        assert_eq!(dates.len(), 2);
        assert_eq!(dates[0], NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
    }

    #[test]
    fn test_empty_series_contributes_zero() {
        let mut data = BTreeMap::new();
        data.insert("A".to_string(), series_with_returns("A", 0, &[0.1, f64::NAN]));
        data.insert("B".to_string(), SymbolSeries::empty("B"));
        let meta = RunMetadata::default();
        let sim = PortfolioSimulator::new(&data, &meta);
        let set = sim.simulate(&weights(&[("A", 0.5), ("B", 0.5)])).unwrap();
        assert_eq!(set.dates.len(), 2);
        assert!(approx_eq(set.base[0], 1.05, 1e-12));
        assert!(approx_eq(set.base[1], 1.05, 1e-12));
    }

    #[test]
    fn test_no_usable_series_gives_empty_result() {
        let mut data = BTreeMap::new();
        data.insert("A".to_string(), SymbolSeries::empty("A"));
        let meta = RunMetadata::default();
        let sim = PortfolioSimulator::new(&data, &meta);
        let (set, failure) = sim.simulate_or_empty(&weights(&[("A", 1.0)]));
        assert!(set.is_empty());
        assert_eq!(failure.unwrap().code, "SIMULATION_FAILED");
    }

    #[test]
    fn test_cumulative_growth() {
        let c = cumulative_growth(&[0.1, 0.1], 1.0);
        assert!(approx_eq(c[1], 1.21, 1e-12));
        let c = cumulative_growth(&[0.1, 0.1], 0.9);
        assert!(approx_eq(c[1], 1.09 * 1.09, 1e-12));
    }
}
