use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{info, warn};

use super::indicators::{backward_fill, cumulative_count, forward_fill, nan_mean, nan_std, rolling_std};
use crate::errors::{AppError, Stage, UnitFailure};
use crate::models::config::ProcessingConfig;
use crate::models::metadata::RunMetadata;
use crate::models::series::{DailyRecord, SymbolSeries};

type Getter = fn(&DailyRecord) -> f64;
type Setter = fn(&mut DailyRecord, f64);

/// Every float column, gap-filled during cleaning.
const FLOAT_COLUMNS: [(Getter, Setter); 10] = [
    (|r| r.open, |r, v| r.open = v),
    (|r| r.high, |r, v| r.high = v),
    (|r| r.low, |r, v| r.low = v),
    (|r| r.close, |r, v| r.close = v),
    (|r| r.volume, |r, v| r.volume = v),
    (|r| r.daily_return, |r, v| r.daily_return = v),
    (|r| r.volume_ma, |r, v| r.volume_ma = v),
    (|r| r.volatility, |r, v| r.volatility = v),
    (|r| r.sentiment_adj_return, |r, v| r.sentiment_adj_return = v),
    (|r| r.hype_score_cumulative, |r, v| r.hype_score_cumulative = v),
];

/// Processed series for a run. Symbols that failed validation are present
/// as empty series and listed in `failures`.
#[derive(Debug, Clone, Default)]
pub struct ProcessedBatch {
    pub series: BTreeMap<String, SymbolSeries>,
    pub failures: Vec<UnitFailure>,
}

impl ProcessedBatch {
    /// Non-empty series only.
    pub fn usable(&self) -> impl Iterator<Item = (&String, &SymbolSeries)> {
        self.series.iter().filter(|(_, s)| !s.is_empty())
    }
}

/// Cleans and enriches raw series.
pub struct Processor {
    config: ProcessingConfig,
}

impl Processor {
    pub fn new(config: ProcessingConfig) -> Self {
        Processor { config }
    }

    /// Clean, enrich and validate every symbol in parallel. Metadata is
    /// only read; unknown symbols get neutral sentiment.
    pub fn process(&self, raw: &BTreeMap<String, SymbolSeries>, metadata: &RunMetadata) -> ProcessedBatch {
        let results: Vec<(String, SymbolSeries, Option<UnitFailure>)> = raw
            .par_iter()
            .map(|(symbol, series)| {
                let sentiment = metadata.get_or_default(symbol).sentiment;
                match self.process_symbol(series.clone(), sentiment) {
                    Ok(processed) => (symbol.clone(), processed, None),
                    Err((stage, e)) => {
                        warn!("Dropping {} at {:?}: {}", symbol, stage, e);
                        let failure = UnitFailure::for_symbol(symbol, stage, &e);
                        (symbol.clone(), SymbolSeries::empty(symbol.as_str()), Some(failure))
                    }
                }
            })
            .collect();

        let mut batch = ProcessedBatch::default();
        for (symbol, series, failure) in results {
            batch.series.insert(symbol, series);
            batch.failures.extend(failure);
        }
        info!(
            "Processed {} series ({} dropped)",
            batch.series.len(),
            batch.failures.len()
        );
        batch
    }

    fn process_symbol(&self, mut series: SymbolSeries, sentiment: f64) -> Result<SymbolSeries, (Stage, AppError)> {
        self.clean(&mut series).map_err(|e| (Stage::Clean, e))?;
        self.enrich(&mut series, sentiment).map_err(|e| (Stage::Enrich, e))?;
        validate(&series).map_err(|e| (Stage::Validate, e))?;
        Ok(series)
    }

    /// Forward- then backward-fill every float column, then replace daily
    /// returns beyond `outlier_std_multiplier` standard deviations with the
    /// mean of the remaining returns.
    ///
    /// Outlier replacement runs once per series: the threshold shrinks after
    /// a replacement, so a second pass would clip returns the first one kept.
    pub fn clean(&self, series: &mut SymbolSeries) -> Result<(), AppError> {
        if !series.has_ordered_dates() {
            return Err(AppError::InvalidSeries(format!(
                "{}: dates are not strictly increasing",
                series.symbol
            )));
        }

        for (get, set) in FLOAT_COLUMNS {
            let mut values: Vec<f64> = series.records.iter().map(get).collect();
            forward_fill(&mut values);
            backward_fill(&mut values);
            for (record, v) in series.records.iter_mut().zip(values) {
                set(record, v);
            }
        }

        if series.outliers_cleaned {
            return Ok(());
        }
        series.outliers_cleaned = true;

        let mut returns = series.daily_returns();
        let threshold = self.config.outlier_std_multiplier * nan_std(&returns);
        let mut clipped = 0usize;
        for r in returns.iter_mut() {
            // NaN threshold (fewer than two returns) never matches.
            if r.abs() > threshold {
                *r = f64::NAN;
                clipped += 1;
            }
        }
        if clipped > 0 {
            let mean = nan_mean(&returns);
            for (record, r) in series.records.iter_mut().zip(returns) {
                record.daily_return = if r.is_nan() { mean } else { r };
            }
            info!("{}: replaced {} outlier returns", series.symbol, clipped);
        }
        Ok(())
    }

    /// Volatility, sentiment-adjusted return and cumulative hype.
    pub fn enrich(&self, series: &mut SymbolSeries, sentiment: f64) -> Result<(), AppError> {
        if !sentiment.is_finite() {
            return Err(AppError::Computation(format!(
                "{}: non-finite sentiment {}",
                series.symbol, sentiment
            )));
        }
        let returns = series.daily_returns();
        let volatility = rolling_std(&returns, self.config.volatility_window);
        let spikes: Vec<bool> = series.records.iter().map(|r| r.volume_spike).collect();
        let cumulative = cumulative_count(&spikes);

        for (i, record) in series.records.iter_mut().enumerate() {
            record.volatility = volatility[i];
            record.sentiment_adj_return = record.daily_return * (1.0 + sentiment);
            record.hype_score_cumulative = cumulative[i] * (1.0 + sentiment);
        }
        Ok(())
    }
}

/// A usable series has rows and at least one close.
pub fn validate(series: &SymbolSeries) -> Result<(), AppError> {
    if series.is_empty() {
        return Err(AppError::InvalidSeries(format!("{}: empty series", series.symbol)));
    }
    if series.close_all_missing() {
        return Err(AppError::InvalidSeries(format!("{}: every close is missing", series.symbol)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::data::fetcher::derive_fetch_columns;
    use crate::data::source::tests::daily_bars;
    use crate::models::metadata::SymbolMetadata;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        if a.is_nan() && b.is_nan() {
            return true;
        }
        (a - b).abs() < epsilon
    }

    fn fetched(closes: &[f64], volumes: &[f64]) -> SymbolSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut series = SymbolSeries::from_bars("TEST", &daily_bars(start, closes, volumes));
        derive_fetch_columns(&mut series, start, end);
        series
    }

    fn wavy(n: usize) -> (Vec<f64>, Vec<f64>) {
        let closes = (0..n).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0 + i as f64 * 0.1).collect();
        let volumes = (0..n)
            .map(|i| if i % 13 == 12 { 5000.0 } else { 1000.0 + (i % 5) as f64 * 50.0 })
            .collect();
        (closes, volumes)
    }

    #[test]
    fn test_clean_fills_gaps() {
        let mut series = fetched(&[f64::NAN, 10.0, 11.0, 12.0], &[1.0, f64::NAN, 3.0, 4.0]);
        let config = ProcessingConfig {
            outlier_std_multiplier: 1e6,
            ..Default::default()
        };
        Processor::new(config).clean(&mut series).unwrap();
        assert_eq!(series.closes(), vec![10.0, 10.0, 11.0, 12.0]);
        assert_eq!(series.volumes(), vec![1.0, 1.0, 3.0, 4.0]);
        // Leading returns are back-filled from the first defined one.
        let returns = series.daily_returns();
        assert!(approx_eq(returns[0], 0.1, 1e-12));
        assert!(approx_eq(returns[1], 0.1, 1e-12));
    }

    #[test]
    fn test_clean_replaces_outlier_with_mean_of_rest() {
        let closes = vec![100.0; 100];
        let mut series = fetched(&closes, &[1.0; 100]);
        for (i, r) in series.records.iter_mut().enumerate() {
            r.daily_return = if i % 2 == 0 { 0.001 } else { -0.001 };
        }
        series.records[50].daily_return = 0.5;
        let before = series.daily_returns();

        Processor::new(ProcessingConfig::default()).clean(&mut series).unwrap();

        let after = series.daily_returns();
        let rest: Vec<f64> = before
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 50)
            .map(|(_, r)| *r)
            .collect();
        let expected = rest.iter().sum::<f64>() / rest.len() as f64;
        assert!(approx_eq(after[50], expected, 1e-15), "got {}", after[50]);

        let changed: Vec<usize> = (0..100).filter(|&i| before[i] != after[i]).collect();
        assert_eq!(changed, vec![50]);
        assert!(series.outliers_cleaned);
    }

    #[test]
    fn test_enrich_columns() {
        let (closes, volumes) = wavy(30);
        let mut series = fetched(&closes, &volumes);
        let processor = Processor::new(ProcessingConfig::default());
        processor.clean(&mut series).unwrap();
        processor.enrich(&mut series, 0.5).unwrap();

        for r in &series.records[..19] {
            assert!(r.volatility.is_nan());
        }
        assert!(series.records[19].volatility.is_finite());
        for r in &series.records {
            assert!(approx_eq(r.sentiment_adj_return, r.daily_return * 1.5, 1e-12));
        }
        let spikes = series.records.iter().filter(|r| r.volume_spike).count() as f64;
        let last = series.records.last().unwrap();
        assert!(approx_eq(last.hype_score_cumulative, spikes * 1.5, 1e-12));
    }

    #[test]
    fn test_clean_enrich_idempotent() {
        let (closes, volumes) = wavy(80);
        let mut series = fetched(&closes, &volumes);
        let processor = Processor::new(ProcessingConfig::default());
        processor.clean(&mut series).unwrap();
        processor.enrich(&mut series, -0.3).unwrap();
        let once = series.clone();

        processor.clean(&mut series).unwrap();
        processor.enrich(&mut series, -0.3).unwrap();

        assert_eq!(once.dates(), series.dates());
        for (a, b) in once.records.iter().zip(&series.records) {
            assert!(approx_eq(a.close, b.close, 1e-12));
            assert!(approx_eq(a.daily_return, b.daily_return, 1e-12));
            assert!(approx_eq(a.volatility, b.volatility, 1e-12));
            assert!(approx_eq(a.sentiment_adj_return, b.sentiment_adj_return, 1e-12));
            assert!(approx_eq(a.hype_score_cumulative, b.hype_score_cumulative, 1e-12));
            assert_eq!(a.volume_spike, b.volume_spike);
        }
    }

    #[test]
    fn test_clean_enrich_idempotent_after_clipping() {
        // ±0.1% moves, one 2% move, then a 10x jump.
        let mut closes = vec![100.0];
        for i in 1..=100 {
            let prev = closes[i - 1];
            closes.push(if i % 2 == 0 { prev * 1.001 } else { prev * 0.999 });
        }
        let prev = closes[100];
        closes.push(prev * 1.02);
        closes.push(prev * 1.02 * 10.0);
        let mut series = fetched(&closes, &vec![1000.0; closes.len()]);
        let processor = Processor::new(ProcessingConfig::default());

        processor.clean(&mut series).unwrap();
        processor.enrich(&mut series, 0.1).unwrap();
        let once = series.clone();
        assert!(once.records[102].daily_return.abs() < 0.01);
        assert!(approx_eq(once.records[101].daily_return, 0.02, 1e-9));

        processor.clean(&mut series).unwrap();
        processor.enrich(&mut series, 0.1).unwrap();

        for (a, b) in once.records.iter().zip(&series.records) {
            assert!(approx_eq(a.daily_return, b.daily_return, 1e-12));
            assert!(approx_eq(a.volatility, b.volatility, 1e-12));
            assert!(approx_eq(a.sentiment_adj_return, b.sentiment_adj_return, 1e-12));
        }
    }

    #[test]
    fn test_process_drops_unusable_series() {
        let (closes, volumes) = wavy(25);
        let mut raw = BTreeMap::new();
        raw.insert("GOOD".to_string(), fetched(&closes, &volumes));
        raw.insert("GAPS".to_string(), fetched(&[f64::NAN; 5], &[1.0; 5]));
        raw.insert("NONE".to_string(), SymbolSeries::empty("NONE"));
        let mut metadata = RunMetadata::default();
        metadata.symbols.insert(
            "GOOD".to_string(),
            SymbolMetadata {
                sentiment: 0.2,
                ..Default::default()
            },
        );

        let batch = Processor::new(ProcessingConfig::default()).process(&raw, &metadata);

        assert_eq!(batch.series.len(), 3);
        assert!(batch.series["GAPS"].is_empty());
        assert!(batch.series["NONE"].is_empty());
        assert_eq!(batch.usable().count(), 1);
        assert_eq!(batch.failures.len(), 2);
        assert!(batch.failures.iter().all(|f| f.stage == Stage::Validate));
        assert!(batch.series["GOOD"].has_ordered_dates());
        // Metadata is untouched.
        assert_eq!(metadata.symbols["GOOD"].sentiment, 0.2);
    }

    #[test]
    fn test_unordered_dates_fail_clean() {
        let mut series = fetched(&[1.0, 2.0], &[1.0, 1.0]);
        series.records.swap(0, 1);
        let err = Processor::new(ProcessingConfig::default()).clean(&mut series).unwrap_err();
        assert!(matches!(err, AppError::InvalidSeries(_)));
    }
}
