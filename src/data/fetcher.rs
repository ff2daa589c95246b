use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::source::{MarketDataSource, SentimentSource};
use crate::engine::indicators::{nan_mean, pct_change, rolling_mean};
use crate::errors::{AppError, Stage, UnitFailure};
use crate::models::metadata::{RunMetadata, SymbolMetadata};
use crate::models::series::SymbolSeries;

/// Trailing window of the volume moving average.
pub const VOLUME_MA_WINDOW: usize = 10;
/// Volume above this multiple of its moving average is a spike.
pub const VOLUME_SPIKE_MULTIPLIER: f64 = 2.0;

/// Symbols and date range to fetch. `end` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchRequest {
    pub symbols: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FetchRequest {
    pub fn new(symbols: &[String], start: NaiveDate, end: NaiveDate) -> Self {
        FetchRequest {
            symbols: symbols.iter().map(|s| s.trim().to_uppercase()).collect(),
            start,
            end,
        }
    }
}

/// Raw series and fetch-time metadata for a set of symbols. Symbols that
/// failed are absent from `series` and listed in `failures`.
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub series: BTreeMap<String, SymbolSeries>,
    pub metadata: RunMetadata,
    pub failures: Vec<UnitFailure>,
}

/// Retrieves raw series per symbol and derives fetch-time metadata.
pub struct Fetcher<M, S> {
    source: Arc<M>,
    sentiment: S,
}

impl<M: MarketDataSource, S: SentimentSource> Fetcher<M, S> {
    pub fn new(source: Arc<M>, sentiment: S) -> Self {
        Fetcher { source, sentiment }
    }

    /// Fetch every symbol independently. A failing symbol is logged,
    /// recorded and skipped; the others are unaffected.
    pub async fn fetch(&self, request: &FetchRequest) -> FetchBatch {
        let fetch_date = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let mut batch = FetchBatch {
            metadata: RunMetadata::new(fetch_date),
            ..Default::default()
        };

        for symbol in &request.symbols {
            match self.fetch_symbol(symbol, request).await {
                Ok((series, metadata)) => {
                    info!(
                        "Fetched {}: {} rows, hype={:.2}, spikes={}",
                        symbol,
                        series.len(),
                        metadata.hype_score,
                        metadata.spike_count
                    );
                    batch.series.insert(symbol.clone(), series);
                    batch.metadata.symbols.insert(symbol.clone(), metadata);
                }
                Err(e) => {
                    error!("Error fetching data for {}: {}", symbol, e);
                    batch.failures.push(UnitFailure::for_symbol(symbol, Stage::Fetch, &e));
                }
            }
        }

        batch
    }

    async fn fetch_symbol(
        &self,
        symbol: &str,
        request: &FetchRequest,
    ) -> Result<(SymbolSeries, SymbolMetadata), AppError> {
        let bars = self.source.daily_bars(symbol, request.start, request.end).await?;
        if bars.is_empty() {
            warn!("No data for {}", symbol);
            return Err(AppError::NoData(symbol.to_string()));
        }

        let mut series = SymbolSeries::from_bars(symbol, &bars);
        derive_fetch_columns(&mut series, request.start, request.end);

        let sentiment = self.sentiment.sentiment(symbol).await;
        let metadata = symbol_metadata(&series, sentiment);
        Ok((series, metadata))
    }
}

/// Daily return, volume moving average, spike flag and earnings flag,
/// in that order.
pub fn derive_fetch_columns(series: &mut SymbolSeries, start: NaiveDate, end: NaiveDate) {
    let returns = pct_change(&series.closes());
    let volume_ma = rolling_mean(&series.volumes(), VOLUME_MA_WINDOW);
    let earnings = quarter_end_grid(start, end);

    for (i, record) in series.records.iter_mut().enumerate() {
        record.daily_return = returns[i];
        record.volume_ma = volume_ma[i];
        // NaN comparisons are false, so an undefined average never flags.
        record.volume_spike = record.volume > VOLUME_SPIKE_MULTIPLIER * volume_ma[i];
        record.earnings_event = earnings.binary_search(&record.date).is_ok();
    }
}

/// Quarter-end calendar dates within `[start, end]`.
///
/// A coarse stand-in for real earnings dates: reports rarely land on the
/// quarter end itself, and weekend quarter ends never match a trading day.
pub fn quarter_end_grid(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    for year in start.year()..=end.year() {
        for month in [3, 6, 9, 12] {
            if let Some(date) = last_day_of_month(year, month) {
                if date >= start && date <= end {
                    dates.push(date);
                }
            }
        }
    }
    dates
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1).map(|d| d - Duration::days(1))
}

/// `clip((mean_return*10 + spike_rate*30 + sentiment*30) / 3, -100, 100)`.
/// NaN inputs contribute zero; infinite ones saturate at the bound.
pub fn hype_score(mean_daily_return: f64, spike_rate: f64, sentiment: f64) -> f64 {
    let defined = |v: f64| if v.is_nan() { 0.0 } else { v };
    let raw = (defined(mean_daily_return) * 10.0 + defined(spike_rate) * 30.0 + defined(sentiment) * 30.0) / 3.0;
    // +inf meeting -inf
    if raw.is_nan() {
        return 0.0;
    }
    raw.clamp(-100.0, 100.0)
}

/// Summarise a fetched series.
pub fn symbol_metadata(series: &SymbolSeries, sentiment: f64) -> SymbolMetadata {
    let sentiment = if sentiment.is_finite() { sentiment.clamp(-1.0, 1.0) } else { 0.0 };
    let spike_count = series.records.iter().filter(|r| r.volume_spike).count();
    let spike_rate = if series.is_empty() {
        0.0
    } else {
        spike_count as f64 / series.len() as f64
    };
    let mean_return = nan_mean(&series.daily_returns());

    SymbolMetadata {
        sentiment,
        hype_score: hype_score(mean_return, spike_rate, sentiment),
        spike_count,
    }
}
