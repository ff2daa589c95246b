use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::bar::DailyBar;

/// One row of a symbol's daily series. Derived columns are NaN until the
/// stage that owns them has run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,

    // Fetch stage
    pub daily_return: f64,
    pub volume_ma: f64,
    pub volume_spike: bool,
    pub earnings_event: bool,

    // Enrichment stage
    pub volatility: f64,
    pub sentiment_adj_return: f64,
    pub hype_score_cumulative: f64,
}

impl DailyRecord {
    pub fn from_bar(bar: &DailyBar) -> Self {
        DailyRecord {
            date: bar.date,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            daily_return: f64::NAN,
            volume_ma: f64::NAN,
            volume_spike: false,
            earnings_event: false,
            volatility: f64::NAN,
            sentiment_adj_return: f64::NAN,
            hype_score_cumulative: f64::NAN,
        }
    }
}

/// Ordered-by-date daily series for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSeries {
    pub symbol: String,
    pub records: Vec<DailyRecord>,
    /// Set once outlier returns have been replaced; later cleans skip that step.
    #[serde(default)]
    pub outliers_cleaned: bool,
}

impl SymbolSeries {
    pub fn new(symbol: impl Into<String>, records: Vec<DailyRecord>) -> Self {
        SymbolSeries {
            symbol: symbol.into(),
            records,
            outliers_cleaned: false,
        }
    }

    pub fn empty(symbol: impl Into<String>) -> Self {
        Self::new(symbol, Vec::new())
    }

    /// Build a series from source bars, sorting by date and keeping the
    /// last bar for any duplicated date.
    pub fn from_bars(symbol: impl Into<String>, bars: &[DailyBar]) -> Self {
        let mut sorted: Vec<&DailyBar> = bars.iter().collect();
        sorted.sort_by_key(|b| b.date);
        let mut records: Vec<DailyRecord> = Vec::with_capacity(sorted.len());
        for bar in sorted {
            match records.last_mut() {
                Some(last) if last.date == bar.date => *last = DailyRecord::from_bar(bar),
                _ => records.push(DailyRecord::from_bar(bar)),
            }
        }
        Self::new(symbol, records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.records.iter().map(|r| r.date).collect()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.volume).collect()
    }

    pub fn daily_returns(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.daily_return).collect()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.records.last().map(|r| r.date)
    }

    /// True when dates are unique and strictly increasing.
    pub fn has_ordered_dates(&self) -> bool {
        self.records.windows(2).all(|w| w[0].date < w[1].date)
    }

    /// True when every close is missing (or there are no rows).
    pub fn close_all_missing(&self) -> bool {
        self.records.iter().all(|r| r.close.is_nan())
    }
}
