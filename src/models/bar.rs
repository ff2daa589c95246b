use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single daily OHLCV bar as returned by a market data source.
/// Missing values are carried as NaN until the processor fills them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}
