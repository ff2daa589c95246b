use std::time::Duration as StdDuration;

use chrono::{DateTime, NaiveDate, NaiveTime};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::source::MarketDataSource;
use crate::errors::AppError;
use crate::models::bar::DailyBar;
use crate::models::config::FetchConfig;

/// Daily bars from the Yahoo Finance chart endpoint.
pub struct YahooFinanceSource {
    client: Client,
    base_url: String,
}

impl YahooFinanceSource {
    pub fn new(config: &FetchConfig) -> Result<Self, AppError> {
        let client = reqwest::ClientBuilder::new()
            .user_agent(config.user_agent.as_str())
            .timeout(StdDuration::from_secs(config.timeout_secs))
            .build()?;
        Ok(YahooFinanceSource {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn chart_url(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
        format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval=1d&events=history",
            self.base_url,
            symbol,
            unix_midnight(start),
            unix_midnight(end),
        )
    }
}

impl MarketDataSource for YahooFinanceSource {
    async fn daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>, AppError> {
        let url = self.chart_url(symbol, start, end);
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| AppError::SourceUnavailable {
            symbol: symbol.to_string(),
            message: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(AppError::SourceUnavailable {
                symbol: symbol.to_string(),
                message: format!("chart API returned status {}", response.status()),
            });
        }
        let chart: PriceHistory = response.json().await.map_err(|e| AppError::SourceUnavailable {
            symbol: symbol.to_string(),
            message: format!("invalid chart payload: {}", e),
        })?;

        let bars = extract_bars(chart, symbol)?;
        Ok(bars
            .into_iter()
            .filter(|b| b.date >= start && b.date < end)
            .collect())
    }
}

/// Flatten the chart payload into bars. Null quote cells become NaN.
fn extract_bars(chart: PriceHistory, symbol: &str) -> Result<Vec<DailyBar>, AppError> {
    if let Some(err) = chart.chart.error {
        return Err(AppError::SourceUnavailable {
            symbol: symbol.to_string(),
            message: err.description.unwrap_or(err.code),
        });
    }

    let Some(result) = chart.chart.result.and_then(|r| r.into_iter().next()) else {
        warn!("[{}] chart response had no result; treating as empty", symbol);
        return Ok(Vec::new());
    };
    let Some(quote) = result.indicators.quote.into_iter().next() else {
        return Ok(Vec::new());
    };

    let cell = |values: &[Option<f64>], i: usize| values.get(i).copied().flatten().unwrap_or(f64::NAN);

    let mut bars = Vec::with_capacity(result.timestamp.len());
    for (i, ts) in result.timestamp.iter().enumerate() {
        let date = DateTime::from_timestamp(*ts, 0)
            .ok_or_else(|| AppError::DownloadError(format!("invalid timestamp {} for {}", ts, symbol)))?
            .date_naive();
        bars.push(DailyBar {
            date,
            open: cell(&quote.open, i),
            high: cell(&quote.high, i),
            low: cell(&quote.low, i),
            close: cell(&quote.close, i),
            volume: cell(&quote.volume, i),
        });
    }
    Ok(bars)
}

fn unix_midnight(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

// `chart` schema

#[derive(Deserialize, Debug)]
struct PriceHistory {
    chart: PriceResponse,
}

#[derive(Deserialize, Debug)]
struct PriceResponse {
    result: Option<Vec<PriceCategories>>,
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    code: String,
    description: Option<String>,
}

#[derive(Deserialize, Debug)]
struct PriceCategories {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Deserialize, Debug)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bars_with_nulls() {
        let json = r#"{
            "chart": {
                "result": [{
                    "timestamp": [1704205800, 1704292200],
                    "indicators": {
                        "quote": [{
                            "open": [185.0, null],
                            "high": [186.0, 184.0],
                            "low": [183.0, 182.0],
                            "close": [185.5, 184.2],
                            "volume": [82488700, null]
                        }]
                    }
                }],
                "error": null
            }
        }"#;
        let chart: PriceHistory = serde_json::from_str(json).unwrap();
        let bars = extract_bars(chart, "AAPL").unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(bars[0].volume, 82488700.0);
        assert!(bars[1].open.is_nan());
        assert!(bars[1].volume.is_nan());
        assert_eq!(bars[1].close, 184.2);
    }

    #[test]
    fn test_extract_bars_empty_range() {
        let json = r#"{"chart": {"result": [{"indicators": {"quote": [{}]}}], "error": null}}"#;
        let chart: PriceHistory = serde_json::from_str(json).unwrap();
        assert!(extract_bars(chart, "AAPL").unwrap().is_empty());
    }

    #[test]
    fn test_extract_bars_api_error() {
        let json = r#"{"chart": {"result": null, "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}}"#;
        let chart: PriceHistory = serde_json::from_str(json).unwrap();
        let err = extract_bars(chart, "ZZZZ").unwrap_err();
        assert!(matches!(err, AppError::SourceUnavailable { .. }));
    }

    #[test]
    fn test_chart_url() {
        let source = YahooFinanceSource::new(&FetchConfig::default()).unwrap();
        let url = source.chart_url(
            "AAPL",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        );
        assert_eq!(
            url,
            "https://query1.finance.yahoo.com/v8/finance/chart/AAPL?period1=1704067200&period2=1704153600&interval=1d&events=history"
        );
    }
}
