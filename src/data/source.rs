use std::future::Future;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use tracing::warn;

use crate::engine::indicators::{nan_mean, pct_change};
use crate::errors::AppError;
use crate::models::bar::DailyBar;

/// Anything that can produce ordered daily OHLCV bars for a symbol.
///
/// An empty vector is a valid answer (no trading in range), not an error.
pub trait MarketDataSource: Send + Sync {
    fn daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Future<Output = Result<Vec<DailyBar>, AppError>> + Send;
}

/// Scalar sentiment in [-1, 1] per symbol. Implementations never fail:
/// an unavailable source reports neutral `0.0`.
pub trait SentimentSource: Send + Sync {
    fn sentiment(&self, symbol: &str) -> impl Future<Output = f64> + Send;
}

impl<M: MarketDataSource> MarketDataSource for Arc<M> {
    fn daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Future<Output = Result<Vec<DailyBar>, AppError>> + Send {
        self.as_ref().daily_bars(symbol, start, end)
    }
}

/// Momentum proxy: mean daily close change × 10, clamped to [-1, 1].
/// Degenerate histories (fewer than two valid closes) are neutral.
pub fn momentum_sentiment(closes: &[f64]) -> f64 {
    let mean = nan_mean(&pct_change(closes));
    if !mean.is_finite() {
        return 0.0;
    }
    (mean * 10.0).clamp(-1.0, 1.0)
}

/// Sentiment placeholder derived from recent price momentum.
pub struct MomentumSentiment<M> {
    source: Arc<M>,
    lookback_days: i64,
    as_of: Option<NaiveDate>,
}

impl<M: MarketDataSource> MomentumSentiment<M> {
    pub fn new(source: Arc<M>, lookback_days: i64) -> Self {
        MomentumSentiment {
            source,
            lookback_days,
            as_of: None,
        }
    }

    /// Pin the end of the lookback window (defaults to today).
    pub fn as_of(mut self, date: NaiveDate) -> Self {
        self.as_of = Some(date);
        self
    }
}

impl<M: MarketDataSource> SentimentSource for MomentumSentiment<M> {
    async fn sentiment(&self, symbol: &str) -> f64 {
        let end = self.as_of.unwrap_or_else(|| Utc::now().date_naive()) + Duration::days(1);
        let start = end - Duration::days(self.lookback_days);
        match self.source.daily_bars(symbol, start, end).await {
            Ok(bars) => {
                let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
                momentum_sentiment(&closes)
            }
            Err(e) => {
                warn!("Error fetching sentiment for {}: {}", symbol, e);
                0.0
            }
        }
    }
}

/// Fixed sentiment per symbol, neutral for anything unknown.
#[derive(Debug, Clone, Default)]
pub struct StaticSentiment {
    pub values: std::collections::HashMap<String, f64>,
}

impl SentimentSource for StaticSentiment {
    async fn sentiment(&self, symbol: &str) -> f64 {
        self.values
            .get(symbol)
            .copied()
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(-1.0, 1.0))
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use super::*;

    /// In-memory market data source for tests.
    #[derive(Default)]
    pub struct MockSource {
        pub bars: HashMap<String, Result<Vec<DailyBar>, String>>,
    }

    impl MockSource {
        pub fn with(mut self, symbol: &str, bars: Vec<DailyBar>) -> Self {
            self.bars.insert(symbol.to_string(), Ok(bars));
            self
        }

        pub fn failing(mut self, symbol: &str, message: &str) -> Self {
            self.bars.insert(symbol.to_string(), Err(message.to_string()));
            self
        }
    }

    impl MarketDataSource for MockSource {
        async fn daily_bars(
            &self,
            symbol: &str,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<DailyBar>, AppError> {
            match self.bars.get(symbol) {
                Some(Ok(bars)) => Ok(bars
                    .iter()
                    .filter(|b| b.date >= start && b.date < end)
                    .cloned()
                    .collect()),
                Some(Err(message)) => Err(AppError::SourceUnavailable {
                    symbol: symbol.to_string(),
                    message: message.clone(),
                }),
                None => Ok(Vec::new()),
            }
        }
    }

    pub fn daily_bars(start: NaiveDate, closes: &[f64], volumes: &[f64]) -> Vec<DailyBar> {
        closes
            .iter()
            .zip(volumes.iter())
            .enumerate()
            .map(|(i, (&close, &volume))| DailyBar {
                date: start + Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume,
            })
            .collect()
    }

    #[test]
    fn test_momentum_sentiment_bounds() {
        assert_eq!(momentum_sentiment(&[]), 0.0);
        assert_eq!(momentum_sentiment(&[100.0]), 0.0);
        assert_eq!(momentum_sentiment(&[50.0, 50.0, 50.0]), 0.0);
        assert_eq!(momentum_sentiment(&[1.0, 10.0, 100.0]), 1.0);
        assert_eq!(momentum_sentiment(&[100.0, 10.0, 1.0]), -1.0);
    }

    #[test]
    fn test_momentum_sentiment_scaled() {
        // mean change 1% → 0.1
        let s = momentum_sentiment(&[100.0, 101.0, 102.01]);
        assert!((s - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_momentum_source_error_is_neutral() {
        let source = Arc::new(MockSource::default().failing("AAPL", "offline"));
        let sentiment = MomentumSentiment::new(source, 7);
        assert_eq!(sentiment.sentiment("AAPL").await, 0.0);
    }

    #[tokio::test]
    async fn test_momentum_source_uses_lookback() {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let bars = daily_bars(start, &[100.0, 100.0, 100.0, 110.0, 121.0], &[1.0; 5]);
        let source = Arc::new(MockSource::default().with("AAPL", bars));
        let as_of = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let sentiment = MomentumSentiment::new(source, 3).as_of(as_of);
        // window covers 03-03..03-05: changes 0.10, 0.10 → clamp(1.0)
        assert_eq!(sentiment.sentiment("AAPL").await, 1.0);
    }

    #[tokio::test]
    async fn test_static_sentiment_clamps() {
        let mut values = HashMap::new();
        values.insert("A".to_string(), 3.0);
        let s = StaticSentiment { values };
        assert_eq!(s.sentiment("A").await, 1.0);
        assert_eq!(s.sentiment("B").await, 0.0);
    }
}
