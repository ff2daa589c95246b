use std::collections::BTreeMap;
use std::fmt::Write;

use tracing::warn;

use crate::errors::{AppError, Stage, UnitFailure};
use crate::models::metadata::{RunMetadata, SymbolMetadata};

pub const INSIGHT_UNAVAILABLE: &str = "Insight unavailable.";

const BULLISH_THRESHOLD: f64 = 0.5;
const BEARISH_THRESHOLD: f64 = -0.5;

/// Short narrative summary of a symbol's fetch metadata.
///
/// Phrases appear in a fixed order: hype score, spike count (only when
/// non-zero), then a sentiment phrase when it is strongly signed.
pub fn generate_insight(metadata: &SymbolMetadata) -> Result<String, AppError> {
    if !metadata.hype_score.is_finite() || !metadata.sentiment.is_finite() {
        return Err(AppError::Computation(format!(
            "non-finite metadata (hype={}, sentiment={})",
            metadata.hype_score, metadata.sentiment
        )));
    }

    let mut insight = String::new();
    write!(insight, "Hype Score: {:.1}. ", metadata.hype_score)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    if metadata.spike_count > 0 {
        write!(insight, "{} volume spikes detected. ", metadata.spike_count)
            .map_err(|e| AppError::Internal(e.to_string()))?;
    }
    if metadata.sentiment > BULLISH_THRESHOLD {
        insight.push_str("Positive X sentiment suggests upside potential. ");
    } else if metadata.sentiment < BEARISH_THRESHOLD {
        insight.push_str("Negative X sentiment warns of risk. ");
    }

    Ok(insight.trim_end().to_string())
}

/// One insight per symbol. Never fails the batch: a symbol whose insight
/// cannot be built gets [`INSIGHT_UNAVAILABLE`] and a recorded failure.
pub fn generate_insights<'a>(
    symbols: impl IntoIterator<Item = &'a String>,
    metadata: &RunMetadata,
) -> (BTreeMap<String, String>, Vec<UnitFailure>) {
    let mut insights = BTreeMap::new();
    let mut failures = Vec::new();

    for symbol in symbols {
        let text = match generate_insight(&metadata.get_or_default(symbol)) {
            Ok(text) => text,
            Err(e) => {
                warn!("Error generating insight for {}: {}", symbol, e);
                failures.push(UnitFailure::for_symbol(symbol, Stage::Insight, &e));
                INSIGHT_UNAVAILABLE.to_string()
            }
        };
        insights.insert(symbol.clone(), text);
    }

    (insights, failures)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(sentiment: f64, hype_score: f64, spike_count: usize) -> SymbolMetadata {
        SymbolMetadata {
            sentiment,
            hype_score,
            spike_count,
        }
    }

    #[test]
    fn test_bullish_with_spikes() {
        let text = generate_insight(&meta(0.8, 42.345, 3)).unwrap();
        assert_eq!(
            text,
            "Hype Score: 42.3. 3 volume spikes detected. Positive X sentiment suggests upside potential."
        );
    }

    #[test]
    fn test_bearish_without_spikes() {
        let text = generate_insight(&meta(-0.9, -12.0, 0)).unwrap();
        assert_eq!(text, "Hype Score: -12.0. Negative X sentiment warns of risk.");
    }

    #[test]
    fn test_neutral_sentiment_boundaries() {
        assert_eq!(generate_insight(&meta(0.5, 0.0, 0)).unwrap(), "Hype Score: 0.0.");
        assert_eq!(generate_insight(&meta(-0.5, 0.0, 0)).unwrap(), "Hype Score: 0.0.");
    }

    #[test]
    fn test_deterministic() {
        let m = meta(0.6, 10.0, 1);
        assert_eq!(generate_insight(&m).unwrap(), generate_insight(&m).unwrap());
    }

    #[test]
    fn test_batch_falls_back_on_bad_metadata() {
        let mut metadata = RunMetadata::default();
        metadata.symbols.insert("BAD".to_string(), meta(f64::NAN, 0.0, 0));
        let symbols = vec!["BAD".to_string(), "UNKNOWN".to_string()];

        let (insights, failures) = generate_insights(&symbols, &metadata);

        assert_eq!(insights["BAD"], INSIGHT_UNAVAILABLE);
        assert_eq!(insights["UNKNOWN"], "Hype Score: 0.0.");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].stage, Stage::Insight);
    }
}
