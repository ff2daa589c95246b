use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Fetch-time summary of one symbol. Read-only once derived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolMetadata {
    /// Sentiment proxy in [-1, 1].
    pub sentiment: f64,
    /// Hype score in [-100, 100].
    pub hype_score: f64,
    pub spike_count: usize,
}

impl Default for SymbolMetadata {
    fn default() -> Self {
        SymbolMetadata {
            sentiment: 0.0,
            hype_score: 0.0,
            spike_count: 0,
        }
    }
}

/// Per-run metadata record, persisted next to the raw series.
///
/// On disk the symbol entries sit at the top level beside `fetch_date`:
/// `{"fetch_date": "...", "AAPL": {...}, "TSLA": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub fetch_date: String,
    #[serde(flatten)]
    pub symbols: BTreeMap<String, SymbolMetadata>,
}

impl RunMetadata {
    pub fn new(fetch_date: String) -> Self {
        RunMetadata {
            fetch_date,
            symbols: BTreeMap::new(),
        }
    }

    /// Metadata for a symbol, neutral defaults when unknown.
    pub fn get_or_default(&self, symbol: &str) -> SymbolMetadata {
        self.symbols.get(symbol).copied().unwrap_or_default()
    }
}
