use serde::{Deserialize, Serialize};

/// All application errors, categorized by domain.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // ── Fetch / Source ──
    #[error("Market data source unavailable for {symbol}: {message}")]
    SourceUnavailable { symbol: String, message: String },

    #[error("No data returned for {0}")]
    NoData(String),

    #[error("Download failed: {0}")]
    DownloadError(String),

    // ── Data / Persistence ──
    #[error("Invalid series: {0}")]
    InvalidSeries(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read file: {0}")]
    FileRead(String),

    #[error("Failed to write file: {0}")]
    FileWrite(String),

    #[error("Table conversion failed: {0}")]
    TableConversion(String),

    // ── Database ──
    #[error("Database error: {0}")]
    Database(String),

    // ── Processing / Forecasting ──
    #[error("Insufficient data: need {needed} observations, got {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("Computation failed: {0}")]
    Computation(String),

    #[error("Model artifact error: {0}")]
    ModelArtifact(String),

    // ── Portfolio ──
    #[error("Invalid portfolio weights: {0}")]
    InvalidWeights(String),

    #[error("Empty symbol set")]
    EmptySymbolSet,

    #[error("Simulation failed: {0}")]
    SimulationFailed(String),

    // ── Configuration ──
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Serialization ──
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ── General ──
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse failure taxonomy used to decide whether a run keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SourceUnavailable,
    InsufficientData,
    InvalidInput,
    Computation,
}

impl AppError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AppError::SourceUnavailable { .. }
            | AppError::NoData(_)
            | AppError::DownloadError(_) => FailureKind::SourceUnavailable,
            AppError::InsufficientData { .. } => FailureKind::InsufficientData,
            AppError::InvalidWeights(_)
            | AppError::EmptySymbolSet
            | AppError::InvalidConfig(_) => FailureKind::InvalidInput,
            AppError::InvalidSeries(_)
            | AppError::FileNotFound(_)
            | AppError::FileRead(_)
            | AppError::FileWrite(_)
            | AppError::TableConversion(_)
            | AppError::Database(_)
            | AppError::Computation(_)
            | AppError::ModelArtifact(_)
            | AppError::SimulationFailed(_)
            | AppError::Serialization(_)
            | AppError::Internal(_) => FailureKind::Computation,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::SourceUnavailable { .. } => "SOURCE_UNAVAILABLE",
            AppError::NoData(_) => "NO_DATA",
            AppError::DownloadError(_) => "DOWNLOAD_ERROR",
            AppError::InvalidSeries(_) => "INVALID_SERIES",
            AppError::FileNotFound(_) => "FILE_NOT_FOUND",
            AppError::FileRead(_) => "FILE_READ",
            AppError::FileWrite(_) => "FILE_WRITE",
            AppError::TableConversion(_) => "TABLE_CONVERSION",
            AppError::Database(_) => "DATABASE",
            AppError::InsufficientData { .. } => "INSUFFICIENT_DATA",
            AppError::Computation(_) => "COMPUTATION",
            AppError::ModelArtifact(_) => "MODEL_ARTIFACT",
            AppError::InvalidWeights(_) => "INVALID_WEIGHTS",
            AppError::EmptySymbolSet => "EMPTY_SYMBOL_SET",
            AppError::SimulationFailed(_) => "SIMULATION_FAILED",
            AppError::InvalidConfig(_) => "INVALID_CONFIG",
            AppError::Serialization(_) => "SERIALIZATION",
            AppError::Internal(_) => "INTERNAL",
        }
    }
}

/// Pipeline stage a per-unit failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Clean,
    Enrich,
    Validate,
    Forecast,
    Insight,
    Simulate,
}

/// A failed unit of work (one symbol in one stage, or the portfolio).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitFailure {
    /// `None` for portfolio-level failures.
    pub symbol: Option<String>,
    pub stage: Stage,
    pub kind: FailureKind,
    pub code: String,
    pub message: String,
}

impl UnitFailure {
    pub fn for_symbol(symbol: &str, stage: Stage, err: &AppError) -> Self {
        UnitFailure {
            symbol: Some(symbol.to_string()),
            stage,
            kind: err.kind(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn for_portfolio(stage: Stage, err: &AppError) -> Self {
        UnitFailure {
            symbol: None,
            stage,
            kind: err.kind(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Serializable error response for the presentation layer.
#[derive(Debug, Serialize, Clone)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        ErrorResponse {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let response = ErrorResponse::from(self);
        response.serialize(serializer)
    }
}

// ── Conversions from external errors ──

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for AppError {
    fn from(err: bincode::Error) -> Self {
        AppError::ModelArtifact(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::FileRead(err.to_string())
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::FileWrite(err.to_string())
    }
}

impl From<polars::error::PolarsError> for AppError {
    fn from(err: polars::error::PolarsError) -> Self {
        AppError::TableConversion(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::DownloadError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_taxonomy() {
        let err = AppError::SourceUnavailable {
            symbol: "AAPL".into(),
            message: "timeout".into(),
        };
        assert_eq!(err.kind(), FailureKind::SourceUnavailable);
        assert_eq!(
            AppError::InsufficientData { needed: 60, available: 10 }.kind(),
            FailureKind::InsufficientData
        );
        assert_eq!(AppError::InvalidWeights("x".into()).kind(), FailureKind::InvalidInput);
        assert_eq!(AppError::EmptySymbolSet.kind(), FailureKind::InvalidInput);
        assert_eq!(AppError::Computation("nan".into()).kind(), FailureKind::Computation);
    }

    #[test]
    fn test_error_serializes_as_response() {
        let err = AppError::InvalidWeights("sum is 0.6".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "INVALID_WEIGHTS");
        assert_eq!(json["message"], "Invalid portfolio weights: sum is 0.6");
    }

    #[test]
    fn test_unit_failure_for_symbol() {
        let err = AppError::NoData("TSLA".into());
        let failure = UnitFailure::for_symbol("TSLA", Stage::Fetch, &err);
        assert_eq!(failure.symbol.as_deref(), Some("TSLA"));
        assert_eq!(failure.stage, Stage::Fetch);
        assert_eq!(failure.kind, FailureKind::SourceUnavailable);
        assert_eq!(failure.code, "NO_DATA");
    }
}
