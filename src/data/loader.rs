use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use polars::prelude::*;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::models::metadata::RunMetadata;
use crate::models::series::{DailyRecord, SymbolSeries};

const DATE_FORMAT: &str = "%Y-%m-%d";

// ── Series <-> DataFrame ──

/// Build a DataFrame with one row per date. Missing values become nulls.
pub fn series_to_dataframe(series: &SymbolSeries) -> Result<DataFrame, AppError> {
    let r = &series.records;
    let float = |f: fn(&DailyRecord) -> f64| -> Vec<Option<f64>> {
        r.iter().map(|rec| Some(f(rec)).filter(|v| !v.is_nan())).collect()
    };

    let columns = vec![
        Column::new(
            "Date".into(),
            r.iter().map(|rec| rec.date.format(DATE_FORMAT).to_string()).collect::<Vec<_>>(),
        ),
        Column::new("Open".into(), float(|x| x.open)),
        Column::new("High".into(), float(|x| x.high)),
        Column::new("Low".into(), float(|x| x.low)),
        Column::new("Close".into(), float(|x| x.close)),
        Column::new("Volume".into(), float(|x| x.volume)),
        Column::new("Daily_Return".into(), float(|x| x.daily_return)),
        Column::new("Volume_MA".into(), float(|x| x.volume_ma)),
        Column::new("Volume_Spike".into(), r.iter().map(|x| x.volume_spike).collect::<Vec<_>>()),
        Column::new("Earnings_Event".into(), r.iter().map(|x| x.earnings_event).collect::<Vec<_>>()),
        Column::new("Volatility".into(), float(|x| x.volatility)),
        Column::new("Sentiment_Adj_Return".into(), float(|x| x.sentiment_adj_return)),
        Column::new("Hype_Score_Cumulative".into(), float(|x| x.hype_score_cumulative)),
    ];

    Ok(DataFrame::new(columns)?)
}

/// Read a series back from a DataFrame. `Date`, `Close` and `Volume` are
/// required; other columns default to missing/false when absent.
pub fn series_from_dataframe(symbol: &str, df: &DataFrame) -> Result<SymbolSeries, AppError> {
    let date_col = df
        .column("Date")
        .map_err(|_| AppError::InvalidSeries(format!("{}: no 'Date' column", symbol)))?
        .cast(&DataType::String)?;
    let dates = date_col.str()?;

    let open = float_column(df, "Open")?;
    let high = float_column(df, "High")?;
    let low = float_column(df, "Low")?;
    let close = required_float_column(df, symbol, "Close")?;
    let volume = required_float_column(df, symbol, "Volume")?;
    let daily_return = float_column(df, "Daily_Return")?;
    let volume_ma = float_column(df, "Volume_MA")?;
    let volume_spike = bool_column(df, "Volume_Spike")?;
    let earnings_event = bool_column(df, "Earnings_Event")?;
    let volatility = float_column(df, "Volatility")?;
    let sentiment_adj_return = float_column(df, "Sentiment_Adj_Return")?;
    let hype_score_cumulative = float_column(df, "Hype_Score_Cumulative")?;

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let raw = dates
            .get(i)
            .ok_or_else(|| AppError::InvalidSeries(format!("{}: missing date at row {}", symbol, i)))?;
        // Tolerate timestamps like "2024-01-02 00:00:00".
        let date = NaiveDate::parse_from_str(raw.get(..10).unwrap_or(raw), DATE_FORMAT)
            .map_err(|e| AppError::InvalidSeries(format!("{}: bad date '{}': {}", symbol, raw, e)))?;
        records.push(DailyRecord {
            date,
            open: open[i],
            high: high[i],
            low: low[i],
            close: close[i],
            volume: volume[i],
            daily_return: daily_return[i],
            volume_ma: volume_ma[i],
            volume_spike: volume_spike[i],
            earnings_event: earnings_event[i],
            volatility: volatility[i],
            sentiment_adj_return: sentiment_adj_return[i],
            hype_score_cumulative: hype_score_cumulative[i],
        });
    }

    let mut series = SymbolSeries::new(symbol, records);
    if !series.has_ordered_dates() {
        series.records.sort_by_key(|r| r.date);
        series.records.dedup_by_key(|r| r.date);
    }
    Ok(series)
}

fn float_column(df: &DataFrame, name: &str) -> Result<Vec<f64>, AppError> {
    let Ok(col) = df.column(name) else {
        return Ok(vec![f64::NAN; df.height()]);
    };
    let col = col.cast(&DataType::Float64)?;
    Ok(col.f64()?.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

fn required_float_column(df: &DataFrame, symbol: &str, name: &str) -> Result<Vec<f64>, AppError> {
    if df.column(name).is_err() {
        return Err(AppError::InvalidSeries(format!("{}: no '{}' column", symbol, name)));
    }
    float_column(df, name)
}

fn bool_column(df: &DataFrame, name: &str) -> Result<Vec<bool>, AppError> {
    let Ok(col) = df.column(name) else {
        return Ok(vec![false; df.height()]);
    };
    let col = col.cast(&DataType::Boolean)?;
    Ok(col.bool()?.into_iter().map(|v| v.unwrap_or(false)).collect())
}

// ── CSV files ──

pub fn write_series_csv(series: &SymbolSeries, path: &Path) -> Result<(), AppError> {
    let mut df = series_to_dataframe(series)?;
    let mut file = File::create(path).map_err(|e| AppError::FileWrite(format!("{}: {}", path.display(), e)))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut df)
        .map_err(|e| AppError::FileWrite(format!("{}: {}", path.display(), e)))?;
    Ok(())
}

pub fn read_series_csv(symbol: &str, path: &Path) -> Result<SymbolSeries, AppError> {
    if !path.exists() {
        return Err(AppError::FileNotFound(path.display().to_string()));
    }
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    series_from_dataframe(symbol, &df)
}

pub fn raw_file_name(symbol: &str, stamp: NaiveDate) -> String {
    format!("{}_stock_data_{}.csv", symbol, stamp.format("%Y%m%d"))
}

pub fn processed_file_name(symbol: &str, stamp: NaiveDate) -> String {
    format!("{}_processed_data_{}.csv", symbol, stamp.format("%Y%m%d"))
}

pub fn metadata_file_name(stamp: NaiveDate) -> String {
    format!("metadata_{}.json", stamp.format("%Y%m%d"))
}

/// Write each raw series and the run metadata. An empty batch writes nothing.
pub fn save_raw(
    dir: &Path,
    series: &BTreeMap<String, SymbolSeries>,
    metadata: &RunMetadata,
    stamp: NaiveDate,
) -> Result<Vec<PathBuf>, AppError> {
    if series.is_empty() {
        warn!("No raw data to save");
        return Ok(Vec::new());
    }
    fs::create_dir_all(dir)?;

    let mut written = Vec::with_capacity(series.len() + 1);
    for (symbol, s) in series {
        let path = dir.join(raw_file_name(symbol, stamp));
        write_series_csv(s, &path)?;
        written.push(path);
    }

    let meta_path = dir.join(metadata_file_name(stamp));
    let json = serde_json::to_string_pretty(metadata)?;
    fs::write(&meta_path, json).map_err(|e| AppError::FileWrite(format!("{}: {}", meta_path.display(), e)))?;
    written.push(meta_path);

    info!("Saved {} raw series to {}", series.len(), dir.display());
    Ok(written)
}

/// Write each non-empty processed series.
pub fn save_processed(
    dir: &Path,
    series: &BTreeMap<String, SymbolSeries>,
    stamp: NaiveDate,
) -> Result<Vec<PathBuf>, AppError> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for (symbol, s) in series.iter().filter(|(_, s)| !s.is_empty()) {
        let path = dir.join(processed_file_name(symbol, stamp));
        write_series_csv(s, &path)?;
        written.push(path);
    }
    info!("Saved {} processed series to {}", written.len(), dir.display());
    Ok(written)
}

/// Load every series CSV in `dir` plus the latest `metadata*.json`.
///
/// The symbol is the file-name prefix before the first `_`. When a symbol
/// has several files, the lexically last one wins.
pub fn load_dir(dir: &Path) -> Result<(BTreeMap<String, SymbolSeries>, RunMetadata), AppError> {
    if !dir.is_dir() {
        return Err(AppError::FileNotFound(dir.display().to_string()));
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    let mut series = BTreeMap::new();
    let mut metadata = RunMetadata::default();
    for path in &files {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with("metadata") && name.ends_with(".json") {
            let content = fs::read_to_string(path)?;
            metadata = serde_json::from_str(&content)?;
        } else if name.ends_with(".csv") {
            let symbol = name.split('_').next().unwrap_or(name).trim_end_matches(".csv").to_uppercase();
            series.insert(symbol.clone(), read_series_csv(&symbol, path)?);
        }
    }

    if series.is_empty() {
        return Err(AppError::NoData(format!("no series files in {}", dir.display())));
    }
    info!("Loaded {} series from {}", series.len(), dir.display());
    Ok((series, metadata))
}
