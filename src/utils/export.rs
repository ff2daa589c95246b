use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::errors::AppError;
use crate::models::portfolio::{ScenarioSet, ScenarioSummary};
use crate::models::result::{AnalysisReport, SymbolReport};

/// Write scenario curves, one row per shared date.
pub fn write_scenarios_csv(scenarios: &ScenarioSet, path: &Path) -> Result<(), AppError> {
    let mut wtr = csv::Writer::from_path(path)
        .map_err(|e| AppError::FileWrite(format!("Cannot create CSV: {}", e)))?;

    wtr.write_record(["Date", "Base", "Hype Shock", "Crash"])
        .map_err(|e| AppError::FileWrite(e.to_string()))?;

    for (i, date) in scenarios.dates.iter().enumerate() {
        wtr.write_record([
            &date.format("%Y-%m-%d").to_string(),
            &format!("{:.6}", scenarios.base[i]),
            &format!("{:.6}", scenarios.hype_shock[i]),
            &format!("{:.6}", scenarios.crash[i]),
        ])
        .map_err(|e| AppError::FileWrite(e.to_string()))?;
    }

    wtr.flush().map_err(|e| AppError::FileWrite(e.to_string()))?;
    Ok(())
}

/// Write every symbol's forecast in long format.
pub fn write_forecasts_csv(symbols: &[SymbolReport], path: &Path) -> Result<(), AppError> {
    let mut wtr = csv::Writer::from_path(path)
        .map_err(|e| AppError::FileWrite(format!("Cannot create CSV: {}", e)))?;

    wtr.write_record(["Symbol", "Date", "Forecast", "Hype Multiplier", "Cached Model"])
        .map_err(|e| AppError::FileWrite(e.to_string()))?;

    for forecast in symbols.iter().filter_map(|s| s.forecast.as_ref()) {
        for (date, value) in forecast.dates.iter().zip(&forecast.values) {
            wtr.write_record([
                forecast.symbol.as_str(),
                &date.format("%Y-%m-%d").to_string(),
                &format!("{:.4}", value),
                &format!("{:.4}", forecast.hype_multiplier),
                if forecast.from_cache { "yes" } else { "no" },
            ])
            .map_err(|e| AppError::FileWrite(e.to_string()))?;
        }
    }

    wtr.flush().map_err(|e| AppError::FileWrite(e.to_string()))?;
    Ok(())
}

/// Write one insight and its metadata per symbol.
pub fn write_insights_csv(symbols: &[SymbolReport], path: &Path) -> Result<(), AppError> {
    let mut wtr = csv::Writer::from_path(path)
        .map_err(|e| AppError::FileWrite(format!("Cannot create CSV: {}", e)))?;

    wtr.write_record(["Symbol", "Sentiment", "Hype Score", "Spike Count", "Insight"])
        .map_err(|e| AppError::FileWrite(e.to_string()))?;

    for s in symbols {
        wtr.write_record([
            s.symbol.as_str(),
            &format!("{:.4}", s.metadata.sentiment),
            &format!("{:.2}", s.metadata.hype_score),
            &s.metadata.spike_count.to_string(),
            s.insight.as_str(),
        ])
        .map_err(|e| AppError::FileWrite(e.to_string()))?;
    }

    wtr.flush().map_err(|e| AppError::FileWrite(e.to_string()))?;
    Ok(())
}

/// Write scenario summaries as a table.
pub fn write_summary_csv(summaries: &[ScenarioSummary], path: &Path) -> Result<(), AppError> {
    let mut wtr = csv::Writer::from_path(path)
        .map_err(|e| AppError::FileWrite(format!("Cannot create CSV: {}", e)))?;

    wtr.write_record(["Scenario", "Final Value", "Total Return %", "Max Drawdown %", "Sharpe Ratio"])
        .map_err(|e| AppError::FileWrite(e.to_string()))?;

    for s in summaries {
        wtr.write_record([
            s.scenario.as_str(),
            &format!("{:.4}", s.final_value),
            &format!("{:.2}", s.total_return_pct),
            &format!("{:.2}", s.max_drawdown_pct),
            &format!("{:.2}", s.sharpe_ratio),
        ])
        .map_err(|e| AppError::FileWrite(e.to_string()))?;
    }

    wtr.flush().map_err(|e| AppError::FileWrite(e.to_string()))?;
    Ok(())
}

/// Write all report files for a run into `dir`, named after the run.
/// The portfolio files are skipped when the simulation was unavailable.
pub fn export_report(report: &AnalysisReport, dir: &Path) -> Result<Vec<PathBuf>, AppError> {
    fs::create_dir_all(dir).map_err(|e| AppError::FileWrite(format!("{}: {}", dir.display(), e)))?;
    let prefix = &report.run_id[..report.run_id.len().min(8)];
    let mut written = Vec::new();

    let path = dir.join(format!("insights_{}.csv", prefix));
    write_insights_csv(&report.symbols, &path)?;
    written.push(path);

    let path = dir.join(format!("forecasts_{}.csv", prefix));
    write_forecasts_csv(&report.symbols, &path)?;
    written.push(path);

    if !report.portfolio.scenarios.is_empty() {
        let path = dir.join(format!("scenarios_{}.csv", prefix));
        write_scenarios_csv(&report.portfolio.scenarios, &path)?;
        written.push(path);

        let path = dir.join(format!("summary_{}.csv", prefix));
        write_summary_csv(&report.portfolio.summaries, &path)?;
        written.push(path);
    }

    info!("Exported {} report files to {}", written.len(), dir.display());
    Ok(written)
}
