use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let report = stock_insight_lib::run().await.context("analysis run failed")?;

    for symbol in &report.symbols {
        println!("{}: {}", symbol.symbol, symbol.insight);
        if let Some(forecast) = &symbol.forecast {
            if let (Some(date), Some(value)) = (forecast.dates.last(), forecast.values.last()) {
                println!("  forecast {} -> {:.2}", date, value);
            }
        }
    }
    for summary in &report.portfolio.summaries {
        println!(
            "{:<10} final {:.4}  return {:+.2}%  drawdown {:.2}%  sharpe {:.2}",
            summary.scenario.as_str(),
            summary.final_value,
            summary.total_return_pct,
            summary.max_drawdown_pct,
            summary.sharpe_ratio
        );
    }
    for failure in &report.failures {
        eprintln!(
            "{:?} {}: {}",
            failure.stage,
            failure.symbol.as_deref().unwrap_or("portfolio"),
            failure.message
        );
    }
    Ok(())
}
