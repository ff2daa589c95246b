use super::indicators::{nan_mean, nan_std};
use crate::models::portfolio::{ScenarioKind, ScenarioSet, ScenarioSummary};

const TRADING_DAYS: f64 = 252.0;

/// Summaries for every scenario of a simulation. Empty when the set is.
pub fn summarize_scenarios(scenarios: &ScenarioSet) -> Vec<ScenarioSummary> {
    if scenarios.is_empty() {
        return Vec::new();
    }
    ScenarioKind::ALL
        .iter()
        .map(|&kind| summarize_curve(kind, scenarios.curve(kind)))
        .collect()
}

/// Headline statistics of one cumulative-growth curve starting from 1.0.
pub fn summarize_curve(scenario: ScenarioKind, curve: &[f64]) -> ScenarioSummary {
    let final_value = curve.last().copied().unwrap_or(1.0);
    let returns = curve_returns(curve);

    ScenarioSummary {
        scenario,
        final_value,
        total_return_pct: (final_value - 1.0) * 100.0,
        max_drawdown_pct: calculate_max_drawdown(curve),
        sharpe_ratio: scenario_sharpe(&returns),
    }
}

/// Per-step returns of a growth curve, with an implicit starting value of 1.0.
fn curve_returns(curve: &[f64]) -> Vec<f64> {
    let mut prev = 1.0;
    curve
        .iter()
        .map(|&v| {
            let r = if prev != 0.0 { v / prev - 1.0 } else { 0.0 };
            prev = v;
            r
        })
        .collect()
}

/// Largest peak-to-trough decline in percent. The peak starts at 1.0.
fn calculate_max_drawdown(curve: &[f64]) -> f64 {
    let mut peak = 1.0f64;
    let mut max_dd_pct = 0.0f64;

    for &value in curve {
        if value > peak {
            peak = value;
        }
        let dd_pct = if peak > 0.0 {
            (peak - value) / peak * 100.0
        } else {
            0.0
        };
        if dd_pct > max_dd_pct {
            max_dd_pct = dd_pct;
        }
    }

    max_dd_pct
}

/// Annualised Sharpe of daily scenario returns. Flat or too-short
/// streams score zero.
fn scenario_sharpe(returns: &[f64]) -> f64 {
    let sd = nan_std(returns);
    if !sd.is_finite() || sd == 0.0 {
        return 0.0;
    }
    nan_mean(returns) / sd * TRADING_DAYS.sqrt()
}
