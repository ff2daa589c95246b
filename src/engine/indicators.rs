use statrs::statistics::Statistics;

use crate::errors::AppError;

// ── Helpers ──

pub fn check_data_len(available: usize, needed: usize) -> Result<(), AppError> {
    if available < needed {
        return Err(AppError::InsufficientData { needed, available });
    }
    Ok(())
}

/// Mean of the non-NaN values; NaN when there are none.
pub fn nan_mean(data: &[f64]) -> f64 {
    let valid: Vec<f64> = data.iter().copied().filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return f64::NAN;
    }
    valid.iter().mean()
}

/// Sample standard deviation of the non-NaN values; NaN with fewer than two.
pub fn nan_std(data: &[f64]) -> f64 {
    let valid: Vec<f64> = data.iter().copied().filter(|v| !v.is_nan()).collect();
    if valid.len() < 2 {
        return f64::NAN;
    }
    valid.iter().std_dev()
}

// ── Returns ──

/// Simple percentage change. First value is NaN; a missing or zero
/// previous value yields NaN.
pub fn pct_change(data: &[f64]) -> Vec<f64> {
    let mut result = vec![f64::NAN; data.len()];
    for i in 1..data.len() {
        let prev = data[i - 1];
        if prev.is_nan() || data[i].is_nan() || prev == 0.0 {
            continue;
        }
        result[i] = data[i] / prev - 1.0;
    }
    result
}

// ── Rolling windows ──

/// Trailing moving average. First `period-1` values are NaN, as is any
/// window containing a missing value.
pub fn rolling_mean(data: &[f64], period: usize) -> Vec<f64> {
    let len = data.len();
    let mut result = vec![f64::NAN; len];
    if period == 0 || len < period {
        return result;
    }
    for i in (period - 1)..len {
        let window = &data[i + 1 - period..=i];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        result[i] = window.iter().sum::<f64>() / period as f64;
    }
    result
}

/// Trailing sample standard deviation. First `period-1` values are NaN.
pub fn rolling_std(data: &[f64], period: usize) -> Vec<f64> {
    let len = data.len();
    let mut result = vec![f64::NAN; len];
    if period < 2 || len < period {
        return result;
    }
    for i in (period - 1)..len {
        let window = &data[i + 1 - period..=i];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        result[i] = window.iter().std_dev();
    }
    result
}

// ── Gap filling ──

/// Replace NaN with the last valid value before it. Leading NaNs stay.
pub fn forward_fill(data: &mut [f64]) {
    let mut last = f64::NAN;
    for v in data.iter_mut() {
        if v.is_nan() {
            *v = last;
        } else {
            last = *v;
        }
    }
}

/// Replace NaN with the next valid value after it. Trailing NaNs stay.
pub fn backward_fill(data: &mut [f64]) {
    let mut next = f64::NAN;
    for v in data.iter_mut().rev() {
        if v.is_nan() {
            *v = next;
        } else {
            next = *v;
        }
    }
}

/// Running count of `true` flags.
pub fn cumulative_count(flags: &[bool]) -> Vec<f64> {
    let mut total = 0.0;
    flags
        .iter()
        .map(|&f| {
            if f {
                total += 1.0;
            }
            total
        })
        .collect()
}

// ══════════════════════════════════════════════════════════════
// Tests
// ══════════════════════════════════════════════════════════════
