// src/analytics/insights.rs
//! Derived analyses: spikes, trends and recommendations

use serde::Serialize;

/// Error rate above which a recommendation is raised
pub const ERROR_RATE_THRESHOLD: f64 = 0.1;

/// Average duration (ms) above which a recommendation is raised
pub const SLOW_DURATION_THRESHOLD_MS: f64 = 10_000.0;

/// A value exceeding a multiple of its trailing mean
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub metric: String,
    pub value: f64,
    /// Mean of the trailing window before `value`
    pub baseline: f64,
    pub multiplier: f64,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Stable,
}

/// Least-squares trend of a series against its index
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trend {
    pub metric: String,
    pub slope: f64,
    pub direction: TrendDirection,
    /// R² clamped to `[0, 1]`
    pub confidence: f64,
    pub points: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub severity: Severity,
    pub message: String,
}

/// Compare the last value against the mean of the `window` values before it
///
/// Returns `(latest, baseline)` when `latest > multiplier * baseline`. Series
/// shorter than `window + 1` are skipped.
pub fn detect_spike(values: &[f64], window: usize, multiplier: f64) -> Option<(f64, f64)> {
    if window == 0 || values.len() < window + 1 {
        return None;
    }

    let latest = values[values.len() - 1];
    let trailing = &values[values.len() - 1 - window..values.len() - 1];
    let baseline = trailing.iter().sum::<f64>() / window as f64;

    if latest > multiplier * baseline {
        Some((latest, baseline))
    } else {
        None
    }
}

/// Ordinary least squares of value against index
///
/// Returns `(slope, r_squared)` with R² clamped to `[0, 1]`; a perfectly flat
/// series is fully explained and reports 1.0.
pub fn linear_regression(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    if values.len() < 2 {
        return (0.0, 0.0);
    }

    let sum_x: f64 = (0..values.len()).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_xx: f64 = (0..values.len()).map(|i| (i as f64).powi(2)).sum();

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator == 0.0 {
        return (0.0, 0.0);
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;

    let mean = sum_y / n;
    let ss_tot: f64 = values.iter().map(|y| (y - mean).powi(2)).sum();
    let ss_res: f64 = values
        .iter()
        .enumerate()
        .map(|(i, y)| (y - (slope * i as f64 + intercept)).powi(2))
        .sum();

    let r_squared = if ss_tot == 0.0 {
        1.0
    } else {
        1.0 - ss_res / ss_tot
    };

    (slope, r_squared.clamp(0.0, 1.0))
}

/// Trend of a series, or `None` below `min_points`
pub fn detect_trend(
    metric: &str,
    values: &[f64],
    min_points: usize,
    stable_threshold: f64,
) -> Option<Trend> {
    if values.len() < min_points.max(2) {
        return None;
    }

    let (slope, confidence) = linear_regression(values);
    let direction = if slope.abs() < stable_threshold {
        TrendDirection::Stable
    } else if slope > 0.0 {
        TrendDirection::Up
    } else {
        TrendDirection::Down
    };

    Some(Trend {
        metric: metric.to_string(),
        slope,
        direction,
        confidence,
        points: values.len(),
    })
}

/// Threshold rules over window metrics
pub fn recommendations(
    error_rate: f64,
    average_duration: f64,
    errored_sessions: u64,
    completed_sessions: u64,
) -> Vec<Recommendation> {
    let mut out = Vec::new();

    if error_rate > ERROR_RATE_THRESHOLD {
        out.push(Recommendation {
            severity: Severity::High,
            message: format!(
                "Error rate is {:.1}%; investigate the failing categories",
                error_rate * 100.0
            ),
        });
    }

    if average_duration > SLOW_DURATION_THRESHOLD_MS {
        out.push(Recommendation {
            severity: Severity::Medium,
            message: format!(
                "Average duration is {:.0}ms; consider timeouts or smaller workloads",
                average_duration
            ),
        });
    }

    if errored_sessions > completed_sessions {
        out.push(Recommendation {
            severity: Severity::High,
            message: format!(
                "{} sessions errored but only {} completed",
                errored_sessions, completed_sessions
            ),
        });
    }

    out
}
