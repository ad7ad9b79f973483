//! Statistics over the category columns of a canonical table.
//!
//! Four operations are available: a Pearson correlation matrix, a linear
//! trend per column, descriptive statistics and IQR anomaly detection.
//! Derived metric columns are never included. Results are JSON values
//! memoized in a [`CacheStore`] under the table's content hash.

use crate::cache::CacheStore;
use crate::config::IngestConfig;
use crate::error::{ProcessingError, Result};
use crate::table::CanonicalTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// The statistics that can be requested by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticOperation {
    Correlations,
    Trends,
    Descriptive,
    Anomalies,
}

impl StatisticOperation {
    pub const ALL: [StatisticOperation; 4] = [
        Self::Correlations,
        Self::Trends,
        Self::Descriptive,
        Self::Anomalies,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Correlations => "correlations",
            Self::Trends => "trends",
            Self::Descriptive => "descriptive",
            Self::Anomalies => "anomalies",
        }
    }
}

impl fmt::Display for StatisticOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StatisticOperation {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|op| op.name() == name)
            .ok_or_else(|| {
                ProcessingError::InvalidConfig(format!(
                    "unknown statistic '{}', expected one of: correlations, trends, descriptive, anomalies",
                    s
                ))
            })
    }
}

// =============================================================================
// Result types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    /// `correlations[a][b]`; `None` where a column has zero variance.
    pub correlations: BTreeMap<String, BTreeMap<String, Option<f64>>>,
    /// Columns in table order.
    pub variables: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendKind {
    Stable,
    Increasing,
    Decreasing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub slope: f64,
    pub trend_type: TrendKind,
    /// Percent change from first to last value; 0 when the first is 0.
    pub change_pct: f64,
    pub first_value: f64,
    pub last_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub trends: BTreeMap<String, Trend>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptiveStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub q1: f64,
    pub q3: f64,
    pub skewness: f64,
    pub kurtosis: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptiveReport {
    pub statistics: BTreeMap<String, DescriptiveStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Row position in the canonical table.
    pub index: usize,
    pub value: f64,
    /// Date of the row, `YYYY-MM-DD`.
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnAnomalies {
    pub count: usize,
    /// Share of the column's observations flagged, in percent.
    pub percentage: f64,
    pub values: Vec<Anomaly>,
    pub bounds: Bounds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    /// Only columns with at least one anomaly are listed.
    pub anomalies: BTreeMap<String, ColumnAnomalies>,
}

// =============================================================================
// Engine
// =============================================================================

/// Computes and memoizes statistics for canonical tables.
pub struct StatisticsEngine {
    cache: Arc<CacheStore>,
    trend_stability_threshold: f64,
    iqr_multiplier: f64,
    min_anomaly_observations: usize,
}

impl StatisticsEngine {
    pub fn new(cache: Arc<CacheStore>, config: &IngestConfig) -> Self {
        Self {
            cache,
            trend_stability_threshold: config.trend_stability_threshold,
            iqr_multiplier: config.iqr_multiplier,
            min_anomaly_observations: config.min_anomaly_observations,
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Compute `operation` over `table`, served from cache when possible.
    ///
    /// Recoverable conditions such as too few columns are returned as
    /// `{"error", "code"}` values rather than errors, and are not cached.
    pub fn compute(
        &self,
        operation: StatisticOperation,
        table: &CanonicalTable,
    ) -> Result<serde_json::Value> {
        let hash = table.content_hash();
        if let Some(cached) = self.cache.get(&hash, operation.name()) {
            return Ok(cached);
        }

        let computed = match operation {
            StatisticOperation::Correlations => {
                self.correlations(table).and_then(|r| Ok(serde_json::to_value(r)?))
            }
            StatisticOperation::Trends => {
                self.trends(table).and_then(|r| Ok(serde_json::to_value(r)?))
            }
            StatisticOperation::Descriptive => {
                self.descriptive(table).and_then(|r| Ok(serde_json::to_value(r)?))
            }
            StatisticOperation::Anomalies => {
                self.anomalies(table).and_then(|r| Ok(serde_json::to_value(r)?))
            }
        };

        match computed {
            Ok(value) => {
                info!("Computed {} for table {}", operation, &hash[..12]);
                self.cache.set(&hash, operation.name(), value.clone());
                Ok(value)
            }
            Err(e) if e.is_recoverable() => {
                debug!("{} not computed: {}", operation, e);
                Ok(serde_json::json!({
                    "error": e.to_string(),
                    "code": e.error_code(),
                }))
            }
            Err(e) => Err(e),
        }
    }

    /// Pearson correlation between every pair of category columns.
    ///
    /// # Errors
    ///
    /// [`ProcessingError::InsufficientData`] with fewer than two columns.
    pub fn correlations(&self, table: &CanonicalTable) -> Result<CorrelationMatrix> {
        let columns = category_values(table)?;
        if columns.len() < 2 {
            return Err(ProcessingError::InsufficientData(format!(
                "at least 2 numeric columns are required for correlations, found {}",
                columns.len()
            )));
        }

        let mut correlations = BTreeMap::new();
        for (a, a_values) in &columns {
            let mut row = BTreeMap::new();
            for (b, b_values) in &columns {
                row.insert(b.clone(), pearson(a_values, b_values));
            }
            correlations.insert(a.clone(), row);
        }

        Ok(CorrelationMatrix {
            correlations,
            variables: columns.into_iter().map(|(name, _)| name).collect(),
        })
    }

    /// Least-squares slope of value against row position, per column.
    pub fn trends(&self, table: &CanonicalTable) -> Result<TrendReport> {
        let mut trends = BTreeMap::new();
        for (name, values) in category_values(table)? {
            let values: Vec<f64> = values.into_iter().flatten().collect();
            let Some(slope) = ols_slope(&values) else {
                continue;
            };

            let trend_type = if slope.abs() < self.trend_stability_threshold {
                TrendKind::Stable
            } else if slope > 0.0 {
                TrendKind::Increasing
            } else {
                TrendKind::Decreasing
            };

            let first_value = values[0];
            let last_value = values[values.len() - 1];
            let change_pct = if first_value != 0.0 {
                (last_value - first_value) / first_value * 100.0
            } else {
                0.0
            };

            trends.insert(
                name,
                Trend {
                    slope,
                    trend_type,
                    change_pct,
                    first_value,
                    last_value,
                },
            );
        }
        Ok(TrendReport { trends })
    }

    pub fn descriptive(&self, table: &CanonicalTable) -> Result<DescriptiveReport> {
        let mut statistics = BTreeMap::new();
        for (name, values) in category_values(table)? {
            let mut values: Vec<f64> = values.into_iter().flatten().collect();
            if values.is_empty() {
                continue;
            }
            values.sort_by(|a, b| a.total_cmp(b));

            let n = values.len();
            statistics.insert(
                name,
                DescriptiveStats {
                    count: n,
                    mean: mean(&values),
                    median: quantile(&values, 0.5),
                    std: sample_std(&values),
                    min: values[0],
                    max: values[n - 1],
                    q1: quantile(&values, 0.25),
                    q3: quantile(&values, 0.75),
                    skewness: skewness(&values),
                    kurtosis: kurtosis(&values),
                },
            );
        }
        Ok(DescriptiveReport { statistics })
    }

    /// Values outside `[Q1 - k*IQR, Q3 + k*IQR]`.
    ///
    /// Columns with fewer than the configured minimum of observations are
    /// skipped.
    pub fn anomalies(&self, table: &CanonicalTable) -> Result<AnomalyReport> {
        let mut anomalies = BTreeMap::new();
        for (name, values) in category_values(table)? {
            let observed: Vec<(usize, f64)> = values
                .iter()
                .enumerate()
                .filter_map(|(row, v)| v.map(|v| (row, v)))
                .collect();
            let plain: Vec<f64> = observed.iter().map(|(_, v)| *v).collect();
            let Some(bounds) = self.iqr_bounds(&plain) else {
                continue;
            };

            let flagged: Vec<Anomaly> = observed
                .iter()
                .filter(|(_, v)| !bounds.contains(*v))
                .map(|(row, v)| Anomaly {
                    index: *row,
                    value: *v,
                    date: table.index()[*row].format("%Y-%m-%d").to_string(),
                })
                .collect();

            if flagged.is_empty() {
                continue;
            }
            anomalies.insert(
                name,
                ColumnAnomalies {
                    count: flagged.len(),
                    percentage: flagged.len() as f64 / observed.len() as f64 * 100.0,
                    values: flagged,
                    bounds,
                },
            );
        }
        Ok(AnomalyReport { anomalies })
    }

    /// `[Q1 - k*IQR, Q3 + k*IQR]` over `values`.
    ///
    /// `None` when there are fewer values than the configured minimum.
    pub fn iqr_bounds(&self, values: &[f64]) -> Option<Bounds> {
        if values.is_empty() || values.len() < self.min_anomaly_observations {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let q1 = quantile(&sorted, 0.25);
        let q3 = quantile(&sorted, 0.75);
        let iqr = q3 - q1;
        Some(Bounds {
            lower: q1 - self.iqr_multiplier * iqr,
            upper: q3 + self.iqr_multiplier * iqr,
        })
    }
}

/// Category columns with their values.
fn category_values(table: &CanonicalTable) -> Result<Vec<(String, Vec<Option<f64>>)>> {
    if table.is_empty() {
        return Err(ProcessingError::InsufficientData(
            "the table has no rows".to_string(),
        ));
    }
    table
        .category_columns()
        .into_iter()
        .map(|name| {
            let values = table.values(&name)?;
            Ok((name, values))
        })
        .collect()
}

// =============================================================================
// Numeric helpers
// =============================================================================

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Standard deviation with one degree of freedom; 0 below two values.
fn sample_std(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64;
    variance.sqrt()
}

/// Linearly interpolated quantile of sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Bias-corrected sample skewness; 0 below three values or with no spread.
fn skewness(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 3 {
        return 0.0;
    }
    let nf = n as f64;
    let m = mean(values);
    let m2 = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / nf;
    if m2 == 0.0 {
        return 0.0;
    }
    let m3 = values.iter().map(|v| (v - m).powi(3)).sum::<f64>() / nf;
    let g1 = m3 / m2.powf(1.5);
    g1 * (nf * (nf - 1.0)).sqrt() / (nf - 2.0)
}

/// Bias-corrected excess kurtosis; 0 below four values or with no spread.
fn kurtosis(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 4 {
        return 0.0;
    }
    let nf = n as f64;
    let m = mean(values);
    let m2 = values.iter().map(|v| (v - m).powi(2)).sum::<f64>();
    if m2 == 0.0 {
        return 0.0;
    }
    let m4 = values.iter().map(|v| (v - m).powi(4)).sum::<f64>();
    let variance = m2 / (nf - 1.0);

    let scale = nf * (nf + 1.0) / ((nf - 1.0) * (nf - 2.0) * (nf - 3.0));
    let correction = 3.0 * (nf - 1.0).powi(2) / ((nf - 2.0) * (nf - 3.0));
    scale * m4 / variance.powi(2) - correction
}

/// Pearson correlation over rows where both values are present.
fn pearson(a: &[Option<f64>], b: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in &pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    let r = cov / (var_x.sqrt() * var_y.sqrt());
    Some(r.clamp(-1.0, 1.0))
}

/// Closed-form OLS slope of `values` against `0..n`; `None` below two values.
fn ols_slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_x2) = (0.0, 0.0, 0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }
    Some((nf * sum_xy - sum_x * sum_y) / (nf * sum_x2 - sum_x * sum_x))
}
