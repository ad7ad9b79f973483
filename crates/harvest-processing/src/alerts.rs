//! Alert rules evaluated against the latest row of a canonical table.
//!
//! A rule watches one column. Threshold rules compare the column's last
//! value with a fixed number; anomaly rules fire when the last value falls
//! outside the IQR bounds of the whole column.

use crate::error::Result;
use crate::statistics::StatisticsEngine;
use crate::table::CanonicalTable;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Values closer than this count as equal.
pub const EQUALITY_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdCondition {
    Greater,
    Less,
    Equal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertKind {
    Threshold {
        value: f64,
        condition: ThresholdCondition,
    },
    Anomaly,
}

/// A user-defined alert on one table column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: i64,
    pub variable: String,
    #[serde(flatten)]
    pub kind: AlertKind,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl AlertRule {
    pub fn threshold(
        id: i64,
        variable: impl Into<String>,
        condition: ThresholdCondition,
        value: f64,
    ) -> Self {
        Self {
            id,
            variable: variable.into(),
            kind: AlertKind::Threshold { value, condition },
            enabled: true,
        }
    }

    pub fn anomaly(id: i64, variable: impl Into<String>) -> Self {
        Self {
            id,
            variable: variable.into(),
            kind: AlertKind::Anomaly,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredAlert {
    pub alert_id: i64,
    pub variable: String,
    pub current_value: f64,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

/// Evaluate every enabled rule against the last row of `table`.
///
/// Rules on columns the table lacks, or whose last value is missing, are
/// skipped. Anomaly rules use the engine's IQR bounds and never fire on
/// columns shorter than its minimum number of observations.
pub fn check_alerts(
    table: &CanonicalTable,
    rules: &[AlertRule],
    statistics: &StatisticsEngine,
) -> Result<Vec<TriggeredAlert>> {
    let mut triggered = Vec::new();
    if table.is_empty() {
        return Ok(triggered);
    }

    for rule in rules.iter().filter(|r| r.enabled) {
        if !table.has_column(&rule.variable) {
            debug!("Alert {} skipped: no column '{}'", rule.id, rule.variable);
            continue;
        }
        let values = table.values(&rule.variable)?;
        let Some(current) = values.last().copied().flatten() else {
            debug!("Alert {} skipped: last value of '{}' is missing", rule.id, rule.variable);
            continue;
        };

        let message = match &rule.kind {
            AlertKind::Threshold { value, condition } => {
                threshold_message(&rule.variable, current, *value, *condition)
            }
            AlertKind::Anomaly => {
                let observed: Vec<f64> = values.iter().flatten().copied().collect();
                statistics
                    .iqr_bounds(&observed)
                    .filter(|bounds| !bounds.contains(current))
                    .map(|bounds| {
                        format!(
                            "Anomaly in {}: {:.2} (outside {:.2} - {:.2})",
                            rule.variable, current, bounds.lower, bounds.upper
                        )
                    })
            }
        };

        if let Some(message) = message {
            triggered.push(TriggeredAlert {
                alert_id: rule.id,
                variable: rule.variable.clone(),
                current_value: current,
                message,
                timestamp: Local::now(),
            });
        }
    }

    info!("{} of {} alert(s) triggered", triggered.len(), rules.len());
    Ok(triggered)
}

fn threshold_message(
    variable: &str,
    current: f64,
    threshold: f64,
    condition: ThresholdCondition,
) -> Option<String> {
    let relation = match condition {
        ThresholdCondition::Greater if current > threshold => "greater than",
        ThresholdCondition::Less if current < threshold => "less than",
        ThresholdCondition::Equal if (current - threshold).abs() < EQUALITY_TOLERANCE => {
            "equal to"
        }
        _ => return None,
    };
    Some(format!(
        "{} ({:.2}) is {} {}",
        variable, current, relation, threshold
    ))
}
