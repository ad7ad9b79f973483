//! Automatic repair of raw tables that fail validation.
//!
//! Repairs are modelled as a chain of [`RepairStrategy`] implementations
//! tried in order:
//!
//! 1. [`ExternalToolRepair`] delegates to an external CSV-cleaning process
//!    with a bounded timeout.
//! 2. [`FallbackRepair`] applies built-in column/row heuristics and is always
//!    available.
//!
//! A strategy failure (missing tool, timeout, non-zero exit, output that
//! still fails validation) moves on to the next strategy; only when the last
//! strategy's output still has errors does the caller see
//! [`ProcessingError::RepairFailed`], carrying the whole attempt log.

mod external;
mod fallback;

pub use external::ExternalToolRepair;
pub use fallback::FallbackRepair;

use crate::config::IngestConfig;
use crate::error::{ProcessingError, Result};
use crate::types::{RepairReport, ValidationResult};
use crate::validation::StructuralValidator;
use polars::prelude::*;
use std::sync::Arc;
use tracing::{info, warn};

/// Output of one repair strategy.
#[derive(Debug, Clone)]
pub struct RepairAttempt {
    pub table: DataFrame,
    /// Human-readable description of every transformation applied.
    pub log: Vec<String>,
}

/// A way of turning a defective raw table into a cleaner one.
///
/// # Error Handling
///
/// Implementations return `anyhow::Result`; the [`AutoRepairer`] turns any
/// error into a fallback to the next strategy, never into a caller error.
pub trait RepairStrategy: Send + Sync {
    /// Repair `table` given the defects found in it.
    fn repair(&self, table: &DataFrame, validation: &ValidationResult)
    -> anyhow::Result<RepairAttempt>;

    /// Strategy name for logs and reports.
    fn name(&self) -> &str;
}

/// Runs repair strategies in order and enforces the data-preservation gate.
pub struct AutoRepairer {
    strategies: Vec<Arc<dyn RepairStrategy>>,
    min_row_preservation: f64,
    min_column_preservation: f64,
}

static_assertions::assert_impl_all!(AutoRepairer: Send, Sync);

impl AutoRepairer {
    /// Build the default chain: external tool (if configured and enabled),
    /// then the built-in fallback.
    pub fn from_config(config: &IngestConfig) -> Self {
        let mut strategies: Vec<Arc<dyn RepairStrategy>> = Vec::new();
        if config.use_external_repair
            && let Some(tool) = &config.external_tool
        {
            strategies.push(Arc::new(ExternalToolRepair::new(tool.clone())));
        }
        strategies.push(Arc::new(FallbackRepair));

        Self::with_strategies(strategies, config)
    }

    /// Build a chain from explicit strategies.
    ///
    /// The built-in fallback is appended if the list does not already end
    /// with it, so a chain can never run out of options.
    pub fn with_strategies(
        mut strategies: Vec<Arc<dyn RepairStrategy>>,
        config: &IngestConfig,
    ) -> Self {
        let ends_with_fallback = strategies
            .last()
            .is_some_and(|s| s.name() == FallbackRepair::NAME);
        if !ends_with_fallback {
            strategies.push(Arc::new(FallbackRepair));
        }

        Self {
            strategies,
            min_row_preservation: config.min_row_preservation,
            min_column_preservation: config.min_column_preservation,
        }
    }

    /// Names of the strategies in the order they are tried.
    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Repair `table`, re-validate it, and check how much data survived.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::RepairFailed`] if the output of the last
    /// strategy still has validation errors.
    pub fn repair(
        &self,
        table: &DataFrame,
        validation: &ValidationResult,
    ) -> Result<(DataFrame, RepairReport)> {
        let mut attempted: Vec<String> = Vec::new();
        let mut remaining_errors = validation.errors.clone();

        for strategy in &self.strategies {
            info!("Attempting repair with strategy '{}'", strategy.name());

            let attempt = match strategy.repair(table, validation) {
                Ok(attempt) => attempt,
                Err(e) => {
                    warn!("Repair strategy '{}' failed: {:#}", strategy.name(), e);
                    attempted.push(format!("{} failed: {:#}", strategy.name(), e));
                    continue;
                }
            };

            attempted.extend(attempt.log.iter().cloned());
            let validation_after = StructuralValidator::validate(&attempt.table);

            if !validation_after.is_valid() {
                warn!(
                    "Strategy '{}' left {} validation error(s)",
                    strategy.name(),
                    validation_after.errors.len()
                );
                attempted.push(format!(
                    "{} output still invalid: {}",
                    strategy.name(),
                    validation_after.errors.join("; ")
                ));
                remaining_errors = validation_after.errors;
                continue;
            }

            let report = self.build_report(table, &attempt, strategy.name(), validation_after);
            if let Some(warning) = &report.data_loss_warning {
                warn!("{}", warning);
            }
            info!(
                "Repair with '{}' succeeded: {} step(s) applied",
                strategy.name(),
                report.repair_log.len()
            );
            return Ok((attempt.table, report));
        }

        Err(ProcessingError::RepairFailed {
            errors: remaining_errors,
            repair_log: attempted,
        })
    }

    fn build_report(
        &self,
        original: &DataFrame,
        attempt: &RepairAttempt,
        strategy: &str,
        validation_after: ValidationResult,
    ) -> RepairReport {
        let rows_before = original.height();
        let rows_after = attempt.table.height();
        let columns_before = original.width();
        let columns_after = attempt.table.width();

        RepairReport {
            strategy: strategy.to_string(),
            repair_log: attempt.log.clone(),
            rows_before,
            rows_after,
            columns_before,
            columns_after,
            validation_after,
            data_loss_warning: preservation_warning(
                (rows_before, rows_after),
                (columns_before, columns_after),
                self.min_row_preservation,
                self.min_column_preservation,
            ),
        }
    }
}

/// Data-loss warning when too many rows or columns were dropped.
fn preservation_warning(
    (rows_before, rows_after): (usize, usize),
    (cols_before, cols_after): (usize, usize),
    min_rows: f64,
    min_cols: f64,
) -> Option<String> {
    let ratio = |before: usize, after: usize| {
        if before == 0 {
            1.0
        } else {
            after as f64 / before as f64
        }
    };

    let row_ratio = ratio(rows_before, rows_after);
    let col_ratio = ratio(cols_before, cols_after);

    let mut problems = Vec::new();
    if row_ratio < min_rows {
        problems.push(format!(
            "kept {}/{} rows ({:.1}% < {:.0}%)",
            rows_after,
            rows_before,
            row_ratio * 100.0,
            min_rows * 100.0
        ));
    }
    if col_ratio < min_cols {
        problems.push(format!(
            "kept {}/{} columns ({:.1}% < {:.0}%)",
            cols_after,
            cols_before,
            col_ratio * 100.0,
            min_cols * 100.0
        ));
    }

    (!problems.is_empty()).then(|| format!("Possible data loss: {}", problems.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct AlwaysFails;

    impl RepairStrategy for AlwaysFails {
        fn repair(&self, _: &DataFrame, _: &ValidationResult) -> anyhow::Result<RepairAttempt> {
            bail!("tool not installed")
        }

        fn name(&self) -> &str {
            "always-fails"
        }
    }

    struct ReturnsInvalid;

    impl RepairStrategy for ReturnsInvalid {
        fn repair(&self, _: &DataFrame, _: &ValidationResult) -> anyhow::Result<RepairAttempt> {
            Ok(RepairAttempt {
                table: DataFrame::empty(),
                log: vec!["Emptied the table".to_string()],
            })
        }

        fn name(&self) -> &str {
            "returns-invalid"
        }
    }

    fn config() -> IngestConfig {
        IngestConfig::builder().use_external_repair(false).build().unwrap()
    }

    fn table_with_empty_column() -> DataFrame {
        df!(
            "MES" => &[Some("enero"), Some("febrero"), None],
            "T.M." => &[Some("10"), Some("20"), None],
            "vacia" => &[None::<&str>, None, None]
        )
        .unwrap()
    }

    #[test]
    fn test_default_chain_without_external() {
        let repairer = AutoRepairer::from_config(&config());
        assert_eq!(repairer.strategy_names(), vec![FallbackRepair::NAME]);
    }

    #[test]
    fn test_default_chain_with_external() {
        let repairer = AutoRepairer::from_config(&IngestConfig::default());
        assert_eq!(
            repairer.strategy_names(),
            vec![ExternalToolRepair::NAME, FallbackRepair::NAME]
        );
    }

    #[test]
    fn test_failed_strategy_falls_through() {
        let repairer = AutoRepairer::with_strategies(vec![Arc::new(AlwaysFails)], &config());
        let df = table_with_empty_column();
        let validation = StructuralValidator::validate(&df);

        let (repaired, report) = repairer.repair(&df, &validation).unwrap();

        assert_eq!(report.strategy, FallbackRepair::NAME);
        assert_eq!(repaired.width(), 2);
        assert_eq!(repaired.height(), 2);
        assert!(report.validation_after.is_valid());
    }

    #[test]
    fn test_invalid_output_falls_through() {
        let repairer = AutoRepairer::with_strategies(vec![Arc::new(ReturnsInvalid)], &config());
        let df = table_with_empty_column();
        let validation = StructuralValidator::validate(&df);

        let (_, report) = repairer.repair(&df, &validation).unwrap();
        assert_eq!(report.strategy, FallbackRepair::NAME);
    }

    #[test]
    fn test_unrepairable_table_reports_everything() {
        let repairer = AutoRepairer::with_strategies(vec![Arc::new(AlwaysFails)], &config());
        let df = df!(
            "a" => &[None::<&str>, None],
            "b" => &[None::<&str>, None]
        )
        .unwrap();
        let validation = StructuralValidator::validate(&df);

        let err = repairer.repair(&df, &validation).unwrap_err();

        assert_eq!(err.error_code(), "REPAIR_FAILED");
        assert!(!err.errors().is_empty());
        assert!(err.repair_log().iter().any(|l| l.contains("tool not installed")));
        assert!(err.repair_log().iter().any(|l| l.contains("still invalid")));
    }

    #[test]
    fn test_repair_never_increases_rows() {
        let repairer = AutoRepairer::from_config(&config());
        let df = table_with_empty_column();
        let validation = StructuralValidator::validate(&df);

        let (repaired, report) = repairer.repair(&df, &validation).unwrap();
        assert!(repaired.height() <= df.height());
        assert_eq!(report.rows_before, 3);
        assert_eq!(report.rows_after, 2);
    }

    #[test]
    fn test_data_loss_warning_flagged() {
        let repairer = AutoRepairer::from_config(&config());
        let df = table_with_empty_column();
        let validation = StructuralValidator::validate(&df);

        // 2/3 rows and 2/3 columns survive, both below the gate
        let (_, report) = repairer.repair(&df, &validation).unwrap();
        let warning = report.data_loss_warning.unwrap();
        assert!(warning.contains("rows"));
        assert!(warning.contains("columns"));
    }

    #[test]
    fn test_preservation_warning_thresholds() {
        assert!(preservation_warning((10, 9), (5, 4), 0.9, 0.8).is_none());
        assert!(preservation_warning((10, 8), (5, 5), 0.9, 0.8).is_some());
        assert!(preservation_warning((10, 10), (5, 3), 0.9, 0.8).is_some());
        assert!(preservation_warning((0, 0), (0, 0), 0.9, 0.8).is_none());
    }
}
