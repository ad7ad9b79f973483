//! Structural validation of raw tables.
//!
//! Every check runs on every table; findings are accumulated into a single
//! [`ValidationResult`] so the caller sees all problems at once.

use crate::types::ValidationResult;
use crate::utils::{count_empty_rows, is_numeric_dtype, parse_numeric_string};
use once_cell::sync::Lazy;
use polars::prelude::*;
use regex::Regex;
use tracing::debug;

/// Word characters, whitespace and basic punctuation.
static ALLOWED_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^[\w\s.,;:!?¿¡()\[\]/'"%&#+*@°-]*$"#).expect("valid regex")
});

/// Share of parseable values above which a text column counts as numeric.
const NUMERIC_MAJORITY: f64 = 0.5;

/// Inspects raw tables for blocking errors and non-blocking warnings.
pub struct StructuralValidator;

impl StructuralValidator {
    /// Validate a raw table without modifying it.
    pub fn validate(df: &DataFrame) -> ValidationResult {
        let mut result = ValidationResult::default();
        let rows = df.height();

        if rows == 0 || df.width() == 0 {
            result.errors.push(format!(
                "Table is empty ({} rows, {} columns)",
                rows,
                df.width()
            ));
        }

        if df.width() < 2 {
            result.errors.push(format!(
                "Table has {} column(s); at least 2 are required",
                df.width()
            ));
        }

        if rows > 0 && df.width() > 0 && count_empty_rows(df) == rows {
            result.errors.push("Every row is empty".to_string());
        }

        for col in df.get_columns() {
            let series = col.as_materialized_series();
            let name = series.name().to_string();

            if rows > 0 && series.null_count() == rows {
                result
                    .warnings
                    .push(format!("Column '{}' is entirely empty", name));
                result.empty_columns.push(name.clone());
                continue;
            }

            if let Some(warning) = Self::check_numeric_consistency(series) {
                result.warnings.push(warning);
            } else if let Some(warning) = Self::check_special_characters(series) {
                result.warnings.push(warning);
            }
        }

        if rows > 0
            && let Ok(unique) = df.unique::<&str, &str>(None, UniqueKeepStrategy::First, None)
        {
            let duplicates = rows - unique.height();
            if duplicates > 0 {
                result
                    .warnings
                    .push(format!("Found {} duplicate row(s)", duplicates));
            }
        }

        for error in &result.errors {
            debug!("Validation error: {}", error);
        }
        for warning in &result.warnings {
            debug!("Validation warning: {}", warning);
        }

        result
    }

    /// Warn when a mostly-numeric column contains values that won't coerce.
    ///
    /// Returns `None` for text columns, so the caller can apply text checks.
    fn check_numeric_consistency(series: &Series) -> Option<String> {
        // Typed numeric columns cannot hold non-numeric values.
        if is_numeric_dtype(series.dtype()) {
            return None;
        }

        let str_series = series.str().ok()?;
        let mut total = 0usize;
        let mut bad = 0usize;
        for val in str_series.into_iter().flatten() {
            if val.trim().is_empty() {
                continue;
            }
            total += 1;
            if parse_numeric_string(val).is_none() {
                bad += 1;
            }
        }

        if total == 0 || ((total - bad) as f64 / total as f64) <= NUMERIC_MAJORITY {
            return None;
        }

        (bad > 0).then(|| {
            format!(
                "Column '{}' is numeric but has {} non-numeric value(s)",
                series.name(),
                bad
            )
        })
    }

    /// Warn when a text column contains characters outside the allowed set.
    fn check_special_characters(series: &Series) -> Option<String> {
        let str_series = series.str().ok()?;
        let bad = str_series
            .into_iter()
            .flatten()
            .filter(|val| !ALLOWED_TEXT.is_match(val))
            .count();

        (bad > 0).then(|| {
            format!(
                "Column '{}' has {} value(s) with special characters",
                series.name(),
                bad
            )
        })
    }
}
