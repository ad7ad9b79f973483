//! Built-in repair heuristics, always available.

use super::{RepairAttempt, RepairStrategy};
use crate::types::ValidationResult;
use crate::utils::{parse_numeric_string, string_mode};
use anyhow::Result;
use once_cell::sync::Lazy;
use polars::prelude::*;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W").expect("valid regex"));

/// Column/row-level repair applied in a fixed order:
///
/// 1. drop columns that are entirely missing
/// 2. drop rows that are entirely missing
/// 3. normalize column names
/// 4. coerce columns to numeric where at least one value parses
/// 5. fill missing numeric cells with the median, text cells with the mode
/// 6. drop exact duplicate rows
pub struct FallbackRepair;

impl FallbackRepair {
    pub const NAME: &'static str = "builtin";

    fn drop_empty_columns(df: DataFrame, log: &mut Vec<String>) -> DataFrame {
        let height = df.height();
        if height == 0 {
            return df;
        }

        let empty: Vec<String> = df
            .get_columns()
            .iter()
            .filter(|col| col.null_count() == height)
            .map(|col| col.name().to_string())
            .collect();

        if empty.is_empty() {
            return df;
        }

        log.push(format!(
            "Dropped {} empty column(s): {}",
            empty.len(),
            empty.join(", ")
        ));
        let names: Vec<PlSmallStr> = empty.iter().map(|s| s.as_str().into()).collect();
        df.drop_many(names)
    }

    fn drop_empty_rows(df: DataFrame, log: &mut Vec<String>) -> Result<DataFrame> {
        if df.width() == 0 || df.height() == 0 {
            return Ok(df);
        }

        let mut keep = vec![false; df.height()];
        for col in df.get_columns() {
            let nulls = col.as_materialized_series().is_null();
            for (row, is_null) in nulls.into_iter().enumerate() {
                if is_null == Some(false) {
                    keep[row] = true;
                }
            }
        }

        let dropped = keep.iter().filter(|k| !**k).count();
        if dropped == 0 {
            return Ok(df);
        }

        let mask = BooleanChunked::new("keep".into(), keep);
        let df = df.filter(&mask)?;
        log.push(format!("Dropped {} empty row(s)", dropped));
        Ok(df)
    }

    fn normalize_column_names(mut df: DataFrame, log: &mut Vec<String>) -> Result<DataFrame> {
        let original: Vec<String> = df
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();

        let mut seen: HashSet<String> = HashSet::new();
        let mut renamed = 0;
        let normalized: Vec<String> = original
            .iter()
            .map(|name| {
                let base = NON_WORD.replace_all(name.trim(), "_").to_string();
                let base = if base.is_empty() {
                    "column".to_string()
                } else {
                    base
                };
                let mut candidate = base.clone();
                let mut suffix = 2;
                while !seen.insert(candidate.clone()) {
                    candidate = format!("{}_{}", base, suffix);
                    suffix += 1;
                }
                if &candidate != name {
                    renamed += 1;
                }
                candidate
            })
            .collect();

        if renamed > 0 {
            df.set_column_names(normalized.iter().map(|s| s.as_str()))?;
            log.push(format!("Normalized {} column name(s)", renamed));
        }
        Ok(df)
    }

    fn coerce_numeric(mut df: DataFrame, log: &mut Vec<String>) -> Result<DataFrame> {
        let names: Vec<String> = df
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();

        for name in &names {
            let series = df.column(name)?.as_materialized_series().clone();
            let Ok(str_series) = series.str() else {
                continue;
            };

            let mut parsed = 0usize;
            let mut failed = 0usize;
            let values: Vec<Option<f64>> = str_series
                .into_iter()
                .map(|opt| {
                    let val = opt?;
                    if val.trim().is_empty() {
                        return None;
                    }
                    let number = parse_numeric_string(val);
                    if number.is_some() {
                        parsed += 1;
                    } else {
                        failed += 1;
                    }
                    number
                })
                .collect();

            // Keep the text column when nothing at all could be converted.
            if parsed == 0 {
                continue;
            }

            df.replace(name, Series::new(name.as_str().into(), values))?;
            if failed > 0 {
                log.push(format!(
                    "Converted '{}' to numeric; {} unparseable value(s) became missing",
                    name, failed
                ));
            } else {
                log.push(format!("Converted '{}' to numeric", name));
            }
        }
        Ok(df)
    }

    fn fill_missing(mut df: DataFrame, log: &mut Vec<String>) -> Result<DataFrame> {
        let names: Vec<String> = df
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();

        for name in &names {
            let series = df.column(name)?.as_materialized_series().clone();
            let missing = series.null_count();
            if missing == 0 {
                continue;
            }

            if let Ok(values) = series.f64() {
                let Some(median) = series.median() else {
                    continue;
                };
                let filled: Vec<f64> = values.into_iter().map(|v| v.unwrap_or(median)).collect();
                df.replace(name, Series::new(name.as_str().into(), filled))?;
                log.push(format!(
                    "Filled {} missing value(s) in '{}' with median {}",
                    missing, name, median
                ));
            } else if let Ok(values) = series.str() {
                let mode = string_mode(&series).unwrap_or_default();
                let filled: Vec<String> = values
                    .into_iter()
                    .map(|v| v.unwrap_or(mode.as_str()).to_string())
                    .collect();
                df.replace(name, Series::new(name.as_str().into(), filled))?;
                log.push(format!(
                    "Filled {} missing value(s) in '{}' with mode '{}'",
                    missing, name, mode
                ));
            }
        }
        Ok(df)
    }

    fn drop_duplicates(df: DataFrame, log: &mut Vec<String>) -> Result<DataFrame> {
        let before = df.height();
        if before == 0 || df.width() == 0 {
            return Ok(df);
        }

        let df = df.unique_stable(None, UniqueKeepStrategy::First, None)?;
        let removed = before - df.height();
        if removed > 0 {
            log.push(format!("Removed {} duplicate row(s)", removed));
        }
        Ok(df)
    }
}

impl RepairStrategy for FallbackRepair {
    fn repair(&self, table: &DataFrame, _validation: &ValidationResult) -> Result<RepairAttempt> {
        let mut log = Vec::new();

        let df = Self::drop_empty_columns(table.clone(), &mut log);
        let df = Self::drop_empty_rows(df, &mut log)?;
        let df = Self::normalize_column_names(df, &mut log)?;
        let df = Self::coerce_numeric(df, &mut log)?;
        let df = Self::fill_missing(df, &mut log)?;
        let df = Self::drop_duplicates(df, &mut log)?;

        for entry in &log {
            debug!("Repair: {}", entry);
        }

        Ok(RepairAttempt { table: df, log })
    }

    fn name(&self) -> &str {
        Self::NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::StructuralValidator;

    fn repair(df: &DataFrame) -> RepairAttempt {
        let validation = StructuralValidator::validate(df);
        FallbackRepair.repair(df, &validation).unwrap()
    }

    fn names(df: &DataFrame) -> Vec<String> {
        df.get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_drops_empty_columns_and_rows() {
        let df = df!(
            "a" => &[Some("x"), None, Some("y")],
            "b" => &[Some("1"), None, Some("2")],
            "c" => &[None::<&str>, None, None]
        )
        .unwrap();

        let attempt = repair(&df);

        assert_eq!(names(&attempt.table), vec!["a", "b"]);
        assert_eq!(attempt.table.height(), 2);
        assert!(attempt.log[0].starts_with("Dropped 1 empty column(s): c"));
        assert_eq!(attempt.log[1], "Dropped 1 empty row(s)");
    }

    #[test]
    fn test_normalizes_column_names() {
        let df = df!(
            " T.M. " => &["1", "2"],
            "Tipo Mov" => &["a", "b"],
            "T_M_" => &["3", "4"]
        )
        .unwrap();

        let attempt = repair(&df);

        assert_eq!(names(&attempt.table), vec!["T_M_", "Tipo_Mov", "T_M__2"]);
        assert!(attempt.log.iter().any(|l| l == "Normalized 3 column name(s)"));
    }

    #[test]
    fn test_numeric_coercion_keeps_text_columns() {
        let df = df!(
            "desc" => &["Fruta Recibida", "Fruta Proyectada"],
            "tm" => &["1,500.0", "300"]
        )
        .unwrap();

        let attempt = repair(&df);

        let tm = attempt.table.column("tm").unwrap();
        assert_eq!(tm.dtype(), &DataType::Float64);
        let desc = attempt.table.column("desc").unwrap();
        assert_eq!(desc.dtype(), &DataType::String);
    }

    #[test]
    fn test_fills_median_and_mode() {
        let df = df!(
            "desc" => &[Some("a"), Some("a"), Some("b"), None],
            "tm" => &[Some("1"), Some("3"), None, Some("10")]
        )
        .unwrap();

        let attempt = repair(&df);

        let tm: Vec<Option<f64>> = attempt
            .table
            .column("tm")
            .unwrap()
            .f64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(tm, vec![Some(1.0), Some(3.0), Some(3.0), Some(10.0)]);

        let desc = attempt.table.column("desc").unwrap().str().unwrap().clone();
        assert_eq!(desc.get(3), Some("a"));
        assert_eq!(attempt.table.column("tm").unwrap().null_count(), 0);
    }

    #[test]
    fn test_removes_duplicates_keeping_order() {
        let df = df!(
            "a" => &["x", "y", "x"],
            "b" => &["1", "2", "1"]
        )
        .unwrap();

        let attempt = repair(&df);

        assert_eq!(attempt.table.height(), 2);
        let a = attempt.table.column("a").unwrap().str().unwrap().clone();
        assert_eq!(a.get(0), Some("x"));
        assert_eq!(a.get(1), Some("y"));
        assert_eq!(attempt.log.last().unwrap(), "Removed 1 duplicate row(s)");
    }

    #[test]
    fn test_clean_table_has_empty_log() {
        let df = df!(
            "mes" => &["enero", "febrero"],
            "valor" => &[1.0f64, 2.0]
        )
        .unwrap();

        let attempt = repair(&df);
        assert!(attempt.log.is_empty());
        assert!(attempt.table.equals_missing(&df));
    }
}
