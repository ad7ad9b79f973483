//! Fallback layout: optional date column plus numeric columns.

use crate::error::{ProcessingError, Result};
use crate::table::{CanonicalTable, DateAxis};
use crate::types::{NormalizationNotes, NormalizerVariant};
use crate::utils::{
    column_key, count_numeric_values, is_numeric_dtype, parse_numeric_string, series_to_f64,
    series_to_strings,
};
use chrono::{Days, NaiveDate};
use once_cell::sync::Lazy;
use polars::prelude::*;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

/// Name of the placeholder column created when no numeric column exists.
pub const PLACEHOLDER_COLUMN: &str = "valor";

const DATE_KEYWORDS: [&str; 2] = ["fecha", "date"];

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"];

static NAME_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s:;,./\\-]+").expect("valid regex"));

/// Index the table by its date column (or a synthetic axis) and keep only
/// numeric columns.
pub(super) fn normalize(
    df: &DataFrame,
    synthetic_epoch: NaiveDate,
) -> Result<(CanonicalTable, NormalizationNotes)> {
    let mut notes = NormalizationNotes::new(NormalizerVariant::Generic);
    let date_column = find_date_column(df);

    let (mut dates, axis) = match &date_column {
        Some(name) => {
            let raw = series_to_strings(df.column(name)?.as_materialized_series())?;
            let parsed: Vec<Option<NaiveDate>> = raw
                .iter()
                .map(|cell| cell.as_deref().and_then(parse_date))
                .collect();
            let unparsed = parsed.iter().filter(|d| d.is_none()).count();

            if unparsed == parsed.len() {
                warn!(
                    "Date column '{}' has no parseable dates; using a synthetic axis",
                    name
                );
                notes
                    .notes
                    .push(format!("Date column '{}' has no parseable dates", name));
                (synthetic_dates(synthetic_epoch, df.height())?, DateAxis::Synthetic)
            } else {
                if unparsed > 0 {
                    notes.notes.push(format!(
                        "Dropped {} row(s) with unparseable dates in '{}'",
                        unparsed, name
                    ));
                }
                (parsed, DateAxis::Calendar)
            }
        }
        None => {
            warn!(
                "No date column found; using a synthetic daily axis from {}",
                synthetic_epoch
            );
            (synthetic_dates(synthetic_epoch, df.height())?, DateAxis::Synthetic)
        }
    };
    notes.synthetic_dates = axis == DateAxis::Synthetic;

    let mut columns: Vec<(String, Vec<Option<f64>>)> = Vec::new();
    for column in df.get_columns() {
        let name = column.name().as_str();
        if Some(name) == date_column.as_deref() {
            continue;
        }
        if let Some(values) = numeric_values(column.as_materialized_series()) {
            columns.push((name.to_string(), values));
        }
    }

    if columns.is_empty() {
        warn!("No numeric columns found; adding placeholder '{}'", PLACEHOLDER_COLUMN);
        notes.synthetic_values = true;
        notes.notes.push(format!(
            "No numeric columns; '{}' counts rows instead",
            PLACEHOLDER_COLUMN
        ));
        let counter = (1..=df.height()).map(|i| Some(i as f64)).collect();
        columns.push((PLACEHOLDER_COLUMN.to_string(), counter));
    }

    let names = clean_column_names(columns.iter().map(|(name, _)| name.as_str()));
    let values: Vec<Vec<Option<f64>>> = columns.into_iter().map(|(_, values)| values).collect();

    // Sum rows that share a date so the index is unique.
    let mut rows: BTreeMap<NaiveDate, Vec<Option<f64>>> = BTreeMap::new();
    let mut summed = 0usize;
    for (row, date) in dates.iter_mut().enumerate() {
        let Some(date) = date.take() else {
            continue;
        };
        let mut duplicate = true;
        let slots = rows.entry(date).or_insert_with(|| {
            duplicate = false;
            vec![None; values.len()]
        });
        if duplicate {
            summed += 1;
        }
        for (slot, column) in slots.iter_mut().zip(&values) {
            if let Some(value) = column[row] {
                *slot = Some(slot.unwrap_or(0.0) + value);
            }
        }
    }
    if summed > 0 {
        notes
            .notes
            .push(format!("Summed {} row(s) sharing a date", summed));
    }

    let index: Vec<NaiveDate> = rows.keys().copied().collect();
    let columns = names
        .into_iter()
        .enumerate()
        .map(|(j, name)| (name, rows.values().map(|slots| slots[j]).collect()))
        .collect();

    let table = CanonicalTable::from_columns(index, columns, axis)?;
    info!(
        "Generic layout: {} row(s) x {} column(s), {:?} axis",
        table.height(),
        table.data().width(),
        axis
    );
    Ok((table, notes))
}

/// First column whose name mentions a date.
fn find_date_column(df: &DataFrame) -> Option<String> {
    df.get_column_names()
        .into_iter()
        .find(|name| {
            let key = column_key(name);
            DATE_KEYWORDS.iter().any(|keyword| key.contains(keyword))
        })
        .map(|name| name.to_string())
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        // Timestamps such as "2024-01-31 10:00:00"
        .or_else(|| {
            raw.get(..10)
                .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        })
}

fn synthetic_dates(epoch: NaiveDate, rows: usize) -> Result<Vec<Option<NaiveDate>>> {
    (0..rows)
        .map(|i| {
            epoch
                .checked_add_days(Days::new(i as u64))
                .map(Some)
                .ok_or_else(|| {
                    ProcessingError::Internal(format!("synthetic date overflow at row {}", i))
                })
        })
        .collect()
}

/// Values of a column that is numeric, either by type or because every
/// non-blank cell parses as a number.
fn numeric_values(series: &Series) -> Option<Vec<Option<f64>>> {
    if is_numeric_dtype(series.dtype()) {
        return series_to_f64(series).ok();
    }

    let (numeric, total) = count_numeric_values(series);
    if total == 0 || numeric < total {
        return None;
    }

    let strings = series.str().ok()?;
    Some(
        strings
            .into_iter()
            .map(|cell| cell.and_then(parse_numeric_string))
            .collect(),
    )
}

/// Replace separators, spaces and colons with `_`, keeping names unique.
fn clean_column_names<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .map(|name| {
            let base = NAME_SEPARATORS.replace_all(name.trim(), "_").to_string();
            let mut candidate = base.clone();
            let mut suffix = 2;
            while !seen.insert(candidate.clone()) {
                candidate = format!("{}_{}", base, suffix);
                suffix += 1;
            }
            candidate
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn epoch() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_date_column_becomes_index() {
        let df = df!(
            "Fecha" => &["2024-03-01", "2024-01-01", "2024-02-01"],
            "Kilos: Campo" => &["3", "1", "2"],
            "nota" => &["c", "a", "b"]
        )
        .unwrap();

        let (table, notes) = normalize(&df, epoch()).unwrap();

        assert_eq!(table.date_axis(), DateAxis::Calendar);
        assert_eq!(
            table.index(),
            &[day(2024, 1, 1), day(2024, 2, 1), day(2024, 3, 1)]
        );
        assert_eq!(table.column_names(), vec!["Kilos_Campo".to_string()]);
        assert_eq!(
            table.values("Kilos_Campo").unwrap(),
            vec![Some(1.0), Some(2.0), Some(3.0)]
        );
        assert!(!notes.synthetic_dates);
    }

    #[test]
    fn test_duplicate_dates_are_summed() {
        let df = df!(
            "date" => &["01/01/2024", "01/01/2024", "02/01/2024"],
            "valor" => &["1", "2", "4"]
        )
        .unwrap();

        let (table, notes) = normalize(&df, epoch()).unwrap();

        assert_eq!(table.index(), &[day(2024, 1, 1), day(2024, 1, 2)]);
        assert_eq!(table.values("valor").unwrap(), vec![Some(3.0), Some(4.0)]);
        assert!(notes.notes.iter().any(|n| n.contains("Summed 1 row")));
    }

    #[test]
    fn test_unparseable_dates_are_dropped() {
        let df = df!(
            "fecha" => &["2024-01-01", "pronto", "2024-01-03"],
            "x" => &["1", "2", "3"]
        )
        .unwrap();

        let (table, notes) = normalize(&df, epoch()).unwrap();

        assert_eq!(table.height(), 2);
        assert!(notes.notes.iter().any(|n| n.contains("Dropped 1 row")));
    }

    #[test]
    fn test_single_text_column_gets_synthetic_axis_and_placeholder() {
        let df = df!("comentario" => &["hola", "mundo", "adios"]).unwrap();

        let (table, notes) = normalize(&df, epoch()).unwrap();

        assert_eq!(table.date_axis(), DateAxis::Synthetic);
        assert_eq!(
            table.index(),
            &[day(2024, 1, 1), day(2024, 1, 2), day(2024, 1, 3)]
        );
        assert_eq!(
            table.values(PLACEHOLDER_COLUMN).unwrap(),
            vec![Some(1.0), Some(2.0), Some(3.0)]
        );
        assert!(notes.synthetic_dates);
        assert!(notes.synthetic_values);
    }

    #[test]
    fn test_typed_numeric_columns_are_kept() {
        let df = df!(
            "a" => &[1.5f64, 2.5],
            "b" => &["x", "y"]
        )
        .unwrap();

        let (table, _) = normalize(&df, epoch()).unwrap();
        assert_eq!(table.column_names(), vec!["a".to_string()]);
    }

    #[test]
    fn test_mixed_column_is_not_numeric() {
        let df = df!(
            "a" => &["1", "dos"],
            "b" => &["3", "4"]
        )
        .unwrap();

        let (table, _) = normalize(&df, epoch()).unwrap();
        assert_eq!(table.column_names(), vec!["b".to_string()]);
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("2024-05-06"), Some(day(2024, 5, 6)));
        assert_eq!(parse_date("06/05/2024"), Some(day(2024, 5, 6)));
        assert_eq!(parse_date("2024/05/06"), Some(day(2024, 5, 6)));
        assert_eq!(parse_date("06-05-2024"), Some(day(2024, 5, 6)));
        assert_eq!(parse_date("2024-05-06 08:30:00"), Some(day(2024, 5, 6)));
        assert_eq!(parse_date("mayo"), None);
    }

    #[test]
    fn test_clean_column_names() {
        let names = clean_column_names(["T.M.", "a b", "a:b", "x"].into_iter());
        assert_eq!(names, vec!["T_M_", "a_b", "a_b_2", "x"]);
    }
}
