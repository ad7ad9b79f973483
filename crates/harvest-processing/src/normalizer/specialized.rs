//! Year + month name + description + tonnage layout.

use super::labels::LabelFolder;
use super::months::month_number;
use crate::error::{ProcessingError, Result};
use crate::table::{CanonicalTable, DateAxis};
use crate::types::{NormalizationNotes, NormalizerVariant};
use crate::utils::series_to_strings;
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Source columns of the specialized layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecializedColumns {
    pub description: String,
    pub month: String,
    pub year: Option<String>,
    pub tonnage: String,
}

type Buckets = BTreeMap<String, BTreeMap<NaiveDate, f64>>;

/// Pivot the raw rows into one summed column per canonical label.
///
/// `fallback_year` is used for every row when there is no year column.
pub(super) fn normalize(
    df: &DataFrame,
    columns: &SpecializedColumns,
    folder: &LabelFolder,
    fallback_year: i32,
) -> Result<(CanonicalTable, NormalizationNotes)> {
    let mut notes = NormalizationNotes::new(NormalizerVariant::Specialized);

    let strings = |name: &str| -> Result<Vec<Option<String>>> {
        Ok(series_to_strings(df.column(name)?.as_materialized_series())?)
    };
    let descriptions = strings(&columns.description)?;
    let months = strings(&columns.month)?;
    let tonnage = strings(&columns.tonnage)?;
    let years = columns.year.as_deref().map(strings).transpose()?;

    if years.is_none() {
        warn!(
            "No year column found; dating every row in {}",
            fallback_year
        );
        notes.synthetic_year = Some(fallback_year);
        notes.notes.push(format!(
            "No year column; the current year {} was assumed for every row",
            fallback_year
        ));
    }

    let mut buckets: Buckets = BTreeMap::new();
    let mut bad_months: BTreeSet<String> = BTreeSet::new();
    let mut bad_years: BTreeSet<String> = BTreeSet::new();
    let mut bad_tonnage: BTreeSet<String> = BTreeSet::new();
    let mut skipped = 0usize;

    for row in 0..df.height() {
        let Some(description) = non_blank(&descriptions[row]) else {
            skipped += 1;
            continue;
        };

        let month_raw = non_blank(&months[row]).unwrap_or_default();
        let Some(month) = month_number(month_raw) else {
            bad_months.insert(month_raw.to_string());
            continue;
        };

        let year = match &years {
            Some(years) => {
                let raw = non_blank(&years[row]).unwrap_or_default();
                match parse_year(raw) {
                    Some(year) => year,
                    None => {
                        bad_years.insert(raw.to_string());
                        continue;
                    }
                }
            }
            None => fallback_year,
        };

        let Some(date) = NaiveDate::from_ymd_opt(year, month, 1) else {
            bad_years.insert(year.to_string());
            continue;
        };

        let value = match non_blank(&tonnage[row]) {
            None => 0.0,
            Some(raw) => match parse_tonnage(raw) {
                Some(value) => value,
                None => {
                    bad_tonnage.insert(raw.to_string());
                    continue;
                }
            },
        };

        let label = folder.fold(description);
        *buckets.entry(label).or_default().entry(date).or_insert(0.0) += value;
    }

    let mut problems = Vec::new();
    if !bad_months.is_empty() {
        problems.push(format!(
            "unrecognized month name(s): {}",
            quoted_list(&bad_months)
        ));
    }
    if !bad_years.is_empty() {
        problems.push(format!("invalid year value(s): {}", quoted_list(&bad_years)));
    }
    if !bad_tonnage.is_empty() {
        problems.push(format!(
            "non-numeric tonnage value(s): {}",
            quoted_list(&bad_tonnage)
        ));
    }
    if !problems.is_empty() {
        return Err(ProcessingError::DomainMapping(problems.join("; ")));
    }

    if buckets.is_empty() {
        return Err(ProcessingError::InsufficientData(
            "no rows with a movement description".to_string(),
        ));
    }

    if skipped > 0 {
        notes
            .notes
            .push(format!("Skipped {} row(s) without a description", skipped));
    }

    let (buckets, merged) = refold_labels(buckets, folder);
    if merged > 0 {
        notes
            .notes
            .push(format!("Merged {} column(s) after refolding labels", merged));
    }

    let table = pivot(buckets)?;
    info!(
        "Specialized layout: {} month(s) x {} categor(ies)",
        table.height(),
        table.data().width()
    );
    Ok((table, notes))
}

fn non_blank(cell: &Option<String>) -> Option<&str> {
    cell.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Whole-number years, also accepting `2024.0` from numeric coercion.
fn parse_year(raw: &str) -> Option<i32> {
    let value: f64 = raw.trim().parse().ok()?;
    (value.fract() == 0.0 && (1.0..=9999.0).contains(&value)).then_some(value as i32)
}

/// Tonnage with thousands separators removed.
fn parse_tonnage(raw: &str) -> Option<f64> {
    raw.replace(',', "")
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn quoted_list(values: &BTreeSet<String>) -> String {
    values
        .iter()
        .map(|v| format!("'{}'", v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Fold the pivoted column names again and sum columns that collide.
fn refold_labels(buckets: Buckets, folder: &LabelFolder) -> (Buckets, usize) {
    let before = buckets.len();
    let mut merged: Buckets = BTreeMap::new();
    for (label, values) in buckets {
        let target = merged.entry(folder.fold(&label)).or_default();
        for (date, value) in values {
            *target.entry(date).or_insert(0.0) += value;
        }
    }
    let collapsed = before - merged.len();
    (merged, collapsed)
}

/// One row per date, one column per label, absent combinations as zero.
fn pivot(buckets: Buckets) -> Result<CanonicalTable> {
    let index: Vec<NaiveDate> = buckets
        .values()
        .flat_map(|values| values.keys().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let columns = buckets
        .into_iter()
        .map(|(label, values)| {
            let column = index
                .iter()
                .map(|date| Some(values.get(date).copied().unwrap_or(0.0)))
                .collect();
            (label, column)
        })
        .collect();

    CanonicalTable::from_columns(index, columns, DateAxis::Calendar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::labels::{PROJECTED, RECEIVED};
    use pretty_assertions::assert_eq;

    fn columns(with_year: bool) -> SpecializedColumns {
        SpecializedColumns {
            description: "DESCRIPCION".to_string(),
            month: "MES".to_string(),
            year: with_year.then(|| "year".to_string()),
            tonnage: "T.M.".to_string(),
        }
    }

    fn date(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    #[test]
    fn test_case_variants_fold_and_sum() {
        let df = df!(
            "year" => &["2024", "2024"],
            "MES" => &["enero", "enero"],
            "DESCRIPCION" => &["1 Fruta Recibida", "2 Fruta recibida"],
            "T.M." => &["1500.0", "300"]
        )
        .unwrap();

        let (table, notes) =
            normalize(&df, &columns(true), &LabelFolder::default(), 1999).unwrap();

        assert_eq!(table.index(), &[date(2024, 1)]);
        assert_eq!(table.column_names(), vec![RECEIVED.to_string()]);
        assert_eq!(table.values(RECEIVED).unwrap(), vec![Some(1800.0)]);
        assert_eq!(notes.synthetic_year, None);
    }

    #[test]
    fn test_pivot_fills_absent_combinations_with_zero() {
        let df = df!(
            "year" => &["2024", "2024", "2024"],
            "MES" => &["febrero", "enero", "febrero"],
            "DESCRIPCION" => &["Fruta Recibida", "Fruta Proyectada 2024", "fruta proyectada"],
            "T.M." => &["10", "20", "30"]
        )
        .unwrap();

        let (table, _) = normalize(&df, &columns(true), &LabelFolder::default(), 1999).unwrap();

        assert_eq!(table.index(), &[date(2024, 1), date(2024, 2)]);
        assert_eq!(
            table.values(PROJECTED).unwrap(),
            vec![Some(20.0), Some(30.0)]
        );
        assert_eq!(table.values(RECEIVED).unwrap(), vec![Some(0.0), Some(10.0)]);
    }

    #[test]
    fn test_thousands_separator_in_tonnage() {
        let df = df!(
            "year" => &["2023"],
            "MES" => &["setiembre"],
            "DESCRIPCION" => &["Fruta Recibida"],
            "T.M." => &["12,345.5"]
        )
        .unwrap();

        let (table, _) = normalize(&df, &columns(true), &LabelFolder::default(), 1999).unwrap();
        assert_eq!(table.index(), &[date(2023, 9)]);
        assert_eq!(table.values(RECEIVED).unwrap(), vec![Some(12345.5)]);
    }

    #[test]
    fn test_unknown_month_is_terminal() {
        let df = df!(
            "year" => &["2024", "2024", "2024"],
            "MES" => &["enero", "jan", "13"],
            "DESCRIPCION" => &["Fruta Recibida", "Fruta Recibida", "Fruta Recibida"],
            "T.M." => &["1", "2", "3"]
        )
        .unwrap();

        let err = normalize(&df, &columns(true), &LabelFolder::default(), 1999).unwrap_err();

        assert_eq!(err.error_code(), "DOMAIN_MAPPING_ERROR");
        let message = err.to_string();
        assert!(message.contains("'13'"));
        assert!(message.contains("'jan'"));
    }

    #[test]
    fn test_non_numeric_tonnage_is_terminal() {
        let df = df!(
            "year" => &["2024"],
            "MES" => &["enero"],
            "DESCRIPCION" => &["Fruta Recibida"],
            "T.M." => &["mucho"]
        )
        .unwrap();

        let err = normalize(&df, &columns(true), &LabelFolder::default(), 1999).unwrap_err();
        assert!(matches!(err, ProcessingError::DomainMapping(_)));
    }

    #[test]
    fn test_missing_year_column_uses_fallback_and_is_flagged() {
        let df = df!(
            "MES" => &["marzo"],
            "DESCRIPCION" => &["Fruta Recibida"],
            "T.M." => &["5"]
        )
        .unwrap();

        let (table, notes) =
            normalize(&df, &columns(false), &LabelFolder::default(), 2030).unwrap();

        assert_eq!(table.index(), &[date(2030, 3)]);
        assert_eq!(notes.synthetic_year, Some(2030));
        assert!(!notes.notes.is_empty());
    }

    #[test]
    fn test_rows_without_description_are_skipped() {
        let df = df!(
            "year" => &[Some("2024"), None],
            "MES" => &[Some("enero"), None],
            "DESCRIPCION" => &[Some("Fruta Recibida"), None],
            "T.M." => &[Some("5"), None]
        )
        .unwrap();

        let (table, notes) = normalize(&df, &columns(true), &LabelFolder::default(), 1999).unwrap();
        assert_eq!(table.height(), 1);
        assert!(notes.notes.iter().any(|n| n.contains("Skipped 1 row")));
    }

    #[test]
    fn test_year_from_numeric_coercion() {
        assert_eq!(parse_year("2024.0"), Some(2024));
        assert_eq!(parse_year("2024"), Some(2024));
        assert_eq!(parse_year("2024.5"), None);
        assert_eq!(parse_year("dos mil"), None);
    }

    #[test]
    fn test_refold_merges_colliding_labels() {
        let mut buckets: Buckets = BTreeMap::new();
        buckets
            .entry("fruta recibida".to_string())
            .or_default()
            .insert(date(2024, 1), 1.0);
        buckets
            .entry(RECEIVED.to_string())
            .or_default()
            .insert(date(2024, 1), 2.0);

        let (merged, collapsed) = refold_labels(buckets, &LabelFolder::default());

        assert_eq!(collapsed, 1);
        assert_eq!(merged[RECEIVED][&date(2024, 1)], 3.0);
    }
}
