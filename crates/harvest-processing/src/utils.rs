//! Shared utilities for the ingestion pipeline.
//!
//! This module contains common helper functions used across multiple modules
//! to reduce code duplication and ensure consistency.

use once_cell::sync::Lazy;
use polars::prelude::*;
use regex::Regex;
use std::collections::HashMap;

// =============================================================================
// Data Type Utilities
// =============================================================================

/// Check if a DataType is numeric (integer or float).
#[inline]
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

// =============================================================================
// String Parsing Utilities
// =============================================================================

/// Characters commonly used in numeric formatting that should be stripped.
///
/// `,` is always a thousands separator here; `.` is the decimal point.
pub const NUMERIC_FORMAT_CHARS: [char; 6] = [',', '$', '%', '€', '£', ' '];

/// Common error/missing value markers in data.
pub const ERROR_MARKERS: [&str; 9] = [
    "error", "unknown", "n/a", "na", "null", "missing", "none", "#n/a", "nan",
];

/// Values like `1,234` or `-12,345,678.90`.
static THOUSANDS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?\d{1,3}(,\d{3})+(\.\d+)?$").expect("valid regex"));

/// Clean a string for numeric parsing by removing formatting characters.
///
/// # Example
///
/// ```rust,ignore
/// use harvest_processing::utils::clean_numeric_string;
///
/// assert_eq!(clean_numeric_string("1,500.0"), "1500.0");
/// assert_eq!(clean_numeric_string("  42%  "), "42");
/// ```
pub fn clean_numeric_string(s: &str) -> String {
    let mut result = s.trim().to_string();
    for c in NUMERIC_FORMAT_CHARS {
        result = result.replace(c, "");
    }
    result
}

/// Strip thousands separators from a cell that is clearly a grouped number.
///
/// Anything else is returned unchanged, so free text containing commas is
/// never touched.
pub fn strip_thousands_separators(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if THOUSANDS_PATTERN.is_match(trimmed) {
        Some(trimmed.replace(',', ""))
    } else {
        None
    }
}

/// Check if a string is an error/missing value marker.
pub fn is_error_marker(s: &str) -> bool {
    let lower = s.trim().to_ascii_lowercase();
    ERROR_MARKERS.iter().any(|&marker| lower == marker)
}

/// Try to parse a string as a finite numeric value (f64).
///
/// Handles thousands separators, currency symbols and percentages.
pub fn parse_numeric_string(s: &str) -> Option<f64> {
    if is_error_marker(s) {
        return None;
    }
    let cleaned = clean_numeric_string(s);
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Check if a string can be parsed as a numeric value.
pub fn is_numeric_string(s: &str) -> bool {
    parse_numeric_string(s).is_some()
}

// =============================================================================
// Label Utilities
// =============================================================================

/// Replace Spanish accented vowels and `ñ` with their plain ASCII letter.
pub fn strip_accents(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            'Á' | 'À' | 'Ä' => 'A',
            'É' | 'È' | 'Ë' => 'E',
            'Í' | 'Ì' | 'Ï' => 'I',
            'Ó' | 'Ò' | 'Ö' => 'O',
            'Ú' | 'Ù' | 'Ü' => 'U',
            'ñ' => 'n',
            'Ñ' => 'N',
            other => other,
        })
        .collect()
}

/// Lowercase, accent-free, alphanumeric-only form of a column name.
///
/// `"T.M."`, `"t_m_"` and `" TM "` all become `"tm"`.
pub fn column_key(name: &str) -> String {
    strip_accents(name)
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Collapse whitespace and capitalise the first letter of every word.
///
/// Only one uppercase character leads each word; the rest of a multi-char
/// expansion (`ﬁ` -> `FI`) is lowercased so the result is a fixed point.
pub fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    let mut upper = first.to_uppercase();
                    let head = upper.next().unwrap_or(first);
                    std::iter::once(head)
                        .chain(upper.chain(chars).flat_map(|c| c.to_lowercase()))
                        .collect::<String>()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// =============================================================================
// Series Utilities
// =============================================================================

/// Collect a column as optional strings, whatever its dtype.
pub fn series_to_strings(series: &Series) -> PolarsResult<Vec<Option<String>>> {
    let as_str = series.cast(&DataType::String)?;
    Ok(as_str
        .str()?
        .into_iter()
        .map(|v| v.map(|s| s.to_string()))
        .collect())
}

/// Collect a numeric column as optional `f64` values.
pub fn series_to_f64(series: &Series) -> PolarsResult<Vec<Option<f64>>> {
    let as_f64 = series.cast(&DataType::Float64)?;
    Ok(as_f64.f64()?.into_iter().collect())
}

/// Calculate the mode (most frequent value) of a string Series.
///
/// Ties are broken by the value that appears first in the column, so the
/// result is deterministic.
pub fn string_mode(series: &Series) -> Option<String> {
    let values = series_to_strings(series).ok()?;

    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, val) in values.iter().enumerate() {
        if let Some(v) = val.as_deref() {
            let entry = counts.entry(v).or_insert((0, position));
            entry.0 += 1;
        }
    }

    counts
        .into_iter()
        .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
            count_a.cmp(count_b).then(first_b.cmp(first_a))
        })
        .map(|(val, _)| val.to_string())
}

/// Count values in a string Series that can be parsed as numeric.
///
/// Returns `(numeric_count, non_missing_count)`; blank cells and error
/// markers are not counted at all.
pub fn count_numeric_values(series: &Series) -> (usize, usize) {
    let mut numeric_count = 0;
    let mut total_count = 0;

    if let Ok(str_series) = series.str() {
        for val in str_series.into_iter().flatten() {
            let trimmed = val.trim();
            if trimmed.is_empty() || is_error_marker(trimmed) {
                continue;
            }
            total_count += 1;
            if is_numeric_string(trimmed) {
                numeric_count += 1;
            }
        }
    }

    (numeric_count, total_count)
}

/// Number of rows where every column is null.
pub fn count_empty_rows(df: &DataFrame) -> usize {
    (0..df.height())
        .filter(|&row| {
            df.get_columns()
                .iter()
                .all(|col| col.as_materialized_series().get(row).map(|v| v.is_null()).unwrap_or(true))
        })
        .count()
}

// =============================================================================
// Tests
// =============================================================================
