//! Format discovery for uploaded CSV bytes.
//!
//! Exports are produced by hand from spreadsheets, so neither the text
//! encoding nor the field separator is known up front. The reader tries
//! every (encoding, separator) pair in a fixed priority order and keeps the
//! first parse that yields more than one column.
//!
//! All cells are read as strings; type coercion happens later. Grouped
//! numbers such as `1,234.5` are normalized in the same pass so that
//! downstream numeric coercion sees `1234.5`.

use crate::config::IngestConfig;
use crate::error::{ProcessingError, Result};
use crate::types::FormatInfo;
use crate::utils::strip_thousands_separators;
use encoding_rs::{UTF_8, WINDOWS_1252};
use polars::prelude::*;
use std::io::Cursor;
use tracing::{debug, info};

/// Discovers encoding and separator and yields a raw table.
#[derive(Debug, Clone)]
pub struct FormatReader {
    encodings: Vec<String>,
    separators: Vec<char>,
}

impl Default for FormatReader {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

impl FormatReader {
    pub fn new(encodings: Vec<String>, separators: Vec<char>) -> Self {
        Self {
            encodings,
            separators,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(config.encodings.clone(), config.separators.clone())
    }

    /// Parse `bytes` into a raw all-string table.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::Format`] when no candidate pair yields
    /// more than one column.
    pub fn read(&self, bytes: &[u8]) -> Result<(DataFrame, FormatInfo)> {
        for encoding in &self.encodings {
            let Some(text) = decode(bytes, encoding) else {
                debug!("Bytes are not valid {}", encoding);
                continue;
            };

            for &separator in &self.separators {
                if let Some(line) = first_overlong_record(&text, separator) {
                    debug!(
                        "{} / {:?} rejected: record {} has more fields than the header",
                        encoding, separator, line
                    );
                    continue;
                }
                match parse_csv(&text, separator) {
                    Ok(df) if df.width() > 1 => {
                        let (df, thousands_normalized) = normalize_table(df)?;
                        info!(
                            "Read {} rows x {} columns using {} / {:?}",
                            df.height(),
                            df.width(),
                            encoding,
                            separator
                        );
                        let format = FormatInfo {
                            encoding: encoding.clone(),
                            separator,
                            rows: df.height(),
                            columns: df.width(),
                            thousands_normalized,
                        };
                        return Ok((df, format));
                    }
                    Ok(df) => {
                        debug!(
                            "{} / {:?} produced only {} column(s)",
                            encoding,
                            separator,
                            df.width()
                        );
                    }
                    Err(e) => {
                        debug!("{} / {:?} failed to parse: {}", encoding, separator, e);
                    }
                }
            }
        }

        Err(ProcessingError::Format(format!(
            "no combination of encodings {:?} and separators {:?} produced more than one column",
            self.encodings, self.separators
        )))
    }
}

/// Decode bytes with the named encoding, or `None` if they are not valid.
///
/// Latin-1 and ISO-8859-1 are decoded as Windows-1252, which is a superset
/// for every printable character.
fn decode(bytes: &[u8], encoding: &str) -> Option<String> {
    match encoding.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" => {
            let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
            UTF_8
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|text| text.into_owned())
        }
        "latin-1" | "latin1" | "iso-8859-1" | "windows-1252" | "cp1252" => {
            let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
            Some(text.into_owned())
        }
        _ => None,
    }
}

fn parse_csv(text: &str, separator: char) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .with_parse_options(
            CsvParseOptions::default()
                .with_separator(separator as u8)
                .with_quote_char(Some(b'"')),
        )
        .into_reader_with_file_handle(Cursor::new(text.as_bytes().to_vec()))
        .finish()
}

/// 1-based number of the first record with more fields than the header.
///
/// Separators inside double quotes do not count. An unquoted `1,500` in a
/// comma-separated file shows up here instead of being silently cut to `1`.
fn first_overlong_record(text: &str, separator: char) -> Option<usize> {
    let mut header_fields = None;
    let mut fields = 1usize;
    let mut record = 0usize;
    let mut in_quotes = false;
    let mut blank = true;

    for c in text.chars().chain(std::iter::once('\n')) {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                blank = false;
            }
            '\n' if !in_quotes => {
                if !blank {
                    record += 1;
                    match header_fields {
                        None => header_fields = Some(fields),
                        Some(expected) if fields > expected => return Some(record),
                        Some(_) => {}
                    }
                }
                fields = 1;
                blank = true;
            }
            '\r' => {}
            c if c == separator && !in_quotes => {
                fields += 1;
                blank = false;
            }
            _ => blank = false,
        }
    }
    None
}

/// Trim header names and strip thousands separators from grouped numbers.
fn normalize_table(mut df: DataFrame) -> Result<(DataFrame, usize)> {
    let column_names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();

    let mut normalized = 0;

    for col_name in &column_names {
        let trimmed = col_name.trim();
        let mut name = col_name.as_str();
        if trimmed != col_name && !column_names.iter().any(|c| c == trimmed) {
            df.rename(col_name, trimmed.into())?;
            name = trimmed;
        }

        let series = df.column(name)?.as_materialized_series().clone();
        let Ok(str_series) = series.str() else {
            continue;
        };

        let mut changed = 0;
        let values: Vec<Option<String>> = str_series
            .into_iter()
            .map(|opt| {
                opt.map(|val| match strip_thousands_separators(val) {
                    Some(clean) => {
                        changed += 1;
                        clean
                    }
                    None => val.to_string(),
                })
            })
            .collect();

        if changed > 0 {
            df.replace(name, Series::new(name.into(), values))?;
            normalized += changed;
        }
    }

    Ok((df, normalized))
}
