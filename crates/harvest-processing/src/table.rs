//! The canonical date-indexed table produced by normalization.
//!
//! A [`CanonicalTable`] has a strictly increasing date index and one
//! `Float64` column per movement category, plus any derived metric
//! columns. It is immutable: filtering and metric computation build new
//! tables, so a published table can be shared behind an `Arc` and read
//! without locking.

use crate::error::{ProcessingError, Result};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Derived column: adjusted projection minus received tonnage.
pub const DIFFERENCE_COLUMN: &str = "diferencia_ajustada";

/// Derived column: received as a percentage of projected tonnage.
pub const PRECISION_COLUMN: &str = "precision_proy";

/// Columns computed from other columns; never treated as categories.
pub const DERIVED_COLUMNS: [&str; 2] = [DIFFERENCE_COLUMN, PRECISION_COLUMN];

/// Name of the date column in [`CanonicalTable::to_dataframe`] output.
pub const DATE_COLUMN: &str = "fecha";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Whether the index holds real dates or a placeholder sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateAxis {
    /// Dates derived from the file.
    Calendar,
    /// One day per row from a fixed epoch; not real dates.
    Synthetic,
}

/// Inclusive date range of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Row filter applied to a canonical table.
///
/// All criteria are optional and combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFilter {
    /// Keep rows dated on or after this day.
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    /// Keep rows dated on or before this day.
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
    /// Keep rows where this category has a value greater than zero.
    #[serde(default)]
    pub movement_type: Option<String>,
}

impl TableFilter {
    pub fn is_empty(&self) -> bool {
        self.date_from.is_none() && self.date_to.is_none() && self.movement_type.is_none()
    }
}

/// Choices available to a filter UI for the current table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub movement_types: Vec<String>,
    pub date_range: Option<DateRange>,
}

/// Headline figures for a canonical table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSummary {
    pub total_records: usize,
    pub columns: Vec<String>,
    pub date_range: Option<DateRange>,
    /// Sum of every category column.
    pub total_tonnage: f64,
    /// Mean over rows of the per-row category total.
    pub monthly_average: f64,
    pub movement_types: usize,
    pub numeric_columns: usize,
    pub synthetic_dates: bool,
}

/// Date-indexed wide table, one column per movement category.
#[derive(Debug, Clone)]
pub struct CanonicalTable {
    index: Vec<NaiveDate>,
    data: DataFrame,
    date_axis: DateAxis,
}

impl CanonicalTable {
    /// Build a table from an index and a frame of numeric columns.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::Internal`] if the index is not strictly
    /// increasing or its length does not match the frame height; columns
    /// that cannot be cast to `Float64` surface as polars errors.
    pub fn new(index: Vec<NaiveDate>, data: DataFrame, date_axis: DateAxis) -> Result<Self> {
        if data.width() > 0 && data.height() != index.len() {
            return Err(ProcessingError::Internal(format!(
                "index has {} dates but table has {} rows",
                index.len(),
                data.height()
            )));
        }
        if let Some(pair) = index.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(ProcessingError::Internal(format!(
                "date index is not strictly increasing at {} -> {}",
                pair[0], pair[1]
            )));
        }

        let mut data = data;
        let names: Vec<String> = data
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        for name in &names {
            let series = data.column(name)?.as_materialized_series();
            if series.dtype() != &DataType::Float64 {
                let cast = series.cast(&DataType::Float64)?;
                data.replace(name, cast)?;
            }
        }

        Ok(Self {
            index,
            data,
            date_axis,
        })
    }

    /// Build a table from named value vectors, in the given column order.
    pub fn from_columns(
        index: Vec<NaiveDate>,
        columns: Vec<(String, Vec<Option<f64>>)>,
        date_axis: DateAxis,
    ) -> Result<Self> {
        let columns: Vec<Column> = columns
            .into_iter()
            .map(|(name, values)| Series::new(name.as_str().into(), values).into())
            .collect();
        let data = DataFrame::new(columns)?;
        Self::new(index, data, date_axis)
    }

    pub fn index(&self) -> &[NaiveDate] {
        &self.index
    }

    pub fn data(&self) -> &DataFrame {
        &self.data
    }

    pub fn date_axis(&self) -> DateAxis {
        self.date_axis
    }

    pub fn height(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.data
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Movement-category columns, i.e. every column except derived metrics.
    pub fn category_columns(&self) -> Vec<String> {
        self.column_names()
            .into_iter()
            .filter(|name| !DERIVED_COLUMNS.contains(&name.as_str()))
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.data.column(name).is_ok()
    }

    /// Values of one column, missing cells as `None`.
    pub fn values(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let column = self
            .data
            .column(name)
            .map_err(|_| ProcessingError::ColumnNotFound(name.to_string()))?;
        Ok(column.as_materialized_series().f64()?.into_iter().collect())
    }

    /// Return a copy of this table with `name` added or replaced.
    pub fn with_column(&self, name: &str, values: Vec<Option<f64>>) -> Result<Self> {
        if values.len() != self.height() {
            return Err(ProcessingError::Internal(format!(
                "column '{}' has {} values for {} rows",
                name,
                values.len(),
                self.height()
            )));
        }
        let mut data = self.data.clone();
        data.with_column(Series::new(name.into(), values))?;
        Ok(Self {
            index: self.index.clone(),
            data,
            date_axis: self.date_axis,
        })
    }

    pub fn date_range(&self) -> Option<DateRange> {
        match (self.index.first(), self.index.last()) {
            (Some(&start), Some(&end)) => Some(DateRange { start, end }),
            _ => None,
        }
    }

    /// Stable SHA-256 digest of the table content.
    ///
    /// Covers the date axis kind, every date, and every column name and
    /// value bit pattern in order, so equal content always hashes equally
    /// no matter how the table was derived.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();

        hasher.update(match self.date_axis {
            DateAxis::Calendar => b"calendar".as_slice(),
            DateAxis::Synthetic => b"synthetic".as_slice(),
        });
        for date in &self.index {
            hasher.update(date.format(DATE_FORMAT).to_string().as_bytes());
            hasher.update(b"\n");
        }

        for column in self.data.get_columns() {
            hasher.update(b"\x00");
            hasher.update(column.name().as_bytes());
            hasher.update(b"\x00");
            if let Ok(values) = column.as_materialized_series().f64() {
                for value in values.into_iter() {
                    match value {
                        Some(v) => {
                            hasher.update([1u8]);
                            hasher.update(v.to_bits().to_le_bytes());
                        }
                        None => hasher.update([0u8]),
                    }
                }
            }
        }

        hex::encode(hasher.finalize())
    }

    /// Render as a frame with a leading `fecha` column (`YYYY-MM-DD`).
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let dates: Vec<String> = self
            .index
            .iter()
            .map(|d| d.format(DATE_FORMAT).to_string())
            .collect();

        let mut columns: Vec<Column> = Vec::with_capacity(self.data.width() + 1);
        columns.push(Series::new(DATE_COLUMN.into(), dates).into());
        columns.extend(self.data.get_columns().iter().cloned());
        Ok(DataFrame::new(columns)?)
    }

    pub fn summary(&self) -> DataSummary {
        let categories = self.category_columns();

        let mut row_totals = vec![0.0; self.height()];
        for name in &categories {
            if let Ok(values) = self.values(name) {
                for (total, value) in row_totals.iter_mut().zip(values) {
                    *total += value.unwrap_or(0.0);
                }
            }
        }

        let total_tonnage: f64 = row_totals.iter().sum();
        let monthly_average = if row_totals.is_empty() {
            0.0
        } else {
            total_tonnage / row_totals.len() as f64
        };

        DataSummary {
            total_records: self.height(),
            columns: self.column_names(),
            date_range: self.date_range(),
            total_tonnage,
            monthly_average,
            movement_types: categories.len(),
            numeric_columns: self.data.width(),
            synthetic_dates: self.date_axis == DateAxis::Synthetic,
        }
    }

    pub fn filter_options(&self) -> FilterOptions {
        FilterOptions {
            movement_types: self.category_columns(),
            date_range: self.date_range(),
        }
    }

    /// Keep only the rows matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::ColumnNotFound`] if `movement_type` names
    /// a column the table does not have.
    pub fn filter(&self, filter: &TableFilter) -> Result<Self> {
        let mut keep: Vec<bool> = self
            .index
            .iter()
            .map(|date| {
                filter.date_from.is_none_or(|from| *date >= from)
                    && filter.date_to.is_none_or(|to| *date <= to)
            })
            .collect();

        if let Some(movement) = &filter.movement_type {
            let values = self.values(movement)?;
            for (keep_row, value) in keep.iter_mut().zip(values) {
                *keep_row &= value.is_some_and(|v| v > 0.0);
            }
        }

        let index: Vec<NaiveDate> = self
            .index
            .iter()
            .zip(&keep)
            .filter(|(_, keep_row)| **keep_row)
            .map(|(date, _)| *date)
            .collect();
        let mask = BooleanChunked::new("keep".into(), keep);
        let data = self.data.filter(&mask)?;

        Ok(Self {
            index,
            data,
            date_axis: self.date_axis,
        })
    }
}
