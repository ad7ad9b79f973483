//! Domain normalization of repaired raw tables.
//!
//! Two layouts are recognised:
//!
//! - **Specialized**: a description column and a month-name column are
//!   present (plus a tonnage column and, usually, a year column). Rows are
//!   dated `{year}-{month}-01`, labels are folded into canonical movement
//!   categories and tonnage is pivoted into one column per category.
//! - **Generic**: anything else. An optional date column becomes the index
//!   and only numeric columns are kept.
//!
//! Both produce a [`CanonicalTable`] built entirely before it is returned.

mod generic;
pub mod labels;
pub mod months;
mod specialized;

pub use generic::PLACEHOLDER_COLUMN;
pub use labels::{LabelFolder, LabelRule};
pub use specialized::SpecializedColumns;

use crate::config::IngestConfig;
use crate::error::{ProcessingError, Result};
use crate::table::CanonicalTable;
use crate::types::{NormalizationNotes, NormalizerVariant};
use crate::utils::column_key;
use chrono::{Datelike, Local, NaiveDate};
use polars::prelude::*;
use tracing::info;

const DESCRIPTION_KEYS: [&str; 2] = ["descripcion", "description"];
const MONTH_KEYS: [&str; 2] = ["mes", "month"];
const YEAR_KEYS: [&str; 3] = ["year", "ano", "anio"];
const TONNAGE_KEYS: [&str; 4] = ["tm", "toneladas", "tonelaje", "tonnage"];

/// A canonical table together with what the caller must know about it.
#[derive(Debug, Clone)]
pub struct NormalizedTable {
    pub table: CanonicalTable,
    pub notes: NormalizationNotes,
}

/// Selects a layout and normalizes raw tables into canonical form.
#[derive(Debug, Clone)]
pub struct DomainNormalizer {
    folder: LabelFolder,
    synthetic_epoch: NaiveDate,
}

impl DomainNormalizer {
    pub fn new(folder: LabelFolder, synthetic_epoch: NaiveDate) -> Self {
        Self {
            folder,
            synthetic_epoch,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(LabelFolder::default(), config.synthetic_epoch)
    }

    /// Which layout `df` will be normalized with.
    pub fn detect_variant(df: &DataFrame) -> NormalizerVariant {
        if find_column(df, &DESCRIPTION_KEYS).is_some() && find_column(df, &MONTH_KEYS).is_some()
        {
            NormalizerVariant::Specialized
        } else {
            NormalizerVariant::Generic
        }
    }

    /// Normalize a raw (possibly repaired) table.
    ///
    /// # Errors
    ///
    /// - [`ProcessingError::DomainMapping`] for unmappable months, years or
    ///   tonnage, or a specialized layout without a tonnage column.
    /// - [`ProcessingError::InsufficientData`] if no row carries a
    ///   description.
    pub fn normalize(&self, df: &DataFrame) -> Result<NormalizedTable> {
        let variant = Self::detect_variant(df);
        info!("Normalizing {} rows with the {:?} layout", df.height(), variant);

        let (table, notes) = match variant {
            NormalizerVariant::Specialized => {
                let columns = specialized_columns(df)?;
                specialized::normalize(df, &columns, &self.folder, Local::now().year())?
            }
            NormalizerVariant::Generic => generic::normalize(df, self.synthetic_epoch)?,
        };

        Ok(NormalizedTable { table, notes })
    }
}

impl Default for DomainNormalizer {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

/// First column whose normalized name equals one of `keys`.
///
/// Names are compared via [`column_key`], so `"T.M."`, `"T_M_"` and
/// `"tm"` all match `"tm"`.
pub fn find_column(df: &DataFrame, keys: &[&str]) -> Option<String> {
    df.get_column_names()
        .into_iter()
        .find(|name| keys.contains(&column_key(name).as_str()))
        .map(|name| name.to_string())
}

fn specialized_columns(df: &DataFrame) -> Result<SpecializedColumns> {
    let missing = |what: &str| {
        ProcessingError::DomainMapping(format!("specialized layout has no {} column", what))
    };

    Ok(SpecializedColumns {
        description: find_column(df, &DESCRIPTION_KEYS).ok_or_else(|| missing("description"))?,
        month: find_column(df, &MONTH_KEYS).ok_or_else(|| missing("month"))?,
        year: find_column(df, &YEAR_KEYS),
        tonnage: find_column(df, &TONNAGE_KEYS).ok_or_else(|| missing("tonnage"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::DateAxis;

    #[test]
    fn test_detects_specialized_layout() {
        let df = df!(
            "year" => &["2024"],
            "MES" => &["enero"],
            "DESCRIPCION" => &["Fruta Recibida"],
            "T.M." => &["1"]
        )
        .unwrap();
        assert_eq!(
            DomainNormalizer::detect_variant(&df),
            NormalizerVariant::Specialized
        );
    }

    #[test]
    fn test_detects_repaired_column_names() {
        let df = df!(
            "Descripción" => &["Fruta Recibida"],
            "Mes" => &["enero"],
            "T_M_" => &["1"]
        )
        .unwrap();
        assert_eq!(
            DomainNormalizer::detect_variant(&df),
            NormalizerVariant::Specialized
        );
        assert_eq!(find_column(&df, &TONNAGE_KEYS), Some("T_M_".to_string()));
    }

    #[test]
    fn test_generic_without_markers() {
        let df = df!("fecha" => &["2024-01-01"], "x" => &["1"]).unwrap();
        assert_eq!(
            DomainNormalizer::detect_variant(&df),
            NormalizerVariant::Generic
        );
    }

    #[test]
    fn test_missing_tonnage_column_is_domain_error() {
        let df = df!(
            "MES" => &["enero"],
            "DESCRIPCION" => &["Fruta Recibida"]
        )
        .unwrap();
        let err = DomainNormalizer::default().normalize(&df).unwrap_err();
        assert_eq!(err.error_code(), "DOMAIN_MAPPING_ERROR");
    }

    #[test]
    fn test_missing_year_uses_current_year() {
        let df = df!(
            "MES" => &["enero"],
            "DESCRIPCION" => &["Fruta Recibida"],
            "Toneladas" => &["10"]
        )
        .unwrap();

        let normalized = DomainNormalizer::default().normalize(&df).unwrap();

        let year = Local::now().year();
        assert_eq!(normalized.notes.synthetic_year, Some(year));
        assert_eq!(normalized.table.index()[0].year(), year);
        assert_eq!(normalized.table.date_axis(), DateAxis::Calendar);
    }

    #[test]
    fn test_generic_uses_configured_epoch() {
        let epoch = NaiveDate::from_ymd_opt(2000, 6, 15).unwrap();
        let normalizer = DomainNormalizer::new(LabelFolder::default(), epoch);
        let df = df!("texto" => &["a", "b"]).unwrap();

        let normalized = normalizer.normalize(&df).unwrap();
        assert_eq!(normalized.table.index()[0], epoch);
    }
}
