use serde::{Deserialize, Serialize};

/// Outcome of structural validation.
///
/// `errors` block normalization; `warnings` describe quality issues that
/// can be processed as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Columns where every cell is missing.
    pub empty_columns: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Whether the table should go through a full repair.
    ///
    /// Errors always require it; otherwise more than `warning_threshold`
    /// warnings, or any fully-empty column, does.
    pub fn requires_repair(&self, warning_threshold: usize) -> bool {
        !self.errors.is_empty()
            || self.warnings.len() > warning_threshold
            || !self.empty_columns.is_empty()
    }
}

/// Encoding and separator that produced the raw table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatInfo {
    pub encoding: String,
    pub separator: char,
    pub rows: usize,
    pub columns: usize,
    /// Cells whose thousands separators were stripped while reading.
    pub thousands_normalized: usize,
}

/// What a repair did and whether it kept enough of the data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairReport {
    /// Name of the strategy whose output was kept.
    pub strategy: String,
    /// One entry per applied transformation, in order.
    pub repair_log: Vec<String>,
    pub rows_before: usize,
    pub rows_after: usize,
    pub columns_before: usize,
    pub columns_after: usize,
    /// Validation of the repaired table.
    pub validation_after: ValidationResult,
    /// Set when the repair dropped more rows or columns than allowed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_loss_warning: Option<String>,
}

/// Which normalizer variant produced the canonical table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizerVariant {
    /// Year + month name + description + tonnage layout.
    Specialized,
    /// Any other layout with an optional date column.
    Generic,
}

/// Facts about normalization the caller must be told about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationNotes {
    pub variant: NormalizerVariant,
    /// Year substituted because the file had no year column.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthetic_year: Option<i32>,
    /// The date axis is a placeholder sequence, not real dates.
    pub synthetic_dates: bool,
    /// A placeholder numeric column was created because none existed.
    pub synthetic_values: bool,
    /// Free-form notes (dropped rows, merged labels, ...).
    pub notes: Vec<String>,
}

impl NormalizationNotes {
    pub fn new(variant: NormalizerVariant) -> Self {
        Self {
            variant,
            synthetic_year: None,
            synthetic_dates: false,
            synthetic_values: false,
            notes: Vec::new(),
        }
    }
}

/// Everything the caller learns from a successful ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub format: FormatInfo,
    pub validation: ValidationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair: Option<RepairReport>,
    pub normalization: NormalizationNotes,
    pub rows: usize,
    pub categories: Vec<String>,
    pub duration_ms: u64,
}
