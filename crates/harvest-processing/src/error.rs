//! Error types for the tonnage ingestion pipeline.
//!
//! Every failure a caller can see is one of the variants below. Validation
//! defects are accumulated before an error is raised, so a single error
//! always carries the complete list of problems found (and, for repair
//! failures, everything that was attempted).
//!
//! Errors are serializable so a UI layer can render them as structured
//! messages instead of raw traces.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// The main error type for ingestion and statistics.
#[derive(Error, Debug)]
pub enum ProcessingError {
    /// The bytes could not be parsed as a table with any candidate
    /// (encoding, separator) pair. Terminal; no repair is attempted.
    #[error("Unreadable file: {0}")]
    Format(String),

    /// Blocking structural defects were found.
    #[error("Validation failed with {} error(s): {}", .errors.len(), .errors.join("; "))]
    Validation {
        errors: Vec<String>,
        warnings: Vec<String>,
    },

    /// Repair was attempted but the repaired table still fails validation.
    #[error("Repair failed, {} error(s) remain: {}", .errors.len(), .errors.join("; "))]
    RepairFailed {
        errors: Vec<String>,
        repair_log: Vec<String>,
    },

    /// Domain values could not be mapped (e.g. unknown month names).
    #[error("Domain mapping failed: {0}")]
    DomainMapping(String),

    /// Too few columns or rows for the requested computation.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Column was not found in the dataset.
    #[error("Column '{0}' not found in dataset")]
    ColumnNotFound(String),

    /// No canonical table has been ingested yet.
    #[error("No data loaded")]
    NoDataLoaded,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error (e.g., unexpected table shape).
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ProcessingError>,
    },
}

impl ProcessingError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ProcessingError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Get error code for frontend handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Format(_) => "FORMAT_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::RepairFailed { .. } => "REPAIR_FAILED",
            Self::DomainMapping(_) => "DOMAIN_MAPPING_ERROR",
            Self::InsufficientData(_) => "INSUFFICIENT_DATA",
            Self::ColumnNotFound(_) => "COLUMN_NOT_FOUND",
            Self::NoDataLoaded => "NO_DATA_LOADED",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Whether an automatic repair could still change the outcome.
    ///
    /// Only structural validation failures qualify; format and domain
    /// errors are terminal, and a failed repair has already been tried.
    pub fn repair_possible(&self) -> bool {
        match self {
            Self::Validation { .. } => true,
            Self::WithContext { source, .. } => source.repair_possible(),
            _ => false,
        }
    }

    /// Check if this error is an expected, recoverable condition.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::InsufficientData(_) | Self::NoDataLoaded | Self::InvalidConfig(_) => true,
            Self::WithContext { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }

    /// Validation errors carried by this error, if any.
    pub fn errors(&self) -> &[String] {
        match self {
            Self::Validation { errors, .. } | Self::RepairFailed { errors, .. } => errors,
            Self::WithContext { source, .. } => source.errors(),
            _ => &[],
        }
    }

    /// Repair steps attempted before this error was raised, if any.
    pub fn repair_log(&self) -> &[String] {
        match self {
            Self::RepairFailed { repair_log, .. } => repair_log,
            Self::WithContext { source, .. } => source.repair_log(),
            _ => &[],
        }
    }
}

/// Errors are serialized as `{code, message, repair_possible, errors,
/// warnings, repair_log}` so the caller always sees the full picture.
impl Serialize for ProcessingError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let warnings: &[String] = match self {
            Self::Validation { warnings, .. } => warnings,
            _ => &[],
        };

        let mut state = serializer.serialize_struct("ProcessingError", 6)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.serialize_field("repair_possible", &self.repair_possible())?;
        state.serialize_field("errors", self.errors())?;
        state.serialize_field("warnings", warnings)?;
        state.serialize_field("repair_log", self.repair_log())?;
        state.end()
    }
}

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, ProcessingError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| ProcessingError::Polars(e).with_context(context))
    }
}
