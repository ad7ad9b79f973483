//! Harvest Tonnage Processing Library
//!
//! Ingestion, repair and statistics for monthly fruit-movement tonnage
//! exports, built with Rust and Polars.
//!
//! # Overview
//!
//! Uploaded CSV bytes go through a fixed pipeline:
//!
//! - **Format discovery**: encoding and separator are detected by trying
//!   candidate pairs in priority order ([`FormatReader`])
//! - **Structural validation**: blocking errors and quality warnings are
//!   accumulated in one pass ([`StructuralValidator`])
//! - **Repair**: an external cleaning tool, then a built-in fallback, run as
//!   an explicit strategy chain ([`AutoRepairer`])
//! - **Normalization**: rows are dated, movement labels folded into
//!   canonical categories and pivoted into a date-indexed table
//!   ([`DomainNormalizer`], [`CanonicalTable`])
//! - **Derived metrics**: adjusted difference and projection precision
//! - **Statistics**: correlations, trends, descriptive statistics and IQR
//!   anomalies, cached by table content ([`StatisticsEngine`], [`CacheStore`])
//! - **Alerts**: threshold and anomaly rules checked against the latest row
//!   ([`AlertRule`])
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use harvest_processing::{HarvestSession, IngestConfig, TableFilter};
//!
//! let session = HarvestSession::new(IngestConfig::default())?;
//!
//! let bytes = std::fs::read("movimientos.csv")?;
//! let outcome = session.ingest(&bytes)?;
//! println!("{} rows, categories: {:?}", outcome.report.rows, outcome.report.categories);
//!
//! let trends = session.compute_statistic("trends")?;
//! println!("{}", serde_json::to_string_pretty(&trends)?);
//!
//! session.apply_filter(&TableFilter {
//!     movement_type: Some("Fruta Recibida".to_string()),
//!     ..Default::default()
//! })?;
//! let summary = session.data_summary()?;
//! session.clear_filters()?;
//! ```
//!
//! # Configuration
//!
//! Use [`IngestConfig`] to customize ingestion and statistics:
//!
//! ```rust,ignore
//! use harvest_processing::{ExternalToolConfig, IngestConfig};
//!
//! let config = IngestConfig::builder()
//!     .separators(vec![';', ','])
//!     .external_tool(Some(ExternalToolConfig::new("csvclean")))
//!     .warning_repair_threshold(5)
//!     .cache_ttl_secs(600)
//!     .build()?;
//! ```
//!
//! # Errors
//!
//! Every failure is a [`ProcessingError`] with a stable
//! [`error_code`](ProcessingError::error_code). Validation and repair
//! errors carry the complete list of findings and attempted repairs, and
//! all errors serialize for display in a UI.

pub mod alerts;
pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod normalizer;
pub mod reader;
pub mod repair;
pub mod session;
pub mod statistics;
pub mod table;
pub mod types;
pub mod utils;
pub mod validation;

// Re-exports for convenient access
pub use alerts::{AlertKind, AlertRule, ThresholdCondition, TriggeredAlert};
pub use cache::{CacheEntryStats, CacheStats, CacheStore};
pub use config::{ConfigValidationError, ExternalToolConfig, IngestConfig, IngestConfigBuilder};
pub use error::{ProcessingError, Result as ProcessingResult, ResultExt};
pub use metrics::add_derived_metrics;
pub use normalizer::{DomainNormalizer, LabelFolder, LabelRule, NormalizedTable};
pub use reader::FormatReader;
pub use repair::{AutoRepairer, ExternalToolRepair, FallbackRepair, RepairAttempt, RepairStrategy};
pub use session::{HarvestSession, IngestOutcome};
pub use statistics::{StatisticOperation, StatisticsEngine};
pub use table::{
    CanonicalTable, DataSummary, DateAxis, DateRange, FilterOptions, TableFilter,
};
pub use types::{
    FormatInfo, IngestReport, NormalizationNotes, NormalizerVariant, RepairReport,
    ValidationResult,
};
pub use validation::StructuralValidator;
