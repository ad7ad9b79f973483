//! Configuration types for the ingestion pipeline.
//!
//! This module provides configuration options using the builder pattern
//! for flexible and ergonomic session setup.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Encoding labels understood by the format reader.
pub const SUPPORTED_ENCODINGS: [&str; 4] = ["utf-8", "latin-1", "windows-1252", "iso-8859-1"];

/// External CSV-cleaning process used by the preferred repair strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalToolConfig {
    /// Program to execute (looked up on `PATH`).
    pub program: String,

    /// Extra arguments placed before the input file path.
    pub args: Vec<String>,

    /// Seconds to wait before the process is killed.
    pub timeout_secs: u64,
}

impl ExternalToolConfig {
    /// Create a tool configuration with the default timeout.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout_secs: 30,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ExternalToolConfig {
    fn default() -> Self {
        Self::new("csvclean")
    }
}

/// Configuration for ingestion, repair and statistics.
///
/// Use [`IngestConfig::builder()`] to create a new configuration
/// with fluent API.
///
/// # Example
///
/// ```rust,ignore
/// use harvest_processing::config::IngestConfig;
///
/// let config = IngestConfig::builder()
///     .use_external_repair(false)
///     .cache_ttl_secs(60)
///     .build()?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Encodings tried in order when decoding uploaded bytes.
    /// Default: utf-8, latin-1, windows-1252, iso-8859-1
    pub encodings: Vec<String>,

    /// Field separators tried in order for each encoding.
    /// Default: `;`, `,`, tab
    pub separators: Vec<char>,

    /// External cleaning tool for the preferred repair strategy.
    /// Default: `csvclean` with a 30 second timeout
    pub external_tool: Option<ExternalToolConfig>,

    /// Whether to try the external tool before the built-in repair.
    /// Default: true
    pub use_external_repair: bool,

    /// More warnings than this triggers a full repair even without errors.
    /// Default: 3
    pub warning_repair_threshold: usize,

    /// Minimum share of rows a repair must keep before a data-loss warning.
    /// Default: 0.9
    pub min_row_preservation: f64,

    /// Minimum share of columns a repair must keep before a data-loss warning.
    /// Default: 0.8
    pub min_column_preservation: f64,

    /// Lifetime of cached statistics, in seconds. Zero means always stale.
    /// Default: 300
    pub cache_ttl_secs: u64,

    /// First day of the placeholder axis used when no date column exists.
    /// Default: 2024-01-01
    pub synthetic_epoch: NaiveDate,

    /// Trend slopes with a smaller magnitude are classified as stable.
    /// Default: 0.1
    pub trend_stability_threshold: f64,

    /// Multiplier applied to the IQR when computing anomaly bounds.
    /// Default: 1.5
    pub iqr_multiplier: f64,

    /// Columns with fewer observations are skipped by anomaly detection.
    /// Default: 5
    pub min_anomaly_observations: usize,
}

fn default_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default()
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            encodings: SUPPORTED_ENCODINGS.iter().map(|s| s.to_string()).collect(),
            separators: vec![';', ',', '\t'],
            external_tool: Some(ExternalToolConfig::default()),
            use_external_repair: true,
            warning_repair_threshold: 3,
            min_row_preservation: 0.9,
            min_column_preservation: 0.8,
            cache_ttl_secs: 300,
            synthetic_epoch: default_epoch(),
            trend_stability_threshold: 0.1,
            iqr_multiplier: 1.5,
            min_anomaly_observations: 5,
        }
    }
}

impl IngestConfig {
    /// Create a new configuration builder.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder::default()
    }

    /// TTL for cached statistics.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.encodings.is_empty() {
            return Err(ConfigValidationError::EmptyCandidates("encodings".to_string()));
        }

        if let Some(unknown) = self
            .encodings
            .iter()
            .find(|e| !SUPPORTED_ENCODINGS.contains(&e.to_ascii_lowercase().as_str()))
        {
            return Err(ConfigValidationError::UnknownEncoding(unknown.clone()));
        }

        if self.separators.is_empty() {
            return Err(ConfigValidationError::EmptyCandidates("separators".to_string()));
        }

        if let Some(sep) = self.separators.iter().find(|c| !c.is_ascii()) {
            return Err(ConfigValidationError::InvalidSeparator(*sep));
        }

        for (field, value) in [
            ("min_row_preservation", self.min_row_preservation),
            ("min_column_preservation", self.min_column_preservation),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigValidationError::InvalidThreshold {
                    field: field.to_string(),
                    value,
                });
            }
        }

        if self.iqr_multiplier <= 0.0 {
            return Err(ConfigValidationError::InvalidMultiplier(self.iqr_multiplier));
        }

        if let Some(tool) = &self.external_tool
            && tool.timeout_secs == 0
        {
            return Err(ConfigValidationError::InvalidTimeout(tool.program.clone()));
        }

        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid threshold for '{field}': {value} (must be between 0.0 and 1.0)")]
    InvalidThreshold { field: String, value: f64 },

    #[error("No candidate {0} configured")]
    EmptyCandidates(String),

    #[error("Unsupported encoding: {0}")]
    UnknownEncoding(String),

    #[error("Invalid separator {0:?} (must be a single ASCII character)")]
    InvalidSeparator(char),

    #[error("Invalid IQR multiplier: {0} (must be positive)")]
    InvalidMultiplier(f64),

    #[error("External tool '{0}' needs a timeout of at least one second")]
    InvalidTimeout(String),
}

/// Builder for [`IngestConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct IngestConfigBuilder {
    encodings: Option<Vec<String>>,
    separators: Option<Vec<char>>,
    external_tool: Option<Option<ExternalToolConfig>>,
    use_external_repair: Option<bool>,
    warning_repair_threshold: Option<usize>,
    min_row_preservation: Option<f64>,
    min_column_preservation: Option<f64>,
    cache_ttl_secs: Option<u64>,
    synthetic_epoch: Option<NaiveDate>,
    trend_stability_threshold: Option<f64>,
    iqr_multiplier: Option<f64>,
    min_anomaly_observations: Option<usize>,
}

impl IngestConfigBuilder {
    /// Set the candidate encodings, tried in order.
    pub fn encodings<I, S>(mut self, encodings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.encodings = Some(encodings.into_iter().map(Into::into).collect());
        self
    }

    /// Set the candidate separators, tried in order.
    pub fn separators(mut self, separators: impl Into<Vec<char>>) -> Self {
        self.separators = Some(separators.into());
        self
    }

    /// Set (or clear, with `None`) the external repair tool.
    pub fn external_tool(mut self, tool: Option<ExternalToolConfig>) -> Self {
        self.external_tool = Some(tool);
        self
    }

    /// Enable or disable the external repair strategy.
    pub fn use_external_repair(mut self, enable: bool) -> Self {
        self.use_external_repair = Some(enable);
        self
    }

    /// Set how many warnings trigger a full repair.
    pub fn warning_repair_threshold(mut self, count: usize) -> Self {
        self.warning_repair_threshold = Some(count);
        self
    }

    /// Set the minimum row share a repair must preserve (0.0 - 1.0).
    pub fn min_row_preservation(mut self, ratio: f64) -> Self {
        self.min_row_preservation = Some(ratio);
        self
    }

    /// Set the minimum column share a repair must preserve (0.0 - 1.0).
    pub fn min_column_preservation(mut self, ratio: f64) -> Self {
        self.min_column_preservation = Some(ratio);
        self
    }

    /// Set the statistics cache TTL in seconds.
    pub fn cache_ttl_secs(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = Some(secs);
        self
    }

    /// Set the first day of the synthetic date axis.
    pub fn synthetic_epoch(mut self, epoch: NaiveDate) -> Self {
        self.synthetic_epoch = Some(epoch);
        self
    }

    /// Set the slope magnitude below which a trend is stable.
    pub fn trend_stability_threshold(mut self, threshold: f64) -> Self {
        self.trend_stability_threshold = Some(threshold);
        self
    }

    /// Set the IQR multiplier for anomaly bounds.
    pub fn iqr_multiplier(mut self, multiplier: f64) -> Self {
        self.iqr_multiplier = Some(multiplier);
        self
    }

    /// Set the minimum observations for anomaly detection.
    pub fn min_anomaly_observations(mut self, count: usize) -> Self {
        self.min_anomaly_observations = Some(count);
        self
    }

    /// Build the configuration.
    ///
    /// Returns a validated `IngestConfig` or an error if validation fails.
    pub fn build(self) -> Result<IngestConfig, ConfigValidationError> {
        let defaults = IngestConfig::default();
        let config = IngestConfig {
            encodings: self.encodings.unwrap_or(defaults.encodings),
            separators: self.separators.unwrap_or(defaults.separators),
            external_tool: self.external_tool.unwrap_or(defaults.external_tool),
            use_external_repair: self
                .use_external_repair
                .unwrap_or(defaults.use_external_repair),
            warning_repair_threshold: self
                .warning_repair_threshold
                .unwrap_or(defaults.warning_repair_threshold),
            min_row_preservation: self
                .min_row_preservation
                .unwrap_or(defaults.min_row_preservation),
            min_column_preservation: self
                .min_column_preservation
                .unwrap_or(defaults.min_column_preservation),
            cache_ttl_secs: self.cache_ttl_secs.unwrap_or(defaults.cache_ttl_secs),
            synthetic_epoch: self.synthetic_epoch.unwrap_or(defaults.synthetic_epoch),
            trend_stability_threshold: self
                .trend_stability_threshold
                .unwrap_or(defaults.trend_stability_threshold),
            iqr_multiplier: self.iqr_multiplier.unwrap_or(defaults.iqr_multiplier),
            min_anomaly_observations: self
                .min_anomaly_observations
                .unwrap_or(defaults.min_anomaly_observations),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IngestConfig::default();
        assert_eq!(config.encodings[0], "utf-8");
        assert_eq!(config.separators, vec![';', ',', '\t']);
        assert_eq!(config.cache_ttl_secs, 300);
        assert_eq!(config.min_row_preservation, 0.9);
        assert_eq!(config.min_column_preservation, 0.8);
        assert_eq!(config.warning_repair_threshold, 3);
        assert!(config.use_external_repair);
        assert_eq!(
            config.external_tool.as_ref().map(|t| t.program.as_str()),
            Some("csvclean")
        );
    }

    #[test]
    fn test_builder_defaults() {
        let config = IngestConfig::builder().build().unwrap();
        assert_eq!(config.iqr_multiplier, 1.5);
        assert_eq!(config.min_anomaly_observations, 5);
        assert_eq!(
            config.synthetic_epoch,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
    }

    #[test]
    fn test_builder_custom_values() {
        let config = IngestConfig::builder()
            .separators(vec![','])
            .use_external_repair(false)
            .external_tool(None)
            .cache_ttl_secs(0)
            .build()
            .unwrap();

        assert_eq!(config.separators, vec![',']);
        assert!(!config.use_external_repair);
        assert!(config.external_tool.is_none());
        assert_eq!(config.cache_ttl(), Duration::ZERO);
    }

    #[test]
    fn test_validation_invalid_threshold() {
        let result = IngestConfig::builder().min_row_preservation(1.5).build();

        assert!(matches!(
            result.unwrap_err(),
            ConfigValidationError::InvalidThreshold { .. }
        ));
    }

    #[test]
    fn test_validation_unknown_encoding() {
        let result = IngestConfig::builder().encodings(["utf-16"]).build();

        assert!(matches!(
            result.unwrap_err(),
            ConfigValidationError::UnknownEncoding(_)
        ));
    }

    #[test]
    fn test_validation_zero_timeout() {
        let tool = ExternalToolConfig {
            timeout_secs: 0,
            ..ExternalToolConfig::default()
        };
        let result = IngestConfig::builder().external_tool(Some(tool)).build();

        assert!(matches!(
            result.unwrap_err(),
            ConfigValidationError::InvalidTimeout(_)
        ));
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "encodings": ["latin-1"],
            "separators": [";"],
            "external_tool": null,
            "use_external_repair": false,
            "warning_repair_threshold": 5,
            "min_row_preservation": 0.5,
            "min_column_preservation": 0.5,
            "cache_ttl_secs": 10,
            "synthetic_epoch": "2020-01-01",
            "trend_stability_threshold": 0.2,
            "iqr_multiplier": 3.0,
            "min_anomaly_observations": 8
        }"#;

        let config: IngestConfig = serde_json::from_str(json).expect("Should deserialize");

        assert_eq!(config.encodings, vec!["latin-1".to_string()]);
        assert!(config.external_tool.is_none());
        assert_eq!(config.warning_repair_threshold, 5);
        assert_eq!(
            config.synthetic_epoch,
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
        );
        assert!(config.validate().is_ok());
    }
}
