//! Process-wide ingestion state and the calls a UI layer makes against it.
//!
//! A [`HarvestSession`] owns the pipeline components, the statistics cache
//! and two canonical tables: the one most recently ingested (`original`)
//! and the one currently in view (`current`, possibly filtered). Both are
//! held as `Arc`s behind a single `RwLock` so a new table is built
//! completely off to the side and published in one swap; readers see
//! either the old or the new table, never a partial one.

use crate::alerts::{self, AlertRule, TriggeredAlert};
use crate::cache::{CacheStats, CacheStore};
use crate::config::IngestConfig;
use crate::error::{ProcessingError, Result};
use crate::metrics::add_derived_metrics;
use crate::normalizer::DomainNormalizer;
use crate::reader::FormatReader;
use crate::repair::AutoRepairer;
use crate::statistics::{StatisticOperation, StatisticsEngine};
use crate::table::{CanonicalTable, DataSummary, FilterOptions, TableFilter};
use crate::types::{IngestReport, NormalizerVariant, ValidationResult};
use crate::validation::StructuralValidator;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct SessionTables {
    current: Option<Arc<CanonicalTable>>,
    original: Option<Arc<CanonicalTable>>,
}

/// A successfully ingested table and how it was obtained.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub table: Arc<CanonicalTable>,
    pub report: IngestReport,
}

/// Shared ingestion session.
///
/// # Thread Safety
///
/// All methods take `&self`; the session can be wrapped in an `Arc` and
/// used from any number of request handlers. Concurrent ingests are
/// serialized only at the final swap, so the last one to finish wins.
pub struct HarvestSession {
    config: IngestConfig,
    reader: FormatReader,
    repairer: AutoRepairer,
    normalizer: DomainNormalizer,
    statistics: StatisticsEngine,
    cache: Arc<CacheStore>,
    tables: RwLock<SessionTables>,
}

static_assertions::assert_impl_all!(HarvestSession: Send, Sync);

impl HarvestSession {
    /// Create a session from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::InvalidConfig`] if `config` fails
    /// validation.
    pub fn new(config: IngestConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| ProcessingError::InvalidConfig(e.to_string()))?;

        let cache = Arc::new(CacheStore::new(config.cache_ttl()));
        Ok(Self {
            reader: FormatReader::from_config(&config),
            repairer: AutoRepairer::from_config(&config),
            normalizer: DomainNormalizer::from_config(&config),
            statistics: StatisticsEngine::new(Arc::clone(&cache), &config),
            cache,
            tables: RwLock::new(SessionTables::default()),
            config,
        })
    }

    /// Replace the repair chain, e.g. with custom strategies.
    pub fn with_repairer(mut self, repairer: AutoRepairer) -> Self {
        self.repairer = repairer;
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Read and validate `bytes` without repairing or publishing anything.
    ///
    /// # Errors
    ///
    /// [`ProcessingError::Format`] if the bytes cannot be read, and
    /// [`ProcessingError::Validation`] carrying every error and warning if
    /// the table has blocking defects.
    pub fn check(&self, bytes: &[u8]) -> Result<ValidationResult> {
        let (raw, _) = self.reader.read(bytes)?;
        let validation = StructuralValidator::validate(&raw);
        if !validation.is_valid() {
            return Err(ProcessingError::Validation {
                errors: validation.errors,
                warnings: validation.warnings,
            });
        }
        Ok(validation)
    }

    /// Run the full pipeline on an uploaded file and publish the result.
    ///
    /// The new table becomes both the original and the current table, and
    /// the statistics cache is cleared.
    ///
    /// # Errors
    ///
    /// - [`ProcessingError::Format`] if no (encoding, separator) pair works.
    /// - [`ProcessingError::RepairFailed`] if the table had blocking defects
    ///   and no repair strategy fixed them.
    /// - [`ProcessingError::DomainMapping`] or
    ///   [`ProcessingError::InsufficientData`] from normalization.
    ///
    /// On error the previously published tables are left untouched.
    pub fn ingest(&self, bytes: &[u8]) -> Result<IngestOutcome> {
        let started = Instant::now();

        let (raw, format) = self.reader.read(bytes)?;
        let validation = StructuralValidator::validate(&raw);
        info!(
            "Validation: {} error(s), {} warning(s)",
            validation.errors.len(),
            validation.warnings.len()
        );

        let (prepared, repair) = if validation.requires_repair(self.config.warning_repair_threshold)
        {
            match self.repairer.repair(&raw, &validation) {
                Ok((repaired, report)) => (repaired, Some(report)),
                Err(e) if validation.is_valid() => {
                    warn!("Repair failed on a valid table, continuing unrepaired: {}", e);
                    (raw, None)
                }
                Err(e) => return Err(e),
            }
        } else {
            (raw, None)
        };

        let normalized = self.normalizer.normalize(&prepared)?;
        let table = match normalized.notes.variant {
            NormalizerVariant::Specialized => add_derived_metrics(&normalized.table)?,
            NormalizerVariant::Generic => normalized.table,
        };

        let report = IngestReport {
            format,
            validation,
            repair,
            normalization: normalized.notes,
            rows: table.height(),
            categories: table.category_columns(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        let table = Arc::new(table);
        self.publish(Arc::clone(&table), true);
        info!(
            "Ingested {} row(s) across {} categor(ies) in {} ms",
            report.rows,
            report.categories.len(),
            report.duration_ms
        );

        Ok(IngestOutcome { table, report })
    }

    /// The table currently in view, if any.
    pub fn canonical_table(&self) -> Option<Arc<CanonicalTable>> {
        self.tables.read().current.clone()
    }

    /// The most recently ingested, unfiltered table, if any.
    pub fn original_table(&self) -> Option<Arc<CanonicalTable>> {
        self.tables.read().original.clone()
    }

    /// Make `table` the current table, keeping the original as it is.
    pub fn replace_canonical_table(&self, table: CanonicalTable) {
        self.publish(Arc::new(table), false);
    }

    /// Make the original table current again.
    ///
    /// # Errors
    ///
    /// [`ProcessingError::NoDataLoaded`] if nothing has been ingested.
    pub fn restore_original(&self) -> Result<Arc<CanonicalTable>> {
        let mut tables = self.tables.write();
        let original = tables.original.clone().ok_or(ProcessingError::NoDataLoaded)?;
        tables.current = Some(Arc::clone(&original));
        info!("Restored original table ({} rows)", original.height());
        Ok(original)
    }

    /// Filter the original table and make the result current.
    ///
    /// Filters always start from the original, so applying a second filter
    /// replaces the first rather than narrowing it.
    pub fn apply_filter(&self, filter: &TableFilter) -> Result<Arc<CanonicalTable>> {
        let original = self.original_table().ok_or(ProcessingError::NoDataLoaded)?;
        if filter.is_empty() {
            return self.restore_original();
        }

        let filtered = Arc::new(original.filter(filter)?);
        info!(
            "Filter kept {} of {} row(s)",
            filtered.height(),
            original.height()
        );
        self.publish(Arc::clone(&filtered), false);
        Ok(filtered)
    }

    pub fn clear_filters(&self) -> Result<Arc<CanonicalTable>> {
        self.restore_original()
    }

    pub fn filter_options(&self) -> Result<FilterOptions> {
        Ok(self.current()?.filter_options())
    }

    pub fn data_summary(&self) -> Result<DataSummary> {
        Ok(self.current()?.summary())
    }

    /// Compute a statistic over the current table by name.
    ///
    /// # Errors
    ///
    /// [`ProcessingError::InvalidConfig`] for an unknown name and
    /// [`ProcessingError::NoDataLoaded`] before the first ingest.
    pub fn compute_statistic(&self, name: &str) -> Result<serde_json::Value> {
        let operation: StatisticOperation = name.parse()?;
        self.compute(operation)
    }

    pub fn compute(&self, operation: StatisticOperation) -> Result<serde_json::Value> {
        let table = self.current()?;
        self.statistics.compute(operation, &table)
    }

    /// Evaluate `rules` against the last row of the current table.
    ///
    /// Nothing fires before the first ingest.
    pub fn check_alerts(&self, rules: &[AlertRule]) -> Result<Vec<TriggeredAlert>> {
        match self.canonical_table() {
            Some(table) => alerts::check_alerts(&table, rules, &self.statistics),
            None => Ok(Vec::new()),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        info!("Statistics cache cleared");
    }

    fn current(&self) -> Result<Arc<CanonicalTable>> {
        self.canonical_table().ok_or(ProcessingError::NoDataLoaded)
    }

    fn publish(&self, table: Arc<CanonicalTable>, as_original: bool) {
        {
            let mut tables = self.tables.write();
            if as_original {
                tables.original = Some(Arc::clone(&table));
            }
            tables.current = Some(table);
        }
        if as_original {
            self.cache.clear();
        }
        info!("Published new current table");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::labels::{PROJECTED, RECEIVED};
    use crate::table::{DIFFERENCE_COLUMN, PRECISION_COLUMN};
    use chrono::NaiveDate;
    use std::thread;

    fn session() -> HarvestSession {
        let config = IngestConfig::builder()
            .use_external_repair(false)
            .build()
            .unwrap();
        HarvestSession::new(config).unwrap()
    }

    const SPECIALIZED: &str = "year;MES;DESCRIPCION;T.M.\n\
        2024;enero;1 Fruta Recibida;100\n\
        2024;enero;2 Fruta Proyectada;200\n\
        2024;febrero;1 Fruta Recibida;150\n\
        2024;febrero;2 Fruta Proyectada;0\n\
        2024;marzo;1 Fruta Recibida;0\n\
        2024;marzo;2 Fruta Proyectada;100\n";

    #[test]
    fn test_nothing_loaded() {
        let session = session();
        assert!(session.canonical_table().is_none());
        assert!(matches!(
            session.data_summary(),
            Err(ProcessingError::NoDataLoaded)
        ));
        assert!(matches!(
            session.restore_original(),
            Err(ProcessingError::NoDataLoaded)
        ));
        assert!(matches!(
            session.compute_statistic("trends"),
            Err(ProcessingError::NoDataLoaded)
        ));
    }

    #[test]
    fn test_ingest_specialized_adds_metrics() {
        let session = session();
        let outcome = session.ingest(SPECIALIZED.as_bytes()).unwrap();

        let table = &outcome.table;
        assert_eq!(table.height(), 3);
        assert!(table.has_column(DIFFERENCE_COLUMN));
        assert_eq!(
            table.values(PRECISION_COLUMN).unwrap(),
            vec![Some(50.0), None, Some(0.0)]
        );
        assert_eq!(
            outcome.report.categories,
            vec![PROJECTED.to_string(), RECEIVED.to_string()]
        );
        assert_eq!(outcome.report.normalization.variant, NormalizerVariant::Specialized);
    }

    #[test]
    fn test_alerts_follow_current_table() {
        use crate::alerts::ThresholdCondition;

        let session = session();
        let rules = [AlertRule::threshold(1, RECEIVED, ThresholdCondition::Less, 50.0)];
        assert!(session.check_alerts(&rules).unwrap().is_empty());

        session.ingest(SPECIALIZED.as_bytes()).unwrap();
        let alerts = session.check_alerts(&rules).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].current_value, 0.0);

        session
            .apply_filter(&TableFilter {
                date_to: NaiveDate::from_ymd_opt(2024, 2, 1),
                ..Default::default()
            })
            .unwrap();
        assert!(session.check_alerts(&rules).unwrap().is_empty());
    }

    #[test]
    fn test_filter_then_restore() {
        let session = session();
        session.ingest(SPECIALIZED.as_bytes()).unwrap();

        let filtered = session
            .apply_filter(&TableFilter {
                movement_type: Some(RECEIVED.to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(filtered.height(), 2);
        assert_eq!(session.canonical_table().unwrap().height(), 2);
        assert_eq!(session.original_table().unwrap().height(), 3);

        let restored = session.clear_filters().unwrap();
        assert_eq!(restored.height(), 3);
        assert_eq!(session.canonical_table().unwrap().height(), 3);
    }

    #[test]
    fn test_date_filter_and_options() {
        let session = session();
        session.ingest(SPECIALIZED.as_bytes()).unwrap();

        let options = session.filter_options().unwrap();
        assert_eq!(options.movement_types.len(), 2);

        let filtered = session
            .apply_filter(&TableFilter {
                date_from: NaiveDate::from_ymd_opt(2024, 2, 1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(filtered.height(), 2);
    }

    #[test]
    fn test_unknown_movement_type_leaves_current_table() {
        let session = session();
        session.ingest(SPECIALIZED.as_bytes()).unwrap();

        let err = session
            .apply_filter(&TableFilter {
                movement_type: Some("Fruta Perdida".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.error_code(), "COLUMN_NOT_FOUND");
        assert_eq!(session.canonical_table().unwrap().height(), 3);
    }

    #[test]
    fn test_failed_ingest_keeps_previous_table() {
        let session = session();
        session.ingest(SPECIALIZED.as_bytes()).unwrap();

        let bad = "year;MES;DESCRIPCION;T.M.\n2024;brumario;1 Fruta Recibida;1\n";
        let err = session.ingest(bad.as_bytes()).unwrap_err();

        assert_eq!(err.error_code(), "DOMAIN_MAPPING_ERROR");
        assert_eq!(session.canonical_table().unwrap().height(), 3);
    }

    #[test]
    fn test_ingest_clears_cache() {
        let session = session();
        session.ingest(SPECIALIZED.as_bytes()).unwrap();
        session.compute_statistic("descriptive").unwrap();
        assert_eq!(session.cache_stats().total_entries, 1);

        session.ingest(SPECIALIZED.as_bytes()).unwrap();
        assert_eq!(session.cache_stats().total_entries, 0);
    }

    #[test]
    fn test_unknown_statistic_name() {
        let session = session();
        session.ingest(SPECIALIZED.as_bytes()).unwrap();
        let err = session.compute_statistic("regression").unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_check_reports_validation_errors() {
        let session = session();
        let err = session.check(b"a;b\n").unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(err.repair_possible());
    }

    #[test]
    fn test_concurrent_readers_see_whole_tables() {
        let session = Arc::new(session());
        session.ingest(SPECIALIZED.as_bytes()).unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let session = Arc::clone(&session);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let table = session.canonical_table().unwrap();
                        assert_eq!(table.index().len(), table.height());
                        assert!(table.height() == 3 || table.height() == 2);
                    }
                })
            })
            .collect();

        for _ in 0..10 {
            session
                .apply_filter(&TableFilter {
                    movement_type: Some(RECEIVED.to_string()),
                    ..Default::default()
                })
                .unwrap();
            session.clear_filters().unwrap();
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
