//! Sync session: check the table, collect new records, append, refresh.

use crate::config::SyncConfig;
use crate::engine::{
    PageRange, ProgressCallback, SyncEngine, SyncPhase, SyncProgress, Termination,
};
use crate::error::{Error, Result};
use crate::metrics::{Metrics, Timer};
use crate::postgres::{Database, PostgresClient, TableStats};
use crate::schema::{EventSchema, PreparedBatch};
use crate::source::{AcledClient, EventSource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Outcome of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Target table missing; nothing fetched
    TableMissing,
    /// No new records to append
    NoNewRecords,
    /// New records appended
    Appended,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::TableMissing => write!(f, "table missing"),
            SyncStatus::NoNewRecords => write!(f, "no new records"),
            SyncStatus::Appended => write!(f, "appended"),
        }
    }
}

/// Per-destination append result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationResult {
    /// Schema written to
    pub schema: String,
    /// Table written to
    pub table: String,
    /// Whether the append succeeded
    pub success: bool,
    /// Rows appended
    pub appended: u64,
    /// Error message if failed
    pub error: Option<String>,
}

/// Session report.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// Session identifier
    pub run_id: Uuid,
    /// Outcome
    pub status: SyncStatus,
    /// Pages requested
    pub pages_fetched: u32,
    /// Why pagination stopped, if it ran
    pub termination: Option<Termination>,
    /// New records staged
    pub new_records: usize,
    /// Staged records left out for not fitting the schema
    pub rejected_records: usize,
    /// Primary destination first, then mirrors in configured order
    pub destinations: Vec<DestinationResult>,
    /// Rows whose derived date was recomputed in the primary table
    pub date_rows_refreshed: Option<u64>,
    /// Table summary after the session
    pub stats: Option<TableStats>,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Timestamp when the session completed
    pub completed_at: String,
}

impl SyncReport {
    fn new(run_id: Uuid, status: SyncStatus) -> Self {
        Self {
            run_id,
            status,
            pages_fetched: 0,
            termination: None,
            new_records: 0,
            rejected_records: 0,
            destinations: Vec::new(),
            date_rows_refreshed: None,
            stats: None,
            duration_ms: 0,
            completed_at: String::new(),
        }
    }

    /// Rows appended across destinations.
    pub fn total_appended(&self) -> u64 {
        self.destinations.iter().map(|d| d.appended).sum()
    }

    /// Whether every destination was written and refreshed without error.
    pub fn all_destinations_success(&self) -> bool {
        self.destinations
            .iter()
            .all(|d| d.success && d.error.is_none())
    }

    /// Whether pagination stopped on a failed fetch.
    pub fn fetch_failed(&self) -> bool {
        self.termination.as_ref().is_some_and(Termination::is_failure)
    }
}

/// One end-to-end sync against a database and an event source.
pub struct SyncSession<D: Database, S: EventSource> {
    config: SyncConfig,
    db: D,
    source: S,
    schema: EventSchema,
    metrics: Arc<Metrics>,
    progress_callback: Option<ProgressCallback>,
    cached_stats: Option<TableStats>,
}

impl SyncSession<PostgresClient, AcledClient> {
    /// Connect to PostgreSQL, build the API client, and load table stats.
    #[instrument(skip(config))]
    pub async fn connect(config: SyncConfig) -> Result<Self> {
        info!("Initializing sync session...");

        let db = PostgresClient::connect(config.postgres.clone()).await?;
        let source = AcledClient::new(config.api.clone())?;

        let mut session = Self::new(db, source, config)?;
        session.refresh_stats().await?;
        Ok(session)
    }
}

impl<D: Database, S: EventSource> SyncSession<D, S> {
    /// Create a session over existing handles.
    pub fn new(db: D, source: S, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let schema = EventSchema::acled().with_id_column(config.target.id_column.clone());
        schema.validate()?;

        Ok(Self {
            config,
            db,
            source,
            schema,
            metrics: Arc::new(Metrics::new()),
            progress_callback: None,
            cached_stats: None,
        })
    }

    /// Replace the column descriptor.
    pub fn with_schema(mut self, schema: EventSchema) -> Result<Self> {
        schema.validate()?;
        if schema.id_column != self.config.target.id_column {
            return Err(Error::schema(format!(
                "schema identifier '{}' does not match configured '{}'",
                schema.id_column, self.config.target.id_column
            )));
        }
        self.schema = schema;
        Ok(self)
    }

    /// Share a metrics collector.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(SyncProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback) as ProgressCallback);
        self
    }

    /// Session configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Metrics collector.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Database handle.
    pub fn database(&self) -> &D {
        &self.db
    }

    /// Event source handle.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Table summary from the last refresh.
    pub fn cached_stats(&self) -> Option<TableStats> {
        self.cached_stats
    }

    /// Reload table summary; `None` when the table does not exist.
    pub async fn refresh_stats(&mut self) -> Result<Option<TableStats>> {
        let target = &self.config.target;
        if !self.db.table_exists(&target.schema, &target.table).await? {
            info!("No event table found at {}", target.qualified());
            return Ok(None);
        }

        let stats = self
            .db
            .table_stats(&target.schema, &target.table, &self.schema.id_column)
            .await?;
        info!("{} in {}", stats, target.qualified());
        self.cached_stats = Some(stats);
        Ok(Some(stats))
    }

    /// Run the configured page range.
    pub async fn run(&mut self) -> Result<SyncReport> {
        let range = self.config.sync.page_range();
        self.run_range(range).await
    }

    /// Run an explicit page range.
    #[instrument(skip(self), fields(table = %self.config.target.qualified()))]
    pub async fn run_range(&mut self, range: PageRange) -> Result<SyncReport> {
        let timer = Timer::start("sync session");
        let run_id = Uuid::new_v4();

        let result = self.run_inner(run_id, range).await;
        let duration_ms = timer.stop();
        self.metrics.record_session(result.is_ok(), duration_ms);

        match result {
            Ok(mut report) => {
                report.duration_ms = duration_ms;
                report.completed_at = chrono::Utc::now().to_rfc3339();
                Ok(report)
            }
            Err(e) => {
                error!(
                    code = e.code(),
                    retryable = e.is_retryable(),
                    "Sync session {} aborted: {}",
                    run_id,
                    e
                );
                Err(e)
            }
        }
    }

    async fn run_inner(&mut self, run_id: Uuid, range: PageRange) -> Result<SyncReport> {
        let schema_name = self.config.target.schema.clone();
        let table = self.config.target.table.clone();
        let id_column = self.schema.id_column.clone();

        self.report_phase(SyncPhase::Loading, range.start, 0);
        if !self.db.table_exists(&schema_name, &table).await? {
            warn!("No event table found at {}.{}, nothing to sync against", schema_name, table);
            return Ok(SyncReport::new(run_id, SyncStatus::TableMissing));
        }

        let existing = self.db.existing_ids(&schema_name, &table, &id_column).await?;
        info!("{} identifiers found in {}.{}", existing.len(), schema_name, table);

        let outcome = SyncEngine::new(&self.source, self.config.api.page_size, id_column.as_str())
            .with_policy(self.config.sync.dedup)
            .with_progress(self.progress_callback.clone())
            .collect(&existing, range)
            .await?;

        self.metrics.record_pages(
            outcome.pages_fetched as u64,
            outcome.termination.is_failure(),
            outcome.batch.len() as u64,
        );

        let mut report = SyncReport::new(run_id, SyncStatus::NoNewRecords);
        report.pages_fetched = outcome.pages_fetched;
        report.termination = Some(outcome.termination.clone());
        report.new_records = outcome.batch.len();
        report.stats = self.cached_stats;

        if outcome.batch.is_empty() {
            info!("No new records found in {} pages", outcome.pages_fetched);
            self.report_phase(SyncPhase::Completed, outcome.cursor, 0);
            return Ok(report);
        }

        let (prepared, rejected) = self.schema.prepare_batch(outcome.batch.records());
        for r in &rejected {
            let errors: Vec<String> = r.errors.iter().map(|e| e.to_string()).collect();
            warn!(
                "Rejecting record {}: {}",
                r.id.as_deref().unwrap_or("<no id>"),
                errors.join("; ")
            );
        }
        report.rejected_records = rejected.len();
        self.metrics.record_rejected(rejected.len() as u64);

        if prepared.is_empty() {
            warn!("All {} new records were rejected", outcome.batch.len());
            self.report_phase(SyncPhase::Completed, outcome.cursor, 0);
            return Ok(report);
        }

        info!(
            "{} new records found in {} pages, updating {}.{}",
            prepared.len(),
            outcome.pages_fetched,
            schema_name,
            table
        );
        self.report_phase(SyncPhase::Appending, outcome.cursor, prepared.len());

        let appended = self
            .db
            .bulk_append(&schema_name, &table, &prepared, self.config.sync.batch_size)
            .await?;
        self.metrics.record_appended(&schema_name, appended);
        report.destinations.push(DestinationResult {
            schema: schema_name.clone(),
            table: table.clone(),
            success: true,
            appended,
            error: None,
        });

        let mirrors = self.config.target.mirror_schemas.clone();
        if !mirrors.is_empty() {
            info!("Updating {} additional schemas", mirrors.len());
        }
        for mirror in &mirrors {
            let result = self.append_mirror(mirror, &table, &prepared).await;
            report.destinations.push(result);
        }

        self.report_phase(SyncPhase::Refreshing, outcome.cursor, prepared.len());
        if self.config.sync.refresh_date_column {
            let refreshed = self.db.refresh_date_column(&schema_name, &table).await?;
            debug!("Date field updated on {} rows", refreshed);
            report.date_rows_refreshed = Some(refreshed);
        }

        let stats = self.db.table_stats(&schema_name, &table, &id_column).await?;
        info!("{} in {}.{}", stats, schema_name, table);
        self.cached_stats = Some(stats);
        report.stats = Some(stats);
        report.status = SyncStatus::Appended;

        self.report_phase(SyncPhase::Completed, outcome.cursor, prepared.len());
        info!("Update of {}.{} complete", schema_name, table);
        Ok(report)
    }

    /// Append to one mirror schema; failures are recorded, not returned.
    async fn append_mirror(
        &self,
        mirror: &str,
        table: &str,
        prepared: &PreparedBatch,
    ) -> DestinationResult {
        info!("Updating {}.{}", mirror, table);

        let mut result = DestinationResult {
            schema: mirror.to_string(),
            table: table.to_string(),
            success: false,
            appended: 0,
            error: None,
        };

        let appended = match self.db.table_exists(mirror, table).await {
            Ok(true) => {
                self.db
                    .bulk_append(mirror, table, prepared, self.config.sync.batch_size)
                    .await
            }
            Ok(false) => Err(Error::schema_absent(mirror, table)),
            Err(e) => Err(e),
        };

        match appended {
            Ok(count) => {
                self.metrics.record_appended(mirror, count);
                result.appended = count;
                result.success = true;
            }
            Err(e) => {
                warn!("Append to {}.{} failed: {}", mirror, table, e);
                result.error = Some(e.to_string());
                return result;
            }
        }

        if self.config.sync.refresh_date_column {
            if let Err(e) = self.db.refresh_date_column(mirror, table).await {
                warn!("Date refresh on {}.{} failed: {}", mirror, table, e);
                result.error = Some(e.to_string());
            }
        }

        result
    }

    fn report_phase(&self, phase: SyncPhase, page: u32, total_new: usize) {
        if let Some(ref callback) = self.progress_callback {
            callback(SyncProgress {
                phase,
                page,
                new_records: 0,
                total_new,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn destination(schema: &str, success: bool, appended: u64) -> DestinationResult {
        DestinationResult {
            schema: schema.to_string(),
            table: "acled".to_string(),
            success,
            appended,
            error: if success { None } else { Some("boom".into()) },
        }
    }

    #[test]
    fn test_sync_status_display() {
        assert_eq!(SyncStatus::TableMissing.to_string(), "table missing");
        assert_eq!(SyncStatus::Appended.to_string(), "appended");
    }

    #[test]
    fn test_report_totals() {
        let mut report = SyncReport::new(Uuid::new_v4(), SyncStatus::Appended);
        report.destinations = vec![
            destination("public", true, 100),
            destination("archive", true, 100),
            destination("staging", false, 0),
        ];
        report.termination = Some(Termination::FetchFailed {
            page: 4,
            error: "timeout".into(),
        });

        assert_eq!(report.total_appended(), 200);
        assert!(!report.all_destinations_success());
        assert!(report.fetch_failed());
    }

    #[test]
    fn test_refresh_error_fails_destinations() {
        let mut report = SyncReport::new(Uuid::new_v4(), SyncStatus::Appended);
        let mut archive = destination("archive", true, 10);
        archive.error = Some("date refresh failed".into());
        report.destinations = vec![destination("public", true, 10), archive];

        assert_eq!(report.total_appended(), 20);
        assert!(!report.all_destinations_success());
    }

    #[test]
    fn test_report_serializes_status() {
        let report = SyncReport::new(Uuid::nil(), SyncStatus::NoNewRecords);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "no_new_records");
        assert_eq!(json["run_id"], "00000000-0000-0000-0000-000000000000");
    }
}
