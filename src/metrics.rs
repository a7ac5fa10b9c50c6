//! Metrics and observability for acled-sync.
//!
//! Counters are kept locally for [`Metrics::snapshot`] and mirrored to the
//! `metrics` facade, so an installed exporter sees the same numbers.

use std::sync::atomic::{AtomicU64, Ordering};

use std::time::Instant;

/// Metrics collector for sync sessions.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Sessions run
    pub sessions: AtomicU64,
    /// Sessions that returned an error
    pub sessions_failed: AtomicU64,
    /// Pages requested
    pub pages_fetched: AtomicU64,
    /// Page fetches that failed
    pub fetch_failures: AtomicU64,
    /// Records staged as new
    pub records_new: AtomicU64,
    /// Records left out for not fitting the schema
    pub records_rejected: AtomicU64,
    /// Rows appended across all destinations
    pub records_appended: AtomicU64,
    /// Total session duration in milliseconds
    pub session_duration_ms: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished session.
    pub fn record_session(&self, success: bool, duration_ms: u64) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("acled_sync_sessions_total").increment(1);
        if !success {
            self.sessions_failed.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("acled_sync_sessions_failed_total").increment(1);
        }
        self.session_duration_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
        metrics::histogram!("acled_sync_session_duration_ms").record(duration_ms as f64);
    }

    /// Record the pagination result of a session.
    pub fn record_pages(&self, pages: u64, failed: bool, new_records: u64) {
        self.pages_fetched.fetch_add(pages, Ordering::Relaxed);
        metrics::counter!("acled_sync_pages_fetched_total").increment(pages);
        if failed {
            self.fetch_failures.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("acled_sync_fetch_failures_total").increment(1);
        }
        self.records_new.fetch_add(new_records, Ordering::Relaxed);
        metrics::counter!("acled_sync_records_new_total").increment(new_records);
    }

    /// Record rejected records.
    pub fn record_rejected(&self, count: u64) {
        self.records_rejected.fetch_add(count, Ordering::Relaxed);
        metrics::counter!("acled_sync_records_rejected_total").increment(count);
    }

    /// Record appended rows for one destination.
    pub fn record_appended(&self, schema: &str, count: u64) {
        self.records_appended.fetch_add(count, Ordering::Relaxed);
        metrics::counter!("acled_sync_records_appended_total", "schema" => schema.to_string())
            .increment(count);
    }

    /// Get snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions: self.sessions.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            records_new: self.records_new.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            records_appended: self.records_appended.load(Ordering::Relaxed),
            session_duration_ms: self.session_duration_ms.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Sessions run
    pub sessions: u64,
    /// Sessions that returned an error
    pub sessions_failed: u64,
    /// Pages requested
    pub pages_fetched: u64,
    /// Page fetches that failed
    pub fetch_failures: u64,
    /// Records staged as new
    pub records_new: u64,
    /// Records left out for not fitting the schema
    pub records_rejected: u64,
    /// Rows appended across all destinations
    pub records_appended: u64,
    /// Total session duration in milliseconds
    pub session_duration_ms: u64,
}

impl MetricsSnapshot {
    /// Share of sessions that succeeded.
    pub fn success_rate(&self) -> f64 {
        if self.sessions == 0 {
            0.0
        } else {
            (self.sessions - self.sessions_failed) as f64 / self.sessions as f64
        }
    }

    /// New records per page fetched.
    pub fn new_per_page(&self) -> f64 {
        if self.pages_fetched == 0 {
            0.0
        } else {
            self.records_new as f64 / self.pages_fetched as f64
        }
    }
}

/// Timer for measuring operation duration.
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    /// Start a new timer.
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    /// Get elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Stop timer and log duration.
    pub fn stop(self) -> u64 {
        let elapsed = self.elapsed_ms();
        tracing::debug!("{} completed in {}ms", self.label, elapsed);
        elapsed
    }
}
