//! Paginated dedup engine.
//!
//! Walks the source page by page, keeps the records whose identifiers are not
//! already stored, and stops on the first empty page, the first failed fetch,
//! or the end of the configured page range. Nothing is written here; the
//! caller persists the returned batch.

use crate::error::{Error, Result};
use crate::source::{EventRecord, EventSource};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// How the stored-identifier baseline evolves during one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupPolicy {
    /// Identifiers staged from earlier pages join the baseline, so each new
    /// identifier is staged once per session.
    #[default]
    Session,
    /// Every page is compared against the stored identifiers only; an
    /// identifier repeated on two pages is staged twice.
    Page,
}

impl fmt::Display for DedupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupPolicy::Session => write!(f, "session"),
            DedupPolicy::Page => write!(f, "page"),
        }
    }
}

impl std::str::FromStr for DedupPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "session" => Ok(DedupPolicy::Session),
            "page" => Ok(DedupPolicy::Page),
            other => Err(Error::validation(format!("unknown dedup policy '{}'", other))),
        }
    }
}

/// Inclusive page range; `end: None` runs until the source is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    /// First page, at least 1
    pub start: u32,
    /// Last page, at least `start`
    pub end: Option<u32>,
}

impl PageRange {
    /// Range starting at `start` with no upper bound.
    pub fn starting_at(start: u32) -> Self {
        Self { start, end: None }
    }

    /// Check the bounds.
    pub fn validate(&self) -> Result<()> {
        if self.start < 1 {
            return Err(Error::validation("page_start must be at least 1"));
        }
        if let Some(end) = self.end {
            if end < self.start {
                return Err(Error::validation(format!(
                    "page_end {} is before page_start {}",
                    end, self.start
                )));
            }
        }
        Ok(())
    }
}

impl Default for PageRange {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

/// Why pagination stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Termination {
    /// The source returned an empty page
    Exhausted {
        /// The empty page
        page: u32,
    },
    /// A page could not be fetched
    FetchFailed {
        /// The failed page
        page: u32,
        /// Failure description
        error: String,
    },
    /// The configured last page was processed
    RangeEnd {
        /// Last page processed
        last_page: u32,
    },
}

impl Termination {
    /// Whether the run ended on a fetch failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, Termination::FetchFailed { .. })
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Exhausted { page } => write!(f, "source exhausted at page {}", page),
            Termination::FetchFailed { page, error } => {
                write!(f, "fetch of page {} failed: {}", page, error)
            }
            Termination::RangeEnd { last_page } => write!(f, "reached last page {}", last_page),
        }
    }
}

/// New records accumulated during one session.
#[derive(Debug, Clone, Default)]
pub struct PendingBatch {
    records: Vec<EventRecord>,
}

impl PendingBatch {
    /// Empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append records from one page.
    pub fn extend(&mut self, records: impl IntoIterator<Item = EventRecord>) {
        self.records.extend(records);
    }

    /// Staged records.
    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Take the staged records.
    pub fn into_records(self) -> Vec<EventRecord> {
        self.records
    }

    /// Number of staged records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing was staged.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Identifiers in staging order (duplicates included).
    pub fn ids(&self, id_column: &str) -> Vec<String> {
        self.records.iter().filter_map(|r| r.id(id_column)).collect()
    }
}

/// Result of one pagination run.
#[derive(Debug, Clone)]
pub struct EngineOutcome {
    /// Staged new records
    pub batch: PendingBatch,
    /// Pages requested, including the terminating one
    pub pages_fetched: u32,
    /// Page cursor when the loop stopped: the empty or failed page, or the
    /// page after the last one in range
    pub cursor: u32,
    /// Why the loop stopped
    pub termination: Termination,
}

/// Progress callback.
pub type ProgressCallback = Arc<dyn Fn(SyncProgress) + Send + Sync>;

/// Progress update emitted after each page.
#[derive(Debug, Clone)]
pub struct SyncProgress {
    /// Current phase
    pub phase: SyncPhase,
    /// Page just processed
    pub page: u32,
    /// New records on that page
    pub new_records: usize,
    /// New records staged so far
    pub total_new: usize,
}

/// Session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Reading stored identifiers
    Loading,
    /// Fetching pages
    Fetching,
    /// Appending to the database
    Appending,
    /// Refreshing derived columns and statistics
    Refreshing,
    /// Completed
    Completed,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Loading => write!(f, "loading"),
            SyncPhase::Fetching => write!(f, "fetching"),
            SyncPhase::Appending => write!(f, "appending"),
            SyncPhase::Refreshing => write!(f, "refreshing"),
            SyncPhase::Completed => write!(f, "completed"),
        }
    }
}

/// Records on `records` whose identifier is not in `baseline`.
///
/// Records without an identifier are dropped, and an identifier repeated on
/// the same page keeps only its first record.
pub fn select_new_records(
    records: Vec<EventRecord>,
    baseline: &HashSet<String>,
    id_column: &str,
) -> Vec<EventRecord> {
    let mut seen_on_page = HashSet::new();
    records
        .into_iter()
        .filter(|record| match record.id(id_column) {
            Some(id) => !baseline.contains(&id) && seen_on_page.insert(id),
            None => {
                warn!("Skipping record without '{}'", id_column);
                false
            }
        })
        .collect()
}

/// Pagination driver over an [`EventSource`].
pub struct SyncEngine<'a, S: EventSource + ?Sized> {
    source: &'a S,
    page_size: u32,
    id_column: String,
    policy: DedupPolicy,
    progress: Option<ProgressCallback>,
}

impl<'a, S: EventSource + ?Sized> SyncEngine<'a, S> {
    /// Create an engine.
    pub fn new(source: &'a S, page_size: u32, id_column: impl Into<String>) -> Self {
        Self {
            source,
            page_size,
            id_column: id_column.into(),
            policy: DedupPolicy::default(),
            progress: None,
        }
    }

    /// Set dedup policy.
    pub fn with_policy(mut self, policy: DedupPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set progress callback.
    pub fn with_progress(mut self, callback: Option<ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Fetch pages in `range` and stage records not in `existing`.
    ///
    /// A fetch failure ends the run and is reported in
    /// [`EngineOutcome::termination`]; records staged before it are kept.
    /// Only an invalid range is returned as an error.
    #[instrument(skip(self, existing), fields(existing = existing.len(), policy = %self.policy))]
    pub async fn collect(&self, existing: &HashSet<String>, range: PageRange) -> Result<EngineOutcome> {
        range.validate()?;
        if self.page_size == 0 {
            return Err(Error::validation("page size must be at least 1"));
        }

        let mut baseline = match self.policy {
            DedupPolicy::Session => Some(existing.clone()),
            DedupPolicy::Page => None,
        };
        let mut batch = PendingBatch::new();
        let mut pages_fetched = 0;
        let mut p = range.start;

        let termination = loop {
            let fetched = self.source.fetch_page(p, self.page_size).await;
            pages_fetched += 1;

            let page = match fetched {
                Ok(page) if page.is_empty() => {
                    info!("End of pages at {} ({} new records staged)", p, batch.len());
                    break Termination::Exhausted { page: p };
                }
                Ok(page) => page,
                Err(e) => {
                    warn!("Fetch of page {} failed, stopping: {}", p, e);
                    break Termination::FetchFailed {
                        page: p,
                        error: e.to_string(),
                    };
                }
            };

            let fetched_count = page.len();
            let new = select_new_records(
                page.records,
                baseline.as_ref().unwrap_or(existing),
                &self.id_column,
            );
            let new_count = new.len();

            if let Some(baseline) = baseline.as_mut() {
                baseline.extend(new.iter().filter_map(|r| r.id(&self.id_column)));
            }
            batch.extend(new);

            debug!(
                "{} of {} records on page {} not in database",
                new_count, fetched_count, p
            );
            info!("{} total new records after page {}", batch.len(), p);
            self.report_progress(SyncProgress {
                phase: SyncPhase::Fetching,
                page: p,
                new_records: new_count,
                total_new: batch.len(),
            });

            p += 1;
            if range.end.is_some_and(|end| p > end) {
                break Termination::RangeEnd { last_page: p - 1 };
            }
        };

        Ok(EngineOutcome {
            batch,
            pages_fetched,
            cursor: p,
            termination,
        })
    }

    fn report_progress(&self, progress: SyncProgress) {
        if let Some(ref callback) = self.progress {
            callback(progress);
        }
    }
}
