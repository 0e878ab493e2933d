//! Result types returned by the orchestrator, and the serialisable page view
//! used for `--json` output.

use crate::page::{PageId, PageRecord, PageStatus, Row};
use serde::{Deserialize, Serialize};

/// How a single `extract` call ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExtractOutcome {
    /// The page is now `complete` with these rows.
    Completed { rows: usize },
    /// The page is now `error` with this message.
    Failed { message: String },
    /// The result arrived after the page was re-run, reset or deleted, and
    /// was dropped.
    Discarded,
    /// No page with that id existed when the call started.
    Missing,
}

/// Aggregate result of one `extract_all` batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Pages launched (those that were idle or errored).
    pub launched: usize,
    pub completed: usize,
    pub failed: usize,
    /// Results dropped because their page changed mid-flight.
    pub discarded: usize,
    /// Pages flagged by reconciliation.
    pub warnings: usize,
    /// Canonical column set after reconciliation; empty when it was a no-op.
    pub columns: Vec<String>,
    pub mode_row_count: Option<usize>,
    /// Wall-clock time for the whole batch, reconciliation included.
    pub duration_ms: u64,
}

impl BatchReport {
    /// True when every launched page completed.
    pub fn all_completed(&self) -> bool {
        self.completed == self.launched
    }
}

/// Read-only view of one page for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSummary {
    pub id: PageId,
    /// 1-based position in the session.
    pub position: usize,
    pub name: String,
    pub status: PageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistency_warning: Option<String>,
    /// Rows of an earlier successful run, kept while the page is re-run or
    /// after the re-run failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_rows: Option<Vec<Row>>,
}

impl PageSummary {
    pub fn from_record(record: &PageRecord, position: usize) -> Self {
        Self {
            id: record.id(),
            position,
            name: record.name().to_string(),
            status: record.status(),
            rows: record.extracted_data().map(<[Row]>::to_vec),
            error: record.error_message().map(str::to_string),
            consistency_warning: record.consistency_warning().map(str::to_string),
            previous_rows: record.previous_rows().map(<[Row]>::to_vec),
        }
    }

    /// Summaries of every record, positions taken from slice order.
    pub fn from_records(records: &[PageRecord]) -> Vec<Self> {
        records
            .iter()
            .enumerate()
            .map(|(i, r)| Self::from_record(r, i + 1))
            .collect()
    }
}
