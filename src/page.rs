//! The page record: one scanned image or rasterised PDF page and its
//! position in the extraction lifecycle.
//!
//! ```text
//!            extract                 ok
//!   Idle ─────────────▶ Extracting ─────▶ Complete ─┐
//!    ▲                      │  ▲                    │ re-run
//!    │ reset                │  └────────────────────┤
//!    │                      ▼ err                   │
//!    └──────────────────  Error ◀───────────────────┘
//! ```
//!
//! The per-state data lives inside [`PageState`], so "rows present iff
//! complete", "message present iff error" and "warning only while complete"
//! hold by construction. Rows from an earlier successful run survive a
//! failed re-run as `previous_rows`; they are kept for the user's benefit but
//! are not extracted data and never reach reconciliation or export.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One extracted row: column name → scalar value, in column order.
///
/// Values are JSON scalars (string, number, bool or null).
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Opaque page identifier, unique within a session and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(u64);

impl PageId {
    /// Wrap a raw identifier. Sessions allocate ids themselves; this exists
    /// for callers that round-trip ids through their own storage.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse lifecycle status of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    Idle,
    Extracting,
    Complete,
    Error,
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PageStatus::Idle => "idle",
            PageStatus::Extracting => "extracting",
            PageStatus::Complete => "complete",
            PageStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Lifecycle state together with the data that state owns.
#[derive(Debug, Clone, PartialEq)]
pub enum PageState {
    Idle,
    Extracting {
        previous_rows: Option<Vec<Row>>,
    },
    Complete {
        rows: Vec<Row>,
        consistency_warning: Option<String>,
    },
    Error {
        message: String,
        previous_rows: Option<Vec<Row>>,
    },
}

impl PageState {
    pub fn status(&self) -> PageStatus {
        match self {
            PageState::Idle => PageStatus::Idle,
            PageState::Extracting { .. } => PageStatus::Extracting,
            PageState::Complete { .. } => PageStatus::Complete,
            PageState::Error { .. } => PageStatus::Error,
        }
    }
}

/// Per-page state tracked through the pipeline.
///
/// Cloning is cheap for the image payloads (shared `Arc`s); rows are cloned.
#[derive(Clone)]
pub struct PageRecord {
    id: PageId,
    name: String,
    original_image: Arc<DynamicImage>,
    processed_image: Arc<DynamicImage>,
    state: PageState,
    attempt: u64,
}

impl fmt::Debug for PageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field(
                "original_image",
                &format_args!("{}x{}", self.original_image.width(), self.original_image.height()),
            )
            .field(
                "processed_image",
                &format_args!("{}x{}", self.processed_image.width(), self.processed_image.height()),
            )
            .field("state", &self.state)
            .field("attempt", &self.attempt)
            .finish()
    }
}

impl PageRecord {
    /// A fresh `Idle` record whose processed image is the original.
    pub(crate) fn new(id: PageId, name: impl Into<String>, image: DynamicImage) -> Self {
        let image = Arc::new(image);
        Self {
            id,
            name: name.into(),
            original_image: Arc::clone(&image),
            processed_image: image,
            state: PageState::Idle,
            attempt: 0,
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The image as captured at ingestion. Never changes.
    pub fn original_image(&self) -> &Arc<DynamicImage> {
        &self.original_image
    }

    /// The image that extraction sends to the model.
    pub fn processed_image(&self) -> &Arc<DynamicImage> {
        &self.processed_image
    }

    pub fn state(&self) -> &PageState {
        &self.state
    }

    pub fn status(&self) -> PageStatus {
        self.state.status()
    }

    /// Extracted rows; `Some` iff the page is complete.
    pub fn extracted_data(&self) -> Option<&[Row]> {
        match &self.state {
            PageState::Complete { rows, .. } => Some(rows),
            _ => None,
        }
    }

    /// Error message; `Some` iff the page is in error.
    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            PageState::Error { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn consistency_warning(&self) -> Option<&str> {
        match &self.state {
            PageState::Complete {
                consistency_warning,
                ..
            } => consistency_warning.as_deref(),
            _ => None,
        }
    }

    /// Rows kept from an earlier success while a re-run is pending or failed.
    pub fn previous_rows(&self) -> Option<&[Row]> {
        match &self.state {
            PageState::Extracting { previous_rows } | PageState::Error { previous_rows, .. } => {
                previous_rows.as_deref()
            }
            _ => None,
        }
    }

    /// Number of extraction attempts started on this page.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Complete with rows: participates in reconciliation and export.
    pub fn is_eligible(&self) -> bool {
        matches!(self.state, PageState::Complete { .. })
    }

    // ── Transitions (store-internal) ─────────────────────────────────────

    /// Move to `Extracting`, dropping any warning or error, and return the
    /// attempt number the eventual result must present.
    pub(crate) fn begin_extraction(&mut self) -> u64 {
        let previous_rows = match std::mem::replace(&mut self.state, PageState::Idle) {
            PageState::Idle => None,
            PageState::Extracting { previous_rows } => previous_rows,
            PageState::Complete { rows, .. } => Some(rows),
            PageState::Error { previous_rows, .. } => previous_rows,
        };
        self.state = PageState::Extracting { previous_rows };
        self.attempt += 1;
        self.attempt
    }

    /// Settle an extraction. Returns `false` (and changes nothing) when the
    /// result belongs to a superseded attempt or the page was reset meanwhile.
    pub(crate) fn finish_extraction(&mut self, attempt: u64, result: Result<Vec<Row>, String>) -> bool {
        if attempt != self.attempt {
            return false;
        }
        let previous_rows = match &mut self.state {
            PageState::Extracting { previous_rows } => previous_rows.take(),
            _ => return false,
        };
        self.state = match result {
            Ok(rows) => PageState::Complete {
                rows,
                consistency_warning: None,
            },
            Err(message) => PageState::Error {
                message,
                previous_rows,
            },
        };
        true
    }

    pub(crate) fn reset(&mut self) {
        self.state = PageState::Idle;
    }

    pub(crate) fn set_processed_image(&mut self, image: Arc<DynamicImage>) {
        self.processed_image = image;
    }

    /// Overwrite the rows of a complete page, keeping its warning.
    /// Returns `false` if the page is not complete.
    pub(crate) fn replace_rows(&mut self, new_rows: Vec<Row>) -> bool {
        match &mut self.state {
            PageState::Complete { rows, .. } => {
                *rows = new_rows;
                true
            }
            _ => false,
        }
    }

    /// Write a reconciliation result. Returns `false` if the page is not
    /// complete any more.
    pub(crate) fn apply_reconciled(&mut self, new_rows: Vec<Row>, warning: Option<String>) -> bool {
        match &mut self.state {
            PageState::Complete {
                rows,
                consistency_warning,
            } => {
                *rows = new_rows;
                *consistency_warning = warning;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use serde_json::json;

    fn record() -> PageRecord {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255])));
        PageRecord::new(PageId::from_raw(1), "form.png", img)
    }

    fn row(v: serde_json::Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    fn assert_invariants(r: &PageRecord) {
        assert_eq!(r.extracted_data().is_some(), r.status() == PageStatus::Complete);
        assert_eq!(r.error_message().is_some(), r.status() == PageStatus::Error);
        if r.consistency_warning().is_some() {
            assert_eq!(r.status(), PageStatus::Complete);
        }
    }

    #[test]
    fn new_record_is_idle_and_shares_image() {
        let r = record();
        assert_eq!(r.status(), PageStatus::Idle);
        assert!(Arc::ptr_eq(r.original_image(), r.processed_image()));
        assert_invariants(&r);
    }

    #[test]
    fn successful_extraction_completes() {
        let mut r = record();
        let attempt = r.begin_extraction();
        assert_invariants(&r);
        assert!(r.finish_extraction(attempt, Ok(vec![row(json!({"a": "1"}))])));
        assert_eq!(r.status(), PageStatus::Complete);
        assert_eq!(r.extracted_data().unwrap().len(), 1);
        assert_invariants(&r);
    }

    #[test]
    fn failure_after_success_keeps_previous_rows() {
        let mut r = record();
        let a1 = r.begin_extraction();
        r.finish_extraction(a1, Ok(vec![row(json!({"a": "1"}))]));
        r.apply_reconciled(vec![row(json!({"a": "1"}))], Some("warn".into()));

        let a2 = r.begin_extraction();
        assert_eq!(r.consistency_warning(), None);
        r.finish_extraction(a2, Err("quota".into()));

        assert_eq!(r.status(), PageStatus::Error);
        assert_eq!(r.error_message(), Some("quota"));
        assert_eq!(r.previous_rows().unwrap().len(), 1);
        assert!(r.extracted_data().is_none());
        assert_invariants(&r);
    }

    #[test]
    fn stale_attempt_is_discarded() {
        let mut r = record();
        let first = r.begin_extraction();
        let second = r.begin_extraction();
        assert!(!r.finish_extraction(first, Ok(vec![])));
        assert_eq!(r.status(), PageStatus::Extracting);
        assert!(r.finish_extraction(second, Err("boom".into())));
        assert_eq!(r.status(), PageStatus::Error);
    }

    #[test]
    fn result_after_reset_is_discarded() {
        let mut r = record();
        let attempt = r.begin_extraction();
        r.reset();
        assert!(!r.finish_extraction(attempt, Ok(vec![])));
        assert_eq!(r.status(), PageStatus::Idle);
    }

    #[test]
    fn reset_drops_everything() {
        let mut r = record();
        let a = r.begin_extraction();
        r.finish_extraction(a, Ok(vec![row(json!({"a": 1}))]));
        r.reset();
        assert_eq!(r.state(), &PageState::Idle);
        assert!(r.previous_rows().is_none());
    }

    #[test]
    fn replace_rows_requires_complete() {
        let mut r = record();
        assert!(!r.replace_rows(vec![]));
        let a = r.begin_extraction();
        r.finish_extraction(a, Ok(vec![]));
        assert!(r.replace_rows(vec![row(json!({"x": true}))]));
        assert_eq!(r.extracted_data().unwrap().len(), 1);
    }

    #[test]
    fn status_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&PageStatus::Extracting).unwrap(), "\"extracting\"");
    }
}
