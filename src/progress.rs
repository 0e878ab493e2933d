//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::SessionConfigBuilder::progress_callback`] to receive
//! events as the orchestrator moves pages through extraction.
//!
//! # Why callbacks instead of channels?
//!
//! A callback is the least-invasive integration point: callers can forward
//! events to a terminal progress bar, a UI event loop, or a log sink without
//! the library knowing how the host application communicates. The trait is
//! `Send + Sync` because a batch fans out and pages settle concurrently.
//!
//! # Example
//!
//! ```rust
//! use edgequake_scan2sheet::{ExtractionProgressCallback, PageId, SessionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     rows: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, _id: PageId, name: &str, row_count: usize) {
//!         self.rows.fetch_add(row_count, Ordering::SeqCst);
//!         eprintln!("{name}: {row_count} rows");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { rows: AtomicUsize::new(0) });
//!
//! let config = SessionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::page::PageId;
use std::sync::Arc;

/// Called by the orchestrator as pages move through extraction.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// During a batch, `on_page_start`, `on_page_complete`, and `on_page_error`
/// may be called concurrently from different worker threads.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once when a batch launches, before any page starts.
    ///
    /// # Arguments
    /// * `page_count` — number of pages launched (idle or errored pages only)
    fn on_batch_start(&self, page_count: usize) {
        let _ = page_count;
    }

    /// Called after a page has been moved to `extracting`, just before the
    /// extraction service is called.
    fn on_page_start(&self, id: PageId, name: &str) {
        let _ = (id, name);
    }

    /// Called when a page's extraction succeeded.
    ///
    /// # Arguments
    /// * `row_count` — number of rows extracted
    fn on_page_complete(&self, id: PageId, name: &str, row_count: usize) {
        let _ = (id, name, row_count);
    }

    /// Called when a page's extraction failed.
    ///
    /// # Arguments
    /// * `error` — human-readable error, as stored on the page
    fn on_page_error(&self, id: PageId, name: &str, error: &str) {
        let _ = (id, name, error);
    }

    /// Called once after every launched page has settled and reconciliation
    /// has been committed.
    ///
    /// # Arguments
    /// * `launched`  — pages launched by the batch
    /// * `succeeded` — launched pages that completed
    /// * `warnings`  — pages that carry a consistency warning afterwards
    fn on_batch_complete(&self, launched: usize, succeeded: usize, warnings: usize) {
        let _ = (launched, succeeded, warnings);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::SessionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        warnings: AtomicUsize,
    }

    impl ExtractionProgressCallback for TrackingCallback {
        fn on_page_start(&self, _id: PageId, _name: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _id: PageId, _name: &str, _row_count: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_error(&self, _id: PageId, _name: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _launched: usize, _succeeded: usize, warnings: usize) {
            self.warnings.store(warnings, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_page_start(PageId::from_raw(1), "a.png");
        cb.on_page_complete(PageId::from_raw(1), "a.png", 4);
        cb.on_page_error(PageId::from_raw(2), "b.png", "boom");
        cb.on_batch_complete(2, 1, 0);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_page_start(PageId::from_raw(1), "scan.pdf - Page 1");
        tracker.on_page_complete(PageId::from_raw(1), "scan.pdf - Page 1", 5);
        tracker.on_page_start(PageId::from_raw(2), "scan.pdf - Page 2");
        tracker.on_page_error(PageId::from_raw(2), "scan.pdf - Page 2", "timeout");
        tracker.on_batch_complete(2, 1, 1);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.warnings.load(Ordering::SeqCst), 1);
    }
}
