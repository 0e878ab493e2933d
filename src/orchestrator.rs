//! Extraction orchestration: single pages, whole batches, and re-runs after
//! pre-processing.
//!
//! ## Why the transition happens before the future is returned
//!
//! [`Orchestrator::extract`] moves the page to `extracting` (clearing its
//! error and warning) synchronously, then returns the future that performs
//! the remote call. Anything that reads the session after `extract(id)` has
//! been called, even before the future is first polled, sees the page in
//! flight. A batch therefore marks every launched page before the first
//! request leaves, and never double-launches a page.
//!
//! ## Batch
//!
//! ```text
//! extract_all
//!  │
//!  ├─ 1. Select   every idle or errored page
//!  ├─ 2. Launch   all of them at once (no concurrency cap)
//!  ├─ 3. Join     wait until every call has settled
//!  └─ 4. Reconcile  schema union + row-count check over the whole session
//! ```
//!
//! A page failing never aborts the batch; it lands in `error` and the rest
//! carry on.

use crate::config::SessionConfig;
use crate::error::Scan2SheetError;
use crate::output::{BatchReport, ExtractOutcome};
use crate::page::{PageId, Row};
use crate::pipeline::llm::{PageExtractor, VisionExtractor};
use crate::pipeline::preprocess::{apply_filters, PreprocessFilters};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::reconcile::{self, Reconciliation};
use crate::session::SessionStore;
use futures::future::{join_all, BoxFuture};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Drives page extraction against one [`SessionStore`].
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<SessionStore>,
    extractor: Arc<dyn PageExtractor>,
    progress: ProgressCallback,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("pages", &self.store.len())
            .field("status", &self.store.status())
            .field("extractor", &"<dyn PageExtractor>")
            .finish()
    }
}

/// Keeps the session `processing` for the lifetime of a batch.
struct BatchGuard<'a>(&'a SessionStore);

impl<'a> BatchGuard<'a> {
    fn enter(store: &'a SessionStore) -> Self {
        store.batch_started();
        Self(store)
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.0.batch_finished();
    }
}

/// One started extraction. Dropping it unsettled (the future was cancelled)
/// fails the attempt so the page and the in-flight count are released.
struct InFlight<'a> {
    store: &'a SessionStore,
    id: PageId,
    attempt: u64,
    settled: bool,
}

impl InFlight<'_> {
    fn settle(mut self, result: Result<Vec<Row>, String>) -> bool {
        self.settled = true;
        self.store.finish_extraction(self.id, self.attempt, result)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!("Page {} attempt {} cancelled", self.id, self.attempt);
        self.store.finish_extraction(
            self.id,
            self.attempt,
            Err(CANCELLED_MESSAGE.to_string()),
        );
    }
}

/// Error stored on a page whose extraction future was dropped.
pub const CANCELLED_MESSAGE: &str = "extraction cancelled";

impl Orchestrator {
    pub fn new(store: Arc<SessionStore>, extractor: Arc<dyn PageExtractor>) -> Self {
        Self {
            store,
            extractor,
            progress: Arc::new(NoopProgressCallback),
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Build a [`VisionExtractor`] from `config` and attach its progress
    /// callback, if any.
    pub fn from_config(
        store: Arc<SessionStore>,
        config: &SessionConfig,
    ) -> Result<Self, Scan2SheetError> {
        let extractor = VisionExtractor::from_config(config)?;
        let orchestrator = Self::new(store, Arc::new(extractor));
        Ok(match config.progress_callback {
            Some(ref cb) => orchestrator.with_progress(Arc::clone(cb)),
            None => orchestrator,
        })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Extract one page.
    ///
    /// The page is `extracting` by the time this returns; the future
    /// performs the call and settles the page. Re-running a page that is
    /// already in flight is allowed: the newer run wins and the older
    /// result comes back as [`ExtractOutcome::Discarded`].
    ///
    /// Dropping the future before it settles fails the page with
    /// [`CANCELLED_MESSAGE`], so it is picked up by the next batch.
    pub fn extract(&self, id: PageId) -> BoxFuture<'_, ExtractOutcome> {
        let started = self.store.begin_extraction(id).map(|ticket| {
            debug!("Page {} ({}) → extracting, attempt {}", id, ticket.name, ticket.attempt);
            self.progress.on_page_start(id, &ticket.name);
            let guard = InFlight {
                store: &*self.store,
                id,
                attempt: ticket.attempt,
                settled: false,
            };
            (ticket, guard)
        });

        Box::pin(async move {
            let Some((ticket, guard)) = started else {
                debug!("extract: page {} does not exist", id);
                return ExtractOutcome::Missing;
            };

            let result = self
                .extractor
                .extract(&ticket.name, Arc::clone(&ticket.image))
                .await
                .map_err(|e| e.to_string());

            let outcome = match &result {
                Ok(rows) => ExtractOutcome::Completed { rows: rows.len() },
                Err(message) => ExtractOutcome::Failed {
                    message: message.clone(),
                },
            };

            if !guard.settle(result) {
                debug!("Page {} attempt {} superseded; result discarded", id, ticket.attempt);
                return ExtractOutcome::Discarded;
            }

            match &outcome {
                ExtractOutcome::Completed { rows } => {
                    debug!("Page {} ({}) → complete, {} rows", id, ticket.name, rows);
                    self.progress.on_page_complete(id, &ticket.name, *rows);
                }
                ExtractOutcome::Failed { message } => {
                    warn!("Page {} ({}) → error: {}", id, ticket.name, message);
                    self.progress.on_page_error(id, &ticket.name, message);
                }
                ExtractOutcome::Discarded | ExtractOutcome::Missing => {}
            }
            outcome
        })
    }

    /// Extract every idle or errored page concurrently, then reconcile.
    pub async fn extract_all(&self) -> BatchReport {
        let start = Instant::now();
        let _batch = BatchGuard::enter(&self.store);

        let ids = self.store.batch_candidates();
        info!("Extracting {} page(s)", ids.len());
        self.progress.on_batch_start(ids.len());

        let launched: Vec<_> = ids.iter().map(|&id| self.extract(id)).collect();
        let outcomes = join_all(launched).await;

        let mut report = BatchReport {
            launched: ids.len(),
            ..Default::default()
        };
        for outcome in &outcomes {
            match outcome {
                ExtractOutcome::Completed { .. } => report.completed += 1,
                ExtractOutcome::Failed { .. } => report.failed += 1,
                ExtractOutcome::Discarded | ExtractOutcome::Missing => report.discarded += 1,
            }
        }

        let plan = self.reconcile();
        report.warnings = plan.warning_count();
        report.columns = plan.columns;
        report.mode_row_count = plan.mode_row_count;
        report.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Batch done: {}/{} complete, {} failed, {} discarded, {} warning(s), {}ms",
            report.completed,
            report.launched,
            report.failed,
            report.discarded,
            report.warnings,
            report.duration_ms
        );
        self.progress
            .on_batch_complete(report.launched, report.completed, report.warnings);
        report
    }

    /// Run a reconciliation pass over the current session and commit it.
    ///
    /// Returns the plan; pages that changed between the snapshot and the
    /// commit were left alone.
    pub fn reconcile(&self) -> Reconciliation {
        let plan = reconcile::reconcile(&self.store.pages());
        if !plan.is_noop() {
            let applied = self.store.commit_reconciliation(&plan);
            debug!("Reconciliation applied to {}/{} page(s)", applied, plan.updates.len());
        }
        plan
    }

    /// Re-derive a page's processed image from its original with `filters`,
    /// then re-extract it.
    pub async fn apply_preprocessing(
        &self,
        id: PageId,
        filters: PreprocessFilters,
    ) -> Result<ExtractOutcome, Scan2SheetError> {
        filters.validate()?;
        let original = self
            .store
            .get(id)
            .map(|page| Arc::clone(page.original_image()))
            .ok_or(Scan2SheetError::PageNotFound { id: id.get() })?;

        let processed = tokio::task::spawn_blocking(move || apply_filters(&original, &filters))
            .await
            .map_err(|e| Scan2SheetError::Internal(format!("filter task panicked: {e}")))?;

        if !self.store.set_processed_image(id, Arc::new(processed)) {
            debug!("Page {} deleted during pre-processing", id);
            return Ok(ExtractOutcome::Missing);
        }
        debug!("Page {} pre-processed with {:?}", id, filters);
        Ok(self.extract(id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PageError;
    use crate::page::PageStatus;
    use crate::session::SessionStatus;
    use image::DynamicImage;
    use serde_json::json;

    /// Answers by page name: names containing "hang" never answer, names
    /// containing "fail" error, others get `rows` copies of one row.
    struct NameExtractor {
        rows: usize,
    }

    impl PageExtractor for NameExtractor {
        fn extract<'a>(
            &'a self,
            page_name: &'a str,
            _image: Arc<DynamicImage>,
        ) -> BoxFuture<'a, Result<Vec<Row>, PageError>> {
            Box::pin(async move {
                if page_name.contains("hang") {
                    futures::future::pending::<()>().await;
                }
                if page_name.contains("fail") {
                    return Err(PageError::LlmFailed {
                        detail: "HTTP 500".to_string(),
                    });
                }
                let row = json!({ "Page": page_name }).as_object().cloned().unwrap();
                Ok(vec![row; self.rows])
            })
        }
    }

    fn setup(names: &[&str], rows: usize) -> (Orchestrator, Vec<PageId>) {
        let store = Arc::new(SessionStore::new());
        let ids = store.append_pages(
            names
                .iter()
                .map(|n| (n.to_string(), DynamicImage::new_rgba8(2, 2)))
                .collect(),
        );
        (Orchestrator::new(store, Arc::new(NameExtractor { rows })), ids)
    }

    #[test]
    fn extract_marks_page_before_first_poll() {
        let (orch, ids) = setup(&["a"], 1);
        let fut = orch.extract(ids[0]);
        assert_eq!(orch.store().get(ids[0]).unwrap().status(), PageStatus::Extracting);
        assert_eq!(orch.store().status(), SessionStatus::Processing);
        drop(fut);

        let page = orch.store().get(ids[0]).unwrap();
        assert_eq!(page.status(), PageStatus::Error);
        assert_eq!(page.error_message(), Some(CANCELLED_MESSAGE));
        assert_eq!(orch.store().status(), SessionStatus::Ready);
    }

    #[tokio::test]
    async fn timed_out_extraction_releases_the_page() {
        let (orch, ids) = setup(&["hang", "b"], 1);
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(20), orch.extract(ids[0])).await;
        assert!(waited.is_err());

        assert_eq!(orch.store().status(), SessionStatus::Ready);
        assert_eq!(orch.store().get(ids[0]).unwrap().status(), PageStatus::Error);
        assert_eq!(orch.store().batch_candidates(), ids);
    }

    #[tokio::test]
    async fn settled_extraction_is_not_cancelled_on_drop() {
        let (orch, ids) = setup(&["a"], 2);
        assert_eq!(orch.extract(ids[0]).await, ExtractOutcome::Completed { rows: 2 });
        let page = orch.store().get(ids[0]).unwrap();
        assert_eq!(page.status(), PageStatus::Complete);
        assert_eq!(page.extracted_data().map(|rows| rows.len()), Some(2));
    }

    #[tokio::test]
    async fn extract_success_and_failure() {
        let (orch, ids) = setup(&["good", "fail"], 2);
        assert_eq!(orch.extract(ids[0]).await, ExtractOutcome::Completed { rows: 2 });
        let failed = orch.extract(ids[1]).await;
        assert!(matches!(failed, ExtractOutcome::Failed { ref message } if message.contains("HTTP 500")));
        let page = orch.store().get(ids[1]).unwrap();
        assert_eq!(page.status(), PageStatus::Error);
        assert!(page.error_message().is_some());
    }

    #[tokio::test]
    async fn extract_missing_page() {
        let (orch, _) = setup(&[], 1);
        assert_eq!(orch.extract(PageId::from_raw(99)).await, ExtractOutcome::Missing);
        assert_eq!(orch.store().status(), SessionStatus::Ready);
    }

    #[tokio::test]
    async fn extract_all_reports_counts() {
        let (orch, _) = setup(&["a", "b", "fail"], 3);
        let report = orch.extract_all().await;
        assert_eq!(report.launched, 3);
        assert_eq!(report.completed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.mode_row_count, Some(3));
        assert_eq!(report.columns, vec!["Page".to_string()]);
        assert_eq!(orch.store().status(), SessionStatus::Ready);
    }

    #[tokio::test]
    async fn invalid_filters_are_rejected_before_touching_the_page() {
        let (orch, ids) = setup(&["a"], 1);
        let filters = PreprocessFilters {
            contrast: 999,
            ..Default::default()
        };
        assert!(orch.apply_preprocessing(ids[0], filters).await.is_err());
        assert_eq!(orch.store().get(ids[0]).unwrap().status(), PageStatus::Idle);
    }

    #[tokio::test]
    async fn preprocessing_unknown_page_fails() {
        let (orch, _) = setup(&[], 1);
        let err = orch
            .apply_preprocessing(PageId::from_raw(5), PreprocessFilters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Scan2SheetError::PageNotFound { id: 5 }));
    }
}
