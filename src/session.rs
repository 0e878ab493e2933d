//! The page record store: the single source of truth for a session.
//!
//! Every read returns an owned snapshot and every write is one short critical
//! section on a `std::sync::Mutex`. The lock is never held across an
//! `.await`, so a page's transitions are strictly ordered while different
//! pages' extractions interleave freely on the runtime.
//!
//! Writes addressed to a page that no longer exists are no-ops: an
//! extraction that resolves after the user deleted its page must not bring
//! the page back.

use crate::error::Scan2SheetError;
use crate::page::{PageId, PageRecord, PageStatus, Row};
use crate::reconcile::Reconciliation;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Whether any extraction or batch is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Ready,
    Processing,
}

#[derive(Debug, Default)]
struct SessionState {
    pages: Vec<PageRecord>,
    selected: Option<PageId>,
    next_id: u64,
    in_flight: usize,
    batches: usize,
}

impl SessionState {
    fn find_mut(&mut self, id: PageId) -> Option<&mut PageRecord> {
        self.pages.iter_mut().find(|p| p.id() == id)
    }
}

/// In-memory store of page records for one session.
#[derive(Debug, Default)]
pub struct SessionStore {
    state: Mutex<SessionState>,
}

/// What a started extraction needs outside the lock.
#[derive(Debug, Clone)]
pub(crate) struct ExtractionTicket {
    pub attempt: u64,
    pub name: String,
    pub image: Arc<DynamicImage>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // Every critical section leaves records whole, so a poisoned lock
        // still guards consistent data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Reads ────────────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.lock().pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pages.is_empty()
    }

    /// Snapshot of every record, in session order.
    pub fn pages(&self) -> Vec<PageRecord> {
        self.lock().pages.clone()
    }

    pub fn page_ids(&self) -> Vec<PageId> {
        self.lock().pages.iter().map(PageRecord::id).collect()
    }

    pub fn get(&self, id: PageId) -> Option<PageRecord> {
        self.lock().pages.iter().find(|p| p.id() == id).cloned()
    }

    pub fn selected(&self) -> Option<PageId> {
        self.lock().selected
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.lock();
        if state.in_flight > 0 || state.batches > 0 {
            SessionStatus::Processing
        } else {
            SessionStatus::Ready
        }
    }

    // ── User operations ──────────────────────────────────────────────────

    pub fn select(&self, id: PageId) -> Result<(), Scan2SheetError> {
        let mut state = self.lock();
        if !state.pages.iter().any(|p| p.id() == id) {
            return Err(Scan2SheetError::PageNotFound { id: id.get() });
        }
        state.selected = Some(id);
        Ok(())
    }

    /// Delete a page. If it was selected, the selection moves to its
    /// neighbour (next, else previous), or to nothing.
    pub fn remove(&self, id: PageId) -> Option<PageRecord> {
        let mut state = self.lock();
        let idx = state.pages.iter().position(|p| p.id() == id)?;
        let removed = state.pages.remove(idx);
        if state.selected == Some(id) {
            let neighbour = state
                .pages
                .get(idx)
                .or_else(|| idx.checked_sub(1).and_then(|i| state.pages.get(i)))
                .map(PageRecord::id);
            state.selected = neighbour;
        }
        debug!("Removed page {} ({})", id, removed.name());
        Some(removed)
    }

    /// Return a page to `Idle`, clearing rows, error and warning.
    pub fn reset(&self, id: PageId) -> Result<(), Scan2SheetError> {
        let mut state = self.lock();
        let page = state
            .find_mut(id)
            .ok_or(Scan2SheetError::PageNotFound { id: id.get() })?;
        page.reset();
        Ok(())
    }

    /// Replace the rows of a complete page (manual grid edit).
    pub fn update_rows(&self, id: PageId, rows: Vec<Row>) -> Result<(), Scan2SheetError> {
        let mut state = self.lock();
        let page = state
            .find_mut(id)
            .ok_or(Scan2SheetError::PageNotFound { id: id.get() })?;
        let status = page.status();
        if !page.replace_rows(rows) {
            return Err(Scan2SheetError::PageNotComplete {
                id: id.get(),
                status: status.to_string(),
            });
        }
        Ok(())
    }

    /// Set one cell of a complete page (manual grid edit).
    pub fn set_cell(
        &self,
        id: PageId,
        row: usize,
        column: &str,
        value: serde_json::Value,
    ) -> Result<(), Scan2SheetError> {
        let mut state = self.lock();
        let page = state
            .find_mut(id)
            .ok_or(Scan2SheetError::PageNotFound { id: id.get() })?;
        let Some(rows) = page.extracted_data() else {
            return Err(Scan2SheetError::PageNotComplete {
                id: id.get(),
                status: page.status().to_string(),
            });
        };
        if row >= rows.len() {
            return Err(Scan2SheetError::RowOutOfRange {
                id: id.get(),
                row,
                total: rows.len(),
            });
        }
        let mut rows = rows.to_vec();
        rows[row].insert(column.to_string(), value);
        page.replace_rows(rows);
        Ok(())
    }

    // ── Pipeline operations ──────────────────────────────────────────────

    /// Append new `Idle` records. Selects the first one when nothing was
    /// selected. Only ingestion calls this.
    pub(crate) fn append_pages(&self, pages: Vec<(String, DynamicImage)>) -> Vec<PageId> {
        let mut state = self.lock();
        let mut ids = Vec::with_capacity(pages.len());
        for (name, image) in pages {
            state.next_id += 1;
            let id = PageId::from_raw(state.next_id);
            state.pages.push(PageRecord::new(id, name, image));
            ids.push(id);
        }
        if state.selected.is_none() {
            state.selected = ids.first().copied();
        }
        ids
    }

    /// Ids of every page a batch should launch: idle or errored.
    pub(crate) fn batch_candidates(&self) -> Vec<PageId> {
        self.lock()
            .pages
            .iter()
            .filter(|p| matches!(p.status(), PageStatus::Idle | PageStatus::Error))
            .map(PageRecord::id)
            .collect()
    }

    /// Move a page to `Extracting`. `None` if the page does not exist.
    pub(crate) fn begin_extraction(&self, id: PageId) -> Option<ExtractionTicket> {
        let mut state = self.lock();
        let page = state.find_mut(id)?;
        let attempt = page.begin_extraction();
        let ticket = ExtractionTicket {
            attempt,
            name: page.name().to_string(),
            image: Arc::clone(page.processed_image()),
        };
        state.in_flight += 1;
        Some(ticket)
    }

    /// Settle an extraction. Returns `false` when the page is gone or the
    /// result is stale; the in-flight count is released either way.
    pub(crate) fn finish_extraction(
        &self,
        id: PageId,
        attempt: u64,
        result: Result<Vec<Row>, String>,
    ) -> bool {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        match state.find_mut(id) {
            Some(page) => page.finish_extraction(attempt, result),
            None => {
                debug!("Page {} was deleted during extraction; result dropped", id);
                false
            }
        }
    }

    pub(crate) fn set_processed_image(&self, id: PageId, image: Arc<DynamicImage>) -> bool {
        let mut state = self.lock();
        match state.find_mut(id) {
            Some(page) => {
                page.set_processed_image(image);
                true
            }
            None => false,
        }
    }

    /// Apply a whole reconciliation plan under one lock. Pages deleted or
    /// re-run since the snapshot are skipped. Returns how many were updated.
    pub(crate) fn commit_reconciliation(&self, plan: &Reconciliation) -> usize {
        let mut state = self.lock();
        let mut applied = 0;
        for update in &plan.updates {
            let Some(page) = state.find_mut(update.id) else {
                continue;
            };
            if page.attempt() != update.attempt {
                continue;
            }
            if page.apply_reconciled(update.rows.clone(), update.consistency_warning.clone()) {
                applied += 1;
            }
        }
        applied
    }

    pub(crate) fn batch_started(&self) {
        self.lock().batches += 1;
    }

    pub(crate) fn batch_finished(&self) {
        let mut state = self.lock();
        state.batches = state.batches.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::reconcile;
    use image::RgbaImage;
    use serde_json::json;

    fn blank() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::new(2, 2))
    }

    fn row(v: serde_json::Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    fn store_with(n: usize) -> (SessionStore, Vec<PageId>) {
        let store = SessionStore::new();
        let ids = store.append_pages((0..n).map(|i| (format!("p{i}"), blank())).collect());
        (store, ids)
    }

    fn complete(store: &SessionStore, id: PageId, rows: Vec<Row>) {
        let t = store.begin_extraction(id).unwrap();
        assert!(store.finish_extraction(id, t.attempt, Ok(rows)));
    }

    #[test]
    fn ids_are_unique_and_first_page_selected() {
        let (store, ids) = store_with(3);
        assert_eq!(ids.len(), 3);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(store.selected(), Some(ids[0]));

        let more = store.append_pages(vec![("late".into(), blank())]);
        assert_eq!(store.selected(), Some(ids[0]), "selection is kept");
        assert!(more[0] > ids[2]);
    }

    #[test]
    fn ids_are_not_reused_after_delete() {
        let (store, ids) = store_with(1);
        store.remove(ids[0]);
        let next = store.append_pages(vec![("again".into(), blank())]);
        assert_ne!(next[0], ids[0]);
    }

    #[test]
    fn remove_moves_selection_to_neighbour() {
        let (store, ids) = store_with(3);
        store.select(ids[2]).unwrap();
        store.remove(ids[2]);
        assert_eq!(store.selected(), Some(ids[1]));
        store.remove(ids[0]);
        store.remove(ids[1]);
        assert_eq!(store.selected(), None);
    }

    #[test]
    fn result_for_deleted_page_is_dropped() {
        let (store, ids) = store_with(1);
        let t = store.begin_extraction(ids[0]).unwrap();
        assert_eq!(store.status(), SessionStatus::Processing);
        store.remove(ids[0]);
        assert!(!store.finish_extraction(ids[0], t.attempt, Ok(vec![])));
        assert!(store.get(ids[0]).is_none());
        assert!(store.is_empty());
        assert_eq!(store.status(), SessionStatus::Ready);
    }

    #[test]
    fn batch_candidates_skip_complete_and_extracting() {
        let (store, ids) = store_with(4);
        complete(&store, ids[0], vec![]);
        store.begin_extraction(ids[1]).unwrap();
        let t = store.begin_extraction(ids[2]).unwrap();
        store.finish_extraction(ids[2], t.attempt, Err("nope".into()));
        assert_eq!(store.batch_candidates(), vec![ids[2], ids[3]]);
    }

    #[test]
    fn set_cell_edits_one_value() {
        let (store, ids) = store_with(1);
        complete(&store, ids[0], vec![row(json!({"a": "1", "b": "2"}))]);
        store.set_cell(ids[0], 0, "b", json!("20")).unwrap();
        let page = store.get(ids[0]).unwrap();
        assert_eq!(page.extracted_data().unwrap()[0]["b"], json!("20"));

        let err = store.set_cell(ids[0], 5, "b", json!("x")).unwrap_err();
        assert!(matches!(err, Scan2SheetError::RowOutOfRange { total: 1, .. }));
    }

    #[test]
    fn update_rows_rejects_idle_page() {
        let (store, ids) = store_with(1);
        let err = store.update_rows(ids[0], vec![]).unwrap_err();
        assert!(matches!(err, Scan2SheetError::PageNotComplete { .. }));
    }

    #[test]
    fn commit_skips_pages_rerun_since_snapshot() {
        let (store, ids) = store_with(2);
        complete(&store, ids[0], vec![row(json!({"a": 1}))]);
        complete(&store, ids[1], vec![row(json!({"b": 2})), row(json!({"b": 3}))]);
        let plan = reconcile(&store.pages());

        // Page 0 is re-run before the plan lands.
        store.begin_extraction(ids[0]).unwrap();
        assert_eq!(store.commit_reconciliation(&plan), 1);

        assert_eq!(store.get(ids[0]).unwrap().status(), PageStatus::Extracting);
        let p1 = store.get(ids[1]).unwrap();
        assert!(p1.extracted_data().unwrap()[0].contains_key("a"));
    }

    #[test]
    fn select_unknown_page_fails() {
        let store = SessionStore::new();
        assert!(store.select(PageId::from_raw(42)).is_err());
    }
}
