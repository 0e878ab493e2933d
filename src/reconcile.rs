//! Cross-page consistency reconciliation.
//!
//! After a batch settles, pages of the same form rarely agree perfectly: the
//! model may name an optional column on one page and omit it on the next, or
//! drop rows on a smudged scan. Exporting those pages side by side would give
//! ragged sheets and silently lose the truncation. This pass makes the batch
//! rectangular and marks the outliers:
//!
//! 1. **Schema union** — every column name seen on any eligible page, in
//!    first-seen order.
//! 2. **Normalisation** — every row of every eligible page is rebuilt over
//!    that column set; missing cells become `""`.
//! 3. **Mode row count** — the most frequent row count, ties going to the
//!    count that reached the winning frequency first.
//! 4. **Flagging** — pages whose row count differs from the mode get a
//!    consistency warning; the others get none.
//!
//! [`reconcile`] is pure: it reads a snapshot and returns a
//! [`Reconciliation`] plan. The session store applies the whole plan in one
//! locked update, so no reader ever sees half a batch reconciled.

use crate::page::{PageId, PageRecord, Row};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// The new rows and warning for one eligible page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageUpdate {
    pub id: PageId,
    /// Attempt the snapshot was taken at; a page re-run since then is skipped.
    pub attempt: u64,
    pub rows: Vec<Row>,
    pub consistency_warning: Option<String>,
}

/// Output of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Canonical column set, first-seen order. Empty for a no-op pass.
    pub columns: Vec<String>,
    /// Mode row count. `None` for a no-op pass.
    pub mode_row_count: Option<usize>,
    /// One entry per eligible page, in page order.
    pub updates: Vec<PageUpdate>,
}

impl Reconciliation {
    /// True when fewer than two pages were eligible and nothing changes.
    pub fn is_noop(&self) -> bool {
        self.updates.is_empty()
    }

    /// Number of pages the plan flags.
    pub fn warning_count(&self) -> usize {
        self.updates
            .iter()
            .filter(|u| u.consistency_warning.is_some())
            .count()
    }
}

/// Reconcile every eligible (complete) page in `pages`.
///
/// Fewer than two eligible pages is a no-op: there is nothing to compare
/// against.
pub fn reconcile(pages: &[PageRecord]) -> Reconciliation {
    let eligible: Vec<(&PageRecord, &[Row])> = pages
        .iter()
        .filter_map(|p| p.extracted_data().map(|rows| (p, rows)))
        .collect();

    if eligible.len() < 2 {
        debug!("Reconciliation skipped: {} eligible page(s)", eligible.len());
        return Reconciliation::default();
    }

    let columns = canonical_columns(eligible.iter().map(|(_, rows)| *rows));
    let counts: Vec<usize> = eligible.iter().map(|(_, rows)| rows.len()).collect();
    let Some(mode) = mode_row_count(&counts) else {
        return Reconciliation::default();
    };

    let updates = eligible
        .iter()
        .map(|(page, rows)| PageUpdate {
            id: page.id(),
            attempt: page.attempt(),
            rows: normalise_rows(rows, &columns),
            consistency_warning: row_count_warning(mode, rows.len()),
        })
        .collect();

    debug!(
        "Reconciled {} pages over {} columns, mode {} rows",
        eligible.len(),
        columns.len(),
        mode
    );

    Reconciliation {
        columns,
        mode_row_count: Some(mode),
        updates,
    }
}

/// Union of column names across all rows, in first-seen order.
pub fn canonical_columns<'a>(pages: impl IntoIterator<Item = &'a [Row]>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for rows in pages {
        for row in rows {
            for key in row.keys() {
                if seen.insert(key.as_str()) {
                    columns.push(key.clone());
                }
            }
        }
    }
    columns
}

/// Rebuild each row over `columns`, filling missing cells with `""`.
///
/// Keys outside `columns` are kept after the canonical ones, so nothing the
/// model returned is ever dropped.
pub fn normalise_rows(rows: &[Row], columns: &[String]) -> Vec<Row> {
    rows.iter()
        .map(|row| {
            let mut out = Row::new();
            for col in columns {
                let value = row
                    .get(col)
                    .cloned()
                    .unwrap_or_else(|| Value::String(String::new()));
                out.insert(col.clone(), value);
            }
            for (key, value) in row {
                if !out.contains_key(key) {
                    out.insert(key.clone(), value.clone());
                }
            }
            out
        })
        .collect()
}

/// Most frequent value in `counts`.
///
/// Single forward scan; a count takes the lead only by strictly exceeding
/// the best frequency so far, so on a tie the value that reached the winning
/// frequency first wins (`[2, 3, 2, 3]` → 2). "First" could also mean the
/// first value seen in page order; the two readings split on `[3, 2, 2, 3]`,
/// where this returns 2 rather than 3.
pub fn mode_row_count(counts: &[usize]) -> Option<usize> {
    let mut freq: HashMap<usize, usize> = HashMap::new();
    let mut best: Option<(usize, usize)> = None;
    for &count in counts {
        let f = freq.entry(count).or_insert(0);
        *f += 1;
        match best {
            Some((_, best_freq)) if *f <= best_freq => {}
            _ => best = Some((count, *f)),
        }
    }
    best.map(|(count, _)| count)
}

fn row_count_warning(expected: usize, found: usize) -> Option<String> {
    (expected != found).then(|| {
        format!("Expected {expected} rows (batch majority) but found {found}")
    })
}
