//! CSV export of extracted rows.
//!
//! Only `complete` pages with at least one row are exported; pages that are
//! idle, in flight or errored are left out, as are the `previous_rows` kept
//! after a failed re-run.
//!
//! ## Modes
//!
//! | Mode       | Output                                                        |
//! |------------|---------------------------------------------------------------|
//! | `combined` | one sheet, every page's rows stacked under the union header  |
//! | `master`   | as `combined`, plus `Page Number` and `Source File` in front |
//! | `per-page` | one CSV per page in a directory                               |
//!
//! Columns come from [`crate::reconcile::canonical_columns`], so a session
//! that was never reconciled still exports a rectangular sheet: cells a row
//! lacks are written empty.

use crate::error::Scan2SheetError;
use crate::page::{PageRecord, Row};
use crate::reconcile::canonical_columns;
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

/// Header of the 1-based page position column in the master sheet.
pub const PAGE_NUMBER_COLUMN: &str = "Page Number";
/// Header of the page name column in the master sheet.
pub const SOURCE_FILE_COLUMN: &str = "Source File";

/// Which sheet layout to write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportMode {
    #[default]
    Combined,
    Master,
    PerPage,
}

/// Result of [`export_to_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// Files written and the number of data rows across them.
    Written { paths: Vec<PathBuf>, rows: usize },
    /// No complete page had rows; nothing was written.
    NothingToExport,
}

/// (1-based position, record) for every page that has rows to export.
fn exportable(pages: &[PageRecord]) -> Vec<(usize, &PageRecord, &[Row])> {
    pages
        .iter()
        .enumerate()
        .filter_map(|(i, p)| {
            p.extracted_data()
                .filter(|rows| !rows.is_empty())
                .map(|rows| (i + 1, p, rows))
        })
        .collect()
}

/// Text of one cell. Null is empty, strings are written as-is, anything else
/// as its JSON text.
pub fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

struct Sheet {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Sheet {
    fn to_csv(&self) -> Result<String, Scan2SheetError> {
        let mut writer = WriterBuilder::new().from_writer(Vec::<u8>::new());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush().map_err(csv::Error::from)?;

        let bytes = writer
            .into_inner()
            .map_err(|e| Scan2SheetError::Csv(e.into_error().into()))?;
        String::from_utf8(bytes)
            .map_err(|e| Scan2SheetError::Internal(format!("invalid utf-8 csv output: {e}")))
    }
}

fn stacked_sheet(pages: &[PageRecord], with_source: bool) -> Option<Sheet> {
    let eligible = exportable(pages);
    if eligible.is_empty() {
        return None;
    }

    let columns = canonical_columns(eligible.iter().map(|(_, _, rows)| *rows));
    let mut headers = Vec::with_capacity(columns.len() + 2);
    if with_source {
        headers.push(PAGE_NUMBER_COLUMN.to_string());
        headers.push(SOURCE_FILE_COLUMN.to_string());
    }
    headers.extend(columns.iter().cloned());

    let rows = eligible
        .iter()
        .flat_map(|(position, page, rows)| {
            let columns = &columns;
            rows.iter().map(move |row| {
                let mut record = Vec::with_capacity(columns.len() + 2);
                if with_source {
                    record.push(position.to_string());
                    record.push(page.name().to_string());
                }
                record.extend(columns.iter().map(|c| cell_text(row.get(c))));
                record
            })
        })
        .collect();

    Some(Sheet { headers, rows })
}

fn single_page_sheet(rows: &[Row]) -> Sheet {
    let headers = canonical_columns([rows]);
    let rows = rows
        .iter()
        .map(|row| headers.iter().map(|c| cell_text(row.get(c))).collect())
        .collect();
    Sheet { headers, rows }
}

/// CSV of one page's rows; `None` unless the page is complete with rows.
pub fn page_csv(page: &PageRecord) -> Result<Option<String>, Scan2SheetError> {
    match page.extracted_data().filter(|rows| !rows.is_empty()) {
        Some(rows) => single_page_sheet(rows).to_csv().map(Some),
        None => Ok(None),
    }
}

/// Every exportable page's rows stacked under the union header.
pub fn combined_csv(pages: &[PageRecord]) -> Result<Option<String>, Scan2SheetError> {
    stacked_sheet(pages, false).map(|s| s.to_csv()).transpose()
}

/// As [`combined_csv`], with `Page Number` and `Source File` columns first.
pub fn master_csv(pages: &[PageRecord]) -> Result<Option<String>, Scan2SheetError> {
    stacked_sheet(pages, true).map(|s| s.to_csv()).transpose()
}

/// Write the session's rows to `path`.
///
/// For [`ExportMode::PerPage`], `path` is a directory (created if missing)
/// receiving one `NNN-<page name>.csv` per page. Otherwise `path` is the CSV
/// file. Files are written to a temporary sibling and renamed into place.
pub async fn export_to_path(
    pages: &[PageRecord],
    mode: ExportMode,
    path: impl AsRef<Path>,
) -> Result<ExportOutcome, Scan2SheetError> {
    let path = path.as_ref();
    let eligible = exportable(pages);
    if eligible.is_empty() {
        info!("Nothing to export: no page has extracted rows");
        return Ok(ExportOutcome::NothingToExport);
    }
    let row_count = eligible.iter().map(|(_, _, rows)| rows.len()).sum();

    let paths = match mode {
        ExportMode::Combined | ExportMode::Master => {
            let csv = match mode {
                ExportMode::Master => master_csv(pages)?,
                _ => combined_csv(pages)?,
            };
            let Some(csv) = csv else {
                return Ok(ExportOutcome::NothingToExport);
            };
            write_atomic(path, &csv).await?;
            vec![path.to_path_buf()]
        }
        ExportMode::PerPage => {
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| Scan2SheetError::OutputWriteFailed {
                    path: path.to_path_buf(),
                    source: e,
                })?;
            let mut written = Vec::with_capacity(eligible.len());
            for (position, page, rows) in &eligible {
                let file = path.join(per_page_file_name(*position, page.name()));
                write_atomic(&file, &single_page_sheet(rows).to_csv()?).await?;
                written.push(file);
            }
            written
        }
    };

    info!(
        "Exported {} row(s) from {} page(s) to {} file(s)",
        row_count,
        eligible.len(),
        paths.len()
    );
    Ok(ExportOutcome::Written {
        paths,
        rows: row_count,
    })
}

/// `NNN-<name>.csv`, with anything but ASCII alphanumerics, `-`, `_` and `.`
/// replaced by `_`.
fn per_page_file_name(position: usize, name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{position:03}-{stem}.csv")
}

async fn write_atomic(path: &Path, contents: &str) -> Result<(), Scan2SheetError> {
    let write_err = |source: std::io::Error| Scan2SheetError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("csv.tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)
}
