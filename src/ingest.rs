//! Ingestion: uploaded files → new `idle` page records.
//!
//! ## Routing
//!
//! | MIME type         | Result                                        |
//! |-------------------|-----------------------------------------------|
//! | `application/pdf` | one record per page, `"<name> - Page <n>"`    |
//! | `image/*`         | exactly one record, named after the file      |
//! | anything else     | skipped, reported in [`IngestReport::skipped`] |
//!
//! A bad file never affects the others in the same upload. Rasterising and
//! decoding are CPU-bound, so both run on the blocking pool; the files of
//! one upload are processed concurrently but appended in upload order.

use crate::error::IngestSkip;
use crate::page::PageId;
use crate::pipeline::render::PdfRasterizer;
use crate::session::SessionStore;
use futures::future::join_all;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// One uploaded file, fully in memory.
#[derive(Clone, PartialEq, Eq)]
pub struct FileBlob {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl FileBlob {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

impl std::fmt::Debug for FileBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBlob")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("bytes", &format!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Pdf,
    Image,
}

fn classify(mime_type: &str) -> Option<FileKind> {
    let mime = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if mime == "application/pdf" {
        Some(FileKind::Pdf)
    } else if mime.starts_with("image/") {
        Some(FileKind::Image)
    } else {
        None
    }
}

/// Outcome of one [`Ingestor::ingest`] call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    /// Ids of the new records, in upload order.
    pub created: Vec<PageId>,
    /// Files that produced no records.
    pub skipped: Vec<IngestSkip>,
}

/// Appends uploaded files to a session.
pub struct Ingestor {
    store: Arc<SessionStore>,
    rasterizer: Arc<dyn PdfRasterizer>,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("pages", &self.store.len())
            .field("rasterizer", &"<dyn PdfRasterizer>")
            .finish()
    }
}

impl Ingestor {
    pub fn new(store: Arc<SessionStore>, rasterizer: Arc<dyn PdfRasterizer>) -> Self {
        Self { store, rasterizer }
    }

    /// Turn `files` into `idle` records appended to the session.
    ///
    /// Never fails as a whole: every file that cannot be read is listed in
    /// the report and the rest are still appended.
    pub async fn ingest(&self, files: Vec<FileBlob>) -> IngestReport {
        let file_count = files.len();
        let results = join_all(files.into_iter().map(|file| self.load_file(file))).await;

        let mut pages = Vec::new();
        let mut skipped = Vec::new();
        for result in results {
            match result {
                Ok(mut loaded) => pages.append(&mut loaded),
                Err(skip) => {
                    warn!("Skipping upload: {}", skip);
                    skipped.push(skip);
                }
            }
        }

        let created = self.store.append_pages(pages);
        info!(
            "Ingested {} file(s): {} page(s) created, {} skipped",
            file_count,
            created.len(),
            skipped.len()
        );
        IngestReport { created, skipped }
    }

    async fn load_file(&self, file: FileBlob) -> Result<Vec<(String, DynamicImage)>, IngestSkip> {
        match classify(&file.mime_type) {
            Some(FileKind::Pdf) => self.load_pdf(file).await,
            Some(FileKind::Image) => load_image(file).await,
            None => Err(IngestSkip::UnsupportedType {
                name: file.name,
                mime_type: file.mime_type,
            }),
        }
    }

    async fn load_pdf(&self, file: FileBlob) -> Result<Vec<(String, DynamicImage)>, IngestSkip> {
        let rasterizer = Arc::clone(&self.rasterizer);
        let FileBlob { name, bytes, .. } = file;

        let rendered = tokio::task::spawn_blocking(move || rasterizer.rasterize(&bytes))
            .await
            .map_err(|e| format!("render task panicked: {e}"))
            .and_then(|r| r);

        match rendered {
            Ok(images) => Ok(images
                .into_iter()
                .enumerate()
                .map(|(i, img)| (format!("{} - Page {}", name, i + 1), img))
                .collect()),
            Err(detail) => Err(IngestSkip::RasterisationFailed { name, detail }),
        }
    }
}

async fn load_image(file: FileBlob) -> Result<Vec<(String, DynamicImage)>, IngestSkip> {
    let FileBlob { name, bytes, .. } = file;
    let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
        .await
        .map_err(|e| format!("decode task panicked: {e}"))
        .and_then(|r| r.map_err(|e| e.to_string()));

    match decoded {
        Ok(img) => Ok(vec![(name, img)]),
        Err(detail) => Err(IngestSkip::UndecodableImage { name, detail }),
    }
}
