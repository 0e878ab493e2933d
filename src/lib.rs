//! # edgequake-scan2sheet
//!
//! Turn scanned forms, tables and multi-page PDFs into spreadsheet rows using
//! Vision Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Classic OCR gives you text, not structure: a scanned register comes back
//! as a soup of words with the columns lost. Here each page is sent to a VLM
//! as an image and read back as rows of `column → value`, which is what a
//! data-entry clerk would have typed. Pages of the same form are then checked
//! against each other so a truncated page does not slip through silently.
//!
//! ## Pipeline Overview
//!
//! ```text
//! files (PDF / images)
//!  │
//!  ├─ 1. Ingest      PDF → one page per sheet (pdfium), image → one page
//!  ├─ 2. Preprocess  optional filters: rotate, grayscale, brightness, contrast, threshold
//!  ├─ 3. Extract     concurrent VLM calls, one per page → rows
//!  ├─ 4. Reconcile   schema union + majority row count → consistency warnings
//!  └─ 5. Export      CSV: combined, master (with page/source columns) or per page
//! ```
//!
//! Every page moves through `idle → extracting → complete | error` inside a
//! [`SessionStore`]; a failed page never affects its siblings.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_scan2sheet::{
//!     export_to_path, ExportMode, FileBlob, Ingestor, Orchestrator, PdfiumRasterizer,
//!     SessionConfig, SessionStore,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = SessionConfig::default();
//!     let store = Arc::new(SessionStore::new());
//!
//!     let ingestor = Ingestor::new(store.clone(), Arc::new(PdfiumRasterizer::from_config(&config)));
//!     let bytes = std::fs::read("register.pdf")?;
//!     ingestor
//!         .ingest(vec![FileBlob::new("register.pdf", "application/pdf", bytes)])
//!         .await;
//!
//!     let orchestrator = Orchestrator::from_config(store.clone(), &config)?;
//!     let report = orchestrator.extract_all().await;
//!     eprintln!("{}/{} pages, {} warnings", report.completed, report.launched, report.warnings);
//!
//!     export_to_path(&store.pages(), ExportMode::Master, "register.csv").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `scan2sheet` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-scan2sheet = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod export;
pub mod ingest;
pub mod orchestrator;
pub mod output;
pub mod page;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod reconcile;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{SessionConfig, SessionConfigBuilder};
pub use error::{IngestSkip, PageError, Scan2SheetError};
pub use export::{
    combined_csv, export_to_path, master_csv, page_csv, ExportMode, ExportOutcome,
    PAGE_NUMBER_COLUMN, SOURCE_FILE_COLUMN,
};
pub use ingest::{FileBlob, IngestReport, Ingestor};
pub use orchestrator::Orchestrator;
pub use output::{BatchReport, ExtractOutcome, PageSummary};
pub use page::{PageId, PageRecord, PageState, PageStatus, Row};
pub use pipeline::llm::{PageExtractor, VisionExtractor};
pub use pipeline::preprocess::{PreprocessFilters, Rotation};
pub use pipeline::render::{PdfRasterizer, PdfiumRasterizer};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use reconcile::{reconcile, Reconciliation};
pub use session::{SessionStatus, SessionStore};
