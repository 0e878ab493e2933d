//! Error types for the edgequake-scan2sheet library.
//!
//! Three distinct failure shapes reflect three distinct scopes:
//!
//! * [`Scan2SheetError`] — **Fatal**: the operation cannot proceed at all
//!   (bad configuration, provider not configured, output not writable).
//!   Returned as `Err(Scan2SheetError)` from builders, input resolution and
//!   export.
//!
//! * [`PageError`] — **Non-fatal**: a single page failed to extract (transient
//!   API error, unparseable response). Stored on the page record as its
//!   error message so sibling pages in a batch are never affected.
//!
//! * [`IngestSkip`] — **Advisory**: one uploaded file could not be turned into
//!   pages. Ingestion is best effort; skips are reported, never raised.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-scan2sheet library.
#[derive(Debug, Error)]
pub enum Scan2SheetError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Session errors ────────────────────────────────────────────────────
    /// No page with this identifier exists in the session.
    #[error("Page {id} does not exist in this session")]
    PageNotFound { id: u64 },

    /// The operation needs extracted rows but the page is not complete.
    #[error("Page {id} has no extracted rows (status: {status})")]
    PageNotComplete { id: u64, status: String },

    /// A row index passed to a grid edit is past the end of the page's rows.
    #[error("Row {row} is out of range (page {id} has {total} rows)")]
    RowOutOfRange { id: u64, row: usize, total: usize },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Export errors ─────────────────────────────────────────────────────
    /// Could not create or write an export file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// CSV encoding failed.
    #[error("CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal extraction error for a single page.
///
/// The orchestrator renders it with `Display` into the page's
/// `error_message`; the batch carries on regardless.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The page image could not be encoded for the API request.
    #[error("image encoding failed: {detail}")]
    EncodeFailed { detail: String },

    /// The provider returned an error.
    #[error("extraction service call failed: {detail}")]
    LlmFailed { detail: String },

    /// The provider did not answer within the per-call timeout.
    #[error("extraction service timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The provider answered with no usable content.
    #[error("extraction service returned an empty response")]
    EmptyResponse,

    /// The provider answered, but not with rows we can read.
    #[error("could not read rows from the response: {detail}")]
    MalformedResponse { detail: String },
}

/// Why a single uploaded file produced no pages.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum IngestSkip {
    /// MIME type is neither a PDF nor an image.
    #[error("'{name}': unsupported file type '{mime_type}'")]
    UnsupportedType { name: String, mime_type: String },

    /// Image bytes could not be decoded.
    #[error("'{name}': image could not be decoded: {detail}")]
    UndecodableImage { name: String, detail: String },

    /// PDF rasterisation failed.
    #[error("'{name}': PDF rasterisation failed: {detail}")]
    RasterisationFailed { name: String, detail: String },

    /// The path or URL could not be read at all.
    #[error("'{name}': could not be read: {detail}")]
    Unreadable { name: String, detail: String },
}
