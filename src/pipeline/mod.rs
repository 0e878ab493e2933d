//! Pipeline stages between an uploaded file and a page's extracted rows.
//!
//! Each submodule implements exactly one transformation step, so each is
//! independently testable and the backends behind them (PDF engine, model
//! provider) can be swapped without touching the session logic.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ preprocess ──▶ encode ──▶ llm ──▶ postprocess
//! (path/URL) (pdfium)   (filters)     (base64)   (VLM)   (JSON → rows)
//! ```
//!
//! 1. [`input`]      — read a local path or download a URL into a `FileBlob`
//! 2. [`render`]     — rasterise PDF pages; blocking, runs in `spawn_blocking`
//! 3. [`preprocess`] — rotate / grayscale / brightness / contrast / threshold
//! 4. [`encode`]     — bound the image size, PNG-encode and base64-wrap it
//! 5. [`llm`]        — the extraction service seam and its VLM implementation;
//!    the only stage with network I/O
//! 6. [`postprocess`] — pull rows out of whatever JSON-ish text came back

pub mod encode;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod preprocess;
pub mod render;
