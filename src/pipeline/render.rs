//! PDF rasterisation: turn every page of a PDF into a `DynamicImage`.
//!
//! ## Why a trait?
//!
//! Ingestion only needs "bytes in, page images out, in document order".
//! [`PdfRasterizer`] is that seam; [`PdfiumRasterizer`] is the production
//! engine, and tests substitute an in-memory one without a pdfium library.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state and CPU-heavy rendering.
//! Callers run [`PdfRasterizer::rasterize`] on tokio's blocking pool so the
//! async workers keep servicing other pages' extraction calls meanwhile.

use crate::config::SessionConfig;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// Renders PDF bytes to one image per page, in document order.
///
/// Blocking; call from `spawn_blocking`. The error is a human-readable
/// detail; any failure aborts ingestion of that one file.
pub trait PdfRasterizer: Send + Sync {
    fn rasterize(&self, pdf_bytes: &[u8]) -> Result<Vec<DynamicImage>, String>;
}

/// [`PdfRasterizer`] backed by pdfium.
///
/// Binds to the library at `PDFIUM_LIB_PATH` (a file, or a directory holding
/// the platform library) when set, else to the system library. Binding
/// happens per call, so a missing library only fails PDF files.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    dpi: u32,
    max_rendered_pixels: u32,
}

impl PdfiumRasterizer {
    pub fn new(dpi: u32, max_rendered_pixels: u32) -> Self {
        Self {
            dpi,
            max_rendered_pixels,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.dpi, config.max_rendered_pixels)
    }
}

impl PdfRasterizer for PdfiumRasterizer {
    fn rasterize(&self, pdf_bytes: &[u8]) -> Result<Vec<DynamicImage>, String> {
        let pdfium = bind_pdfium()?;

        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(|e| format!("{:?}", e))?;

        let pages = document.pages();
        info!("PDF loaded: {} pages", pages.len());

        let max = self.max_rendered_pixels as i32;
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.dpi as f32 / 72.0)
            .set_maximum_width(max)
            .set_maximum_height(max);

        let mut images = Vec::with_capacity(pages.len() as usize);
        for (idx, page) in pages.iter().enumerate() {
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| format!("page {}: {:?}", idx + 1, e))?;
            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            images.push(image);
        }

        Ok(images)
    }
}

fn bind_pdfium() -> Result<Pdfium, String> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(configured) if !configured.is_empty() => {
            let path = Path::new(&configured);
            let library = if path.is_dir() {
                path.join(Pdfium::pdfium_platform_library_name())
            } else {
                path.to_path_buf()
            };
            let library = library.to_string_lossy().into_owned();
            Pdfium::bind_to_library(&library)
        }
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| {
        format!(
            "failed to bind to pdfium library ({e:?}); \
             set PDFIUM_LIB_PATH=/path/to/libpdfium"
        )
    })?;

    Ok(Pdfium::new(bindings))
}
