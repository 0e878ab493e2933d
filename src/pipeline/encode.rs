//! Image encoding: page image → bounded, base64 PNG `ImageData`.
//!
//! Every payload is normalised to one format (PNG) whatever was uploaded.
//! PNG is lossless, and JPEG artefacts around thin table rules and small
//! digits measurably hurt cell accuracy. Phone photos are often 4000 px or
//! more on the long edge, far past what vision APIs tile at full detail, so
//! images are first scaled down to the same pixel cap used for PDF pages.

use crate::error::PageError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a page image as a base64 PNG ready for the VLM API.
///
/// Images whose longest edge exceeds `max_edge` are downscaled, keeping the
/// aspect ratio. `detail: "high"` asks GPT-4-class models for the full tile
/// budget so fine print survives.
pub fn encode_page(img: &DynamicImage, max_edge: u32) -> Result<ImageData, PageError> {
    let bounded;
    let img = if img.width().max(img.height()) > max_edge {
        bounded = img.resize(max_edge, max_edge, FilterType::Triangle);
        debug!(
            "Downscaled {}x{} → {}x{}",
            img.width(),
            img.height(),
            bounded.width(),
            bounded.height()
        );
        &bounded
    } else {
        img
    };

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| PageError::EncodeFailed {
            detail: e.to_string(),
        })?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn decode(data: &ImageData) -> DynamicImage {
        let bytes = STANDARD.decode(&data.data).expect("valid base64");
        image::load_from_memory(&bytes).expect("valid png")
    }

    #[test]
    fn small_image_is_kept_at_size() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 8, Rgba([255, 0, 0, 255])));
        let data = encode_page(&img, 2000).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let back = decode(&data);
        assert_eq!((back.width(), back.height()), (10, 8));
    }

    #[test]
    fn large_image_is_bounded() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(400, 100, Rgba([0, 0, 0, 255])));
        let data = encode_page(&img, 200).unwrap();
        let back = decode(&data);
        assert_eq!(back.width(), 200);
        assert_eq!(back.height(), 50);
    }
}
