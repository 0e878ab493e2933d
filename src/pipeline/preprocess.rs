//! Pixel filters applied before extraction.
//!
//! Faint pencil, grey backgrounds and sideways phone photos are the usual
//! reasons a model misreads a form. The filters here are the standard
//! darkroom set, applied in a fixed order:
//!
//! ```text
//! rotate → grayscale (also when thresholding) → brightness → contrast → threshold
//! ```
//!
//! Thresholding runs last and collapses each pixel to pure black or white, so
//! when enabled it overrides the tone of every earlier step. Alpha is kept.
//!
//! Filters are always applied to the page's *original* image, never on top of
//! a previous result; the values describe an absolute look, not a delta.

use crate::error::Scan2SheetError;
use image::{DynamicImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

/// Clockwise rotation in quarter turns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// Parse 0 / 90 / 180 / 270.
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Cw90),
            180 => Some(Rotation::Cw180),
            270 => Some(Rotation::Cw270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }
}

/// Filter parameters for one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessFilters {
    /// Offset added to every channel. Range: −255..=255.
    pub brightness: i32,
    /// Contrast adjustment around mid-grey. Range: −255..=255.
    pub contrast: i32,
    /// Binarisation cutoff; 0 disables it.
    pub threshold: u8,
    pub grayscale: bool,
    pub rotation: Rotation,
}

impl PreprocessFilters {
    /// True when applying these filters would return the image unchanged.
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<(), Scan2SheetError> {
        if !(-255..=255).contains(&self.brightness) {
            return Err(Scan2SheetError::InvalidConfig(format!(
                "brightness must be -255–255, got {}",
                self.brightness
            )));
        }
        if !(-255..=255).contains(&self.contrast) {
            return Err(Scan2SheetError::InvalidConfig(format!(
                "contrast must be -255–255, got {}",
                self.contrast
            )));
        }
        Ok(())
    }
}

/// Apply `filters` to `image`, returning a new RGBA image.
pub fn apply_filters(image: &DynamicImage, filters: &PreprocessFilters) -> DynamicImage {
    let rotated = match filters.rotation {
        Rotation::None => image.clone(),
        Rotation::Cw90 => image.rotate90(),
        Rotation::Cw180 => image.rotate180(),
        Rotation::Cw270 => image.rotate270(),
    };

    let mut pixels: RgbaImage = rotated.to_rgba8();
    let to_gray = filters.grayscale || filters.threshold > 0;
    let factor = contrast_factor(filters.contrast);
    let brightness = filters.brightness as f32;

    for Rgba([r, g, b, _a]) in pixels.pixels_mut() {
        let mut channels = [*r as f32, *g as f32, *b as f32];

        if to_gray {
            let y = luma(channels);
            channels = [y, y, y];
        }
        for c in &mut channels {
            *c = (*c + brightness).clamp(0.0, 255.0);
            *c = (factor * (*c - 128.0) + 128.0).clamp(0.0, 255.0);
        }
        if filters.threshold > 0 {
            let v = if luma(channels) >= filters.threshold as f32 {
                255.0
            } else {
                0.0
            };
            channels = [v, v, v];
        }

        *r = channels[0].round() as u8;
        *g = channels[1].round() as u8;
        *b = channels[2].round() as u8;
    }

    DynamicImage::ImageRgba8(pixels)
}

/// Standard contrast-correction factor for `c` in −255..=255.
fn contrast_factor(c: i32) -> f32 {
    let c = c.clamp(-255, 255) as f32;
    (259.0 * (c + 255.0)) / (255.0 * (259.0 - c))
}

fn luma([r, g, b]: [f32; 3]) -> f32 {
    0.299 * r + 0.587 * g + 0.114 * b
}
