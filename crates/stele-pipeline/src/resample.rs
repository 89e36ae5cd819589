//! Rescaling of photos and assets to the canvas resolution.
//!
//! Every photo is brought to a common physical scale before layout, and
//! the digital ruler is scaled to the same resolution. Both go through
//! [`resize_to`] so one filter choice applies to the whole composite.

use std::fmt;

use image::RgbaImage;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::types::Dimensions;

/// Resampling filter used when rescaling.
///
/// Ordered from fastest/lowest-quality to slowest/highest-quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResampleFilter {
    /// Nearest-neighbor: fastest, blocky artifacts.
    Nearest,
    /// Bilinear interpolation: fast, decent quality.
    Triangle,
    /// Bicubic (Catmull-Rom): good quality for photographs.
    #[default]
    CatmullRom,
    /// Lanczos with 3 lobes: slowest, sharpest.
    Lanczos3,
}

impl ResampleFilter {
    const fn to_image_filter(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Triangle => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

impl fmt::Display for ResampleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nearest => f.write_str("Nearest"),
            Self::Triangle => f.write_str("Triangle"),
            Self::CatmullRom => f.write_str("CatmullRom"),
            Self::Lanczos3 => f.write_str("Lanczos3"),
        }
    }
}

/// Dimensions after multiplying both sides by `factor`, rounded, and
/// never below one pixel.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn scaled_dimensions(size: Dimensions, factor: f64) -> Dimensions {
    let scale = |v: u32| (f64::from(v) * factor).round().clamp(1.0, f64::from(u32::MAX)) as u32;
    Dimensions::new(scale(size.width), scale(size.height))
}

/// Dimensions with the given width and the aspect ratio of `size`.
#[must_use]
pub fn fit_width(size: Dimensions, width: u32) -> Dimensions {
    let factor = f64::from(width) / f64::from(size.width.max(1));
    Dimensions::new(width.max(1), scaled_dimensions(size, factor).height)
}

/// Dimensions with the given height and the aspect ratio of `size`.
#[must_use]
pub fn fit_height(size: Dimensions, height: u32) -> Dimensions {
    let factor = f64::from(height) / f64::from(size.height.max(1));
    Dimensions::new(scaled_dimensions(size, factor).width, height.max(1))
}

/// Resize an image to exactly `target`, or clone it if already that size.
#[must_use = "returns the resized image"]
pub fn resize_to(image: &RgbaImage, target: Dimensions, filter: ResampleFilter) -> RgbaImage {
    if Dimensions::of(image) == target {
        return image.clone();
    }
    image::imageops::resize(image, target.width, target.height, filter.to_image_filter())
}
