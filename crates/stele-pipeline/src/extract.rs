//! Foreground separation against a near-uniform photographic backdrop.
//!
//! Pixels close to the background colour are cleared, the remaining
//! mask is cleaned with a morphological open and close, and connected
//! regions are labelled. The largest region is the object. Its alpha
//! ramps up over a few pixels from the region boundary so the cutout
//! blends softly when composited.
//!
//! The scale-reference view usually also shows the physical ruler. In
//! that case [`extract_object_and_ruler`] keeps the two largest regions
//! and tells them apart by elongation.

use image::{GrayImage, Luma, Rgba, RgbaImage};
use imageproc::distance_transform::{Norm, distance_transform};
use imageproc::morphology::{close, open};
use imageproc::region_labelling::{Connectivity, connected_components};
use serde::{Deserialize, Serialize};

use crate::config::ExtractionConfig;
use crate::error::ExtractionError;
use crate::types::{BoundingBox, Dimensions};

/// What the photographic backdrop looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundHint {
    /// Vote between dark and light using the four image corners.
    #[default]
    Auto,
    /// Black velvet or similar; compared against pure black.
    Dark,
    /// White paper or lightbox; compared against pure white.
    Light,
    /// An explicit backdrop colour.
    Color([u8; 3]),
}

/// An object cut out of its view.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedObject {
    /// Tight bounding box in source-image pixels.
    pub bounds: BoundingBox,
    /// Opacity over `bounds`; zero outside the region.
    pub alpha: GrayImage,
    /// Source pixels over `bounds` with `alpha` applied.
    pub cutout: RgbaImage,
    /// Pixel count of the region.
    pub area: u64,
}

/// Object and, when it could be separated, the physical ruler.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectAndRuler {
    pub object: ExtractedObject,
    pub ruler: Option<ExtractedObject>,
}

/// Cut the dominant foreground object out of `image`.
///
/// # Errors
///
/// Returns [`ExtractionError::NoForegroundFound`] if no connected region
/// differs from the background by more than the tolerance, or every
/// region is smaller than the configured minimum.
pub fn extract_object(
    image: &RgbaImage,
    hint: BackgroundHint,
    config: &ExtractionConfig,
) -> Result<ExtractedObject, ExtractionError> {
    let regions = Regions::find(image, hint, config);
    let largest = regions
        .stats
        .first()
        .ok_or(ExtractionError::NoForegroundFound)?;
    Ok(regions.cut(image, largest, config.feather_radius))
}

/// Cut the object and the physical ruler out of the scale-reference view.
///
/// The two largest regions are kept. The more elongated one is the
/// ruler; on equal elongation the smaller one is. With a single region
/// only the object is returned.
///
/// # Errors
///
/// Returns [`ExtractionError::NoForegroundFound`] if no region qualifies.
pub fn extract_object_and_ruler(
    image: &RgbaImage,
    hint: BackgroundHint,
    config: &ExtractionConfig,
) -> Result<ObjectAndRuler, ExtractionError> {
    let regions = Regions::find(image, hint, config);
    match regions.stats.as_slice() {
        [] => Err(ExtractionError::NoForegroundFound),
        [only] => Ok(ObjectAndRuler {
            object: regions.cut(image, only, config.feather_radius),
            ruler: None,
        }),
        [first, second, ..] => {
            let (object, ruler) = if second.bounds.elongation() >= first.bounds.elongation() {
                (first, second)
            } else {
                (second, first)
            };
            Ok(ObjectAndRuler {
                object: regions.cut(image, object, config.feather_radius),
                ruler: Some(regions.cut(image, ruler, config.feather_radius)),
            })
        }
    }
}

/// Resolve the backdrop colour for `image`.
#[must_use]
pub fn background_color(image: &RgbaImage, hint: BackgroundHint, config: &ExtractionConfig) -> [u8; 3] {
    match hint {
        BackgroundHint::Auto => vote_corners(image, config.corner_sample_fraction),
        BackgroundHint::Dark => [0, 0, 0],
        BackgroundHint::Light => [255, 255, 255],
        BackgroundHint::Color(rgb) => rgb,
    }
}

/// Mean colour of the corners agreeing with the dark/light majority.
/// Ties go to dark.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn vote_corners(image: &RgbaImage, fraction: f64) -> [u8; 3] {
    let (width, height) = image.dimensions();
    let short = width.min(height).max(1);
    let patch = ((f64::from(short) * fraction).round() as u32).clamp(1, short);
    let origins = [
        (0, 0),
        (width.saturating_sub(patch), 0),
        (0, height.saturating_sub(patch)),
        (width.saturating_sub(patch), height.saturating_sub(patch)),
    ];

    let means: Vec<[f64; 3]> = origins
        .iter()
        .map(|&(x0, y0)| patch_mean(image, x0, y0, patch))
        .collect();
    let is_dark = |c: [f64; 3]| luma(c) < 128.0;
    let dark_votes = means.iter().filter(|c| is_dark(**c)).count();
    let want_dark = dark_votes * 2 >= means.len();

    let agreeing: Vec<&[f64; 3]> = means.iter().filter(|c| is_dark(**c) == want_dark).collect();
    let n = agreeing.len().max(1) as f64;
    let mut sum = [0.0; 3];
    for c in agreeing {
        for (s, v) in sum.iter_mut().zip(c) {
            *s += v;
        }
    }
    sum.map(|s| (s / n).round().clamp(0.0, 255.0) as u8)
}

#[allow(clippy::cast_precision_loss)]
fn patch_mean(image: &RgbaImage, x0: u32, y0: u32, patch: u32) -> [f64; 3] {
    let mut sum = [0.0; 3];
    let mut count = 0u64;
    for y in y0..(y0 + patch).min(image.height()) {
        for x in x0..(x0 + patch).min(image.width()) {
            let Rgba([r, g, b, _]) = *image.get_pixel(x, y);
            sum[0] += f64::from(r);
            sum[1] += f64::from(g);
            sum[2] += f64::from(b);
            count += 1;
        }
    }
    let n = count.max(1) as f64;
    sum.map(|s| s / n)
}

fn luma([r, g, b]: [f64; 3]) -> f64 {
    0.299f64.mul_add(r, 0.587f64.mul_add(g, 0.114 * b))
}

/// Binary mask: 255 where a pixel differs from `background` by more
/// than `tolerance` in any channel.
#[must_use = "returns the foreground mask"]
pub fn foreground_mask(image: &RgbaImage, background: [u8; 3], tolerance: u8) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let Rgba([r, g, b, _]) = *image.get_pixel(x, y);
        let near = [r, g, b]
            .iter()
            .zip(background)
            .all(|(&c, bg)| c.abs_diff(bg) <= tolerance);
        Luma([if near { 0 } else { 255 }])
    })
}

#[derive(Debug, Clone, Copy)]
struct RegionStats {
    label: u32,
    area: u64,
    bounds: BoundingBox,
}

/// Labelled foreground regions, largest first.
struct Regions {
    labels: image::ImageBuffer<Luma<u32>, Vec<u32>>,
    stats: Vec<RegionStats>,
}

impl Regions {
    #[allow(clippy::cast_precision_loss)]
    fn find(image: &RgbaImage, hint: BackgroundHint, config: &ExtractionConfig) -> Self {
        let background = background_color(image, hint, config);
        let mut mask = foreground_mask(image, background, config.background_tolerance);
        if config.cleanup_radius > 0 {
            mask = open(&mask, Norm::LInf, config.cleanup_radius);
            mask = close(&mask, Norm::LInf, config.cleanup_radius);
        }

        let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));
        let mut stats = region_stats(&labels);

        let min_area = Dimensions::of(image).area() as f64 * config.min_region_fraction;
        stats.retain(|s| s.area as f64 >= min_area);
        stats.sort_by(|a, b| b.area.cmp(&a.area).then(a.label.cmp(&b.label)));

        tracing::debug!(
            background = ?background,
            regions = stats.len(),
            "foreground regions labelled"
        );
        Self { labels, stats }
    }

    /// Build the feathered cutout for one region.
    fn cut(&self, image: &RgbaImage, region: &RegionStats, feather: u8) -> ExtractedObject {
        let alpha = self.alpha(region, feather);
        let bounds = region.bounds;
        let cutout = RgbaImage::from_fn(bounds.width, bounds.height, |x, y| {
            let Rgba([r, g, b, a]) = *image.get_pixel(bounds.x + x, bounds.y + y);
            let m = u16::from(alpha.get_pixel(x, y)[0]);
            #[allow(clippy::cast_possible_truncation)]
            let a = ((u16::from(a) * m + 127) / 255) as u8;
            Rgba([r, g, b, a])
        });
        ExtractedObject {
            bounds,
            alpha,
            cutout,
            area: region.area,
        }
    }

    /// Opacity over the region's bounds, ramping from the boundary.
    fn alpha(&self, region: &RegionStats, feather: u8) -> GrayImage {
        let bounds = region.bounds;
        let inside = |x: u32, y: u32| self.labels.get_pixel(x, y)[0] == region.label;

        if feather == 0 {
            return GrayImage::from_fn(bounds.width, bounds.height, |x, y| {
                Luma([if inside(bounds.x + x, bounds.y + y) { 255 } else { 0 }])
            });
        }

        // One pixel of context around the bounds is enough: every
        // neighbour beyond it is outside the region anyway.
        let x0 = bounds.x.saturating_sub(1);
        let y0 = bounds.y.saturating_sub(1);
        let x1 = (bounds.right() + 1).min(self.labels.width());
        let y1 = (bounds.bottom() + 1).min(self.labels.height());
        let outside = GrayImage::from_fn(x1 - x0, y1 - y0, |x, y| {
            Luma([if inside(x0 + x, y0 + y) { 0 } else { 255 }])
        });
        let distance = distance_transform(&outside, Norm::LInf);

        let (dx, dy) = (bounds.x - x0, bounds.y - y0);
        GrayImage::from_fn(bounds.width, bounds.height, |x, y| {
            let d = u32::from(distance.get_pixel(x + dx, y + dy)[0]).min(u32::from(feather));
            #[allow(clippy::cast_possible_truncation)]
            let a = (d * 255 / u32::from(feather)) as u8;
            Luma([a])
        })
    }
}

/// Area and bounds for every non-zero label.
fn region_stats(labels: &image::ImageBuffer<Luma<u32>, Vec<u32>>) -> Vec<RegionStats> {
    // (area, min_x, min_y, max_x, max_y) indexed by label.
    let mut acc: Vec<(u64, u32, u32, u32, u32)> = Vec::new();
    for (x, y, Luma([label])) in labels.enumerate_pixels() {
        if *label == 0 {
            continue;
        }
        let i = *label as usize;
        if i >= acc.len() {
            acc.resize(i + 1, (0, u32::MAX, u32::MAX, 0, 0));
        }
        let entry = &mut acc[i];
        entry.0 += 1;
        entry.1 = entry.1.min(x);
        entry.2 = entry.2.min(y);
        entry.3 = entry.3.max(x);
        entry.4 = entry.4.max(y);
    }

    acc.into_iter()
        .enumerate()
        .filter(|(_, (area, ..))| *area > 0)
        .map(|(label, (area, x0, y0, x1, y1))| RegionStats {
            label: u32::try_from(label).unwrap_or(u32::MAX),
            area,
            bounds: BoundingBox::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1),
        })
        .collect()
}
