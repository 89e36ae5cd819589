//! Pixels-per-centimetre estimation from a photographed ruler.
//!
//! The ruler is expected in a band along one image edge. A handful of
//! scanlines across the band are run-length encoded, and every run that
//! starts an alternating black/white sequence of similarly sized marks
//! contributes the sequence's mean mark width as a candidate. The median
//! of all candidates is the scale, which keeps partially occluded or
//! glare-washed scanlines from skewing the result.
//!
//! Left and right rulers are handled by rotating the band a quarter turn
//! so the marks always run along the x axis.

use std::fmt;

use image::{GrayImage, RgbaImage, imageops};
use serde::{Deserialize, Serialize};

use crate::config::CalibrationConfig;
use crate::error::CalibrationError;
use crate::scanline::{ColorClass, ScanlineRun, encode_runs};
use crate::types::ScaleEstimate;

/// Image edge the physical ruler lies along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulerEdge {
    #[default]
    Top,
    Bottom,
    Left,
    Right,
}

impl fmt::Display for RulerEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Top => "top",
            Self::Bottom => "bottom",
            Self::Left => "left",
            Self::Right => "right",
        })
    }
}

/// Estimate the scale of `image` from the ruler along `edge`.
///
/// # Errors
///
/// Returns [`CalibrationError::RoiEmpty`] if the configured band selects
/// no pixels, [`CalibrationError::NoRulerPatternFound`] if no scanline
/// yields a candidate, and [`CalibrationError::DegenerateScale`] if the
/// median candidate is not greater than one pixel.
pub fn estimate_scale(
    image: &RgbaImage,
    edge: RulerEdge,
    config: &CalibrationConfig,
) -> Result<ScaleEstimate, CalibrationError> {
    let band = search_band(image, edge, config)?;
    let mut candidates = band_candidates(&band, config);

    tracing::debug!(
        %edge,
        band_width = band.width(),
        band_height = band.height(),
        candidates = candidates.len(),
        "ruler scanlines analysed"
    );

    let Some(median) = median(&mut candidates) else {
        return Err(CalibrationError::NoRulerPatternFound { edge });
    };
    ScaleEstimate::new(median, candidates.len())
}

/// Crop the ruler search band and orient it so marks run along x.
///
/// # Errors
///
/// Returns [`CalibrationError::RoiEmpty`] when the band has no rows.
pub fn search_band(
    image: &RgbaImage,
    edge: RulerEdge,
    config: &CalibrationConfig,
) -> Result<GrayImage, CalibrationError> {
    let (width, height) = image.dimensions();
    // Band depth is measured across the edge: rows for top/bottom,
    // columns for left/right.
    let across = match edge {
        RulerEdge::Top | RulerEdge::Bottom => height,
        RulerEdge::Left | RulerEdge::Right => width,
    };
    let (near, far) = band_span(across, config);
    let (start, end) = match edge {
        RulerEdge::Top | RulerEdge::Left => (near, far),
        RulerEdge::Bottom | RulerEdge::Right => (across - far, across - near),
    };
    if end <= start || width == 0 || height == 0 {
        return Err(CalibrationError::RoiEmpty { edge });
    }

    let band = match edge {
        RulerEdge::Top | RulerEdge::Bottom => {
            imageops::crop_imm(image, 0, start, width, end - start).to_image()
        }
        RulerEdge::Left | RulerEdge::Right => {
            imageops::crop_imm(image, start, 0, end - start, height).to_image()
        }
    };
    let gray = imageops::grayscale(&band);
    Ok(match edge {
        RulerEdge::Top | RulerEdge::Bottom => gray,
        RulerEdge::Left | RulerEdge::Right => imageops::rotate90(&gray),
    })
}

/// Distance range of the band from the edge, in pixels.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn band_span(across: u32, config: &CalibrationConfig) -> (u32, u32) {
    let at = |fraction: f64| (f64::from(across) * fraction.clamp(0.0, 1.0)) as u32;
    (at(config.roi_start_fraction), at(config.roi_end_fraction))
}

/// Collect scale candidates from evenly spaced scanlines of the band.
fn band_candidates(band: &GrayImage, config: &CalibrationConfig) -> Vec<f64> {
    let (width, height) = band.dimensions();
    let window = MarkWindow::new(width, config);
    let mut candidates = Vec::new();

    for i in 0..config.scanline_count {
        let y = scanline_row(height, i, config.scanline_count);
        let start = y as usize * width as usize;
        let Some(row) = band.as_raw().get(start..start + width as usize) else {
            continue;
        };
        let runs = encode_runs(row, config.binarization_threshold);
        sequence_candidates(&runs, &window, config, &mut candidates);
    }
    candidates
}

/// Row index of scanline `i` of `count`, centred in its slice of the band.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn scanline_row(height: u32, i: u32, count: u32) -> u32 {
    let y = (f64::from(height) * ((f64::from(i) + 0.5) / f64::from(count))) as u32;
    y.min(height.saturating_sub(1))
}

/// Accepted mark widths for a band of a given width.
struct MarkWindow {
    min: f64,
    max: f64,
}

impl MarkWindow {
    fn new(band_width: u32, config: &CalibrationConfig) -> Self {
        let width = f64::from(band_width);
        Self {
            min: width * config.min_mark_width_fraction,
            max: width * config.max_mark_width_fraction,
        }
    }

    fn contains(&self, run_width: f64) -> bool {
        (self.min..=self.max).contains(&run_width)
    }
}

/// Push one candidate for every black run that starts a long enough
/// alternating sequence of similar marks.
#[allow(clippy::cast_precision_loss)]
fn sequence_candidates(
    runs: &[ScanlineRun],
    window: &MarkWindow,
    config: &CalibrationConfig,
    candidates: &mut Vec<f64>,
) {
    for (i, first) in runs.iter().enumerate() {
        let first_width = first.width() as f64;
        if first.class != ColorClass::Black || !window.contains(first_width) {
            continue;
        }

        let tolerance = first_width * config.width_tolerance;
        let mut previous = first.class;
        let mut count = 1usize;
        let mut total = first_width;
        for run in &runs[i + 1..] {
            let width = run.width() as f64;
            if run.class == previous
                || !window.contains(width)
                || (width - first_width).abs() > tolerance
            {
                break;
            }
            previous = run.class;
            count += 1;
            total += width;
        }

        if count >= config.min_alternating_runs {
            candidates.push(total / count as f64);
        }
    }
}

/// Median of the values, averaging the middle pair for even counts.
fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        f64::midpoint(values[mid - 1], values[mid])
    } else {
        values[mid]
    })
}
