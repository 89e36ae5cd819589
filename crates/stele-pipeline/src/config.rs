//! Tunables for every stage, grouped into one value object.
//!
//! Nothing here is process-wide state: a [`CompositionConfig`] is passed
//! into each component, so parallel artifacts can run with different
//! settings and tests can use synthetic parameters.
//!
//! The ruler-detection constants were tuned on a photo corpus and are
//! defaults, not invariants.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::resample::ResampleFilter;

/// Ruler scale estimation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Start of the search band, as a fraction of the image height
    /// measured from the ruler edge.
    pub roi_start_fraction: f64,

    /// End of the search band, as a fraction of the image height
    /// measured from the ruler edge.
    pub roi_end_fraction: f64,

    /// Number of evenly spaced scanlines sampled inside the band.
    pub scanline_count: u32,

    /// Intensities below this value are black marks.
    pub binarization_threshold: u8,

    /// Narrowest accepted mark, as a fraction of the band width.
    pub min_mark_width_fraction: f64,

    /// Widest accepted mark, as a fraction of the band width.
    pub max_mark_width_fraction: f64,

    /// Allowed relative deviation of each mark from the first mark of
    /// its sequence.
    pub width_tolerance: f64,

    /// Shortest alternating sequence that counts as a ruler.
    pub min_alternating_runs: usize,
}

impl CalibrationConfig {
    pub const DEFAULT_ROI_START_FRACTION: f64 = 0.0;
    pub const DEFAULT_ROI_END_FRACTION: f64 = 0.25;
    pub const DEFAULT_SCANLINE_COUNT: u32 = 7;
    pub const DEFAULT_BINARIZATION_THRESHOLD: u8 = 150;
    pub const DEFAULT_MIN_MARK_WIDTH_FRACTION: f64 = 0.01;
    pub const DEFAULT_MAX_MARK_WIDTH_FRACTION: f64 = 0.30;
    pub const DEFAULT_WIDTH_TOLERANCE: f64 = 0.40;
    pub const DEFAULT_MIN_ALTERNATING_RUNS: usize = 3;

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.roi_start_fraction)
            || !(self.roi_start_fraction..=1.0).contains(&self.roi_end_fraction)
            || self.roi_start_fraction >= self.roi_end_fraction
        {
            return Err(ConfigError(format!(
                "ruler band {}..{} must satisfy 0 <= start < end <= 1",
                self.roi_start_fraction, self.roi_end_fraction
            )));
        }
        if self.scanline_count == 0 {
            return Err(ConfigError("scanline_count must be at least 1".into()));
        }
        if self.min_mark_width_fraction < 0.0
            || self.min_mark_width_fraction > self.max_mark_width_fraction
            || self.max_mark_width_fraction > 1.0
        {
            return Err(ConfigError(format!(
                "mark width window {}..{} must satisfy 0 <= min <= max <= 1",
                self.min_mark_width_fraction, self.max_mark_width_fraction
            )));
        }
        if !(0.0..=1.0).contains(&self.width_tolerance) {
            return Err(ConfigError(format!(
                "width_tolerance {} must be in 0..=1",
                self.width_tolerance
            )));
        }
        if self.min_alternating_runs < 2 {
            return Err(ConfigError(
                "min_alternating_runs must be at least 2".into(),
            ));
        }
        Ok(())
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            roi_start_fraction: Self::DEFAULT_ROI_START_FRACTION,
            roi_end_fraction: Self::DEFAULT_ROI_END_FRACTION,
            scanline_count: Self::DEFAULT_SCANLINE_COUNT,
            binarization_threshold: Self::DEFAULT_BINARIZATION_THRESHOLD,
            min_mark_width_fraction: Self::DEFAULT_MIN_MARK_WIDTH_FRACTION,
            max_mark_width_fraction: Self::DEFAULT_MAX_MARK_WIDTH_FRACTION,
            width_tolerance: Self::DEFAULT_WIDTH_TOLERANCE,
            min_alternating_runs: Self::DEFAULT_MIN_ALTERNATING_RUNS,
        }
    }
}

/// Foreground extraction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Maximum per-channel distance from the background colour for a
    /// pixel to count as background.
    pub background_tolerance: u8,

    /// Side of the square corner patches used for background voting, as a
    /// fraction of the shorter image side.
    pub corner_sample_fraction: f64,

    /// Radius of the morphological open/close that removes speckle and
    /// fills pinholes. `0` disables cleanup.
    pub cleanup_radius: u8,

    /// Regions smaller than this fraction of the image area are ignored.
    pub min_region_fraction: f64,

    /// Distance in pixels over which alpha ramps up from the region
    /// boundary. `0` produces a hard mask.
    pub feather_radius: u8,
}

impl ExtractionConfig {
    pub const DEFAULT_BACKGROUND_TOLERANCE: u8 = 35;
    pub const DEFAULT_CORNER_SAMPLE_FRACTION: f64 = 0.05;
    pub const DEFAULT_CLEANUP_RADIUS: u8 = 2;
    pub const DEFAULT_MIN_REGION_FRACTION: f64 = 0.001;
    pub const DEFAULT_FEATHER_RADIUS: u8 = 5;

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=0.5).contains(&self.corner_sample_fraction) || self.corner_sample_fraction == 0.0
        {
            return Err(ConfigError(format!(
                "corner_sample_fraction {} must be in (0, 0.5]",
                self.corner_sample_fraction
            )));
        }
        if !(0.0..1.0).contains(&self.min_region_fraction) {
            return Err(ConfigError(format!(
                "min_region_fraction {} must be in 0..1",
                self.min_region_fraction
            )));
        }
        Ok(())
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            background_tolerance: Self::DEFAULT_BACKGROUND_TOLERANCE,
            corner_sample_fraction: Self::DEFAULT_CORNER_SAMPLE_FRACTION,
            cleanup_radius: Self::DEFAULT_CLEANUP_RADIUS,
            min_region_fraction: Self::DEFAULT_MIN_REGION_FRACTION,
            feather_radius: Self::DEFAULT_FEATHER_RADIUS,
        }
    }
}

/// Width of the overlap band between two blended neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendWidth {
    /// A fixed number of pixels, capped at half the smaller neighbour.
    Fixed(u32),
    /// A fraction of the smaller neighbour's extent along the blend axis.
    Proportional(f64),
}

impl Default for BlendWidth {
    fn default() -> Self {
        Self::Proportional(0.1)
    }
}

impl BlendWidth {
    /// Overlap in pixels between neighbours whose extents along the blend
    /// axis are `a` and `b`.
    #[must_use]
    pub fn resolve(self, a: u32, b: u32) -> u32 {
        let smaller = a.min(b);
        let wanted = match self {
            Self::Fixed(px) => px,
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            Self::Proportional(fraction) => (f64::from(smaller) * fraction).round() as u32,
        };
        wanted.min(smaller / 2)
    }
}

/// Canvas placement parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Gap between node groups that are not blended together.
    pub padding: u32,

    /// Empty border around everything placed on the canvas.
    pub margin: u32,

    /// Overlap between blended neighbours.
    pub blend_width: BlendWidth,

    /// Output resolution. `None` keeps the measured resolution.
    pub output_pixels_per_cm: Option<f64>,

    /// Filter used when rescaling photos and the ruler template.
    pub resample_filter: ResampleFilter,

    /// Largest allowed canvas side.
    ///
    /// Checked before any photo is resampled, so it also bounds every
    /// node buffer. Only the canvas itself is reserved fallibly; node
    /// buffers use ordinary allocation, so raise the limits only as far
    /// as the host can hold a canvas plus its nodes.
    pub max_canvas_dimension: u32,

    /// Largest allowed canvas area. Bounds node buffers the same way as
    /// [`max_canvas_dimension`](Self::max_canvas_dimension).
    pub max_canvas_pixels: u64,

    /// Gap between the lowest photo and the digital ruler.
    pub ruler_padding: u32,

    /// Place 180°-rotated copies of the Left/Right photos beside Reverse.
    pub mirror_sides_on_reverse: bool,
}

impl LayoutConfig {
    pub const DEFAULT_PADDING: u32 = 100;
    pub const DEFAULT_MARGIN: u32 = 100;
    pub const DEFAULT_MAX_CANVAS_DIMENSION: u32 = 30_000;
    pub const DEFAULT_MAX_CANVAS_PIXELS: u64 = 400_000_000;
    pub const DEFAULT_RULER_PADDING: u32 = 100;

    fn validate(&self) -> Result<(), ConfigError> {
        if let BlendWidth::Proportional(fraction) = self.blend_width
            && !(0.0..=0.5).contains(&fraction)
        {
            return Err(ConfigError(format!(
                "proportional blend width {fraction} must be in 0..=0.5"
            )));
        }
        if let Some(ppcm) = self.output_pixels_per_cm
            && !(ppcm.is_finite() && ppcm > 1.0)
        {
            return Err(ConfigError(format!(
                "output_pixels_per_cm {ppcm} must be finite and greater than 1"
            )));
        }
        if self.max_canvas_dimension == 0 || self.max_canvas_pixels == 0 {
            return Err(ConfigError("canvas limits must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            padding: Self::DEFAULT_PADDING,
            margin: Self::DEFAULT_MARGIN,
            blend_width: BlendWidth::default(),
            output_pixels_per_cm: None,
            resample_filter: ResampleFilter::default(),
            max_canvas_dimension: Self::DEFAULT_MAX_CANVAS_DIMENSION,
            max_canvas_pixels: Self::DEFAULT_MAX_CANVAS_PIXELS,
            ruler_padding: Self::DEFAULT_RULER_PADDING,
            mirror_sides_on_reverse: false,
        }
    }
}

/// Colour the canvas starts as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanvasBackground {
    #[default]
    White,
    Black,
    Transparent,
    Color([u8; 3]),
}

impl CanvasBackground {
    /// The RGBA pixel value.
    #[must_use]
    pub const fn rgba(self) -> [u8; 4] {
        match self {
            Self::White => [255, 255, 255, 255],
            Self::Black => [0, 0, 0, 255],
            Self::Transparent => [0, 0, 0, 0],
            Self::Color([r, g, b]) => [r, g, b, 255],
        }
    }
}

/// Logo placement below the composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogoConfig {
    pub enabled: bool,
    /// Wider logos are shrunk to this fraction of the content width.
    pub max_width_fraction: f64,
    /// Gap above and below the logo.
    pub padding: u32,
}

impl LogoConfig {
    pub const DEFAULT_MAX_WIDTH_FRACTION: f64 = 0.70;
    pub const DEFAULT_PADDING: u32 = 30;
}

impl Default for LogoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_width_fraction: Self::DEFAULT_MAX_WIDTH_FRACTION,
            padding: Self::DEFAULT_PADDING,
        }
    }
}

/// Rendering parameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub background: CanvasBackground,
    pub logo: LogoConfig,
}

impl RenderConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let fraction = self.logo.max_width_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(ConfigError(format!(
                "logo max_width_fraction {fraction} must be in (0, 1]"
            )));
        }
        Ok(())
    }
}

/// Configuration for a whole artifact run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositionConfig {
    pub calibration: CalibrationConfig,
    pub extraction: ExtractionConfig,
    pub layout: LayoutConfig,
    pub render: RenderConfig,
}

impl CompositionConfig {
    /// Check every tunable is in range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.calibration.validate()?;
        self.extraction.validate()?;
        self.layout.validate()?;
        self.render.validate()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        CompositionConfig::default().validate().unwrap();
    }

    #[test]
    fn inverted_ruler_band_is_rejected() {
        let mut config = CompositionConfig::default();
        config.calibration.roi_start_fraction = 0.3;
        config.calibration.roi_end_fraction = 0.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let json = r#"{ "layout": { "padding": 40, "blend_width": { "fixed": 12 } } }"#;
        let config: CompositionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.layout.padding, 40);
        assert_eq!(config.layout.blend_width, BlendWidth::Fixed(12));
        assert_eq!(config.layout.margin, LayoutConfig::DEFAULT_MARGIN);
        assert_eq!(config.calibration, CalibrationConfig::default());
    }

    #[test]
    fn blend_width_is_capped_at_half_the_smaller_extent() {
        assert_eq!(BlendWidth::Fixed(500).resolve(100, 300), 50);
        assert_eq!(BlendWidth::Proportional(0.1).resolve(400, 1000), 40);
        assert_eq!(BlendWidth::Fixed(0).resolve(400, 1000), 0);
    }

    #[test]
    fn transparent_background_has_zero_alpha() {
        assert_eq!(CanvasBackground::Transparent.rgba()[3], 0);
        assert_eq!(CanvasBackground::Color([1, 2, 3]).rgba(), [1, 2, 3, 255]);
    }
}
