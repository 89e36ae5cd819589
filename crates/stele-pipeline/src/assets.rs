//! Digital ruler templates and the optional logo.
//!
//! Assets are decoded once by the caller and shared read-only between
//! every artifact in a batch.

use std::collections::BTreeMap;
use std::fmt;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::{Asset, RenderError};
use crate::resample::{ResampleFilter, resize_to, scaled_dimensions};
use crate::types::{Dimensions, ScaleEstimate};

/// Nominal length of a digital ruler template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RulerSize {
    #[serde(rename = "1cm")]
    OneCm,
    #[serde(rename = "2cm")]
    TwoCm,
    #[serde(rename = "5cm")]
    FiveCm,
}

impl RulerSize {
    pub const ALL: [Self; 3] = [Self::OneCm, Self::TwoCm, Self::FiveCm];

    /// Physical width of the template artwork, including its end caps
    /// and labels.
    #[must_use]
    pub const fn default_physical_width_cm(self) -> f64 {
        match self {
            Self::OneCm => 1.752_173_913_043_478,
            Self::TwoCm => 2.802_631_578_947_368,
            Self::FiveCm => 5.955_752_212_389_381,
        }
    }

    /// Template suited to an object `width_cm` wide: the smallest one the
    /// object is narrower than, or the largest.
    #[must_use]
    pub fn for_object_width(width_cm: f64) -> Self {
        Self::ALL
            .into_iter()
            .find(|size| width_cm < size.default_physical_width_cm())
            .unwrap_or(Self::FiveCm)
    }
}

impl fmt::Display for RulerSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OneCm => "1cm",
            Self::TwoCm => "2cm",
            Self::FiveCm => "5cm",
        })
    }
}

/// A ruler image together with the physical width it depicts.
#[derive(Debug, Clone, PartialEq)]
pub struct RulerTemplate {
    pub image: RgbaImage,
    pub physical_width_cm: f64,
}

/// Read-only assets shared across artifacts.
#[derive(Debug, Clone, Default)]
pub struct AssetBundle {
    rulers: BTreeMap<RulerSize, RulerTemplate>,
    logo: Option<RgbaImage>,
}

impl AssetBundle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ruler template with its standard physical width.
    #[must_use]
    pub fn with_ruler(self, size: RulerSize, image: RgbaImage) -> Self {
        let physical_width_cm = size.default_physical_width_cm();
        self.with_ruler_template(
            size,
            RulerTemplate {
                image,
                physical_width_cm,
            },
        )
    }

    #[must_use]
    pub fn with_ruler_template(mut self, size: RulerSize, template: RulerTemplate) -> Self {
        self.rulers.insert(size, template);
        self
    }

    #[must_use]
    pub fn with_logo(mut self, logo: RgbaImage) -> Self {
        self.logo = Some(logo);
        self
    }

    #[must_use]
    pub fn ruler(&self, size: RulerSize) -> Option<&RulerTemplate> {
        self.rulers.get(&size)
    }

    #[must_use]
    pub const fn logo(&self) -> Option<&RgbaImage> {
        self.logo.as_ref()
    }
}

/// A ruler template scaled to the canvas resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledRuler {
    pub size: RulerSize,
    pub image: RgbaImage,
}

/// Pick the template for an object `object_width_cm` wide and scale it so
/// its physical width matches `scale`.
///
/// # Errors
///
/// Returns [`RenderError::AssetNotFound`] if the bundle lacks the
/// selected template.
pub fn prepare_ruler(
    assets: &AssetBundle,
    object_width_cm: f64,
    scale: ScaleEstimate,
    filter: ResampleFilter,
) -> Result<ScaledRuler, RenderError> {
    let size = RulerSize::for_object_width(object_width_cm);
    let template = assets
        .ruler(size)
        .ok_or(RenderError::AssetNotFound(Asset::RulerTemplate(size)))?;

    let source = Dimensions::of(&template.image);
    let target_width = scale.pixels_per_cm * template.physical_width_cm;
    let factor = target_width / f64::from(source.width.max(1));
    let target = scaled_dimensions(source, factor);

    tracing::debug!(%size, object_width_cm, %target, "digital ruler scaled");
    Ok(ScaledRuler {
        size,
        image: resize_to(&template.image, target, filter),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn blank(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, image::Rgba([0, 0, 0, 255]))
    }

    #[test]
    fn template_choice_follows_object_width() {
        assert_eq!(RulerSize::for_object_width(1.2), RulerSize::OneCm);
        assert_eq!(RulerSize::for_object_width(2.0), RulerSize::TwoCm);
        assert_eq!(RulerSize::for_object_width(2.9), RulerSize::FiveCm);
        assert_eq!(RulerSize::for_object_width(40.0), RulerSize::FiveCm);
    }

    #[test]
    fn ruler_is_scaled_to_physical_width() {
        let assets = AssetBundle::new().with_ruler(RulerSize::FiveCm, blank(596, 60));
        let scale = ScaleEstimate::new(20.0, 10).unwrap();
        let ruler = prepare_ruler(&assets, 12.0, scale, ResampleFilter::Triangle).unwrap();
        // 20 px/cm * 5.9557 cm = 119.1 px
        assert_eq!(ruler.image.width(), 119);
        assert_eq!(ruler.image.height(), 12);
        assert_eq!(ruler.size, RulerSize::FiveCm);
    }

    #[test]
    fn missing_template_is_reported() {
        let assets = AssetBundle::new().with_ruler(RulerSize::FiveCm, blank(10, 2));
        let scale = ScaleEstimate::new(20.0, 10).unwrap();
        let err = prepare_ruler(&assets, 1.0, scale, ResampleFilter::Triangle);
        assert_eq!(
            err,
            Err(RenderError::AssetNotFound(Asset::RulerTemplate(
                RulerSize::OneCm
            )))
        );
    }

    #[test]
    fn sizes_serialize_as_lengths() {
        assert_eq!(
            serde_json::to_string(&RulerSize::TwoCm).unwrap(),
            "\"2cm\""
        );
    }
}
