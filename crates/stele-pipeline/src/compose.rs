//! Rendering a [`CanvasPlan`] to a single raster.
//!
//! The canvas is the only mutable buffer. Anchors and fixed sides are
//! drawn first with plain alpha-over. Each strip photo is then drawn over
//! its inner neighbour, faded across their shared band by a linear
//! gradient. The digital ruler and logo go on last with hard edges.

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::assets::AssetBundle;
use crate::config::{CanvasBackground, LogoConfig, RenderConfig};
use crate::error::{Asset, RenderError, Warning};
use crate::layout::{CanvasPlan, LayoutNode};
use crate::resample::{ResampleFilter, fit_width, resize_to};
use crate::types::{BoundingBox, Dimensions, Direction, Position};

/// Counters from one render pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderMetrics {
    pub nodes_drawn: usize,
    pub blend_bands: usize,
    /// Canvas pixels written with a gradient weight below one.
    pub blended_pixels: u64,
    pub ruler_drawn: bool,
    pub logo_drawn: bool,
}

/// The finished composite.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub image: RgbaImage,
    pub warnings: Vec<Warning>,
    pub metrics: RenderMetrics,
}

/// Draw every node, blend band, the ruler and the optional logo.
///
/// # Errors
///
/// Returns [`RenderError::CanvasAllocationFailed`] if the canvas buffer
/// cannot be reserved. No partial canvas is returned.
pub fn render(
    plan: CanvasPlan,
    assets: &AssetBundle,
    config: &RenderConfig,
) -> Result<Rendered, RenderError> {
    let mut warnings = Vec::new();
    let logo = place_logo(&plan, assets, &config.logo, &mut warnings);
    let size = logo.as_ref().map_or(plan.size, |(_, _, size)| *size);

    let mut canvas = allocate_canvas(size, config.background)?;
    let mut metrics = RenderMetrics::default();

    for node in plan.nodes.iter().filter(|n| !n.role.is_extended()) {
        draw_node(&mut canvas, node, None);
        metrics.nodes_drawn += 1;
    }

    // Edges are stored in adjacency order, so each strip photo lands on a
    // neighbour that is already drawn.
    for edge in &plan.edges {
        let Some(outer) = plan.nodes.get(edge.outer) else {
            continue;
        };
        let band = plan.band(edge).map(|band| (band, edge.direction));
        if band.is_some() {
            metrics.blend_bands += 1;
        }
        metrics.blended_pixels += draw_node(&mut canvas, outer, band);
        metrics.nodes_drawn += 1;
        tracing::debug!(
            inner = edge.inner,
            outer = edge.outer,
            direction = %edge.direction,
            width = edge.width,
            "blend edge drawn"
        );
    }

    if let Some(slot) = &plan.ruler {
        overlay(&mut canvas, &slot.ruler.image, slot.rect.position());
        metrics.ruler_drawn = true;
    }
    if let Some((image, position, _)) = &logo {
        overlay(&mut canvas, image, *position);
        metrics.logo_drawn = true;
    }

    tracing::info!(
        canvas = %size,
        nodes = metrics.nodes_drawn,
        bands = metrics.blend_bands,
        "composite rendered"
    );
    Ok(Rendered {
        image: canvas,
        warnings,
        metrics,
    })
}

/// Allocate a canvas filled with `background`, reporting exhaustion as an
/// error instead of aborting.
///
/// # Errors
///
/// Returns [`RenderError::CanvasAllocationFailed`] if the buffer size
/// overflows or cannot be reserved.
pub fn allocate_canvas(
    size: Dimensions,
    background: CanvasBackground,
) -> Result<RgbaImage, RenderError> {
    let failed = RenderError::CanvasAllocationFailed {
        width: size.width,
        height: size.height,
    };
    let pixels = usize::try_from(size.area()).map_err(|_| failed.clone())?;
    let bytes = pixels.checked_mul(4).ok_or_else(|| failed.clone())?;

    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(bytes)
        .map_err(|_| failed.clone())?;
    buffer.extend(std::iter::repeat_n(background.rgba(), pixels).flatten());
    RgbaImage::from_raw(size.width, size.height, buffer).ok_or(failed)
}

/// Opacity of an outer strip pixel inside its blend band.
///
/// One at the band's outer side, zero at the inner side, sampled at pixel
/// centres so an odd-width band has exactly one half at its middle.
#[must_use]
pub fn gradient_weight(direction: Direction, band: BoundingBox, x: u32, y: u32) -> f64 {
    let (offset, extent) = match direction {
        Direction::Left => (x.saturating_sub(band.x), band.width),
        Direction::Right => ((band.right() - 1).saturating_sub(x), band.width),
        Direction::Top => (y.saturating_sub(band.y), band.height),
        Direction::Bottom => ((band.bottom() - 1).saturating_sub(y), band.height),
    };
    if extent == 0 {
        return 1.0;
    }
    (1.0 - (f64::from(offset) + 0.5) / f64::from(extent)).clamp(0.0, 1.0)
}

/// `dst = src*a + dst*(1-a)` with `a` the source alpha scaled by `weight`.
///
/// Colour is weighted by the destination alpha as well, so drawing onto a
/// transparent canvas keeps the source colour instead of darkening it.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn blend_pixel(dst: &mut Rgba<u8>, src: Rgba<u8>, weight: f64) {
    let a = weight * f64::from(src[3]) / 255.0;
    if a <= 0.0 {
        return;
    }
    let da = f64::from(dst[3]) / 255.0 * (1.0 - a);
    let out = a + da;
    let to_u8 = |v: f64| v.round().clamp(0.0, 255.0) as u8;
    let mix = |s: u8, d: u8| to_u8(f64::from(s).mul_add(a, f64::from(d) * da) / out);
    dst[0] = mix(src[0], dst[0]);
    dst[1] = mix(src[1], dst[1]);
    dst[2] = mix(src[2], dst[2]);
    dst[3] = to_u8(out * 255.0);
}

/// Draw a node, fading it across `band` if given. Returns the number of
/// pixels drawn with a weight below one.
fn draw_node(
    canvas: &mut RgbaImage,
    node: &LayoutNode,
    band: Option<(BoundingBox, Direction)>,
) -> u64 {
    let mut blended = 0;
    for (x, y, &src) in node.image.enumerate_pixels() {
        let (cx, cy) = (node.rect.x + x, node.rect.y + y);
        let weight = match band {
            Some((band, direction)) if contains(band, cx, cy) => {
                blended += 1;
                gradient_weight(direction, band, cx, cy)
            }
            _ => 1.0,
        };
        if let Some(dst) = canvas.get_pixel_mut_checked(cx, cy) {
            blend_pixel(dst, src, weight);
        }
    }
    blended
}

/// Hard-edged alpha-over of `image` at `position`.
fn overlay(canvas: &mut RgbaImage, image: &RgbaImage, position: Position) {
    for (x, y, &src) in image.enumerate_pixels() {
        if let Some(dst) = canvas.get_pixel_mut_checked(position.x + x, position.y + y) {
            blend_pixel(dst, src, 1.0);
        }
    }
}

const fn contains(rect: BoundingBox, x: u32, y: u32) -> bool {
    x >= rect.x && x < rect.right() && y >= rect.y && y < rect.bottom()
}

/// Scale the logo, centre it below the content and grow the canvas to
/// fit. A requested but missing logo becomes a warning.
fn place_logo(
    plan: &CanvasPlan,
    assets: &AssetBundle,
    config: &LogoConfig,
    warnings: &mut Vec<Warning>,
) -> Option<(RgbaImage, Position, Dimensions)> {
    if !config.enabled {
        return None;
    }
    let Some(source) = assets.logo() else {
        tracing::warn!(asset = %Asset::Logo, "logo enabled but not provided; skipping");
        warnings.push(Warning::LogoMissing);
        return None;
    };

    let content = plan.content;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let max_width = (f64::from(content.width) * config.max_width_fraction).round() as u32;
    let source_size = Dimensions::of(source);
    let target = if source_size.width > max_width {
        fit_width(source_size, max_width.max(1))
    } else {
        source_size
    };
    let image = resize_to(source, target, ResampleFilter::Triangle);

    let margin = plan.size.height.saturating_sub(content.bottom());
    let position = Position::new(
        plan.size.width.saturating_sub(target.width) / 2,
        content.bottom() + config.padding,
    );
    let size = Dimensions::new(
        plan.size.width.max(target.width),
        plan.size
            .height
            .max(position.y + target.height + margin.max(config.padding)),
    );
    Some((image, position, size))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{GrayImage, Luma};

    use super::*;
    use crate::assets::{RulerSize, ScaledRuler};
    use crate::config::{BlendWidth, LayoutConfig};
    use crate::extract::ExtractedObject;
    use crate::layout::{SideAssignments, plan_layout};
    use crate::types::{Anchor, ScaleEstimate, SideRole, ViewSlot};

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    fn solid(width: u32, height: u32, color: Rgba<u8>) -> ExtractedObject {
        ExtractedObject {
            bounds: BoundingBox::new(0, 0, width, height),
            alpha: GrayImage::from_pixel(width, height, Luma([255])),
            cutout: RgbaImage::from_pixel(width, height, color),
            area: u64::from(width) * u64::from(height),
        }
    }

    fn red_with_blue_strip(blend: BlendWidth) -> CanvasPlan {
        let mut views = SideAssignments::new();
        views
            .insert(ViewSlot::Primary(SideRole::Obverse), solid(100, 100, RED))
            .unwrap();
        views
            .insert(ViewSlot::Primary(SideRole::Reverse), solid(100, 100, RED))
            .unwrap();
        views.push_extended(Anchor::Obverse, Direction::Right, solid(100, 100, BLUE));
        let config = LayoutConfig {
            blend_width: blend,
            margin: 10,
            padding: 10,
            ..LayoutConfig::default()
        };
        plan_layout(&views, ScaleEstimate::new(20.0, 3).unwrap(), None, &config).unwrap()
    }

    fn near(a: Rgba<u8>, b: Rgba<u8>) -> bool {
        a.0.iter().zip(b.0).all(|(&x, y)| x.abs_diff(y) <= 1)
    }

    #[test]
    fn band_midpoint_is_an_even_mix() {
        let plan = red_with_blue_strip(BlendWidth::Fixed(41));
        let band = plan.band(&plan.edges[0]).unwrap();
        assert_eq!(band.width, 41);

        let rendered = render(plan, &AssetBundle::new(), &RenderConfig::default()).unwrap();
        let y = band.y + band.height / 2;
        let middle = *rendered.image.get_pixel(band.x + 20, y);
        assert!(near(middle, Rgba([128, 0, 128, 255])), "{middle:?}");

        assert_eq!(*rendered.image.get_pixel(band.x - 1, y), RED);
        assert_eq!(*rendered.image.get_pixel(band.right(), y), BLUE);
        assert_eq!(rendered.metrics.blend_bands, 1);
        assert_eq!(rendered.metrics.blended_pixels, 41 * 100);
    }

    #[test]
    fn gradient_fades_towards_the_inner_neighbour() {
        let plan = red_with_blue_strip(BlendWidth::Fixed(41));
        let band = plan.band(&plan.edges[0]).unwrap();
        let rendered = render(plan, &AssetBundle::new(), &RenderConfig::default()).unwrap();
        let y = band.y + 5;
        let blues: Vec<u8> = (band.x..band.right())
            .map(|x| rendered.image.get_pixel(x, y)[2])
            .collect();
        assert!(blues.windows(2).all(|w| w[0] <= w[1]), "{blues:?}");
        assert!(blues[0] < 10);
        assert!(blues[40] > 245);
    }

    #[test]
    fn zero_width_is_a_hard_edge() {
        let plan = red_with_blue_strip(BlendWidth::Fixed(0));
        assert_eq!(plan.band(&plan.edges[0]), None);
        let obverse = plan.nodes[0].rect;

        let rendered = render(plan, &AssetBundle::new(), &RenderConfig::default()).unwrap();
        let y = obverse.y + 50;
        assert_eq!(*rendered.image.get_pixel(obverse.right() - 1, y), RED);
        assert_eq!(*rendered.image.get_pixel(obverse.right(), y), BLUE);
        assert_eq!(rendered.metrics.blended_pixels, 0);
    }

    #[test]
    fn canvas_matches_plan_and_background() {
        let plan = red_with_blue_strip(BlendWidth::Fixed(10));
        let size = plan.size;
        let config = RenderConfig {
            background: CanvasBackground::Transparent,
            ..RenderConfig::default()
        };
        let rendered = render(plan, &AssetBundle::new(), &config).unwrap();
        assert_eq!(Dimensions::of(&rendered.image), size);
        assert_eq!(*rendered.image.get_pixel(0, 0), Rgba([0, 0, 0, 0]));
        assert!(rendered.warnings.is_empty());
    }

    #[test]
    fn ruler_is_drawn_in_its_slot() {
        let mut plan = red_with_blue_strip(BlendWidth::Fixed(10));
        let rect = BoundingBox::new(plan.content.x, plan.content.bottom() - 4, 20, 4);
        plan.ruler = Some(crate::layout::RulerSlot {
            ruler: ScaledRuler {
                size: RulerSize::OneCm,
                image: RgbaImage::from_pixel(20, 4, Rgba([1, 2, 3, 255])),
            },
            rect,
        });
        let rendered = render(plan, &AssetBundle::new(), &RenderConfig::default()).unwrap();
        assert_eq!(*rendered.image.get_pixel(rect.x + 3, rect.y + 1), Rgba([1, 2, 3, 255]));
        assert!(rendered.metrics.ruler_drawn);
    }

    #[test]
    fn missing_logo_is_a_warning() {
        let plan = red_with_blue_strip(BlendWidth::Fixed(10));
        let size = plan.size;
        let config = RenderConfig {
            logo: LogoConfig {
                enabled: true,
                ..LogoConfig::default()
            },
            ..RenderConfig::default()
        };
        let rendered = render(plan, &AssetBundle::new(), &config).unwrap();
        assert_eq!(rendered.warnings, vec![Warning::LogoMissing]);
        assert_eq!(Dimensions::of(&rendered.image), size);
    }

    #[test]
    fn logo_extends_the_canvas_below_the_content() {
        let plan = red_with_blue_strip(BlendWidth::Fixed(10));
        let content = plan.content;
        let size = plan.size;
        let assets = AssetBundle::new().with_logo(RgbaImage::from_pixel(400, 40, Rgba([9, 9, 9, 255])));
        let config = RenderConfig {
            logo: LogoConfig {
                enabled: true,
                max_width_fraction: 0.5,
                padding: 30,
            },
            ..RenderConfig::default()
        };
        let rendered = render(plan, &assets, &config).unwrap();
        assert!(rendered.metrics.logo_drawn);
        assert!(rendered.image.height() > size.height);
        let logo_top = content.bottom() + 30;
        let centre = rendered.image.width() / 2;
        assert_eq!(*rendered.image.get_pixel(centre, logo_top + 1), Rgba([9, 9, 9, 255]));
    }

    #[test]
    fn impossible_canvas_is_an_error() {
        let err = allocate_canvas(
            Dimensions::new(u32::MAX, u32::MAX),
            CanvasBackground::White,
        )
        .unwrap_err();
        assert_eq!(
            err,
            RenderError::CanvasAllocationFailed {
                width: u32::MAX,
                height: u32::MAX
            }
        );
    }

    #[test]
    fn translucent_source_keeps_its_colour_on_transparent_canvas() {
        let mut dst = Rgba([0, 0, 0, 0]);
        blend_pixel(&mut dst, Rgba([255, 0, 0, 255]), 0.5);
        assert_eq!(dst, Rgba([255, 0, 0, 128]));

        let mut dst = Rgba([0, 0, 255, 255]);
        blend_pixel(&mut dst, Rgba([255, 0, 0, 255]), 0.5);
        assert_eq!(dst, Rgba([128, 0, 128, 255]));
    }

    #[test]
    fn gradient_is_symmetric_across_directions() {
        let band = BoundingBox::new(10, 20, 5, 5);
        assert!((gradient_weight(Direction::Left, band, 10, 22) - 0.9).abs() < 1e-9);
        assert!((gradient_weight(Direction::Right, band, 14, 22) - 0.9).abs() < 1e-9);
        assert!((gradient_weight(Direction::Top, band, 12, 20) - 0.9).abs() < 1e-9);
        assert!((gradient_weight(Direction::Bottom, band, 12, 24) - 0.9).abs() < 1e-9);
        assert!((gradient_weight(Direction::Left, band, 12, 22) - 0.5).abs() < 1e-9);
    }
}
