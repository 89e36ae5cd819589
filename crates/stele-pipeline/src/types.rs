//! Shared geometry, role, and scale types for the stele compositing core.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;

/// Re-export `GrayImage` so downstream crates can reference
/// intermediate masks without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbaImage` so downstream crates can hand decoded views
/// to the pipeline without depending on `image` directly.
pub use image::RgbaImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create new dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Dimensions of any image buffer.
    #[must_use]
    pub fn of<I: image::GenericImageView>(image: &I) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height }
    }

    /// Total pixel count.
    #[must_use]
    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// `true` when either side is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Top-left corner of a placed element on the output canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    /// Pixels from the left canvas edge.
    pub x: u32,
    /// Pixels from the top canvas edge.
    pub y: u32,
}

impl Position {
    /// Create a new position.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned pixel rectangle. Right and bottom edges are exclusive.
///
/// Used both for bounding boxes in source-image space and for placed
/// rectangles in canvas space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle anchored at `position` with the given size.
    #[must_use]
    pub const fn at(position: Position, size: Dimensions) -> Self {
        Self::new(position.x, position.y, size.width, size.height)
    }

    /// Exclusive right edge.
    #[must_use]
    pub const fn right(self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    #[must_use]
    pub const fn bottom(self) -> u32 {
        self.y + self.height
    }

    #[must_use]
    pub const fn position(self) -> Position {
        Position::new(self.x, self.y)
    }

    #[must_use]
    pub const fn dimensions(self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    #[must_use]
    pub const fn area(self) -> u64 {
        self.dimensions().area()
    }

    /// Overlapping region of two rectangles, if any pixel is shared.
    #[must_use]
    pub fn intersection(self, other: Self) -> Option<Self> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        (x0 < x1 && y0 < y1).then(|| Self::new(x0, y0, x1 - x0, y1 - y0))
    }

    /// Smallest rectangle containing both.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = self.right().max(other.right());
        let y1 = self.bottom().max(other.bottom());
        Self::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Ratio of the long side to the short side (always `>= 1`).
    #[must_use]
    pub fn elongation(self) -> f64 {
        let long = f64::from(self.width.max(self.height));
        let short = f64::from(self.width.min(self.height).max(1));
        long / short
    }
}

/// Measured physical scale of an artifact photo set.
///
/// Produced once per artifact and shared by every resize and layout
/// step that follows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleEstimate {
    /// Pixels per physical centimetre. Always greater than 1.
    pub pixels_per_cm: f64,
    /// Number of scanline candidates that contributed to the median.
    pub sample_count: usize,
}

impl ScaleEstimate {
    /// Build an estimate, rejecting degenerate scales.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::DegenerateScale`] if `pixels_per_cm`
    /// is not finite or is `<= 1`.
    pub fn new(pixels_per_cm: f64, sample_count: usize) -> Result<Self, CalibrationError> {
        if !pixels_per_cm.is_finite() || pixels_per_cm <= 1.0 {
            return Err(CalibrationError::DegenerateScale { pixels_per_cm });
        }
        Ok(Self {
            pixels_per_cm,
            sample_count,
        })
    }

    /// Convert a pixel length measured at this scale to centimetres.
    #[must_use]
    pub fn to_cm(self, pixels: u32) -> f64 {
        f64::from(pixels) / self.pixels_per_cm
    }
}

/// Physical size of the artifact, derived from the obverse bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalSize {
    pub width_cm: f64,
    pub height_cm: f64,
}

/// One of the six fixed single-photo sides of an artifact.
///
/// The derived ordering (`Obverse` first) is the order nodes are
/// emitted in a [`CanvasPlan`](crate::layout::CanvasPlan).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideRole {
    Obverse,
    Reverse,
    Top,
    Bottom,
    Left,
    Right,
}

impl SideRole {
    /// All roles in canonical order.
    pub const ALL: [Self; 6] = [
        Self::Obverse,
        Self::Reverse,
        Self::Top,
        Self::Bottom,
        Self::Left,
        Self::Right,
    ];

    /// The anchor this role represents, if it is Obverse or Reverse.
    #[must_use]
    pub const fn as_anchor(self) -> Option<Anchor> {
        match self {
            Self::Obverse => Some(Anchor::Obverse),
            Self::Reverse => Some(Anchor::Reverse),
            Self::Top | Self::Bottom | Self::Left | Self::Right => None,
        }
    }

    /// The edge direction this role represents, for the four fixed sides.
    #[must_use]
    pub const fn as_direction(self) -> Option<Direction> {
        match self {
            Self::Top => Some(Direction::Top),
            Self::Bottom => Some(Direction::Bottom),
            Self::Left => Some(Direction::Left),
            Self::Right => Some(Direction::Right),
            Self::Obverse | Self::Reverse => None,
        }
    }
}

impl fmt::Display for SideRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Obverse => "obverse",
            Self::Reverse => "reverse",
            Self::Top => "top",
            Self::Bottom => "bottom",
            Self::Left => "left",
            Self::Right => "right",
        })
    }
}

/// The two central anchor photos that other sides attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    #[default]
    Obverse,
    Reverse,
}

impl Anchor {
    pub const ALL: [Self; 2] = [Self::Obverse, Self::Reverse];

    #[must_use]
    pub const fn role(self) -> SideRole {
        match self {
            Self::Obverse => SideRole::Obverse,
            Self::Reverse => SideRole::Reverse,
        }
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.role().fmt(f)
    }
}

/// Edge of an anchor photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Top,
    Bottom,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Self; 4] = [Self::Top, Self::Bottom, Self::Left, Self::Right];

    /// `true` when photos in this direction stack along the x axis.
    #[must_use]
    pub const fn is_horizontal(self) -> bool {
        matches!(self, Self::Left | Self::Right)
    }

    /// The fixed side role that sits at the far end of this direction.
    #[must_use]
    pub const fn side_role(self) -> SideRole {
        match self {
            Self::Top => SideRole::Top,
            Self::Bottom => SideRole::Bottom,
            Self::Left => SideRole::Left,
            Self::Right => SideRole::Right,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.side_role().fmt(f)
    }
}

/// Where a view sits in an artifact's side assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewSlot {
    /// One of the six fixed single-photo sides.
    Primary(SideRole),
    /// Position `index` (0 = nearest the anchor) in an extended side.
    Extended {
        anchor: Anchor,
        direction: Direction,
        index: usize,
    },
}

impl fmt::Display for ViewSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary(role) => role.fmt(f),
            Self::Extended {
                anchor,
                direction,
                index,
            } => write!(f, "{anchor}-{direction}#{}", index + 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_intersection_is_exclusive_at_edges() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let touching = BoundingBox::new(10, 0, 5, 10);
        let overlapping = BoundingBox::new(8, 2, 5, 5);
        assert_eq!(a.intersection(touching), None);
        assert_eq!(
            a.intersection(overlapping),
            Some(BoundingBox::new(8, 2, 2, 5))
        );
    }

    #[test]
    fn bounding_box_union_covers_both() {
        let a = BoundingBox::new(5, 5, 10, 10);
        let b = BoundingBox::new(0, 12, 3, 10);
        assert_eq!(a.union(b), BoundingBox::new(0, 5, 15, 17));
    }

    #[test]
    fn elongation_is_orientation_independent() {
        let wide = BoundingBox::new(0, 0, 300, 20);
        let tall = BoundingBox::new(0, 0, 20, 300);
        assert!((wide.elongation() - 15.0).abs() < f64::EPSILON);
        assert!((wide.elongation() - tall.elongation()).abs() < f64::EPSILON);
    }

    #[test]
    fn scale_estimate_rejects_degenerate_values() {
        assert!(ScaleEstimate::new(1.0, 4).is_err());
        assert!(ScaleEstimate::new(f64::NAN, 4).is_err());
        assert!(ScaleEstimate::new(20.0, 4).is_ok());
    }

    #[test]
    fn slot_display_names_are_operator_friendly() {
        assert_eq!(ViewSlot::Primary(SideRole::Reverse).to_string(), "reverse");
        let slot = ViewSlot::Extended {
            anchor: Anchor::Obverse,
            direction: Direction::Left,
            index: 0,
        };
        assert_eq!(slot.to_string(), "obverse-left#1");
    }

    #[test]
    fn side_roles_order_anchors_first() {
        let mut roles = SideRole::ALL;
        roles.reverse();
        roles.sort();
        assert_eq!(roles[0], SideRole::Obverse);
        assert_eq!(roles[1], SideRole::Reverse);
    }
}
