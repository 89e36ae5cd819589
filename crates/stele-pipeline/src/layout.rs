//! Side assignments and their placement on the output canvas.
//!
//! Obverse and Reverse are anchors stacked on a shared vertical axis,
//! Reverse below. Around each anchor, every direction can hold an
//! extended side (an ordered strip of extra photos, nearest first) and
//! one fixed side photo beyond it. Strip photos overlap their inner
//! neighbour by the blend width and are linked to it by a [`BlendEdge`].
//! Everything else is separated by padding.
//!
//! The legacy six-view layout is the case with no extended sides.
//!
//! Strip photos on the left and right are fitted to the anchor height and
//! those on the top and bottom to the anchor width, so every blend band
//! spans a full shared edge. Fixed sides keep their physical size.

use std::collections::BTreeMap;

use image::RgbaImage;
use image::imageops;

use crate::assets::ScaledRuler;
use crate::config::LayoutConfig;
use crate::error::{InputError, LayoutError};
use crate::extract::ExtractedObject;
use crate::resample::{fit_height, fit_width, resize_to, scaled_dimensions};
use crate::types::{
    Anchor, BoundingBox, Dimensions, Direction, Position, ScaleEstimate, SideRole, ViewSlot,
};

// ───────────────────────── Side assignments ─────────────────────────

/// Which photo occupies which logical side of an artifact.
///
/// Each of the six primary roles holds at most one photo. Each
/// (anchor, direction) pair holds an ordered extended side. Fixed sides
/// attach to Obverse unless [`attach`](Self::attach)ed elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct SideAssignments<T> {
    primary: BTreeMap<SideRole, T>,
    extended: BTreeMap<(Anchor, Direction), Vec<T>>,
    attachments: BTreeMap<Direction, Anchor>,
}

impl<T> Default for SideAssignments<T> {
    fn default() -> Self {
        Self {
            primary: BTreeMap::new(),
            extended: BTreeMap::new(),
            attachments: BTreeMap::new(),
        }
    }
}

impl<T> SideAssignments<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `item` in `slot`. Extended photos fill their strip in order,
    /// so an extended slot must name the next free index.
    ///
    /// # Errors
    ///
    /// Returns [`InputError::DuplicateSlot`] if a primary role is already
    /// taken or an extended index is already filled, and
    /// [`InputError::SlotOutOfOrder`] if an extended index skips ahead.
    pub fn insert(&mut self, slot: ViewSlot, item: T) -> Result<(), InputError> {
        match slot {
            ViewSlot::Primary(role) => {
                if self.primary.contains_key(&role) {
                    return Err(InputError::DuplicateSlot(slot));
                }
                self.primary.insert(role, item);
            }
            ViewSlot::Extended {
                anchor,
                direction,
                index,
            } => {
                let next = self.extended(anchor, direction).len();
                if index < next {
                    return Err(InputError::DuplicateSlot(slot));
                }
                if index > next {
                    return Err(InputError::SlotOutOfOrder { slot, next });
                }
                self.extended.entry((anchor, direction)).or_default().push(item);
            }
        }
        Ok(())
    }

    /// Append a photo to an extended side and return its slot.
    pub fn push_extended(&mut self, anchor: Anchor, direction: Direction, item: T) -> ViewSlot {
        let strip = self.extended.entry((anchor, direction)).or_default();
        strip.push(item);
        ViewSlot::Extended {
            anchor,
            direction,
            index: strip.len() - 1,
        }
    }

    /// Attach the fixed side photo for `side` to `anchor`.
    pub fn attach(&mut self, side: Direction, anchor: Anchor) {
        self.attachments.insert(side, anchor);
    }

    /// Anchor the fixed side photo for `side` sits against.
    #[must_use]
    pub fn attachment(&self, side: Direction) -> Anchor {
        self.attachments.get(&side).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn primary(&self, role: SideRole) -> Option<&T> {
        self.primary.get(&role)
    }

    #[must_use]
    pub fn extended(&self, anchor: Anchor, direction: Direction) -> &[T] {
        self.extended
            .get(&(anchor, direction))
            .map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn get(&self, slot: ViewSlot) -> Option<&T> {
        match slot {
            ViewSlot::Primary(role) => self.primary(role),
            ViewSlot::Extended {
                anchor,
                direction,
                index,
            } => self.extended(anchor, direction).get(index),
        }
    }

    /// Number of photos assigned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.primary.len() + self.extended.values().map(Vec::len).sum::<usize>()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every photo with its slot, primary roles first, in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = (ViewSlot, &T)> {
        let primary = self
            .primary
            .iter()
            .map(|(&role, item)| (ViewSlot::Primary(role), item));
        let extended = self.extended.iter().flat_map(|(&(anchor, direction), items)| {
            items.iter().enumerate().map(move |(index, item)| {
                (
                    ViewSlot::Extended {
                        anchor,
                        direction,
                        index,
                    },
                    item,
                )
            })
        });
        primary.chain(extended)
    }

    /// Transform every photo, keeping slots and attachments.
    pub fn map<U>(self, mut f: impl FnMut(ViewSlot, T) -> U) -> SideAssignments<U> {
        let primary = self
            .primary
            .into_iter()
            .map(|(role, item)| (role, f(ViewSlot::Primary(role), item)))
            .collect();
        let extended = self
            .extended
            .into_iter()
            .map(|((anchor, direction), items)| {
                let mapped = items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| {
                        f(
                            ViewSlot::Extended {
                                anchor,
                                direction,
                                index,
                            },
                            item,
                        )
                    })
                    .collect();
                ((anchor, direction), mapped)
            })
            .collect();
        SideAssignments {
            primary,
            extended,
            attachments: self.attachments,
        }
    }
}

impl<U, E> SideAssignments<Result<U, E>> {
    /// Collect every failure, or return the successful assignment.
    ///
    /// # Errors
    ///
    /// Returns every `(slot, error)` pair, in slot order, when any photo
    /// failed.
    pub fn transpose(self) -> Result<SideAssignments<U>, Vec<(ViewSlot, E)>> {
        let mut errors = Vec::new();
        let mut ok = SideAssignments {
            primary: BTreeMap::new(),
            extended: BTreeMap::new(),
            attachments: self.attachments.clone(),
        };
        for (role, item) in self.primary {
            match item {
                Ok(value) => {
                    ok.primary.insert(role, value);
                }
                Err(e) => errors.push((ViewSlot::Primary(role), e)),
            }
        }
        for ((anchor, direction), items) in self.extended {
            for (index, item) in items.into_iter().enumerate() {
                match item {
                    Ok(value) => {
                        ok.extended.entry((anchor, direction)).or_default().push(value);
                    }
                    Err(e) => errors.push((
                        ViewSlot::Extended {
                            anchor,
                            direction,
                            index,
                        },
                        e,
                    )),
                }
            }
        }
        if errors.is_empty() { Ok(ok) } else { Err(errors) }
    }
}

// ───────────────────────── Canvas plan ─────────────────────────

/// What a placed node depicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeRole {
    /// A photo from the side assignment.
    View(ViewSlot),
    /// A 180°-rotated copy of a fixed side, placed beside Reverse.
    Mirror { of: SideRole },
}

impl NodeRole {
    /// `true` for photos in an extended side.
    #[must_use]
    pub const fn is_extended(self) -> bool {
        matches!(self, Self::View(ViewSlot::Extended { .. }))
    }
}

/// A photo placed on the canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutNode {
    pub role: NodeRole,
    /// Bounding box of the object in its source photo.
    pub source_bounds: BoundingBox,
    /// Pixels at canvas resolution, exactly `rect` sized.
    pub image: RgbaImage,
    /// Placement in canvas pixels.
    pub rect: BoundingBox,
}

impl LayoutNode {
    #[must_use]
    pub const fn position(&self) -> Position {
        self.rect.position()
    }

    #[must_use]
    pub const fn size(&self) -> Dimensions {
        self.rect.dimensions()
    }
}

/// Overlap between a strip photo and its inner neighbour.
///
/// `outer` is drawn over `inner` with a gradient that fades out towards
/// `inner` across `width` pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendEdge {
    /// Index of the node nearer the anchor.
    pub inner: usize,
    /// Index of the node farther from the anchor.
    pub outer: usize,
    /// Direction from `inner` to `outer`.
    pub direction: Direction,
    pub width: u32,
}

/// The digital ruler's place on the canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct RulerSlot {
    pub ruler: ScaledRuler,
    pub rect: BoundingBox,
}

/// Complete placement of one artifact, consumed by the compositor.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasPlan {
    /// Anchors first, then fixed sides, then strips in adjacency order.
    pub nodes: Vec<LayoutNode>,
    pub edges: Vec<BlendEdge>,
    pub ruler: Option<RulerSlot>,
    /// Output canvas size, including the margin.
    pub size: Dimensions,
    /// Everything placed, excluding the margin.
    pub content: BoundingBox,
    /// Scale of the canvas, after any output resampling.
    pub scale: ScaleEstimate,
}

impl CanvasPlan {
    /// Canvas region shared by the two nodes of an edge.
    #[must_use]
    pub fn band(&self, edge: &BlendEdge) -> Option<BoundingBox> {
        let inner = self.nodes.get(edge.inner)?;
        let outer = self.nodes.get(edge.outer)?;
        inner.rect.intersection(outer.rect)
    }

    /// Nodes belonging to one extended side, nearest first.
    pub fn strip(&self, anchor: Anchor, direction: Direction) -> impl Iterator<Item = &LayoutNode> {
        self.nodes.iter().filter(move |node| {
            matches!(
                node.role,
                NodeRole::View(ViewSlot::Extended { anchor: a, direction: d, .. })
                    if a == anchor && d == direction
            )
        })
    }

    /// Index of the node with the given role.
    #[must_use]
    pub fn index_of(&self, role: NodeRole) -> Option<usize> {
        self.nodes.iter().position(|node| node.role == role)
    }
}

/// Scale of the output canvas for a measured scale.
#[must_use]
pub fn canvas_scale(scale: ScaleEstimate, config: &LayoutConfig) -> ScaleEstimate {
    config
        .output_pixels_per_cm
        .map_or(scale, |pixels_per_cm| ScaleEstimate {
            pixels_per_cm,
            sample_count: scale.sample_count,
        })
}

/// Place every assigned photo and the ruler on a canvas.
///
/// # Errors
///
/// Returns [`LayoutError::MissingRequiredSide`] if Obverse or Reverse is
/// unassigned, and [`LayoutError::LayoutOverflow`] if the canvas would
/// exceed the configured limits.
pub fn plan_layout(
    views: &SideAssignments<ExtractedObject>,
    scale: ScaleEstimate,
    ruler: Option<ScaledRuler>,
    config: &LayoutConfig,
) -> Result<CanvasPlan, LayoutError> {
    let anchor_object = |anchor: Anchor| {
        views
            .primary(anchor.role())
            .ok_or(LayoutError::MissingRequiredSide(anchor.role()))
    };
    let obverse_object = anchor_object(Anchor::Obverse)?;
    let reverse_object = anchor_object(Anchor::Reverse)?;

    let target = canvas_scale(scale, config);
    let factor = target.pixels_per_cm / scale.pixels_per_cm;
    let padding = i64::from(config.padding);

    let obverse = Cross::build(Anchor::Obverse, obverse_object, views, factor, config);
    let mut reverse = Cross::build(Anchor::Reverse, reverse_object, views, factor, config);

    // Reverse hangs below the whole obverse group, centred on the same axis.
    let obverse_bounds = obverse.bounds();
    let reverse_bounds = reverse.bounds();
    let dx = (obverse.anchor.frame.w - reverse.anchor.frame.w).div_euclid(2);
    let dy = obverse_bounds.bottom() + padding - reverse_bounds.y;
    reverse.shift(dx, dy);

    let mut content = obverse_bounds.union(reverse.bounds());
    let ruler_frame = ruler.as_ref().map(|r| {
        let (w, h) = (i64::from(r.image.width()), i64::from(r.image.height()));
        Frame {
            x: (obverse.anchor.frame.w - w).div_euclid(2),
            y: content.bottom() + i64::from(config.ruler_padding),
            w,
            h,
        }
    });
    if let Some(frame) = ruler_frame {
        content = content.union(frame);
    }

    let margin = i64::from(config.margin);
    let width = content.w + 2 * margin;
    let height = content.h + 2 * margin;
    check_limits(width, height, config)?;
    let (ox, oy) = (margin - content.x, margin - content.y);

    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    let anchors = [&obverse.anchor, &reverse.anchor];
    let fixed = obverse.fixed.iter().chain(&reverse.fixed);
    for draft in anchors.into_iter().chain(fixed) {
        nodes.push(draft.realize(ox, oy, config));
    }
    for (cross, anchor_index) in [(&obverse, 0), (&reverse, 1)] {
        for strip in &cross.strips {
            let mut inner = anchor_index;
            for (draft, &width) in strip.nodes.iter().zip(&strip.overlaps) {
                let outer = nodes.len();
                nodes.push(draft.realize(ox, oy, config));
                edges.push(BlendEdge {
                    inner,
                    outer,
                    direction: strip.direction,
                    width,
                });
                inner = outer;
            }
        }
    }

    let ruler = ruler
        .zip(ruler_frame)
        .map(|(ruler, frame)| RulerSlot {
            ruler,
            rect: frame.to_canvas(ox, oy),
        });

    let plan = CanvasPlan {
        nodes,
        edges,
        ruler,
        size: Dimensions::new(to_canvas(width), to_canvas(height)),
        content: content.to_canvas(ox, oy),
        scale: target,
    };
    tracing::info!(
        nodes = plan.nodes.len(),
        edges = plan.edges.len(),
        canvas = %plan.size,
        "layout planned"
    );
    Ok(plan)
}

fn check_limits(width: i64, height: i64, config: &LayoutConfig) -> Result<(), LayoutError> {
    let max_side = i64::from(config.max_canvas_dimension);
    let overflow = width > max_side
        || height > max_side
        || u64::try_from(width.saturating_mul(height)).unwrap_or(u64::MAX) > config.max_canvas_pixels;
    if overflow {
        return Err(LayoutError::LayoutOverflow {
            width: u64::try_from(width).unwrap_or(u64::MAX),
            height: u64::try_from(height).unwrap_or(u64::MAX),
        });
    }
    Ok(())
}

/// Canvas coordinate; callers have already bounded the value by the
/// canvas limits.
fn to_canvas(v: i64) -> u32 {
    u32::try_from(v.max(0)).unwrap_or(u32::MAX)
}

// ───────────────────────── Geometry ─────────────────────────

/// Rectangle in signed layout space, before the canvas origin is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frame {
    x: i64,
    y: i64,
    w: i64,
    h: i64,
}

impl Frame {
    fn sized(size: Dimensions) -> Self {
        Self {
            x: 0,
            y: 0,
            w: i64::from(size.width),
            h: i64::from(size.height),
        }
    }

    const fn right(self) -> i64 {
        self.x + self.w
    }

    const fn bottom(self) -> i64 {
        self.y + self.h
    }

    fn union(self, other: Self) -> Self {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Self {
            x,
            y,
            w: self.right().max(other.right()) - x,
            h: self.bottom().max(other.bottom()) - y,
        }
    }

    fn to_canvas(self, ox: i64, oy: i64) -> BoundingBox {
        BoundingBox::new(
            to_canvas(self.x + ox),
            to_canvas(self.y + oy),
            to_canvas(self.w),
            to_canvas(self.h),
        )
    }
}

/// A node whose pixels have not been resampled yet.
struct Draft<'a> {
    role: NodeRole,
    source: &'a ExtractedObject,
    size: Dimensions,
    frame: Frame,
    rotate: bool,
}

impl Draft<'_> {
    fn realize(&self, ox: i64, oy: i64, config: &LayoutConfig) -> LayoutNode {
        let resized = resize_to(&self.source.cutout, self.size, config.resample_filter);
        let image = if self.rotate {
            imageops::rotate180(&resized)
        } else {
            resized
        };
        LayoutNode {
            role: self.role,
            source_bounds: self.source.bounds,
            image,
            rect: self.frame.to_canvas(ox, oy),
        }
    }
}

struct Strip<'a> {
    direction: Direction,
    nodes: Vec<Draft<'a>>,
    /// Overlap of each node with its inner neighbour.
    overlaps: Vec<u32>,
}

/// One anchor with its strips and fixed sides, in anchor-local space.
struct Cross<'a> {
    anchor: Draft<'a>,
    strips: Vec<Strip<'a>>,
    fixed: Vec<Draft<'a>>,
}

impl<'a> Cross<'a> {
    fn build(
        anchor: Anchor,
        object: &'a ExtractedObject,
        views: &'a SideAssignments<ExtractedObject>,
        factor: f64,
        config: &LayoutConfig,
    ) -> Self {
        let physical =
            |object: &ExtractedObject| scaled_dimensions(Dimensions::of(&object.cutout), factor);

        let size = physical(object);
        let anchor_draft = Draft {
            role: NodeRole::View(ViewSlot::Primary(anchor.role())),
            source: object,
            size,
            frame: Frame::sized(size),
            rotate: false,
        };
        let a = anchor_draft.frame;

        let mut strips = Vec::new();
        let mut insets = (0, 0);
        for direction in [Direction::Left, Direction::Right] {
            let items = views.extended(anchor, direction);
            if items.is_empty() {
                continue;
            }
            let strip = lay_strip(anchor, direction, a, items, (0, 0), factor, config);
            let first = i64::from(strip.overlaps[0]);
            if direction == Direction::Left {
                insets.0 = first;
            } else {
                insets.1 = first;
            }
            strips.push(strip);
        }
        for direction in [Direction::Top, Direction::Bottom] {
            let items = views.extended(anchor, direction);
            if !items.is_empty() {
                strips.push(lay_strip(anchor, direction, a, items, insets, factor, config));
            }
        }

        let reach = |direction: Direction| {
            strips
                .iter()
                .filter(|s| s.direction == direction)
                .flat_map(|s| s.nodes.iter().map(|n| n.frame))
                .fold(a, Frame::union)
        };
        let padding = i64::from(config.padding);
        let mut fixed = Vec::new();

        let mut middle = reach(Direction::Left).union(reach(Direction::Right));
        for direction in [Direction::Left, Direction::Right] {
            if let Some((role, object, rotate)) = fixed_side(views, anchor, direction, config) {
                let size = physical(object);
                let (w, h) = (i64::from(size.width), i64::from(size.height));
                let x = if direction == Direction::Left {
                    middle.x - padding - w
                } else {
                    middle.right() + padding
                };
                let frame = Frame {
                    x,
                    y: a.y + (a.h - h).div_euclid(2),
                    w,
                    h,
                };
                fixed.push(Draft {
                    role,
                    source: object,
                    size,
                    frame,
                    rotate,
                });
            }
        }
        for draft in &fixed {
            middle = middle.union(draft.frame);
        }

        for direction in [Direction::Top, Direction::Bottom] {
            if let Some((role, object, rotate)) = fixed_side(views, anchor, direction, config) {
                let size = physical(object);
                let (w, h) = (i64::from(size.width), i64::from(size.height));
                let strip = reach(direction);
                let y = if direction == Direction::Top {
                    strip.y.min(middle.y) - padding - h
                } else {
                    strip.bottom().max(middle.bottom()) + padding
                };
                let frame = Frame {
                    x: a.x + (a.w - w).div_euclid(2),
                    y,
                    w,
                    h,
                };
                fixed.push(Draft {
                    role,
                    source: object,
                    size,
                    frame,
                    rotate,
                });
            }
        }

        Self {
            anchor: anchor_draft,
            strips,
            fixed,
        }
    }

    fn bounds(&self) -> Frame {
        self.strips
            .iter()
            .flat_map(|s| &s.nodes)
            .chain(&self.fixed)
            .map(|d| d.frame)
            .fold(self.anchor.frame, Frame::union)
    }

    fn shift(&mut self, dx: i64, dy: i64) {
        let nodes = std::iter::once(&mut self.anchor)
            .chain(self.strips.iter_mut().flat_map(|s| &mut s.nodes))
            .chain(&mut self.fixed);
        for draft in nodes {
            draft.frame.x += dx;
            draft.frame.y += dy;
        }
    }
}

/// Lay out one extended side outward from `anchor`, each photo
/// overlapping the one before it.
fn lay_strip<'a>(
    anchor: Anchor,
    direction: Direction,
    anchor_frame: Frame,
    items: &'a [ExtractedObject],
    insets: (i64, i64),
    factor: f64,
    config: &LayoutConfig,
) -> Strip<'a> {
    let span = to_canvas((anchor_frame.w - insets.0 - insets.1).max(1));
    let mut nodes = Vec::with_capacity(items.len());
    let mut overlaps = Vec::with_capacity(items.len());
    let mut inner = anchor_frame;

    for (index, item) in items.iter().enumerate() {
        let physical = scaled_dimensions(Dimensions::of(&item.cutout), factor);
        let size = if direction.is_horizontal() {
            fit_height(physical, to_canvas(anchor_frame.h))
        } else {
            fit_width(physical, span)
        };
        let (w, h) = (i64::from(size.width), i64::from(size.height));
        let overlap = if direction.is_horizontal() {
            config.blend_width.resolve(to_canvas(inner.w), size.width)
        } else {
            config.blend_width.resolve(to_canvas(inner.h), size.height)
        };
        let ov = i64::from(overlap);
        let frame = match direction {
            Direction::Left => Frame {
                x: inner.x - w + ov,
                y: anchor_frame.y,
                w,
                h,
            },
            Direction::Right => Frame {
                x: inner.right() - ov,
                y: anchor_frame.y,
                w,
                h,
            },
            Direction::Top => Frame {
                x: anchor_frame.x + insets.0,
                y: inner.y - h + ov,
                w,
                h,
            },
            Direction::Bottom => Frame {
                x: anchor_frame.x + insets.0,
                y: inner.bottom() - ov,
                w,
                h,
            },
        };
        nodes.push(Draft {
            role: NodeRole::View(ViewSlot::Extended {
                anchor,
                direction,
                index,
            }),
            source: item,
            size,
            frame,
            rotate: false,
        });
        overlaps.push(overlap);
        inner = frame;
    }

    Strip {
        direction,
        nodes,
        overlaps,
    }
}

/// Fixed side photo placed against `anchor` in `direction`, if any, and
/// whether it is a rotated copy.
fn fixed_side<'a>(
    views: &'a SideAssignments<ExtractedObject>,
    anchor: Anchor,
    direction: Direction,
    config: &LayoutConfig,
) -> Option<(NodeRole, &'a ExtractedObject, bool)> {
    let role = direction.side_role();
    let object = views.primary(role)?;
    if views.attachment(direction) == anchor {
        return Some((NodeRole::View(ViewSlot::Primary(role)), object, false));
    }
    let mirrored =
        config.mirror_sides_on_reverse && anchor == Anchor::Reverse && direction.is_horizontal();
    mirrored.then_some((NodeRole::Mirror { of: role }, object, true))
}
