//! Incremental pipeline: advance one artifact stage by stage, inspecting
//! each intermediate result before continuing.
//!
//! [`crate::compose_artifact`] runs every stage in one call. [`Pending`]
//! lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use stele_pipeline::{ArtifactFailure, ArtifactInput, AssetBundle, CompositionConfig, Pending};
//! # fn run(input: ArtifactInput, assets: &AssetBundle) -> Result<(), ArtifactFailure> {
//! let config = CompositionConfig::default();
//! let calibrated = Pending::new(input, &config, assets).calibrate()?;
//! println!("{} px/cm", calibrated.scale().pixels_per_cm);
//! let composite = calibrated.extract()?.plan()?.render()?.into_composite();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state, carrying
//! what later stages need. Cancellation is checked before calibration,
//! between views during extraction, and before layout and rendering. A
//! cancelled artifact never reaches the render stage, so no partial
//! composite exists.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use image::RgbaImage;
use web_time::Instant;

use crate::assets::{AssetBundle, RulerSize, prepare_ruler};
use crate::compose;
use crate::config::CompositionConfig;
use crate::diagnostics::{ArtifactDiagnostics, CompositeSummary, StageDiagnostics, StageMetrics};
use crate::error::{
    ArtifactError, ArtifactFailure, InputError, LayoutError, PipelineError, Stage, Warning,
};
use crate::extract::{BackgroundHint, ExtractedObject, extract_object, extract_object_and_ruler};
use crate::layout::{CanvasPlan, SideAssignments, canvas_scale, plan_layout};
use crate::ruler::{RulerEdge, estimate_scale};
use crate::types::{Anchor, PhysicalSize, ScaleEstimate, SideRole, ViewSlot};

/// Decoded photos of one artifact with the hints needed to process them.
#[derive(Debug, Clone)]
pub struct ArtifactInput {
    pub id: String,
    pub views: SideAssignments<RgbaImage>,
    /// Edge of the scale view the physical ruler lies along.
    pub ruler_edge: RulerEdge,
    /// Backdrop hint for every view without an override.
    pub background: BackgroundHint,
    pub background_overrides: BTreeMap<ViewSlot, BackgroundHint>,
    /// View holding the physical ruler.
    pub scale_view: SideRole,
}

impl ArtifactInput {
    #[must_use]
    pub fn new(id: impl Into<String>, views: SideAssignments<RgbaImage>) -> Self {
        Self {
            id: id.into(),
            views,
            ruler_edge: RulerEdge::default(),
            background: BackgroundHint::default(),
            background_overrides: BTreeMap::new(),
            scale_view: SideRole::Obverse,
        }
    }

    #[must_use]
    pub const fn with_ruler_edge(mut self, edge: RulerEdge) -> Self {
        self.ruler_edge = edge;
        self
    }

    #[must_use]
    pub const fn with_background(mut self, hint: BackgroundHint) -> Self {
        self.background = hint;
        self
    }

    /// Retry hint for a single view, e.g. after it failed extraction.
    #[must_use]
    pub fn with_view_background(mut self, slot: ViewSlot, hint: BackgroundHint) -> Self {
        self.background_overrides.insert(slot, hint);
        self
    }

    #[must_use]
    pub const fn with_scale_view(mut self, role: SideRole) -> Self {
        self.scale_view = role;
        self
    }

    fn hint_for(&self, slot: ViewSlot) -> BackgroundHint {
        self.background_overrides
            .get(&slot)
            .copied()
            .unwrap_or(self.background)
    }
}

/// A finished composite with everything a caller needs to persist it.
#[derive(Debug, Clone)]
pub struct Composite {
    pub id: String,
    pub image: RgbaImage,
    /// Scale measured from the photos.
    pub scale: ScaleEstimate,
    /// Scale of `image`.
    pub canvas_scale: ScaleEstimate,
    /// Size of the obverse object.
    pub physical_size: PhysicalSize,
    pub ruler: RulerSize,
    pub warnings: Vec<Warning>,
    pub diagnostics: ArtifactDiagnostics,
}

/// State shared by every stage of one artifact run.
struct Run<'a> {
    id: String,
    config: &'a CompositionConfig,
    assets: &'a AssetBundle,
    cancel: Option<&'a AtomicBool>,
    started: Instant,
    warnings: Vec<Warning>,
}

impl Run<'_> {
    fn fail(&self, stage: Stage, source: impl Into<PipelineError>) -> ArtifactError {
        ArtifactError::new(&self.id, stage, source)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn checkpoint(&self, stage: Stage) -> Result<(), ArtifactError> {
        if self.is_cancelled() {
            tracing::info!(artifact = %self.id, %stage, "cancelled");
            return Err(self.fail(stage, PipelineError::Cancelled));
        }
        Ok(())
    }
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// Call [`calibrate`](Self::calibrate) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing: call .calibrate() to continue"]
pub struct Pending<'a> {
    run: Run<'a>,
    input: ArtifactInput,
}

impl<'a> Pending<'a> {
    pub fn new(input: ArtifactInput, config: &'a CompositionConfig, assets: &'a AssetBundle) -> Self {
        Self {
            run: Run {
                id: input.id.clone(),
                config,
                assets,
                cancel: None,
                started: Instant::now(),
                warnings: Vec::new(),
            },
            input,
        }
    }

    /// Abort at the next checkpoint once `flag` is set.
    pub const fn with_cancellation(mut self, flag: &'a AtomicBool) -> Self {
        self.run.cancel = Some(flag);
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.run.id
    }

    /// Check the inputs and measure the scale from the scale view.
    ///
    /// # Errors
    ///
    /// Fails with every empty view, a missing scale view, or the
    /// calibration error of the scale view.
    pub fn calibrate(self) -> Result<Calibrated<'a>, ArtifactFailure> {
        self.run.checkpoint(Stage::Calibration)?;
        let started = Instant::now();

        let empty: Vec<_> = self
            .input
            .views
            .iter()
            .filter(|(_, image)| image.width() == 0 || image.height() == 0)
            .map(|(slot, image)| {
                let error = InputError::EmptyImage {
                    width: image.width(),
                    height: image.height(),
                };
                self.run.fail(Stage::Input, error).with_view(slot)
            })
            .collect();
        if !empty.is_empty() {
            return Err(ArtifactFailure(empty));
        }

        let role = self.input.scale_view;
        let slot = ViewSlot::Primary(role);
        let image = self
            .input
            .views
            .primary(role)
            .ok_or_else(|| self.run.fail(Stage::Input, LayoutError::MissingRequiredSide(role)))?;
        let edge = self.input.ruler_edge;
        let scale = estimate_scale(image, edge, &self.run.config.calibration)
            .map_err(|e| self.run.fail(Stage::Calibration, e).with_view(slot))?;

        tracing::info!(
            artifact = %self.run.id,
            pixels_per_cm = scale.pixels_per_cm,
            samples = scale.sample_count,
            "scale measured"
        );
        Ok(Calibrated {
            run: self.run,
            input: self.input,
            scale,
            calibration: StageDiagnostics {
                duration: started.elapsed(),
                metrics: StageMetrics::Calibration {
                    edge,
                    pixels_per_cm: scale.pixels_per_cm,
                    sample_count: scale.sample_count,
                },
            },
        })
    }
}

// ───────────────────────── Stage 1: Calibrated ───────────────────────

/// Pipeline state after the scale has been measured.
///
/// Call [`extract`](Self::extract) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing: call .extract() to continue"]
pub struct Calibrated<'a> {
    run: Run<'a>,
    input: ArtifactInput,
    scale: ScaleEstimate,
    calibration: StageDiagnostics,
}

impl<'a> Calibrated<'a> {
    #[must_use]
    pub const fn scale(&self) -> ScaleEstimate {
        self.scale
    }

    /// Cut the object out of every view. The scale view also yields the
    /// physical ruler when it can be separated.
    ///
    /// Every view is attempted even after one fails, so the error lists
    /// each view that needs a different background hint.
    ///
    /// # Errors
    ///
    /// Fails with one error per view that had no foreground, or with a
    /// single cancellation error.
    pub fn extract(self) -> Result<Extracted<'a>, ArtifactFailure> {
        let started = Instant::now();
        let Self {
            mut run,
            input,
            scale,
            calibration,
        } = self;
        let composition = run.config;
        let config = &composition.extraction;
        let scale_slot = ViewSlot::Primary(input.scale_view);
        let hints: BTreeMap<ViewSlot, BackgroundHint> = input
            .views
            .iter()
            .map(|(slot, _)| (slot, input.hint_for(slot)))
            .collect();

        let mut physical_ruler = None;
        let mut ruler_separated = false;
        let results = input.views.map(|slot, image| -> Result<ExtractedObject, PipelineError> {
            if run.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let hint = hints.get(&slot).copied().unwrap_or_default();
            if slot == scale_slot {
                let found = extract_object_and_ruler(&image, hint, config)?;
                ruler_separated = found.ruler.is_some();
                physical_ruler = found.ruler;
                Ok(found.object)
            } else {
                Ok(extract_object(&image, hint, config)?)
            }
        });

        let objects = results.transpose().map_err(|errors| {
            if errors
                .iter()
                .any(|(_, e)| matches!(e, PipelineError::Cancelled))
            {
                tracing::info!(artifact = %run.id, "cancelled during extraction");
                return ArtifactFailure::from(run.fail(Stage::Extraction, PipelineError::Cancelled));
            }
            ArtifactFailure(
                errors
                    .into_iter()
                    .map(|(slot, e)| {
                        tracing::warn!(artifact = %run.id, view = %slot, error = %e, "extraction failed");
                        run.fail(Stage::Extraction, e).with_view(slot)
                    })
                    .collect(),
            )
        })?;

        if !ruler_separated {
            tracing::warn!(artifact = %run.id, view = %scale_slot, "physical ruler not separated");
            run.warnings
                .push(Warning::RulerRegionNotSeparated { view: scale_slot });
        }

        let object_pixels = objects.iter().map(|(_, object)| object.area).sum();
        let extraction = StageDiagnostics {
            duration: started.elapsed(),
            metrics: StageMetrics::Extraction {
                views: objects.len(),
                object_pixels,
                ruler_separated,
            },
        };
        Ok(Extracted {
            run,
            scale,
            objects,
            physical_ruler,
            calibration,
            extraction,
        })
    }
}

// ───────────────────────── Stage 2: Extracted ────────────────────────

/// Pipeline state after every view has been cut out.
///
/// Call [`plan`](Self::plan) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing: call .plan() to continue"]
pub struct Extracted<'a> {
    run: Run<'a>,
    scale: ScaleEstimate,
    objects: SideAssignments<ExtractedObject>,
    physical_ruler: Option<ExtractedObject>,
    calibration: StageDiagnostics,
    extraction: StageDiagnostics,
}

impl<'a> Extracted<'a> {
    #[must_use]
    pub const fn objects(&self) -> &SideAssignments<ExtractedObject> {
        &self.objects
    }

    /// The physical ruler cut out of the scale view, if it was separated.
    #[must_use]
    pub const fn physical_ruler(&self) -> Option<&ExtractedObject> {
        self.physical_ruler.as_ref()
    }

    /// Select and scale the digital ruler, then place every node.
    ///
    /// # Errors
    ///
    /// Fails with [`LayoutError::MissingRequiredSide`] if an anchor has
    /// no photo, with [`RenderError::AssetNotFound`] if the selected ruler
    /// template is missing, and with [`LayoutError::LayoutOverflow`] if
    /// the canvas is too large.
    ///
    /// [`RenderError::AssetNotFound`]: crate::error::RenderError::AssetNotFound
    pub fn plan(self) -> Result<Planned<'a>, ArtifactFailure> {
        self.run.checkpoint(Stage::Layout)?;
        let started = Instant::now();
        let config = self.run.config;
        let layout = &config.layout;

        for anchor in Anchor::ALL {
            if self.objects.primary(anchor.role()).is_none() {
                return Err(self
                    .run
                    .fail(Stage::Layout, LayoutError::MissingRequiredSide(anchor.role()))
                    .into());
            }
        }
        let physical_size = self
            .objects
            .primary(SideRole::Obverse)
            .map(|obverse| PhysicalSize {
                width_cm: self.scale.to_cm(obverse.bounds.width),
                height_cm: self.scale.to_cm(obverse.bounds.height),
            })
            .ok_or_else(|| {
                self.run
                    .fail(Stage::Layout, LayoutError::MissingRequiredSide(SideRole::Obverse))
            })?;

        let ruler = prepare_ruler(
            self.run.assets,
            physical_size.width_cm,
            canvas_scale(self.scale, layout),
            layout.resample_filter,
        )
        .map_err(|e| self.run.fail(Stage::DigitalRuler, e))?;
        let ruler_size = ruler.size;

        let plan = plan_layout(&self.objects, self.scale, Some(ruler), layout)
            .map_err(|e| self.run.fail(Stage::Layout, e))?;

        let layout_diagnostics = StageDiagnostics {
            duration: started.elapsed(),
            metrics: StageMetrics::Layout {
                nodes: plan.nodes.len(),
                blend_edges: plan.edges.len(),
                canvas_width: plan.size.width,
                canvas_height: plan.size.height,
                ruler: Some(ruler_size),
            },
        };
        Ok(Planned {
            run: self.run,
            scale: self.scale,
            plan,
            physical_size,
            ruler_size,
            calibration: self.calibration,
            extraction: self.extraction,
            layout: layout_diagnostics,
        })
    }
}

// ───────────────────────── Stage 3: Planned ──────────────────────────

/// Pipeline state after layout.
///
/// Call [`render`](Self::render) to advance to the final stage.
#[must_use = "pipeline stages are consumed by advancing: call .render() to continue"]
pub struct Planned<'a> {
    run: Run<'a>,
    scale: ScaleEstimate,
    plan: CanvasPlan,
    physical_size: PhysicalSize,
    ruler_size: RulerSize,
    calibration: StageDiagnostics,
    extraction: StageDiagnostics,
    layout: StageDiagnostics,
}

impl Planned<'_> {
    #[must_use]
    pub const fn plan(&self) -> &CanvasPlan {
        &self.plan
    }

    #[must_use]
    pub const fn physical_size(&self) -> PhysicalSize {
        self.physical_size
    }

    /// Render the plan to the final composite.
    ///
    /// # Errors
    ///
    /// Fails with [`RenderError::CanvasAllocationFailed`] if the canvas
    /// cannot be allocated, or with a cancellation error.
    ///
    /// [`RenderError::CanvasAllocationFailed`]: crate::error::RenderError::CanvasAllocationFailed
    pub fn render(self) -> Result<Composited, ArtifactFailure> {
        self.run.checkpoint(Stage::Render)?;
        let started = Instant::now();
        let Self {
            mut run,
            scale,
            plan,
            physical_size,
            ruler_size,
            calibration,
            extraction,
            layout,
        } = self;
        let canvas_scale = plan.scale;

        let rendered = compose::render(plan, run.assets, &run.config.render).map_err(|e| {
            tracing::error!(artifact = %run.id, error = %e, "render failed");
            run.fail(Stage::Render, e)
        })?;
        run.warnings.extend(rendered.warnings);

        let render = StageDiagnostics {
            duration: started.elapsed(),
            metrics: StageMetrics::Render {
                blend_bands: rendered.metrics.blend_bands,
                blended_pixels: rendered.metrics.blended_pixels,
                logo: rendered.metrics.logo_drawn,
            },
        };
        let image = rendered.image;
        let summary = CompositeSummary {
            width: image.width(),
            height: image.height(),
            pixel_count: u64::from(image.width()) * u64::from(image.height()),
            pixels_per_cm: canvas_scale.pixels_per_cm,
            physical_size,
            fingerprint: crate::diagnostics::fingerprint(&image),
        };
        let diagnostics = ArtifactDiagnostics {
            calibration,
            extraction,
            layout,
            render,
            total_duration: run.started.elapsed(),
            summary,
        };
        tracing::info!(
            artifact = %run.id,
            width = image.width(),
            height = image.height(),
            warnings = run.warnings.len(),
            "artifact composited"
        );

        Ok(Composited {
            composite: Composite {
                id: run.id,
                image,
                scale,
                canvas_scale,
                physical_size,
                ruler: ruler_size,
                warnings: run.warnings,
                diagnostics,
            },
        })
    }
}

// ───────────────────────── Stage 4: Composited ───────────────────────

/// Final pipeline state.
#[must_use = "call .into_composite() to extract the Composite"]
pub struct Composited {
    composite: Composite,
}

impl Composited {
    #[must_use]
    pub const fn image(&self) -> &RgbaImage {
        &self.composite.image
    }

    #[must_use]
    pub fn into_composite(self) -> Composite {
        self.composite
    }
}
