//! stele-pipeline: scale-calibrated multi-view compositing (sans-IO).
//!
//! Turns the photos of one museum artifact into a single calibrated
//! composite through:
//! ruler scale estimation -> object extraction -> layout ->
//! gradient-blended rendering with a digital ruler and optional logo.
//!
//! This crate has **no I/O dependencies**: it operates on decoded
//! rasters and in-memory byte slices and returns structured data. File
//! discovery and encoding live in `stele-cli`.

pub mod assets;
pub mod batch;
pub mod compose;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod extract;
pub mod layout;
pub mod pipeline;
pub mod resample;
pub mod ruler;
pub mod scanline;
pub mod types;

use std::sync::atomic::AtomicBool;

pub use assets::{AssetBundle, RulerSize, RulerTemplate};
pub use batch::{ArtifactOutcome, ArtifactReport, OutcomeStatus, compose_batch, compose_one};
pub use config::{
    BlendWidth, CalibrationConfig, CanvasBackground, CompositionConfig, ExtractionConfig,
    LayoutConfig, LogoConfig, RenderConfig,
};
pub use error::{ArtifactError, ArtifactFailure, InputError, PipelineError, Stage, Warning};
pub use extract::BackgroundHint;
pub use layout::{CanvasPlan, SideAssignments};
pub use pipeline::{ArtifactInput, Composite, Pending};
pub use resample::ResampleFilter;
pub use ruler::RulerEdge;
pub use types::{
    Anchor, BoundingBox, Dimensions, Direction, PhysicalSize, RgbaImage, ScaleEstimate, SideRole,
    ViewSlot,
};

/// Decode raw image bytes (PNG, JPEG, BMP, WebP, TIFF) to RGBA.
///
/// # Errors
///
/// Returns [`InputError::EmptyBytes`] if `bytes` is empty,
/// [`InputError::Decode`] if the format is unrecognized or the data is
/// corrupt, and [`InputError::EmptyImage`] if it decodes to no pixels.
pub fn decode(bytes: &[u8]) -> Result<RgbaImage, InputError> {
    if bytes.is_empty() {
        return Err(InputError::EmptyBytes);
    }
    let image = image::load_from_memory(bytes)?.to_rgba8();
    if image.width() == 0 || image.height() == 0 {
        return Err(InputError::EmptyImage {
            width: image.width(),
            height: image.height(),
        });
    }
    Ok(image)
}

/// Run every stage for one artifact.
///
/// # Pipeline steps
///
/// 1. Validate the configuration and the views
/// 2. Measure the scale from the ruler in the scale view
/// 3. Cut the object out of every view
/// 4. Select and scale the digital ruler, then plan the canvas
/// 5. Render nodes, blend bands, ruler and logo
///
/// # Errors
///
/// Returns an [`ArtifactFailure`] naming the stage and, where relevant,
/// each failing view. Extraction reports every failed view at once.
pub fn compose_artifact(
    input: ArtifactInput,
    config: &CompositionConfig,
    assets: &AssetBundle,
    cancel: Option<&AtomicBool>,
) -> Result<Composite, ArtifactFailure> {
    config
        .validate()
        .map_err(|e| ArtifactError::new(&input.id, Stage::Input, e))?;

    let mut pending = Pending::new(input, config, assets);
    if let Some(flag) = cancel {
        pending = pending.with_cancellation(flag);
    }
    Ok(pending
        .calibrate()?
        .extract()?
        .plan()?
        .render()?
        .into_composite())
}
