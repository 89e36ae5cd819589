//! Error taxonomy for the compositing core.
//!
//! Each stage owns an error enum. [`ArtifactError`] wraps any of them
//! with the artifact identifier, stage, and view so an operator can
//! find the offending photo and retry with different hints.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ruler::RulerEdge;
use crate::types::{SideRole, ViewSlot};

/// A view image is missing, empty, or undecodable.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// The encoded image bytes were empty.
    #[error("input image data is empty")]
    EmptyBytes,

    /// The image decoded but has no pixels.
    #[error("image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    /// Two photos were assigned to the same single-photo slot.
    #[error("slot {0} was assigned more than once")]
    DuplicateSlot(ViewSlot),

    /// An extended slot skipped past the next free index of its strip.
    #[error("slot {slot} is out of order; the next free index is {}", next + 1)]
    SlotOutOfOrder { slot: ViewSlot, next: usize },
}

/// The scale reference could not be measured.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalibrationError {
    /// No scanline in the region of interest held an alternating pattern.
    #[error("no ruler pattern found along the {edge} edge")]
    NoRulerPatternFound { edge: RulerEdge },

    /// The median mark width is not a usable scale.
    #[error("degenerate scale of {pixels_per_cm} px/cm")]
    DegenerateScale { pixels_per_cm: f64 },

    /// The configured fraction range selects no rows.
    #[error("ruler search band along the {edge} edge is empty")]
    RoiEmpty { edge: RulerEdge },
}

/// Foreground separation failed for a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    /// Every pixel matched the background, or no region was large enough.
    #[error("no foreground object found against the background")]
    NoForegroundFound,
}

/// The side assignment cannot be turned into a canvas plan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    /// Obverse and Reverse are mandatory anchors.
    #[error("required side {0} is missing")]
    MissingRequiredSide(SideRole),

    /// The planned canvas exceeds the configured maximum.
    #[error("canvas of {width}x{height} exceeds the configured maximum")]
    LayoutOverflow { width: u64, height: u64 },
}

/// An external asset used while rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Asset {
    RulerTemplate(crate::assets::RulerSize),
    Logo,
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RulerTemplate(size) => write!(f, "{size} ruler template"),
            Self::Logo => f.write_str("logo"),
        }
    }
}

/// Rendering the canvas failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// The canvas buffer could not be allocated.
    #[error("could not allocate a {width}x{height} canvas")]
    CanvasAllocationFailed { width: u32, height: u32 },

    /// A required asset is not available.
    #[error("{0} not found")]
    AssetNotFound(Asset),
}

/// A configuration value is out of range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// The processing stage an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Input,
    Calibration,
    Extraction,
    DigitalRuler,
    Layout,
    Render,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "input",
            Self::Calibration => "calibration",
            Self::Extraction => "extraction",
            Self::DigitalRuler => "digital ruler",
            Self::Layout => "layout",
            Self::Render => "render",
        })
    }
}

/// Any stage error.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The caller requested cancellation.
    #[error("cancelled")]
    Cancelled,
}

/// A stage error with the context needed to diagnose it.
#[derive(Debug, thiserror::Error)]
#[error("artifact {artifact}: {stage} failed{}: {source}", view_suffix(.view))]
pub struct ArtifactError {
    pub artifact: String,
    pub stage: Stage,
    pub view: Option<ViewSlot>,
    #[source]
    pub source: PipelineError,
}

#[allow(clippy::ref_option)]
fn view_suffix(view: &Option<ViewSlot>) -> String {
    view.map_or_else(String::new, |view| format!(" for view {view}"))
}

impl ArtifactError {
    #[must_use]
    pub fn new(artifact: &str, stage: Stage, source: impl Into<PipelineError>) -> Self {
        Self {
            artifact: artifact.to_owned(),
            stage,
            view: None,
            source: source.into(),
        }
    }

    /// Attach the view that caused the error.
    #[must_use]
    pub const fn with_view(mut self, view: ViewSlot) -> Self {
        self.view = Some(view);
        self
    }

    /// `true` when the failure should stop the whole batch.
    #[must_use]
    pub const fn is_run_fatal(&self) -> bool {
        matches!(
            self.source,
            PipelineError::Render(RenderError::CanvasAllocationFailed { .. })
        )
    }
}

/// Serde-compatible proxy for [`ArtifactError`].
///
/// `image::ImageError` does not implement serde, so the source error is
/// stored as its `Display` string.
#[derive(Serialize)]
struct ArtifactErrorProxy {
    artifact: String,
    stage: Stage,
    view: Option<ViewSlot>,
    message: String,
}

impl Serialize for ArtifactError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ArtifactErrorProxy {
            artifact: self.artifact.clone(),
            stage: self.stage,
            view: self.view,
            message: self.source.to_string(),
        }
        .serialize(serializer)
    }
}

/// Every error that stopped one artifact.
///
/// Extraction keeps going after a failed view, so one failure can carry
/// several per-view errors. Never empty.
#[derive(Debug, Serialize, thiserror::Error)]
#[serde(transparent)]
#[error("{}", join_errors(.0))]
pub struct ArtifactFailure(pub Vec<ArtifactError>);

fn join_errors(errors: &[ArtifactError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ArtifactFailure {
    #[must_use]
    pub fn errors(&self) -> &[ArtifactError] {
        &self.0
    }

    #[must_use]
    pub fn is_run_fatal(&self) -> bool {
        self.0.iter().any(ArtifactError::is_run_fatal)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0
            .iter()
            .any(|e| matches!(e.source, PipelineError::Cancelled))
    }
}

impl From<ArtifactError> for ArtifactFailure {
    fn from(error: ArtifactError) -> Self {
        Self(vec![error])
    }
}

/// A non-fatal event worth reporting next to the composite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Warning {
    /// Logo compositing was requested but no logo asset was supplied.
    LogoMissing,
    /// The scale-reference view yielded only one region, so the physical
    /// ruler could not be separated from the object.
    RulerRegionNotSeparated { view: ViewSlot },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LogoMissing => f.write_str("logo asset missing; logo skipped"),
            Self::RulerRegionNotSeparated { view } => write!(
                f,
                "could not separate the physical ruler from the object in {view}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Anchor, Direction};

    #[test]
    fn artifact_error_display_names_artifact_stage_and_view() {
        let err = ArtifactError::new(
            "BM.12345",
            Stage::Extraction,
            ExtractionError::NoForegroundFound,
        )
        .with_view(ViewSlot::Extended {
            anchor: Anchor::Obverse,
            direction: Direction::Left,
            index: 1,
        });
        let message = err.to_string();
        assert!(message.contains("BM.12345"), "{message}");
        assert!(message.contains("extraction"), "{message}");
        assert!(message.contains("obverse-left#2"), "{message}");
    }

    #[test]
    fn failure_joins_every_view_error() {
        let failure = ArtifactFailure(vec![
            ArtifactError::new("K.2", Stage::Extraction, ExtractionError::NoForegroundFound)
                .with_view(ViewSlot::Primary(SideRole::Top)),
            ArtifactError::new("K.2", Stage::Extraction, ExtractionError::NoForegroundFound)
                .with_view(ViewSlot::Primary(SideRole::Bottom)),
        ]);
        assert_eq!(
            failure.to_string(),
            "artifact K.2: extraction failed for view top: no foreground object found against \
             the background; artifact K.2: extraction failed for view bottom: no foreground \
             object found against the background"
        );
    }

    #[test]
    fn artifact_error_exposes_stage_error_as_source() {
        use std::error::Error as _;

        let err = ArtifactError::new(
            "K.3",
            Stage::Layout,
            LayoutError::MissingRequiredSide(SideRole::Obverse),
        );
        assert_eq!(err.to_string(), "artifact K.3: layout failed: required side obverse is missing");
        let source = err.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("required side obverse is missing"));
    }

    #[test]
    fn only_allocation_failure_is_run_fatal() {
        let alloc = ArtifactError::new(
            "a",
            Stage::Render,
            RenderError::CanvasAllocationFailed {
                width: 1,
                height: 1,
            },
        );
        let missing = ArtifactError::new(
            "a",
            Stage::DigitalRuler,
            RenderError::AssetNotFound(Asset::Logo),
        );
        assert!(alloc.is_run_fatal());
        assert!(!missing.is_run_fatal());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn artifact_error_serializes_message_string() {
        let err = ArtifactError::new(
            "K.1",
            Stage::Layout,
            LayoutError::MissingRequiredSide(SideRole::Reverse),
        );
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["artifact"], "K.1");
        assert_eq!(json["stage"], "layout");
        assert_eq!(json["message"], "required side reverse is missing");
    }
}
