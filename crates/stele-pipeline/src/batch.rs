//! Compositing many independent artifacts in parallel.
//!
//! Artifacts share nothing mutable: each worker owns its photos, plan
//! and canvas, and reads the asset bundle and configuration by
//! reference. Work runs on the global rayon pool; callers size it.

use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use serde::Serialize;

use crate::assets::{AssetBundle, RulerSize};
use crate::config::CompositionConfig;
use crate::diagnostics::ArtifactDiagnostics;
use crate::error::{ArtifactError, ArtifactFailure, PipelineError, Stage, Warning};
use crate::pipeline::{ArtifactInput, Composite};
use crate::types::{PhysicalSize, ScaleEstimate};

/// Result for one artifact of a batch.
#[derive(Debug)]
pub struct ArtifactOutcome {
    pub id: String,
    pub result: Result<Composite, ArtifactFailure>,
}

/// How an artifact ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Composited,
    Failed,
    Cancelled,
}

/// Serializable summary of an [`ArtifactOutcome`], without pixels.
#[derive(Debug, Serialize)]
pub struct ArtifactReport<'a> {
    pub id: &'a str,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<ScaleEstimate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_size: Option<PhysicalSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ruler: Option<RulerSize>,
    pub warnings: &'a [Warning],
    pub errors: &'a [ArtifactError],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<&'a ArtifactDiagnostics>,
}

impl ArtifactOutcome {
    /// Outcome for an artifact that never started because the run was
    /// cancelled.
    #[must_use]
    pub fn cancelled(id: impl Into<String>) -> Self {
        let id = id.into();
        let error = ArtifactError::new(&id, Stage::Input, PipelineError::Cancelled);
        Self {
            id,
            result: Err(error.into()),
        }
    }

    #[must_use]
    pub fn status(&self) -> OutcomeStatus {
        match &self.result {
            Ok(_) => OutcomeStatus::Composited,
            Err(failure) if failure.is_cancelled() => OutcomeStatus::Cancelled,
            Err(_) => OutcomeStatus::Failed,
        }
    }

    #[must_use]
    pub fn report(&self) -> ArtifactReport<'_> {
        let composite = self.result.as_ref().ok();
        ArtifactReport {
            id: &self.id,
            status: self.status(),
            scale: composite.map(|c| c.scale),
            physical_size: composite.map(|c| c.physical_size),
            ruler: composite.map(|c| c.ruler),
            warnings: match composite {
                Some(c) => &c.warnings,
                None => &[],
            },
            errors: match &self.result {
                Ok(_) => &[],
                Err(failure) => failure.errors(),
            },
            diagnostics: composite.map(|c| &c.diagnostics),
        }
    }
}

/// Composite every artifact, returning one outcome per input in input
/// order.
///
/// A failure is confined to its artifact, except canvas allocation
/// failure: it sets `cancel`, so artifacts not yet started are reported
/// as cancelled and those in flight stop at their next checkpoint.
pub fn compose_batch(
    inputs: Vec<ArtifactInput>,
    config: &CompositionConfig,
    assets: &AssetBundle,
    cancel: &AtomicBool,
) -> Vec<ArtifactOutcome> {
    tracing::info!(artifacts = inputs.len(), threads = rayon::current_num_threads(), "batch started");

    let outcomes = run_batch(inputs, cancel, |input| {
        crate::compose_artifact(input, config, assets, Some(cancel))
    });

    let composited = outcomes
        .iter()
        .filter(|o| o.status() == OutcomeStatus::Composited)
        .count();
    tracing::info!(
        composited,
        failed = outcomes.len() - composited,
        "batch finished"
    );
    outcomes
}

/// Composite one artifact of a batch.
///
/// Skips the work when `cancel` is already set, and sets it when the
/// artifact fails in a way that should stop the whole run. Callers that
/// stream artifacts through their own workers use this in place of
/// [`compose_batch`].
pub fn compose_one(
    input: ArtifactInput,
    config: &CompositionConfig,
    assets: &AssetBundle,
    cancel: &AtomicBool,
) -> ArtifactOutcome {
    guarded(input, cancel, |input| {
        crate::compose_artifact(input, config, assets, Some(cancel))
    })
}

/// Drive `compose` over the inputs in parallel, honouring `cancel`.
fn run_batch<F>(inputs: Vec<ArtifactInput>, cancel: &AtomicBool, compose: F) -> Vec<ArtifactOutcome>
where
    F: Fn(ArtifactInput) -> Result<Composite, ArtifactFailure> + Sync,
{
    inputs
        .into_par_iter()
        .map(|input| guarded(input, cancel, &compose))
        .collect()
}

fn guarded(
    input: ArtifactInput,
    cancel: &AtomicBool,
    compose: impl FnOnce(ArtifactInput) -> Result<Composite, ArtifactFailure>,
) -> ArtifactOutcome {
    if cancel.load(Ordering::Relaxed) {
        return ArtifactOutcome::cancelled(input.id);
    }
    let id = input.id.clone();
    settle(id, compose(input), cancel)
}

/// Log a finished artifact and raise `cancel` on a run-fatal failure.
fn settle(
    id: String,
    result: Result<Composite, ArtifactFailure>,
    cancel: &AtomicBool,
) -> ArtifactOutcome {
    if let Err(failure) = &result {
        if failure.is_run_fatal() {
            tracing::error!(artifact = %id, "resource exhaustion; stopping the batch");
            cancel.store(true, Ordering::Relaxed);
        } else if !failure.is_cancelled() {
            tracing::warn!(artifact = %id, error = %failure, "artifact failed");
        }
    }
    ArtifactOutcome { id, result }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{Rgba, RgbaImage};

    use super::*;
    use crate::layout::SideAssignments;
    use crate::types::{SideRole, ViewSlot};

    fn input(id: &str) -> ArtifactInput {
        let mut views = SideAssignments::new();
        views
            .insert(
                ViewSlot::Primary(SideRole::Obverse),
                RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 255])),
            )
            .unwrap();
        ArtifactInput::new(id, views)
    }

    #[test]
    fn cancelled_batch_skips_every_artifact() {
        let cancel = AtomicBool::new(true);
        let outcomes = compose_batch(
            vec![input("a"), input("b"), input("c")],
            &CompositionConfig::default(),
            &AssetBundle::new(),
            &cancel,
        );
        let ids: Vec<_> = outcomes.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert!(outcomes.iter().all(|o| o.status() == OutcomeStatus::Cancelled));
    }

    #[test]
    fn failures_stay_with_their_artifact() {
        let cancel = AtomicBool::new(false);
        let outcomes = compose_batch(
            vec![input("blank-1"), input("blank-2")],
            &CompositionConfig::default(),
            &AssetBundle::new(),
            &cancel,
        );
        assert!(outcomes.iter().all(|o| o.status() == OutcomeStatus::Failed));
        assert!(!cancel.load(Ordering::Relaxed));

        let failure = outcomes[0].result.as_ref().unwrap_err();
        assert_eq!(failure.errors()[0].stage, Stage::Calibration);
        assert_eq!(failure.errors()[0].artifact, "blank-1");
    }

    #[test]
    fn allocation_failure_cancels_the_rest_of_the_batch() {
        use std::sync::atomic::AtomicUsize;

        use crate::error::RenderError;

        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let cancel = AtomicBool::new(false);
        let calls = AtomicUsize::new(0);
        let outcomes = pool.install(|| {
            run_batch(vec![input("huge"), input("next")], &cancel, |input| {
                calls.fetch_add(1, Ordering::Relaxed);
                let error = RenderError::CanvasAllocationFailed {
                    width: 90_000,
                    height: 90_000,
                };
                Err(ArtifactError::new(&input.id, Stage::Render, error).into())
            })
        });

        assert!(cancel.load(Ordering::Relaxed));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(outcomes[0].status(), OutcomeStatus::Failed);
        assert!(outcomes[0].result.as_ref().unwrap_err().is_run_fatal());
        assert_eq!(outcomes[1].id, "next");
        assert_eq!(outcomes[1].status(), OutcomeStatus::Cancelled);
    }

    #[test]
    fn single_artifact_respects_cancel() {
        let cancel = AtomicBool::new(true);
        let outcome = compose_one(
            input("late"),
            &CompositionConfig::default(),
            &AssetBundle::new(),
            &cancel,
        );
        assert_eq!(outcome.id, "late");
        assert_eq!(outcome.status(), OutcomeStatus::Cancelled);
    }

    #[test]
    fn ordinary_failure_leaves_cancel_clear() {
        let cancel = AtomicBool::new(false);
        let error = ArtifactError::new("a", Stage::Extraction, crate::error::ExtractionError::NoForegroundFound);
        let outcome = settle("a".to_owned(), Err(error.into()), &cancel);
        assert_eq!(outcome.status(), OutcomeStatus::Failed);
        assert!(!cancel.load(Ordering::Relaxed));
    }

    #[test]
    fn report_serializes_errors_with_context() {
        let cancel = AtomicBool::new(false);
        let outcomes = compose_batch(
            vec![input("blank")],
            &CompositionConfig::default(),
            &AssetBundle::new(),
            &cancel,
        );
        let json = serde_json::to_value(outcomes[0].report()).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["errors"][0]["stage"], "calibration");
        assert_eq!(json["errors"][0]["view"]["primary"], "obverse");
        assert!(json.get("diagnostics").is_none());
    }
}
