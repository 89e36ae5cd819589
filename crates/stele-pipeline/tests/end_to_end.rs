//! Integration tests: synthetic artifact photos through every stage.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::AtomicBool;

use image::{Rgba, RgbaImage};
use stele_pipeline::layout::NodeRole;
use stele_pipeline::{
    Anchor, ArtifactInput, AssetBundle, BlendWidth, BoundingBox, CompositionConfig, Dimensions,
    Direction, LayoutConfig, OutcomeStatus, Pending, PipelineError, RulerSize, SideAssignments,
    SideRole, Stage, ViewSlot, Warning, compose_artifact, compose_batch,
};

const PAPER: Rgba<u8> = Rgba([255, 255, 255, 255]);
const INK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// A photo of one solid-colour object on white paper. With `ruler`, a
/// strip of alternating 20 px marks runs across the top fifth.
fn photo(size: u32, object: BoundingBox, color: Rgba<u8>, ruler: bool) -> RgbaImage {
    let margin = size / 10;
    let depth = size / 5;
    RgbaImage::from_fn(size, size, |x, y| {
        let inside =
            (object.x..object.right()).contains(&x) && (object.y..object.bottom()).contains(&y);
        if inside {
            return color;
        }
        if ruler && y < depth && (margin..size - margin).contains(&x) {
            return if ((x - margin) / 20) % 2 == 0 { INK } else { PAPER };
        }
        PAPER
    })
}

fn centred(size: u32, width: u32, height: u32) -> BoundingBox {
    BoundingBox::new((size - width) / 2, (size - height) / 2, width, height)
}

fn assets() -> AssetBundle {
    let template = |w| RgbaImage::from_pixel(w, 60, Rgba([20, 20, 20, 255]));
    AssetBundle::new()
        .with_ruler(RulerSize::OneCm, template(175))
        .with_ruler(RulerSize::TwoCm, template(280))
        .with_ruler(RulerSize::FiveCm, template(596))
}

/// Obverse with the ruler, plus Reverse, Top and Bottom.
fn four_views(size: u32) -> SideAssignments<RgbaImage> {
    let square = size * 2 / 5;
    let mut views = SideAssignments::new();
    let mut put = |role: SideRole, image: RgbaImage| {
        views.insert(ViewSlot::Primary(role), image).unwrap();
    };
    put(
        SideRole::Obverse,
        photo(size, centred(size, square, square), Rgba([150, 90, 60, 255]), true),
    );
    put(
        SideRole::Reverse,
        photo(size, centred(size, square, square), Rgba([60, 120, 150, 255]), false),
    );
    put(
        SideRole::Top,
        photo(size, centred(size, square, size / 8), Rgba([90, 150, 60, 255]), false),
    );
    put(
        SideRole::Bottom,
        photo(size, centred(size, square, size / 8), Rgba([150, 60, 120, 255]), false),
    );
    views
}

#[test]
fn four_view_artifact_end_to_end() {
    let config = CompositionConfig::default();
    let assets = assets();
    let input = ArtifactInput::new("stele-001", four_views(1000));

    let calibrated = Pending::new(input, &config, &assets).calibrate().unwrap();
    let scale = calibrated.scale();
    assert!(
        (scale.pixels_per_cm - 20.0).abs() < 0.01,
        "expected 20 px/cm, got {}",
        scale.pixels_per_cm
    );

    let extracted = calibrated.extract().unwrap();
    let obverse = extracted.objects().primary(SideRole::Obverse).unwrap();
    assert_eq!(obverse.bounds, centred(1000, 400, 400));
    assert!(extracted.physical_ruler().is_some());

    let planned = extracted.plan().unwrap();
    let plan = planned.plan();
    assert_eq!(plan.nodes.len(), 4);
    assert!(plan.edges.is_empty());
    for (i, a) in plan.nodes.iter().enumerate() {
        for b in &plan.nodes[i + 1..] {
            assert_eq!(a.rect.intersection(b.rect), None, "{:?} overlaps {:?}", a.role, b.role);
        }
    }
    let expected_size = plan.size;
    assert!((planned.physical_size().width_cm - 20.0).abs() < 1e-9);

    let composite = planned.render().unwrap().into_composite();
    assert_eq!(Dimensions::of(&composite.image), expected_size);
    assert_eq!(composite.ruler, RulerSize::FiveCm);
    assert!(composite.warnings.is_empty(), "{:?}", composite.warnings);
    assert_eq!(composite.diagnostics.summary.width, expected_size.width);
}

#[test]
fn extended_strip_blends_in_insertion_order() {
    let size = 400;
    let mut views = SideAssignments::new();
    views
        .insert(
            ViewSlot::Primary(SideRole::Obverse),
            photo(size, centred(size, 160, 160), Rgba([150, 90, 60, 255]), true),
        )
        .unwrap();
    views
        .insert(
            ViewSlot::Primary(SideRole::Reverse),
            photo(size, centred(size, 160, 160), Rgba([60, 120, 150, 255]), false),
        )
        .unwrap();
    let a = views.push_extended(
        Anchor::Obverse,
        Direction::Left,
        photo(size, centred(size, 100, 160), Rgba([200, 40, 40, 255]), false),
    );
    let b = views.push_extended(
        Anchor::Obverse,
        Direction::Left,
        photo(size, centred(size, 100, 160), Rgba([40, 40, 200, 255]), false),
    );

    let config = CompositionConfig {
        layout: LayoutConfig {
            blend_width: BlendWidth::Fixed(21),
            ..LayoutConfig::default()
        },
        ..CompositionConfig::default()
    };
    let assets = assets();
    let planned = Pending::new(ArtifactInput::new("strip", views), &config, &assets)
        .calibrate()
        .unwrap()
        .extract()
        .unwrap()
        .plan()
        .unwrap();
    let plan = planned.plan();

    let index = |role| plan.index_of(role).unwrap();
    let obverse = index(NodeRole::View(ViewSlot::Primary(SideRole::Obverse)));
    let a = index(NodeRole::View(a));
    let b = index(NodeRole::View(b));
    let pairs: Vec<_> = plan.edges.iter().map(|e| (e.inner, e.outer)).collect();
    assert_eq!(pairs, vec![(obverse, a), (a, b)]);
    assert!(plan.nodes[obverse].rect.intersection(plan.nodes[b].rect).is_none());
    assert!(plan.edges.iter().all(|e| plan.band(e).unwrap().width == 21));

    let composite = planned.render().unwrap().into_composite();
    assert_eq!(composite.diagnostics.summary.width, composite.image.width());
}

#[test]
fn failed_views_are_reported_together() {
    let size = 400;
    let views = four_views(size).map(|slot, image| match slot {
        ViewSlot::Primary(SideRole::Top | SideRole::Bottom) => {
            RgbaImage::from_pixel(size, size, PAPER)
        }
        _ => image,
    });

    let failure = compose_artifact(
        ArtifactInput::new("blank-sides", views),
        &CompositionConfig::default(),
        &assets(),
        None,
    )
    .unwrap_err();

    let failed: Vec<_> = failure.errors().iter().map(|e| (e.stage, e.view)).collect();
    assert_eq!(
        failed,
        vec![
            (Stage::Extraction, Some(ViewSlot::Primary(SideRole::Top))),
            (Stage::Extraction, Some(ViewSlot::Primary(SideRole::Bottom))),
        ]
    );
    assert!(!failure.is_run_fatal());
    let message = failure.to_string();
    assert!(message.contains("blank-sides"), "{message}");
    assert!(message.contains("top"), "{message}");
}

#[test]
fn missing_ruler_template_fails_only_that_artifact() {
    let failure = compose_artifact(
        ArtifactInput::new("no-template", four_views(400)),
        &CompositionConfig::default(),
        &AssetBundle::new(),
        None,
    )
    .unwrap_err();
    assert_eq!(failure.errors()[0].stage, Stage::DigitalRuler);
}

#[test]
fn missing_logo_is_only_a_warning() {
    let mut config = CompositionConfig::default();
    config.render.logo.enabled = true;
    let composite = compose_artifact(
        ArtifactInput::new("no-logo", four_views(400)),
        &config,
        &assets(),
        None,
    )
    .unwrap();
    assert_eq!(composite.warnings, vec![Warning::LogoMissing]);
}

#[test]
fn cancellation_stops_before_any_work() {
    let cancel = AtomicBool::new(true);
    let failure = compose_artifact(
        ArtifactInput::new("cancelled", four_views(400)),
        &CompositionConfig::default(),
        &assets(),
        Some(&cancel),
    )
    .unwrap_err();
    assert!(failure.is_cancelled());
    assert!(matches!(failure.errors()[0].source, PipelineError::Cancelled));
}

#[test]
fn batch_keeps_going_past_a_failed_artifact() {
    let mut blank = SideAssignments::new();
    blank
        .insert(ViewSlot::Primary(SideRole::Obverse), RgbaImage::from_pixel(400, 400, PAPER))
        .unwrap();
    let inputs = vec![
        ArtifactInput::new("good-1", four_views(400)),
        ArtifactInput::new("blank", blank),
        ArtifactInput::new("good-2", four_views(400)),
    ];
    let cancel = AtomicBool::new(false);
    let outcomes = compose_batch(inputs, &CompositionConfig::default(), &assets(), &cancel);

    let statuses: Vec<_> = outcomes.iter().map(|o| o.status()).collect();
    assert_eq!(
        statuses,
        [
            OutcomeStatus::Composited,
            OutcomeStatus::Failed,
            OutcomeStatus::Composited
        ]
    );

    // Same photos and configuration give the same pixels.
    let fingerprint = |i: usize| {
        outcomes[i]
            .result
            .as_ref()
            .unwrap()
            .diagnostics
            .summary
            .fingerprint
            .clone()
    };
    assert_eq!(fingerprint(0), fingerprint(2));
}
