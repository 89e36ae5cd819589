//! stele: batch compositor for photographed museum artifacts.
//!
//! Reads a JSON manifest listing each artifact's photos, composites the
//! artifacts in parallel, and writes a TIFF master plus JPEG preview per
//! artifact. Optionally writes a JSON run report with per-stage
//! diagnostics and every error.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin stele -- [OPTIONS] <MANIFEST>
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod error;
mod manifest;
mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, ValueEnum};
use rayon::prelude::*;
use serde::Serialize;
use stele_pipeline::{
    ArtifactOutcome, ArtifactReport, AssetBundle, BlendWidth, CanvasBackground, CompositionConfig,
    LayoutConfig, ResampleFilter, compose_one,
};

use crate::error::CliError;
use crate::manifest::{ArtifactEntry, Manifest};

/// Scale-calibrated multi-view compositing of artifact photo sets.
///
/// Each artifact's photos are calibrated against the physical ruler in
/// its scale view, cut out of their backdrops, laid out around the
/// obverse and reverse, and blended into a single composite with a
/// digital ruler.
#[derive(Parser)]
#[command(name = "stele", version)]
struct Cli {
    /// Path to the batch manifest (JSON).
    manifest: PathBuf,

    /// Directory the composites are written to.
    #[arg(long, short, default_value = "out")]
    out: PathBuf,

    /// Worker threads (defaults to one per CPU core).
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    threads: Option<usize>,

    /// Gap in pixels between node groups that are not blended.
    #[arg(long, default_value_t = LayoutConfig::DEFAULT_PADDING)]
    padding: u32,

    /// Empty border in pixels around the composite.
    #[arg(long, default_value_t = LayoutConfig::DEFAULT_MARGIN)]
    margin: u32,

    /// Blend band width in pixels (default: 10% of the smaller neighbour).
    #[arg(long)]
    blend_width: Option<u32>,

    /// Output resolution in pixels per centimetre (default: as measured).
    #[arg(long)]
    output_ppcm: Option<f64>,

    /// Resampling filter for rescaled photos and rulers.
    #[arg(long, value_enum, default_value_t = Filter::CatmullRom)]
    filter: Filter,

    /// Canvas background.
    #[arg(long, value_enum, default_value_t = Background::White)]
    background: Background,

    /// Composite the manifest's logo below each artifact.
    #[arg(long)]
    logo: bool,

    /// Place 180°-rotated copies of the left and right photos beside the
    /// reverse.
    #[arg(long)]
    mirror_sides: bool,

    /// Skip the JPEG preview.
    #[arg(long)]
    no_preview: bool,

    /// Write a JSON run report to this path.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print each artifact's per-stage diagnostics.
    #[arg(long)]
    diagnostics: bool,

    /// Full composition config as a JSON string.
    ///
    /// When provided, all other tuning flags are ignored. The JSON must
    /// be a valid `CompositionConfig` serialization; missing fields take
    /// their defaults.
    #[arg(long)]
    config_json: Option<String>,
}

/// Resampling filter selection.
#[derive(Clone, Copy, ValueEnum)]
enum Filter {
    /// Nearest-neighbor (fastest, blocky).
    Nearest,
    /// Bilinear interpolation (fast, decent quality).
    Triangle,
    /// Bicubic Catmull-Rom (good quality for photographs).
    CatmullRom,
    /// Lanczos with 3 lobes (slowest, sharpest).
    Lanczos3,
}

/// Canvas background selection.
#[derive(Clone, Copy, ValueEnum)]
enum Background {
    White,
    Black,
    /// Transparent in the TIFF master; the JPEG preview flattens onto
    /// white.
    Transparent,
}

/// Build a [`CompositionConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual tuning flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<CompositionConfig, CliError> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(CliError::Config);
    }

    let mut config = CompositionConfig::default();
    config.layout.padding = cli.padding;
    config.layout.margin = cli.margin;
    if let Some(px) = cli.blend_width {
        config.layout.blend_width = BlendWidth::Fixed(px);
    }
    config.layout.output_pixels_per_cm = cli.output_ppcm;
    config.layout.resample_filter = match cli.filter {
        Filter::Nearest => ResampleFilter::Nearest,
        Filter::Triangle => ResampleFilter::Triangle,
        Filter::CatmullRom => ResampleFilter::CatmullRom,
        Filter::Lanczos3 => ResampleFilter::Lanczos3,
    };
    config.layout.mirror_sides_on_reverse = cli.mirror_sides;
    config.render.background = match cli.background {
        Background::White => CanvasBackground::White,
        Background::Black => CanvasBackground::Black,
        Background::Transparent => CanvasBackground::Transparent,
    };
    config.render.logo.enabled = cli.logo;
    Ok(config)
}

/// One artifact's line in the run report.
#[derive(Serialize)]
struct ReportEntry<'a> {
    #[serde(flatten)]
    outcome: ArtifactReport<'a>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    outputs: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    write_error: Option<String>,
}

/// An artifact whose photos could not be loaded.
#[derive(Serialize)]
struct Skipped {
    id: String,
    error: String,
}

#[derive(Serialize)]
struct RunReport {
    artifacts: Vec<serde_json::Value>,
    skipped: Vec<Skipped>,
}

/// What a worker keeps once an artifact's pixels are written and
/// dropped.
enum Processed {
    Done {
        entry: serde_json::Value,
        written: bool,
    },
    Skipped(Skipped),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the batch. Returns `Ok(false)` when any artifact did not produce
/// its files.
fn run(cli: &Cli) -> Result<bool, CliError> {
    let config = config_from_cli(cli)?;
    config.validate()?;

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }

    let manifest = Manifest::load(&cli.manifest)?;
    let base = cli.manifest.parent().unwrap_or_else(|| Path::new("."));
    let assets = manifest.assets(base);
    std::fs::create_dir_all(&cli.out).map_err(|source| CliError::Write {
        path: cli.out.clone(),
        source,
    })?;

    let photos: usize = manifest.artifacts.iter().map(ArtifactEntry::photo_count).sum();
    tracing::info!(
        artifacts = manifest.artifacts.len(),
        photos,
        threads = rayon::current_num_threads(),
        out = %cli.out.display(),
        "batch started"
    );

    // Each worker loads, composites and writes one artifact at a time, so
    // only report data outlives an artifact.
    let cancel = AtomicBool::new(false);
    let processed: Vec<Processed> = manifest
        .artifacts
        .par_iter()
        .map(|entry| process(cli, entry, base, &config, &assets, &cancel))
        .collect::<Result<_, CliError>>()?;

    let mut artifacts = Vec::new();
    let mut skipped = Vec::new();
    let mut written = 0;
    for item in processed {
        match item {
            Processed::Done { entry, written: ok } => {
                written += usize::from(ok);
                artifacts.push(entry);
            }
            Processed::Skipped(s) => skipped.push(s),
        }
    }
    let total = artifacts.len() + skipped.len();
    println!("{written}/{total} artifacts composited into {}", cli.out.display());

    if let Some(path) = &cli.report {
        let report = RunReport { artifacts, skipped };
        let json = serde_json::to_string_pretty(&report).map_err(CliError::Report)?;
        std::fs::write(path, json).map_err(|source| CliError::Write {
            path: path.clone(),
            source,
        })?;
        tracing::info!(report = %path.display(), "run report written");
    }

    Ok(written == total)
}

/// Load, composite and write one artifact.
fn process(
    cli: &Cli,
    entry: &ArtifactEntry,
    base: &Path,
    config: &CompositionConfig,
    assets: &AssetBundle,
    cancel: &AtomicBool,
) -> Result<Processed, CliError> {
    let outcome = if cancel.load(Ordering::Relaxed) {
        ArtifactOutcome::cancelled(&entry.id)
    } else {
        match entry.load(base) {
            Ok(input) => compose_one(input, config, assets, cancel),
            Err(e) => {
                tracing::error!(artifact = %entry.id, error = %e, "artifact skipped");
                return Ok(Processed::Skipped(Skipped {
                    id: entry.id.clone(),
                    error: e.to_string(),
                }));
            }
        }
    };

    let mut report = ReportEntry {
        outcome: outcome.report(),
        outputs: Vec::new(),
        write_error: None,
    };
    match &outcome.result {
        Ok(composite) => {
            for warning in &composite.warnings {
                tracing::warn!(artifact = %composite.id, "{warning}");
            }
            if cli.diagnostics {
                eprintln!("[{}]\n{}\n", composite.id, composite.diagnostics.report());
            }
            match output::write_composite(
                &cli.out,
                composite,
                config.render.background,
                !cli.no_preview,
            ) {
                Ok(files) => {
                    report.outputs.push(files.master);
                    report.outputs.extend(files.preview);
                }
                Err(e) => {
                    tracing::error!(artifact = %composite.id, error = %e, "write failed");
                    report.write_error = Some(e.to_string());
                }
            }
        }
        Err(failure) => eprintln!("{failure}"),
    }

    let written = !report.outputs.is_empty();
    let entry = serde_json::to_value(&report).map_err(CliError::Report)?;
    Ok(Processed::Done { entry, written })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("stele").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_match_pipeline_defaults() {
        let config = config_from_cli(&parse(&["batch.json"])).unwrap();
        assert_eq!(config, CompositionConfig::default());
    }

    #[test]
    fn tuning_flags_reach_the_config() {
        let cli = parse(&[
            "batch.json",
            "--blend-width",
            "40",
            "--output-ppcm",
            "30",
            "--background",
            "transparent",
            "--logo",
            "--mirror-sides",
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.layout.blend_width, BlendWidth::Fixed(40));
        assert_eq!(config.layout.output_pixels_per_cm, Some(30.0));
        assert_eq!(config.render.background, CanvasBackground::Transparent);
        assert!(config.render.logo.enabled);
        assert!(config.layout.mirror_sides_on_reverse);
    }

    #[test]
    fn config_json_overrides_flags() {
        let cli = parse(&[
            "batch.json",
            "--padding",
            "7",
            "--config-json",
            r#"{"layout": {"margin": 12}}"#,
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.layout.margin, 12);
        assert_eq!(config.layout.padding, LayoutConfig::DEFAULT_PADDING);
    }

    fn entry(id: &str) -> ArtifactEntry {
        let text = format!(r#"{{ "id": "{id}", "views": {{ "obverse": "missing.jpg" }} }}"#);
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn unreadable_photos_skip_only_that_artifact() {
        let cli = parse(&["batch.json"]);
        let cancel = AtomicBool::new(false);
        let processed = process(
            &cli,
            &entry("inv-1"),
            Path::new("/nonexistent-stele-dir"),
            &CompositionConfig::default(),
            &AssetBundle::new(),
            &cancel,
        )
        .unwrap();
        let Processed::Skipped(skipped) = processed else {
            panic!("expected the artifact to be skipped");
        };
        assert_eq!(skipped.id, "inv-1");
        assert!(skipped.error.contains("missing.jpg"), "{}", skipped.error);
        assert!(!cancel.load(Ordering::Relaxed));
    }

    #[test]
    fn cancelled_run_reports_without_loading() {
        let cli = parse(&["batch.json"]);
        let cancel = AtomicBool::new(true);
        let processed = process(
            &cli,
            &entry("inv-2"),
            Path::new("/nonexistent-stele-dir"),
            &CompositionConfig::default(),
            &AssetBundle::new(),
            &cancel,
        )
        .unwrap();
        let Processed::Done { entry, written } = processed else {
            panic!("a cancelled artifact is reported, not skipped");
        };
        assert!(!written);
        assert_eq!(entry["id"], "inv-2");
        assert_eq!(entry["status"], "cancelled");
        assert!(entry.get("outputs").is_none());
    }

    #[test]
    fn zero_threads_is_rejected() {
        assert!(Cli::try_parse_from(["stele", "batch.json", "--threads", "0"]).is_err());
    }
}
