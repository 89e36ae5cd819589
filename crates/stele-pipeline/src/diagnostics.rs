//! Per-artifact diagnostics: timing and counts for each stage.
//!
//! Every composite carries its diagnostics, so a batch report can show
//! where time went and how many views, regions and blend bands each
//! artifact produced. Timestamps come from the `web-time` crate.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::hash::Hasher;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

use crate::assets::RulerSize;
use crate::ruler::RulerEdge;
use crate::types::{PhysicalSize, RgbaImage};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected while compositing one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDiagnostics {
    pub calibration: StageDiagnostics,
    pub extraction: StageDiagnostics,
    pub layout: StageDiagnostics,
    pub render: StageDiagnostics,
    /// Wall-clock duration of the whole artifact (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    pub summary: CompositeSummary,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    Calibration {
        edge: RulerEdge,
        pixels_per_cm: f64,
        /// Scanline candidates behind the median.
        sample_count: usize,
    },
    Extraction {
        views: usize,
        /// Pixels in every extracted region, summed.
        object_pixels: u64,
        /// Whether the physical ruler was separated from the object.
        ruler_separated: bool,
    },
    Layout {
        nodes: usize,
        blend_edges: usize,
        canvas_width: u32,
        canvas_height: u32,
        ruler: Option<RulerSize>,
    },
    Render {
        blend_bands: usize,
        blended_pixels: u64,
        logo: bool,
    },
}

/// Headline numbers for a finished composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeSummary {
    pub width: u32,
    pub height: u32,
    pub pixel_count: u64,
    /// Canvas resolution.
    pub pixels_per_cm: f64,
    pub physical_size: PhysicalSize,
    /// SipHash of the output pixels, as 16 hex digits.
    pub fingerprint: String,
}

impl ArtifactDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Artifact Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Composite: {}x{} ({} pixels) at {:.3} px/cm",
            self.summary.width,
            self.summary.height,
            self.summary.pixel_count,
            self.summary.pixels_per_cm,
        ));
        lines.push(format!(
            "Object: {:.2} x {:.2} cm",
            self.summary.physical_size.width_cm, self.summary.physical_size.height_cm,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<16} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let stages = [
            ("Calibration", &self.calibration),
            ("Extraction", &self.extraction),
            ("Layout", &self.layout),
            ("Render", &self.render),
        ];
        for (name, diag) in stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<16} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!("Fingerprint: {}", self.summary.fingerprint));
        lines.join("\n")
    }
}

/// SipHash-1-3 over the image dimensions and raw pixels.
///
/// Identical inputs and configuration must give identical fingerprints.
#[must_use]
pub fn fingerprint(image: &RgbaImage) -> String {
    let mut hasher = SipHasher13::new();
    hasher.write_u32(image.width());
    hasher.write_u32(image.height());
    hasher.write(image.as_raw());
    format!("{:016x}", hasher.finish())
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Calibration {
            edge,
            pixels_per_cm,
            sample_count,
        } => format!("{edge} edge, {pixels_per_cm:.3} px/cm from {sample_count} samples"),
        StageMetrics::Extraction {
            views,
            object_pixels,
            ruler_separated,
        } => {
            let ruler = if *ruler_separated {
                "ruler separated"
            } else {
                "ruler not separated"
            };
            format!("{views} views, {object_pixels} object px, {ruler}")
        }
        StageMetrics::Layout {
            nodes,
            blend_edges,
            canvas_width,
            canvas_height,
            ruler,
        } => {
            let ruler = ruler.map_or_else(|| "no ruler".to_owned(), |size| format!("{size} ruler"));
            format!("{nodes} nodes, {blend_edges} edges, {canvas_width}x{canvas_height}, {ruler}")
        }
        StageMetrics::Render {
            blend_bands,
            blended_pixels,
            logo,
        } => {
            let logo = if *logo { ", logo" } else { "" };
            format!("{blend_bands} bands, {blended_pixels} blended px{logo}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(ms: u64, metrics: StageMetrics) -> StageDiagnostics {
        StageDiagnostics {
            duration: Duration::from_millis(ms),
            metrics,
        }
    }

    fn sample() -> ArtifactDiagnostics {
        ArtifactDiagnostics {
            calibration: stage(
                250,
                StageMetrics::Calibration {
                    edge: RulerEdge::Top,
                    pixels_per_cm: 20.0,
                    sample_count: 28,
                },
            ),
            extraction: stage(
                125,
                StageMetrics::Extraction {
                    views: 4,
                    object_pixels: 1_000_000,
                    ruler_separated: true,
                },
            ),
            layout: stage(
                125,
                StageMetrics::Layout {
                    nodes: 4,
                    blend_edges: 0,
                    canvas_width: 1400,
                    canvas_height: 2200,
                    ruler: Some(RulerSize::FiveCm),
                },
            ),
            render: stage(
                500,
                StageMetrics::Render {
                    blend_bands: 0,
                    blended_pixels: 0,
                    logo: false,
                },
            ),
            total_duration: Duration::from_millis(1000),
            summary: CompositeSummary {
                width: 1400,
                height: 2200,
                pixel_count: 3_080_000,
                pixels_per_cm: 20.0,
                physical_size: PhysicalSize {
                    width_cm: 25.0,
                    height_cm: 25.0,
                },
                fingerprint: "00000000deadbeef".to_owned(),
            },
        }
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let ms = duration_ms(Duration::from_millis(1234));
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn report_lists_every_stage() {
        let report = sample().report();
        for name in ["Calibration", "Extraction", "Layout", "Render"] {
            assert!(report.contains(name), "missing {name}");
        }
        assert!(report.contains("50.0%"));
        assert!(report.contains("5cm ruler"));
        assert!(report.contains("deadbeef"));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn durations_serialize_as_seconds() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["total_duration"], serde_json::json!(1.0));
        let back: ArtifactDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn fingerprint_tracks_pixels() {
        let a = RgbaImage::from_pixel(4, 4, image::Rgba([1, 2, 3, 255]));
        let mut b = a.clone();
        assert_eq!(fingerprint(&a), fingerprint(&b));
        b.put_pixel(3, 3, image::Rgba([1, 2, 3, 254]));
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a).len(), 16);
    }
}
