//! Encoding composites to disk.
//!
//! Each artifact gets a lossless TIFF master and a JPEG preview. Files
//! are encoded under a `.part` name and renamed once complete, so an
//! interrupted run never leaves a truncated image behind.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::codecs::tiff::TiffEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage};
use stele_pipeline::{CanvasBackground, Composite, RgbaImage};

use crate::error::CliError;

/// JPEG preview quality.
pub const PREVIEW_QUALITY: u8 = 85;

/// Paths written for one artifact.
#[derive(Debug)]
pub struct Written {
    pub master: PathBuf,
    pub preview: Option<PathBuf>,
}

/// Write the TIFF master and, unless disabled, the JPEG preview.
pub fn write_composite(
    dir: &Path,
    composite: &Composite,
    background: CanvasBackground,
    preview: bool,
) -> Result<Written, CliError> {
    let stem = file_stem(&composite.id);
    let image = &composite.image;

    let master = dir.join(format!("{stem}.tif"));
    write_atomic(&master, |file| {
        TiffEncoder::new(file).write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgba8,
        )
    })?;

    let preview = if preview {
        let path = dir.join(format!("{stem}.jpg"));
        let flat = flatten(image, background);
        write_atomic(&path, |file| {
            JpegEncoder::new_with_quality(file, PREVIEW_QUALITY).write_image(
                flat.as_raw(),
                flat.width(),
                flat.height(),
                ExtendedColorType::Rgb8,
            )
        })?;
        Some(path)
    } else {
        None
    };

    tracing::info!(artifact = %composite.id, master = %master.display(), "composite written");
    Ok(Written { master, preview })
}

/// Encode into `<path>.part`, then rename onto `path`.
fn write_atomic(
    path: &Path,
    encode: impl FnOnce(&mut BufWriter<File>) -> image::ImageResult<()>,
) -> Result<(), CliError> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    let write_err = |source| CliError::Write {
        path: partial.clone(),
        source,
    };
    let file = File::create(&partial).map_err(write_err)?;
    let mut writer = BufWriter::new(file);
    let encoded = encode(&mut writer)
        .map_err(|source| CliError::Encode {
            path: path.to_owned(),
            source,
        })
        .and_then(|()| writer.flush().map_err(write_err));
    if let Err(e) = encoded {
        drop(writer);
        if let Err(cleanup) = std::fs::remove_file(&partial) {
            tracing::warn!(path = %partial.display(), error = %cleanup, "could not remove partial file");
        }
        return Err(e);
    }
    drop(writer);

    std::fs::rename(&partial, path).map_err(|source| CliError::Write {
        path: path.to_owned(),
        source,
    })
}

/// Composite RGBA over the canvas background colour for formats without
/// alpha. A transparent background flattens onto white.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn flatten(image: &RgbaImage, background: CanvasBackground) -> RgbImage {
    let [br, bg, bb, _] = match background {
        CanvasBackground::Transparent => CanvasBackground::White.rgba(),
        other => other.rgba(),
    };
    let backdrop = [br, bg, bb];
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b, a] = image.get_pixel(x, y).0;
        let alpha = f32::from(a) / 255.0;
        let mix = |c: u8, d: u8| -> u8 {
            let v = f32::from(c).mul_add(alpha, f32::from(d) * (1.0 - alpha));
            v.round().clamp(0.0, 255.0) as u8
        };
        Rgb([
            mix(r, backdrop[0]),
            mix(g, backdrop[1]),
            mix(b, backdrop[2]),
        ])
    })
}

/// File-name-safe form of an artifact id.
fn file_stem(id: &str) -> String {
    let stem: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() || stem.starts_with('.') {
        format!("artifact{stem}")
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    #[test]
    fn opaque_pixels_pass_through() {
        let image = RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255]));
        let flat = flatten(&image, CanvasBackground::Black);
        assert_eq!(flat.get_pixel(1, 1).0, [10, 20, 30]);
    }

    #[test]
    fn transparent_pixels_take_the_background() {
        let image = RgbaImage::from_pixel(1, 1, Rgba([200, 0, 0, 0]));
        assert_eq!(
            flatten(&image, CanvasBackground::Color([1, 2, 3])).get_pixel(0, 0).0,
            [1, 2, 3]
        );
        assert_eq!(
            flatten(&image, CanvasBackground::Transparent).get_pixel(0, 0).0,
            [255, 255, 255]
        );
    }

    #[test]
    fn half_alpha_mixes_evenly() {
        let image = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128]));
        let [r, g, b] = flatten(&image, CanvasBackground::White).get_pixel(0, 0).0;
        assert_eq!((r, g, b), (127, 127, 127));
    }

    #[test]
    fn ids_become_safe_file_names() {
        assert_eq!(file_stem("inv-1904/12 a"), "inv-1904_12_a");
        assert_eq!(file_stem("..secret"), "artifact..secret");
        assert_eq!(file_stem(""), "artifact");
    }
}
