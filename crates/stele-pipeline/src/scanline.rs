//! Run-length encoding of binarized pixel rows.
//!
//! A scanline is split into maximal runs of pixels on the same side of a
//! threshold. The ruler estimator looks for alternating runs of similar
//! width in this encoding.

/// Binary class of a pixel after thresholding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorClass {
    Black,
    White,
}

impl ColorClass {
    /// Classify an intensity: strictly below `threshold` is black.
    #[must_use]
    pub const fn of(intensity: u8, threshold: u8) -> Self {
        if intensity < threshold {
            Self::Black
        } else {
            Self::White
        }
    }
}

/// A maximal run of same-class pixels. `end` is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanlineRun {
    pub class: ColorClass,
    pub start: usize,
    pub end: usize,
}

impl ScanlineRun {
    /// Width in pixels. Always at least one.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.end - self.start + 1
    }
}

/// Encode a row of intensities into runs covering every pixel once.
///
/// Returns an empty vector only for an empty row.
#[must_use = "returns the encoded runs"]
pub fn encode_runs(row: &[u8], threshold: u8) -> Vec<ScanlineRun> {
    let mut runs = Vec::new();
    let Some((&first, rest)) = row.split_first() else {
        return runs;
    };

    let mut current = ScanlineRun {
        class: ColorClass::of(first, threshold),
        start: 0,
        end: 0,
    };
    for (offset, &value) in rest.iter().enumerate() {
        let index = offset + 1;
        let class = ColorClass::of(value, threshold);
        if class == current.class {
            current.end = index;
        } else {
            runs.push(current);
            current = ScanlineRun {
                class,
                start: index,
                end: index,
            };
        }
    }
    runs.push(current);
    runs
}
