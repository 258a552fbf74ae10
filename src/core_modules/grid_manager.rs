// THEORY:
// The `GridManager` is the photometric extractor. It turns one raw RGBA frame
// into a compact `FrameFeatures` record, the only thing later stages ever see.
//
// Key architectural principles:
// 1.  **Single Pass**: Every pixel is read exactly once. Its luma feeds the cell
//     it belongs to, the frame-wide mean and variance, and the red-area count.
//     Cost is O(pixel count) and memory is O(cell count).
// 2.  **Fixed Shape**: The grid shape comes from configuration, not from the
//     frame. Two frames of any size always produce comparable records, and a
//     frame smaller than the grid still fills every cell (a cell that owns no
//     pixel samples the pixel nearest its top-left corner).
// 3.  **Fail Local**: A malformed buffer is reported as a `DecodeDefect` for
//     that frame only. The caller skips it and moves on.

use std::time::Duration;

use crate::config::AnalysisConfig;
use crate::core_modules::chunk::Chunk;
use crate::core_modules::pixel::{CHANNELS, Luminance, Pixel, RedGamut};
use crate::error::DecodeDefect;
use crate::source::Frame;

/// The photometric summary of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameFeatures {
    pub index: u64,
    pub timestamp: Duration,
    /// Mean luminance of the whole frame (0..255).
    pub mean_luminance: Luminance,
    /// Per-cell mean luminance, row-major.
    pub cells: Vec<Luminance>,
    /// Fraction of pixels inside the saturated-red gamut (0..1).
    pub red_fraction: f64,
    /// Population standard deviation of pixel luminance.
    pub luminance_std_dev: f64,
}

/// Splits frames into a fixed grid and extracts their photometric features.
#[derive(Debug, Clone)]
pub struct GridManager {
    columns: u32,
    rows: u32,
    red_gamut: RedGamut,
}

impl GridManager {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            columns: config.grid_columns,
            rows: config.grid_rows,
            red_gamut: RedGamut {
                min_red: config.red_min_channel,
                min_ratio: config.red_min_ratio,
            },
        }
    }

    /// Extracts features from a frame, or reports why the buffer is unusable.
    pub fn extract(&self, frame: &Frame) -> Result<FrameFeatures, DecodeDefect> {
        validate_layout(frame)?;

        let width = frame.width as usize;
        let height = frame.height as usize;
        let columns = self.columns as usize;
        let rows = self.rows as usize;

        let column_of: Vec<usize> = (0..width).map(|x| x * columns / width).collect();
        let mut chunks = vec![Chunk::default(); columns * rows];
        let mut sum = 0.0_f64;
        let mut sum_squares = 0.0_f64;
        let mut red_pixels = 0_u64;

        for y in 0..height {
            let row_start = y * frame.stride;
            let row = &frame.data[row_start..row_start + width * CHANNELS];
            let cell_row = y * rows / height;

            for (x, bytes) in row.chunks_exact(CHANNELS).enumerate() {
                let pixel = Pixel::new(bytes[0], bytes[1], bytes[2], bytes[3]);
                let luminance = pixel.luminance();

                chunks[cell_row * columns + column_of[x]].add(luminance);
                sum += luminance;
                sum_squares += luminance * luminance;
                if pixel.is_saturated_red(&self.red_gamut) {
                    red_pixels += 1;
                }
            }
        }

        let cells = chunks
            .iter()
            .enumerate()
            .map(|(cell, chunk)| {
                chunk.mean_luminance().unwrap_or_else(|| {
                    let x = (cell % columns) * width / columns;
                    let y = (cell / columns) * height / rows;
                    frame.pixel(x, y).luminance()
                })
            })
            .collect();

        let pixel_count = (width * height) as f64;
        let mean_luminance = sum / pixel_count;
        let variance = (sum_squares / pixel_count - mean_luminance * mean_luminance).max(0.0);

        Ok(FrameFeatures {
            index: frame.index,
            timestamp: frame.timestamp,
            mean_luminance,
            cells,
            red_fraction: red_pixels as f64 / pixel_count,
            luminance_std_dev: variance.sqrt(),
        })
    }
}

fn validate_layout(frame: &Frame) -> Result<(), DecodeDefect> {
    if frame.width == 0 || frame.height == 0 {
        return Err(DecodeDefect::ZeroDimensions {
            index: frame.index,
            width: frame.width,
            height: frame.height,
        });
    }

    let row_bytes = frame.width as usize * CHANNELS;
    if frame.stride < row_bytes {
        return Err(DecodeDefect::StrideTooShort {
            index: frame.index,
            width: frame.width,
            stride: frame.stride,
        });
    }

    // The last row does not need trailing padding.
    let expected = frame
        .stride
        .checked_mul(frame.height as usize - 1)
        .and_then(|padded_rows| padded_rows.checked_add(row_bytes))
        .ok_or(DecodeDefect::LayoutOverflow {
            index: frame.index,
            stride: frame.stride,
            height: frame.height,
        })?;
    if frame.data.len() < expected {
        return Err(DecodeDefect::BufferTooShort {
            index: frame.index,
            expected,
            actual: frame.data.len(),
        });
    }

    Ok(())
}
