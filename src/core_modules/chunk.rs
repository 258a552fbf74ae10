// THEORY:
// A `Chunk` is one cell of the analysis grid. Instead of holding the pixels
// it covers, it keeps running sums so the extractor can stream a frame row by
// row in a single pass. Averaging a whole cell cancels out single-pixel noise
// (compression artifacts, dithering) so that only spatially coherent changes
// reach the flash detector.

use crate::core_modules::pixel::Luminance;

/// Running luminance sum for one grid cell.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Chunk {
    luminance_sum: f64,
    pixel_count: u64,
}

impl Chunk {
    pub fn add(&mut self, luminance: Luminance) {
        self.luminance_sum += luminance;
        self.pixel_count += 1;
    }

    /// Average luminance over every pixel added so far, `None` for an empty cell.
    pub fn mean_luminance(&self) -> Option<Luminance> {
        (self.pixel_count > 0).then(|| self.luminance_sum / self.pixel_count as f64)
    }
}
