// THEORY:
// `Pixel` is the smallest unit the extractor looks at. It is a "dumb" data
// container for one RGBA sample plus the single-pixel heuristics the hazard
// model needs: perceived brightness, and whether the color sits inside the
// saturated-red gamut that flash guidance weights more heavily than any other
// hue. Nothing here reads neighbors or history; comparisons across frames
// happen on aggregated cell values, never on raw pixels.

pub type Channel = u8;
pub type Luminance = f64;

/// Bytes per RGBA pixel in a frame buffer.
pub const CHANNELS: usize = 4;

/// A single RGBA pixel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pixel {
    pub red: Channel,
    pub green: Channel,
    pub blue: Channel,
    pub alpha: Channel,
}

/// The color region counted as "saturated red".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RedGamut {
    /// Minimum red channel value.
    pub min_red: Channel,
    /// Minimum share of red in `R + G + B`.
    pub min_ratio: f64,
}

impl Pixel {
    pub fn new(red: Channel, green: Channel, blue: Channel, alpha: Channel) -> Self {
        Self { red, green, blue, alpha }
    }

    /// Luminance estimate (Rec. 601 luma) on the 0..255 scale.
    pub fn luminance(&self) -> Luminance {
        0.299_f64 * self.red as f64 + 0.587_f64 * self.green as f64 + 0.114_f64 * self.blue as f64
    }

    pub fn sum(&self) -> u16 {
        self.red as u16 + self.green as u16 + self.blue as u16
    }

    /// True when the pixel is bright red with little green or blue.
    ///
    /// The ratio test is written as a multiplication so black pixels (sum 0)
    /// never divide by zero.
    pub fn is_saturated_red(&self, gamut: &RedGamut) -> bool {
        self.red >= gamut.min_red && self.red as f64 >= gamut.min_ratio * self.sum() as f64
    }
}

impl From<[Channel; CHANNELS]> for Pixel {
    fn from(bytes: [Channel; CHANNELS]) -> Self {
        Pixel::new(bytes[0], bytes[1], bytes[2], bytes[3])
    }
}

impl From<Pixel> for [Channel; CHANNELS] {
    fn from(pixel: Pixel) -> Self {
        [pixel.red, pixel.green, pixel.blue, pixel.alpha]
    }
}
