// Builders for small in-memory media fixtures used by the decoder tests.

use image::codecs::gif::{GifEncoder, Repeat};
use image::codecs::png::PngEncoder;
use image::{Delay, ExtendedColorType, Frame, ImageEncoder, Rgba, RgbaImage};

/// Encodes one solid-color GIF frame per entry in `colors`.
pub fn encode_gif(colors: &[[u8; 3]], width: u32, height: u32, delay_ms: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut bytes);
        encoder.set_repeat(Repeat::Infinite).expect("Error Setting Repeat.");
        for rgb in colors {
            let buffer = RgbaImage::from_pixel(width, height, Rgba([rgb[0], rgb[1], rgb[2], 255]));
            let frame = Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(delay_ms, 1));
            encoder.encode_frame(frame).expect("Error Encoding Frame.");
        }
    }
    bytes
}

/// Encodes a solid-color still PNG.
pub fn encode_png(rgb: [u8; 3], width: u32, height: u32) -> Vec<u8> {
    let buffer = RgbaImage::from_pixel(width, height, Rgba([rgb[0], rgb[1], rgb[2], 255]));
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(buffer.as_raw(), width, height, ExtendedColorType::Rgba8)
        .expect("Error Saving File.");
    bytes
}
