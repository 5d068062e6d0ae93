use crate::core::error::ProcessingError;
use crate::core::media::ImageData;
use image::{Rgba, RgbaImage};
use log::warn;

// Fixed thresholds for the #00FF00 chroma key and the white fallback.
pub const GREEN_THRESHOLD: u8 = 180;
pub const GREEN_TOLERANCE: u8 = 50;
pub const GREEN_EDGE_THRESHOLD: u8 = 120;
pub const GREEN_EDGE_TOLERANCE: u8 = 80;
pub const WHITE_THRESHOLD: u8 = 245;

/// Something that can be turned into an RGBA pixel buffer.
///
/// Every pass decodes its own copy, so a failing decode in one pass does not
/// prevent the next pass from trying again.
pub trait RasterSource {
    fn decode_rgba(&self) -> Result<RgbaImage, ProcessingError>;
}

impl RasterSource for RgbaImage {
    fn decode_rgba(&self) -> Result<RgbaImage, ProcessingError> {
        Ok(self.clone())
    }
}

impl RasterSource for [u8] {
    fn decode_rgba(&self) -> Result<RgbaImage, ProcessingError> {
        let decoded =
            image::load_from_memory(self).map_err(|e| ProcessingError::Decode(e.to_string()))?;
        Ok(decoded.into_rgba8())
    }
}

impl RasterSource for ImageData {
    fn decode_rgba(&self) -> Result<RgbaImage, ProcessingError> {
        ImageData::decode_rgba(self)
    }
}

/// Alpha for one pixel under the chroma key.
pub fn chroma_key_alpha(pixel: Rgba<u8>) -> u8 {
    let [r, g, b, a] = pixel.0;

    if g > GREEN_THRESHOLD && r < GREEN_TOLERANCE && b < GREEN_TOLERANCE {
        return 0;
    }

    if g > GREEN_EDGE_THRESHOLD && r < GREEN_EDGE_TOLERANCE && b < GREEN_EDGE_TOLERANCE {
        // Anti-aliased edge: the greener the pixel, the more transparent.
        let greenness = (i32::from(g) - i32::from(r.max(b))) as f32 / 255.0;
        let alpha = (255.0 * (1.0 - greenness)).round();
        return alpha.clamp(0.0, 255.0) as u8;
    }

    a
}

/// Alpha for one pixel under the white key.
pub fn white_key_alpha(pixel: Rgba<u8>) -> u8 {
    let [r, g, b, a] = pixel.0;
    if r > WHITE_THRESHOLD && g > WHITE_THRESHOLD && b > WHITE_THRESHOLD {
        0
    } else {
        a
    }
}

pub fn apply_chroma_key(image: &mut RgbaImage) {
    for pixel in image.pixels_mut() {
        pixel.0[3] = chroma_key_alpha(*pixel);
    }
}

pub fn apply_white_key(image: &mut RgbaImage) {
    for pixel in image.pixels_mut() {
        pixel.0[3] = white_key_alpha(*pixel);
    }
}

pub fn remove_green_background<S: RasterSource + ?Sized>(
    source: &S,
) -> Result<RgbaImage, ProcessingError> {
    let mut image = source.decode_rgba()?;
    apply_chroma_key(&mut image);
    Ok(image)
}

pub fn remove_white_background<S: RasterSource + ?Sized>(
    source: &S,
) -> Result<RgbaImage, ProcessingError> {
    let mut image = source.decode_rgba()?;
    apply_white_key(&mut image);
    Ok(image)
}

/// Chroma key first, white key if the chroma pass cannot run.
///
/// Fails only when both passes fail; keeping the original image is the
/// caller's decision.
pub fn remove_background<S: RasterSource + ?Sized>(
    source: &S,
) -> Result<RgbaImage, ProcessingError> {
    match remove_green_background(source) {
        Ok(image) => Ok(image),
        Err(chroma) => {
            warn!("Chroma key failed ({}), falling back to white key", chroma);
            remove_white_background(source).map_err(|white| ProcessingError::Exhausted {
                chroma: chroma.to_string(),
                white: white.to_string(),
            })
        }
    }
}
