//! Image decoding primitives.
//!
//! All byte-to-pixel work lives here: format support checks, a cheap header
//! probe for dimensions (so memory can be reserved before a full decode), and
//! the decode itself. JPEG goes through zune-jpeg for speed with the image
//! crate as the generic fallback for everything else.

use crate::error::{Error, Result};
use std::io::Cursor;
use std::path::Path;

/// Supported file extensions (lowercase, no dot).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// Check if a file has a supported image extension.
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lower = ext.to_lowercase();
            SUPPORTED_EXTENSIONS.iter().any(|&e| e == lower)
        })
        .unwrap_or(false)
}

/// JPEG SOI marker check on the raw bytes.
fn is_jpeg_data(data: &[u8]) -> bool {
    data.starts_with(&[0xFF, 0xD8])
}

/// Read pixel dimensions from the image header without decoding pixels.
pub fn probe_dimensions(data: &[u8]) -> Result<(u32, u32)> {
    if is_jpeg_data(data) {
        let mut decoder = zune_jpeg::JpegDecoder::new(data);
        if decoder.decode_headers().is_ok() {
            if let Some(info) = decoder.info() {
                return Ok((info.width as u32, info.height as u32));
            }
        }
        // Malformed JPEG header: let the generic path report on it.
    }
    let dims = image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(Error::Io)?
        .into_dimensions()?;
    Ok(dims)
}

/// Decode encoded bytes into RGBA pixels at native resolution.
pub fn decode_pixels(data: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    if is_jpeg_data(data) {
        decode_jpeg(data)
    } else {
        decode_generic(data)
    }
}

/// Decode JPEG using zune-jpeg, falling back to the image crate.
fn decode_jpeg(data: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let mut decoder = zune_jpeg::JpegDecoder::new(data);
    if let Ok(pixels) = decoder.decode() {
        if let Some(info) = decoder.info() {
            let rgba = to_rgba(pixels, info.components);
            return Ok((rgba, info.width as u32, info.height as u32));
        }
    }
    decode_generic(data)
}

/// Decode using the image crate (generic path).
fn decode_generic(data: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let img = image::load_from_memory(data)?;
    let rgba = img.to_rgba8();
    let (width, height) = (rgba.width(), rgba.height());
    Ok((rgba.into_raw(), width, height))
}

/// Convert raw component data to RGBA.
fn to_rgba(pixels: Vec<u8>, components: u8) -> Vec<u8> {
    match components {
        4 => pixels, // already RGBA
        3 => pixels
            .chunks_exact(3)
            .flat_map(|rgb| [rgb[0], rgb[1], rgb[2], 255])
            .collect(),
        1 => pixels.iter().flat_map(|&g| [g, g, g, 255]).collect(),
        _ => pixels,
    }
}
