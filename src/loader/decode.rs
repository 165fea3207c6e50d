//! Decoders for the slice image encodings served by Orthanc.
//!
//! ```text
//!   FullPng / FullPam  ->  /frames/{f}/preview | image-uint16 | image-int16
//!   Jpeg50/90/95       ->  web viewer JSON { "Orthanc": { "PixelData": base64 JPEG, ... } }
//!   InternalRaw        ->  /frames/{f}/raw   (little-endian samples)
//! ```
//!
//! Every decoder checks that the image has the size of its slice.

use base64::prelude::*;
use image::{DynamicImage, ImageFormat};
use ndarray::Array2;
use serde_json::Value;

use crate::error::DecodeError;
use crate::slice::{PixelData, PixelFormat, Slice, SliceImage};

// =============================================================================
// PNG / PAM
// =============================================================================

/// Decode a lossless PNG or PAM rendering of `slice`.
///
/// 16-bit PNG and PAM carry no sign: a `Grayscale16` image is reinterpreted
/// as `SignedGrayscale16` when the slice holds signed samples.
pub fn decode_full(body: &[u8], format: ImageFormat, slice: &Slice) -> Result<SliceImage, DecodeError> {
    let decoded = image::load_from_memory_with_format(body, format)
        .map_err(|e| DecodeError::Codec(e.to_string()))?;
    let image = from_dynamic(decoded)?;
    check_size(&image, slice)?;

    let expected = slice.converter().expected_pixel_format();
    if expected == PixelFormat::SignedGrayscale16 {
        return match image.format() {
            PixelFormat::Grayscale16 => image
                .reinterpret_as_signed()
                .map_err(|_| mismatch(expected, PixelFormat::Grayscale16)),
            actual => Err(mismatch(expected, actual)),
        };
    }

    Ok(image)
}

fn from_dynamic(decoded: DynamicImage) -> Result<SliceImage, DecodeError> {
    let (width, height) = (decoded.width() as usize, decoded.height() as usize);
    let shape = (height, width);
    let shape_error = |e: ndarray::ShapeError| DecodeError::Codec(e.to_string());

    let pixels = match decoded {
        DynamicImage::ImageLuma8(buffer) => {
            PixelData::Grayscale8(Array2::from_shape_vec(shape, buffer.into_raw()).map_err(shape_error)?)
        }
        DynamicImage::ImageLuma16(buffer) => {
            PixelData::Grayscale16(Array2::from_shape_vec(shape, buffer.into_raw()).map_err(shape_error)?)
        }
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => {
            let rgb = decoded.into_rgb8().into_raw();
            let pixels: Vec<[u8; 3]> = rgb.chunks_exact(3).map(|p| [p[0], p[1], p[2]]).collect();
            PixelData::Rgb24(Array2::from_shape_vec(shape, pixels).map_err(shape_error)?)
        }
        other => {
            return Err(DecodeError::Codec(format!(
                "unsupported color type {:?}",
                other.color()
            )))
        }
    };

    Ok(SliceImage::new(pixels))
}

// =============================================================================
// Web Viewer JPEG
// =============================================================================

/// Decode the JSON answer of the Orthanc web viewer plugin.
///
/// 16-bit frames are sent as 8-bit JPEG "stretched" over
/// `[StretchLow, StretchHigh]`; they are mapped back to the expected pixel
/// format, which loses precision.
pub fn decode_web_viewer_jpeg(body: &[u8], slice: &Slice) -> Result<SliceImage, DecodeError> {
    let answer: Value = serde_json::from_slice(body)
        .map_err(|e| DecodeError::InvalidWebViewerAnswer(e.to_string()))?;
    let info = answer
        .get("Orthanc")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("missing \"Orthanc\" object"))?;

    let pixel_data = info
        .get("PixelData")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing \"PixelData\""))?;
    let stretched = info
        .get("Stretched")
        .and_then(Value::as_bool)
        .ok_or_else(|| invalid("missing \"Stretched\""))?;
    if info.get("Compression").and_then(Value::as_str) != Some("Jpeg") {
        return Err(invalid("\"Compression\" is not \"Jpeg\""));
    }
    let is_signed = match info.get("IsSigned") {
        None => false,
        Some(value) => value
            .as_bool()
            .ok_or_else(|| invalid("\"IsSigned\" is not a boolean"))?,
    };

    let jpeg = BASE64_STANDARD
        .decode(pixel_data)
        .map_err(|e| invalid(&e.to_string()))?;
    let decoded = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)
        .map_err(|e| DecodeError::Codec(e.to_string()))?;
    let image = from_dynamic(decoded)?;
    check_size(&image, slice)?;

    let expected = slice.converter().expected_pixel_format();
    match image.format() {
        PixelFormat::Rgb24 => {
            if expected != PixelFormat::Rgb24 {
                return Err(mismatch(expected, PixelFormat::Rgb24));
            }
            if is_signed || stretched {
                return Err(invalid("color JPEG cannot be signed or stretched"));
            }
            return Ok(image);
        }
        PixelFormat::Grayscale8 => {}
        actual => return Err(mismatch(expected, actual)),
    }

    if !stretched {
        return if expected == PixelFormat::Grayscale8 {
            Ok(image)
        } else {
            Err(mismatch(expected, PixelFormat::Grayscale8))
        };
    }

    let low = info
        .get("StretchLow")
        .and_then(Value::as_i64)
        .ok_or_else(|| invalid("missing \"StretchLow\""))?;
    let high = info
        .get("StretchHigh")
        .and_then(Value::as_i64)
        .ok_or_else(|| invalid("missing \"StretchHigh\""))?;

    // Neither uint16 nor int16 can hold the range
    if low < -32768 || high > 65535 || (low < 0 && high > 32767) {
        return Err(DecodeError::UnrepresentableStretch { low, high });
    }

    unstretch(&image, expected, low, high)
}

/// Map 8-bit samples back to `[low, high]`: `(v + low / s) * s` with
/// `s = (high - low) / 255`, rounded and saturated to the target format.
fn unstretch(
    image: &SliceImage,
    expected: PixelFormat,
    low: i64,
    high: i64,
) -> Result<SliceImage, DecodeError> {
    let Some(samples) = image.as_grayscale8() else {
        return Err(mismatch(expected, image.format()));
    };

    let scaling = (high - low) as f32 / 255.0;
    let low = low as f32;
    let value = move |v: u8| f32::from(v) * scaling + low;

    let pixels = match expected {
        PixelFormat::Grayscale16 => {
            PixelData::Grayscale16(samples.mapv(|v| value(v).round().clamp(0.0, 65535.0) as u16))
        }
        PixelFormat::SignedGrayscale16 => PixelData::SignedGrayscale16(
            samples.mapv(|v| value(v).round().clamp(-32768.0, 32767.0) as i16),
        ),
        PixelFormat::Float32 => PixelData::Float32(samples.mapv(value)),
        other => return Err(mismatch(other, PixelFormat::Grayscale8)),
    };

    Ok(SliceImage::new(pixels))
}

// =============================================================================
// Raw Samples
// =============================================================================

/// Decode uncompressed little-endian samples in the expected pixel format.
pub fn decode_raw(body: &[u8], slice: &Slice) -> Result<SliceImage, DecodeError> {
    let format = slice.converter().expected_pixel_format();
    let shape = (slice.height() as usize, slice.width() as usize);
    let expected = shape.0 * shape.1 * format.bytes_per_pixel();

    if body.len() != expected {
        return Err(DecodeError::RawLength {
            expected,
            actual: body.len(),
        });
    }

    let shape_error = |e: ndarray::ShapeError| DecodeError::Codec(e.to_string());
    let pixels = match format {
        PixelFormat::Grayscale8 => {
            PixelData::Grayscale8(Array2::from_shape_vec(shape, body.to_vec()).map_err(shape_error)?)
        }
        PixelFormat::Grayscale16 => {
            let samples = body
                .chunks_exact(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .collect();
            PixelData::Grayscale16(Array2::from_shape_vec(shape, samples).map_err(shape_error)?)
        }
        PixelFormat::SignedGrayscale16 => {
            let samples = body
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect();
            PixelData::SignedGrayscale16(Array2::from_shape_vec(shape, samples).map_err(shape_error)?)
        }
        PixelFormat::Grayscale32 => {
            let samples = body
                .chunks_exact(4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            PixelData::Grayscale32(Array2::from_shape_vec(shape, samples).map_err(shape_error)?)
        }
        PixelFormat::Float32 => {
            let samples = body
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            PixelData::Float32(Array2::from_shape_vec(shape, samples).map_err(shape_error)?)
        }
        PixelFormat::Rgb24 => {
            let samples = body.chunks_exact(3).map(|b| [b[0], b[1], b[2]]).collect();
            PixelData::Rgb24(Array2::from_shape_vec(shape, samples).map_err(shape_error)?)
        }
    };

    Ok(SliceImage::new(pixels))
}

// =============================================================================
// Helpers
// =============================================================================

fn check_size(image: &SliceImage, slice: &Slice) -> Result<(), DecodeError> {
    if image.width() != slice.width() || image.height() != slice.height() {
        return Err(DecodeError::SizeMismatch {
            width: slice.width(),
            height: slice.height(),
            actual_width: image.width(),
            actual_height: image.height(),
        });
    }
    Ok(())
}

fn mismatch(expected: PixelFormat, actual: PixelFormat) -> DecodeError {
    DecodeError::FormatMismatch { expected, actual }
}

fn invalid(reason: &str) -> DecodeError {
    DecodeError::InvalidWebViewerAnswer(reason.to_string())
}
