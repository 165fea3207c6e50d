//! Decoded 2D pixel buffers.
//!
//! Images are stored as `ndarray` arrays indexed `[row, column]`, one variant
//! per pixel format. Once decoded, an image is shared through `Arc` and never
//! mutated again.

use ndarray::{Array2, ArrayView2};

use crate::error::StoneError;

/// Pixel formats produced by the slice decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Grayscale8,
    Grayscale16,
    SignedGrayscale16,
    Grayscale32,
    Float32,
    Rgb24,
}

impl PixelFormat {
    /// Size of one pixel in bytes.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Grayscale8 => 1,
            PixelFormat::Grayscale16 | PixelFormat::SignedGrayscale16 => 2,
            PixelFormat::Rgb24 => 3,
            PixelFormat::Grayscale32 | PixelFormat::Float32 => 4,
        }
    }

    /// Whether the format carries one sample per pixel.
    pub fn is_grayscale(self) -> bool {
        !matches!(self, PixelFormat::Rgb24)
    }
}

/// Pixel storage, `[row, column]`.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    Grayscale8(Array2<u8>),
    Grayscale16(Array2<u16>),
    SignedGrayscale16(Array2<i16>),
    Grayscale32(Array2<u32>),
    Float32(Array2<f32>),
    Rgb24(Array2<[u8; 3]>),
}

macro_rules! for_each_variant {
    ($data:expr, $array:ident => $body:expr) => {
        match $data {
            PixelData::Grayscale8($array) => $body,
            PixelData::Grayscale16($array) => $body,
            PixelData::SignedGrayscale16($array) => $body,
            PixelData::Grayscale32($array) => $body,
            PixelData::Float32($array) => $body,
            PixelData::Rgb24($array) => $body,
        }
    };
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceImage {
    pixels: PixelData,
}

impl SliceImage {
    pub fn new(pixels: PixelData) -> Self {
        Self { pixels }
    }

    /// Zero-filled image.
    pub fn zeros(format: PixelFormat, width: u32, height: u32) -> Self {
        let shape = (height as usize, width as usize);
        let pixels = match format {
            PixelFormat::Grayscale8 => PixelData::Grayscale8(Array2::zeros(shape)),
            PixelFormat::Grayscale16 => PixelData::Grayscale16(Array2::zeros(shape)),
            PixelFormat::SignedGrayscale16 => PixelData::SignedGrayscale16(Array2::zeros(shape)),
            PixelFormat::Grayscale32 => PixelData::Grayscale32(Array2::zeros(shape)),
            PixelFormat::Float32 => PixelData::Float32(Array2::zeros(shape)),
            PixelFormat::Rgb24 => PixelData::Rgb24(Array2::from_elem(shape, [0; 3])),
        };
        Self { pixels }
    }

    pub fn format(&self) -> PixelFormat {
        match &self.pixels {
            PixelData::Grayscale8(_) => PixelFormat::Grayscale8,
            PixelData::Grayscale16(_) => PixelFormat::Grayscale16,
            PixelData::SignedGrayscale16(_) => PixelFormat::SignedGrayscale16,
            PixelData::Grayscale32(_) => PixelFormat::Grayscale32,
            PixelData::Float32(_) => PixelFormat::Float32,
            PixelData::Rgb24(_) => PixelFormat::Rgb24,
        }
    }

    pub fn width(&self) -> u32 {
        for_each_variant!(&self.pixels, array => array.ncols() as u32)
    }

    pub fn height(&self) -> u32 {
        for_each_variant!(&self.pixels, array => array.nrows() as u32)
    }

    pub fn pixels(&self) -> &PixelData {
        &self.pixels
    }

    pub fn into_pixels(self) -> PixelData {
        self.pixels
    }

    /// Grayscale value at `(x, y)` as a float. `None` for color images or
    /// out-of-bounds coordinates.
    pub fn value(&self, x: u32, y: u32) -> Option<f64> {
        let index = (y as usize, x as usize);
        match &self.pixels {
            PixelData::Grayscale8(a) => a.get(index).map(|v| f64::from(*v)),
            PixelData::Grayscale16(a) => a.get(index).map(|v| f64::from(*v)),
            PixelData::SignedGrayscale16(a) => a.get(index).map(|v| f64::from(*v)),
            PixelData::Grayscale32(a) => a.get(index).map(|v| f64::from(*v)),
            PixelData::Float32(a) => a.get(index).map(|v| f64::from(*v)),
            PixelData::Rgb24(_) => None,
        }
    }

    /// View the samples as `f32`, for grayscale images.
    pub fn to_float(&self) -> Result<Array2<f32>, StoneError> {
        Ok(match &self.pixels {
            PixelData::Grayscale8(a) => a.mapv(f32::from),
            PixelData::Grayscale16(a) => a.mapv(f32::from),
            PixelData::SignedGrayscale16(a) => a.mapv(f32::from),
            PixelData::Grayscale32(a) => a.mapv(|v| v as f32),
            PixelData::Float32(a) => a.clone(),
            PixelData::Rgb24(_) => {
                return Err(StoneError::IncompatibleImageFormat(PixelFormat::Rgb24))
            }
        })
    }

    /// Reinterpret unsigned 16-bit samples as signed (two's complement).
    ///
    /// Orthanc serves signed frames through 16-bit PNG/PAM, which have no
    /// notion of sign.
    pub fn reinterpret_as_signed(self) -> Result<Self, StoneError> {
        match self.pixels {
            PixelData::Grayscale16(a) => Ok(Self::new(PixelData::SignedGrayscale16(
                a.mapv(|v| v as i16),
            ))),
            PixelData::SignedGrayscale16(_) => Ok(self),
            other => Err(StoneError::IncompatibleImageFormat(
                Self::new(other).format(),
            )),
        }
    }

    /// Grayscale8 view, if this is an 8-bit image.
    pub fn as_grayscale8(&self) -> Option<ArrayView2<'_, u8>> {
        match &self.pixels {
            PixelData::Grayscale8(a) => Some(a.view()),
            _ => None,
        }
    }
}
