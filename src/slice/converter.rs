use ndarray::Array2;

use super::dataset::{tags, DicomDataset};
use super::image::{PixelData, PixelFormat, SliceImage};
use crate::error::{SliceError, StoneError};

/// Mapping from stored pixel values to physical units.
///
/// Also records which pixel format the decoded frame is expected to have,
/// which drives both the choice of the download URI and the validation of
/// the decoded image.
#[derive(Debug, Clone, PartialEq)]
pub struct DicomFrameConverter {
    is_signed: bool,
    is_color: bool,
    has_rescale: bool,
    rescale_intercept: f64,
    rescale_slope: f64,
    default_window_center: f32,
    default_window_width: f32,
    expected_pixel_format: PixelFormat,
}

impl Default for DicomFrameConverter {
    fn default() -> Self {
        Self {
            is_signed: true,
            is_color: false,
            has_rescale: false,
            rescale_intercept: 0.0,
            rescale_slope: 1.0,
            default_window_center: 128.0,
            default_window_width: 256.0,
            expected_pixel_format: PixelFormat::Grayscale16,
        }
    }
}

impl DicomFrameConverter {
    /// Read the conversion parameters from the tags of an instance.
    ///
    /// `PixelRepresentation` and `PhotometricInterpretation` are type 1 tags
    /// and must be present. RT-DOSE instances use `DoseGridScaling` as their
    /// rescale slope and are decoded from raw samples of `BitsStored` bits.
    pub fn read_parameters(dataset: &DicomDataset<'_>) -> Result<Self, SliceError> {
        let mut converter = Self::default();

        if let (Some(center), Some(width)) = (
            dataset.parse_vector(tags::WINDOW_CENTER)?,
            dataset.parse_vector(tags::WINDOW_WIDTH)?,
        ) {
            if let (Some(c), Some(w)) = (center.first(), width.first()) {
                converter.default_window_center = *c as f32;
                converter.default_window_width = *w as f32;
            }
        }

        let representation = dataset
            .parse_i32(tags::PIXEL_REPRESENTATION)?
            .ok_or(SliceError::MissingTag(tags::PIXEL_REPRESENTATION.name()))?;
        converter.is_signed = representation == 1;

        let mut is_rt_dose = false;
        let intercept = dataset.parse_f64(tags::RESCALE_INTERCEPT)?;
        let slope = dataset.parse_f64(tags::RESCALE_SLOPE)?;

        if let (Some(intercept), Some(slope)) = (intercept, slope) {
            converter.has_rescale = true;
            converter.rescale_intercept = intercept;
            converter.rescale_slope = slope;
        } else if let Some(scaling) = dataset.parse_f64(tags::DOSE_GRID_SCALING)? {
            converter.has_rescale = true;
            converter.rescale_intercept = 0.0;
            converter.rescale_slope = scaling;
            is_rt_dose = true;

            let bits = dataset
                .parse_u32(tags::BITS_STORED)?
                .ok_or(SliceError::MissingTag(tags::BITS_STORED.name()))?;
            converter.expected_pixel_format = match bits {
                16 => PixelFormat::Grayscale16,
                32 => PixelFormat::Grayscale32,
                other => return Err(SliceError::UnsupportedBitsStored(other)),
            };
        }

        let photometric = dataset
            .string(tags::PHOTOMETRIC_INTERPRETATION)
            .ok_or(SliceError::MissingTag(tags::PHOTOMETRIC_INTERPRETATION.name()))?;
        converter.is_color = photometric != "MONOCHROME1" && photometric != "MONOCHROME2";

        if !is_rt_dose {
            converter.expected_pixel_format = if converter.is_color {
                PixelFormat::Rgb24
            } else if converter.is_signed {
                PixelFormat::SignedGrayscale16
            } else {
                PixelFormat::Grayscale16
            };
        }

        Ok(converter)
    }

    pub fn expected_pixel_format(&self) -> PixelFormat {
        self.expected_pixel_format
    }

    pub fn is_signed(&self) -> bool {
        self.is_signed
    }

    pub fn is_color(&self) -> bool {
        self.is_color
    }

    pub fn rescale_slope(&self) -> f64 {
        self.rescale_slope
    }

    pub fn rescale_intercept(&self) -> f64 {
        self.rescale_intercept
    }

    /// Window `(center, width)` suggested by the instance.
    pub fn default_window(&self) -> (f32, f32) {
        (self.default_window_center, self.default_window_width)
    }

    /// Convert one stored value to physical units.
    pub fn apply(&self, value: f64) -> f64 {
        value * self.rescale_slope + self.rescale_intercept
    }

    /// Convert a decoded grayscale frame to `Float32` physical values.
    ///
    /// The frame must have the expected pixel format. Color frames are
    /// returned unchanged.
    pub fn convert_frame(&self, frame: SliceImage) -> Result<SliceImage, StoneError> {
        if frame.format() != self.expected_pixel_format {
            return Err(StoneError::IncompatibleImageFormat(frame.format()));
        }
        if frame.format() == PixelFormat::Rgb24 {
            return Ok(frame);
        }

        let mut values: Array2<f32> = frame.to_float()?;
        if self.has_rescale {
            let (slope, intercept) = (self.rescale_slope, self.rescale_intercept);
            values.mapv_inplace(|v| (f64::from(v) * slope + intercept) as f32);
        }

        Ok(SliceImage::new(PixelData::Float32(values)))
    }
}
