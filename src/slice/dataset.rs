//! Read-only view over the DICOM tags returned by Orthanc.
//!
//! Orthanc serializes tags in two shapes, both accepted here:
//!
//! ```text
//!   full:  { "0028,0010": { "Name": "Rows", "Type": "String", "Value": "512" } }
//!   short: { "0028,0010": "512" }
//! ```
//!
//! Sequences and binary/null values are treated as absent.

use std::fmt;

use serde_json::{Map, Value};

use crate::error::SliceError;
use crate::geometry::parse_vector;

/// A DICOM attribute tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DicomTag {
    group: u16,
    element: u16,
    name: &'static str,
}

impl DicomTag {
    pub const fn new(group: u16, element: u16, name: &'static str) -> Self {
        Self {
            group,
            element,
            name,
        }
    }

    /// Keyword of the tag, used in error messages.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Orthanc JSON key (`"0028,0010"`).
    pub fn key(&self) -> String {
        format!("{:04x},{:04x}", self.group, self.element)
    }
}

impl fmt::Debug for DicomTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:04X},{:04X}) {}", self.group, self.element, self.name)
    }
}

/// Tags consumed by the slice loaders.
pub mod tags {
    use super::DicomTag;

    pub const SOP_CLASS_UID: DicomTag = DicomTag::new(0x0008, 0x0016, "SOPClassUID");
    pub const SLICE_THICKNESS: DicomTag = DicomTag::new(0x0018, 0x0050, "SliceThickness");
    pub const IMAGE_POSITION_PATIENT: DicomTag =
        DicomTag::new(0x0020, 0x0032, "ImagePositionPatient");
    pub const IMAGE_ORIENTATION_PATIENT: DicomTag =
        DicomTag::new(0x0020, 0x0037, "ImageOrientationPatient");
    pub const PHOTOMETRIC_INTERPRETATION: DicomTag =
        DicomTag::new(0x0028, 0x0004, "PhotometricInterpretation");
    pub const NUMBER_OF_FRAMES: DicomTag = DicomTag::new(0x0028, 0x0008, "NumberOfFrames");
    pub const FRAME_INCREMENT_POINTER: DicomTag =
        DicomTag::new(0x0028, 0x0009, "FrameIncrementPointer");
    pub const ROWS: DicomTag = DicomTag::new(0x0028, 0x0010, "Rows");
    pub const COLUMNS: DicomTag = DicomTag::new(0x0028, 0x0011, "Columns");
    pub const PIXEL_SPACING: DicomTag = DicomTag::new(0x0028, 0x0030, "PixelSpacing");
    pub const BITS_STORED: DicomTag = DicomTag::new(0x0028, 0x0101, "BitsStored");
    pub const PIXEL_REPRESENTATION: DicomTag =
        DicomTag::new(0x0028, 0x0103, "PixelRepresentation");
    pub const WINDOW_CENTER: DicomTag = DicomTag::new(0x0028, 0x1050, "WindowCenter");
    pub const WINDOW_WIDTH: DicomTag = DicomTag::new(0x0028, 0x1051, "WindowWidth");
    pub const RESCALE_INTERCEPT: DicomTag = DicomTag::new(0x0028, 0x1052, "RescaleIntercept");
    pub const RESCALE_SLOPE: DicomTag = DicomTag::new(0x0028, 0x1053, "RescaleSlope");
    pub const GRID_FRAME_OFFSET_VECTOR: DicomTag =
        DicomTag::new(0x3004, 0x000c, "GridFrameOffsetVector");
    pub const DOSE_GRID_SCALING: DicomTag = DicomTag::new(0x3004, 0x000e, "DoseGridScaling");
}

/// Borrowed view over one instance's tags.
#[derive(Debug, Clone, Copy)]
pub struct DicomDataset<'a> {
    tags: &'a Map<String, Value>,
}

impl<'a> DicomDataset<'a> {
    /// Wrap a JSON object. Returns `None` for any other JSON value.
    pub fn new(value: &'a Value) -> Option<Self> {
        value.as_object().map(|tags| Self { tags })
    }

    /// Trimmed string value of `tag`, if present.
    pub fn string(&self, tag: DicomTag) -> Option<&'a str> {
        let key = tag.key();
        let entry = self
            .tags
            .get(&key)
            .or_else(|| self.tags.get(&key.to_uppercase()))?;

        let raw = match entry {
            Value::String(value) => value.as_str(),
            Value::Object(full) => full.get("Value")?.as_str()?,
            _ => return None,
        };

        Some(raw.trim_matches(|c: char| c == ' ' || c == '\0'))
    }

    /// Non-empty string value of `tag`.
    pub fn non_empty_string(&self, tag: DicomTag) -> Option<&'a str> {
        self.string(tag).filter(|value| !value.is_empty())
    }

    /// Parse an unsigned integer tag. Missing tag is `Ok(None)`.
    pub fn parse_u32(&self, tag: DicomTag) -> Result<Option<u32>, SliceError> {
        self.parse_with(tag, |value| value.parse::<u32>().ok())
    }

    /// Parse a signed integer tag. Missing tag is `Ok(None)`.
    pub fn parse_i32(&self, tag: DicomTag) -> Result<Option<i32>, SliceError> {
        self.parse_with(tag, |value| value.parse::<i32>().ok())
    }

    /// Parse a decimal tag. Missing tag is `Ok(None)`.
    pub fn parse_f64(&self, tag: DicomTag) -> Result<Option<f64>, SliceError> {
        // Multi-valued decimals keep their first value
        self.parse_with(tag, |value| {
            value.split('\\').next()?.trim().parse::<f64>().ok()
        })
    }

    /// Parse a backslash-separated decimal list. Missing tag is `Ok(None)`.
    pub fn parse_vector(&self, tag: DicomTag) -> Result<Option<Vec<f64>>, SliceError> {
        self.parse_with(tag, |value| parse_vector(value).ok())
    }

    fn parse_with<T>(
        &self,
        tag: DicomTag,
        parse: impl FnOnce(&str) -> Option<T>,
    ) -> Result<Option<T>, SliceError> {
        match self.non_empty_string(tag) {
            None => Ok(None),
            Some(value) => parse(value).map(Some).ok_or_else(|| SliceError::InvalidTag {
                tag: tag.name(),
                value: value.to_string(),
            }),
        }
    }
}
