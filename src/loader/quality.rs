use std::fmt;

use clap::ValueEnum;

/// Encoding used to download the pixels of a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum SliceImageQuality {
    /// Lossless PNG rendered by Orthanc.
    FullPng,
    /// Lossless PAM rendered by Orthanc (cheaper to decode than PNG).
    FullPam,
    /// Web viewer JPEG at quality 50.
    Jpeg50,
    /// Web viewer JPEG at quality 90.
    Jpeg90,
    /// Web viewer JPEG at quality 95.
    Jpeg95,
    /// Raw little-endian samples, used for frames Orthanc cannot render.
    #[value(skip)]
    InternalRaw,
}

impl SliceImageQuality {
    /// JPEG quality factor, for the web viewer encodings.
    pub fn jpeg_quality(self) -> Option<u8> {
        match self {
            SliceImageQuality::Jpeg50 => Some(50),
            SliceImageQuality::Jpeg90 => Some(90),
            SliceImageQuality::Jpeg95 => Some(95),
            _ => None,
        }
    }

    /// Whether the encoding is lossless.
    pub fn is_lossless(self) -> bool {
        self.jpeg_quality().is_none()
    }
}

impl fmt::Display for SliceImageQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SliceImageQuality::FullPng => "full-png",
            SliceImageQuality::FullPam => "full-pam",
            SliceImageQuality::Jpeg50 => "jpeg50",
            SliceImageQuality::Jpeg90 => "jpeg90",
            SliceImageQuality::Jpeg95 => "jpeg95",
            SliceImageQuality::InternalRaw => "internal-raw",
        };
        f.write_str(name)
    }
}
