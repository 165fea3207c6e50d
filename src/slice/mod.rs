//! DICOM slices as served by Orthanc.
//!
//! ```text
//!   /instances/{id}/tags ──> DicomDataset ──> Slice ──> SlicesSorter
//!                                │
//!                                └──> DicomFrameConverter
//! ```

mod converter;
mod dataset;
mod image;
#[allow(clippy::module_inception)]
mod slice;
mod sorter;

pub use converter::DicomFrameConverter;
pub use dataset::{tags, DicomDataset, DicomTag};
pub use image::{PixelData, PixelFormat, SliceImage};
pub use slice::{frame_key, Slice, SliceKind, DEFAULT_SLICE_THICKNESS, RT_DOSE_SOP_CLASS_UID};
pub use sorter::SlicesSorter;
