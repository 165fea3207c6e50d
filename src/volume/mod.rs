//! 3D volumes assembled from the slices of a series.
//!
//! ```text
//!   OrthancSlicesLoader ──> OrthancVolumeImage ──> ImageBuffer3D
//!                                  │
//!                                  └──> VolumeImageGeometry (axial, coronal, sagittal)
//! ```

mod download_stack;
mod geometry;
mod image_buffer;
mod messages;
mod projection;
mod volume_image;

pub use download_stack::DownloadStack;
pub use geometry::VolumeImageGeometry;
pub use image_buffer::ImageBuffer3D;
pub use messages::{
    SliceContentChangedMessage, VolumeDegradedMessage, VolumeGeometryErrorMessage,
    VolumeGeometryReadyMessage, VolumeReadyMessage,
};
pub use projection::VolumeProjection;
pub use volume_image::{OrthancVolumeImage, VolumeImageOptions, VolumeState};
