//! Asynchronous loading of slice geometry and slice pixels from Orthanc.
//!
//! ```text
//!   schedule_load_series ──> /series/{id}/instances-tags ──> SlicesSorter
//!                                                              │
//!                      SliceGeometryReadyMessage <─────────────┘
//!
//!   schedule_load_slice_image(i, quality) ──> decode ──> SliceImageReadyMessage
//!                                                   └──> SliceImageErrorMessage
//! ```

mod decode;
mod messages;
mod quality;
mod slices_loader;

pub use decode::{decode_full, decode_raw, decode_web_viewer_jpeg};
pub use messages::{
    SliceGeometryErrorMessage, SliceGeometryReadyMessage, SliceImageErrorMessage,
    SliceImageReadyMessage,
};
pub use quality::SliceImageQuality;
pub use slices_loader::{LoaderState, OrthancSlicesLoader};
