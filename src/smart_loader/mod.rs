//! Layers, viewer widgets and the frame cache.
//!
//! ```text
//!   SmartLoader ──set_frame_in_widget──> SliceViewerWidget
//!        │                                    │ layers
//!        │ miss: creates                      ▼
//!        ├──────────────> DicomSeriesVolumeSlicer ──> OrthancSlicesLoader
//!        │ hit: clones
//!        └──────────────> CachedSlice (shared pixels)
//!
//!   VolumeImageSlicer ──> OrthancVolumeImage (any of the three projections)
//! ```
//!
//! Every layer implements [`VolumeSlicer`] and talks to its widget through
//! the layer messages.

mod cache;
mod cached_slice;
mod messages;
mod series_slicer;
mod slicer;
mod volume_slicer;
mod widget;

pub use cache::{SmartLoader, SmartLoaderOptions, DEFAULT_CACHE_CAPACITY};
pub use cached_slice::{CachedSlice, CachedSliceStatus};
pub use messages::{
    FrameReadyMessage, LayerErrorMessage, LayerGeometryErrorMessage, LayerGeometryReadyMessage,
    LayerReadyMessage, WidgetContentChangedMessage,
};
pub use series_slicer::DicomSeriesVolumeSlicer;
pub use slicer::VolumeSlicer;
pub use volume_slicer::VolumeImageSlicer;
pub use widget::{LayerState, SliceViewerWidget};
