use std::sync::Arc;

use crate::geometry::CoordinateSystem3D;
use crate::loader::SliceImageQuality;
use crate::messages::{Message, ObservableId};
use crate::slice::{Slice, SliceImage};

/// The layer knows its slices and can be asked for images.
#[derive(Debug, Clone)]
pub struct LayerGeometryReadyMessage {
    pub origin: ObservableId,
}

impl Message for LayerGeometryReadyMessage {}

/// The layer could not load its geometry. Terminal.
#[derive(Debug, Clone)]
pub struct LayerGeometryErrorMessage {
    pub origin: ObservableId,
}

impl Message for LayerGeometryErrorMessage {}

/// The image of the layer for a plane is available.
#[derive(Debug, Clone)]
pub struct LayerReadyMessage {
    pub origin: ObservableId,
    pub slice: Slice,
    pub image: Arc<SliceImage>,
    pub quality: SliceImageQuality,
}

impl LayerReadyMessage {
    /// Plane the image lies in.
    pub fn plane(&self) -> &CoordinateSystem3D {
        self.slice.geometry()
    }
}

impl Message for LayerReadyMessage {}

/// The image of the layer for `plane` could not be loaded.
#[derive(Debug, Clone)]
pub struct LayerErrorMessage {
    pub origin: ObservableId,
    pub plane: CoordinateSystem3D,
}

impl Message for LayerErrorMessage {}

/// The pixels of a frame were decoded. Sent before the matching
/// [`LayerReadyMessage`], for caches.
#[derive(Debug, Clone)]
pub struct FrameReadyMessage {
    pub origin: ObservableId,
    pub slice: Slice,
    pub image: Arc<SliceImage>,
    pub quality: SliceImageQuality,
}

impl Message for FrameReadyMessage {}

/// A layer of a [`SliceViewerWidget`](super::SliceViewerWidget) changed:
/// its image is ready or failed to load.
#[derive(Debug, Clone)]
pub struct WidgetContentChangedMessage {
    pub origin: ObservableId,
    pub layer_index: usize,
}

impl Message for WidgetContentChangedMessage {}
