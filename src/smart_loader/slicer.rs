use crate::geometry::{CoordinateSystem3D, Vector};
use crate::messages::AsObservable;

/// A source of 2D layers cut through some data set.
///
/// A slicer announces its geometry with
/// [`LayerGeometryReadyMessage`](super::LayerGeometryReadyMessage), then
/// answers [`VolumeSlicer::schedule_layer_creation`] with
/// [`LayerReadyMessage`](super::LayerReadyMessage) or
/// [`LayerErrorMessage`](super::LayerErrorMessage) on its observable.
pub trait VolumeSlicer: AsObservable + Send + Sync {
    /// World coordinates of the corners of the layer cut by `plane`, if
    /// the slicer has data there.
    fn extent(&self, plane: &CoordinateSystem3D) -> Option<[Vector; 4]>;

    /// Request the layer cut by `plane`. The answer is a message.
    fn schedule_layer_creation(&self, plane: &CoordinateSystem3D);

    /// Plane to display when the viewer has none yet.
    fn reference_plane(&self) -> Option<CoordinateSystem3D> {
        None
    }
}
