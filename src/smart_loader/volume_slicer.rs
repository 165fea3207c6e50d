use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error};

use super::messages::{
    LayerErrorMessage, LayerGeometryErrorMessage, LayerGeometryReadyMessage, LayerReadyMessage,
};
use super::VolumeSlicer;
use crate::error::StoneError;
use crate::geometry::{CoordinateSystem3D, Vector};
use crate::messages::{AsObservable, Observable, Observer, ObserverCallable, ObserverHandle};
use crate::slice::{Slice, SliceImage};
use crate::volume::{
    OrthancVolumeImage, SliceContentChangedMessage, VolumeGeometryErrorMessage,
    VolumeGeometryReadyMessage, VolumeProjection,
};

/// Layers cut out of the voxels of an [`OrthancVolumeImage`].
///
/// Any plane parallel to one of the three projections of the volume can be
/// displayed. The layer is answered synchronously from the voxel buffer,
/// and answered again each time a slice streamed into the volume changes
/// the displayed image.
///
/// ```text
///   volume ──VolumeGeometryReady──> LayerGeometryReady
///   volume ──SliceContentChanged──> extract_slice(last plane) ──> LayerReady
/// ```
///
/// Each widget needs its own slicer: the slicer follows one plane.
pub struct VolumeImageSlicer {
    handle: ObserverHandle,
    observable: Observable,
    volume: Arc<OrthancVolumeImage>,
    plane: Mutex<Option<CoordinateSystem3D>>,
}

impl VolumeImageSlicer {
    pub fn new(volume: &Arc<OrthancVolumeImage>) -> Arc<Self> {
        let broker = volume.observable().broker().clone();

        Arc::new_cyclic(|weak| {
            let handle = ObserverHandle::new(&broker);
            let id = handle.id();

            let emitter = volume.observable();
            emitter.register_observer_callback(Box::new(ObserverCallable::from_weak(
                weak.clone(),
                id,
                Self::on_geometry_ready,
            )));
            emitter.register_observer_callback(Box::new(ObserverCallable::from_weak(
                weak.clone(),
                id,
                Self::on_geometry_error,
            )));
            emitter.register_observer_callback(Box::new(ObserverCallable::from_weak(
                weak.clone(),
                id,
                Self::on_content_changed,
            )));

            Self {
                handle,
                observable: Observable::new(&broker),
                volume: Arc::clone(volume),
                plane: Mutex::new(None),
            }
        })
    }

    pub fn volume(&self) -> &Arc<OrthancVolumeImage> {
        &self.volume
    }

    /// Plane of the last layer requested.
    pub fn plane(&self) -> Option<CoordinateSystem3D> {
        self.plane
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Projection and slice index of the volume cut by `plane`.
    fn locate(
        &self,
        plane: &CoordinateSystem3D,
    ) -> Result<Option<(VolumeProjection, usize)>, StoneError> {
        let Some(projection) = self
            .volume
            .with_image(|image| image.detect_projection(plane))?
        else {
            return Ok(None);
        };

        let geometry = self.volume.geometry(projection)?;
        Ok(geometry.lookup_slice(plane).map(|index| (projection, index)))
    }

    fn extract(
        &self,
        plane: &CoordinateSystem3D,
    ) -> Result<Option<(Slice, SliceImage)>, StoneError> {
        let Some((projection, index)) = self.locate(plane)? else {
            return Ok(None);
        };

        let slice = self.volume.geometry(projection)?.slice(index)?;
        let image = self
            .volume
            .with_image(|image| image.extract_slice(projection, index))??;
        Ok(Some((slice, image)))
    }

    // =========================================================================
    // Volume messages
    // =========================================================================

    fn on_geometry_ready(&self, _: &VolumeGeometryReadyMessage) {
        self.observable
            .broadcast_message(&LayerGeometryReadyMessage {
                origin: self.observable.id(),
            });
    }

    fn on_geometry_error(&self, _: &VolumeGeometryErrorMessage) {
        self.observable
            .broadcast_message(&LayerGeometryErrorMessage {
                origin: self.observable.id(),
            });
    }

    fn on_content_changed(&self, message: &SliceContentChangedMessage) {
        let Some(plane) = self.plane() else {
            return;
        };

        // An axial layer only shows the slice it was cut from
        if let Ok(Some((VolumeProjection::Axial, index))) = self.locate(&plane) {
            if index != message.slice_index {
                return;
            }
        }
        self.schedule_layer_creation(&plane);
    }
}

impl VolumeSlicer for VolumeImageSlicer {
    fn extent(&self, plane: &CoordinateSystem3D) -> Option<[Vector; 4]> {
        let (projection, index) = self.locate(plane).ok().flatten()?;
        let slice = self.volume.geometry(projection).ok()?.slice(index).ok()?;
        Some(slice.extent())
    }

    fn schedule_layer_creation(&self, plane: &CoordinateSystem3D) {
        *self.plane.lock().unwrap_or_else(PoisonError::into_inner) = Some(plane.clone());

        if !self.volume.state().has_geometry() {
            debug!("Volume of {} has no geometry yet", self.observable.id());
            return;
        }

        match self.extract(plane) {
            Ok(Some((slice, image))) => {
                self.observable.broadcast_message(&LayerReadyMessage {
                    origin: self.observable.id(),
                    slice,
                    image: Arc::new(image),
                    quality: self.volume.options().quality,
                });
            }
            Ok(None) => debug!(
                "No slice of {} contains the requested plane",
                self.observable.id()
            ),
            Err(e) => {
                error!("Cannot cut the volume image: {}", e);
                self.observable.broadcast_message(&LayerErrorMessage {
                    origin: self.observable.id(),
                    plane: plane.clone(),
                });
            }
        }
    }

    fn reference_plane(&self) -> Option<CoordinateSystem3D> {
        let axial = self.volume.geometry(VolumeProjection::Axial).ok()?;
        Some(axial.reference().clone())
    }
}

impl Observer for VolumeImageSlicer {
    fn observer_handle(&self) -> &ObserverHandle {
        &self.handle
    }
}

impl AsObservable for VolumeImageSlicer {
    fn observable(&self) -> &Observable {
        &self.observable
    }
}
