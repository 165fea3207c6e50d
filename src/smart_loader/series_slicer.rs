use std::sync::Arc;

use tracing::{debug, error};

use super::messages::{
    FrameReadyMessage, LayerErrorMessage, LayerGeometryErrorMessage, LayerGeometryReadyMessage,
    LayerReadyMessage,
};
use super::VolumeSlicer;
use crate::error::StoneError;
use crate::geometry::{CoordinateSystem3D, Vector};
use crate::loader::{
    OrthancSlicesLoader, SliceGeometryErrorMessage, SliceGeometryReadyMessage,
    SliceImageErrorMessage, SliceImageQuality, SliceImageReadyMessage,
};
use crate::messages::{AsObservable, Observable, Observer, ObserverCallable, ObserverHandle};
use crate::slice::Slice;
use crate::web::OrthancApiClient;

/// Layers backed by the slices of an [`OrthancSlicesLoader`].
///
/// A layer is created for a plane by looking up the slice containing it and
/// downloading its image at the configured quality.
pub struct DicomSeriesVolumeSlicer {
    handle: ObserverHandle,
    observable: Observable,
    loader: Arc<OrthancSlicesLoader>,
    quality: SliceImageQuality,
}

impl DicomSeriesVolumeSlicer {
    pub fn new(client: &OrthancApiClient, quality: SliceImageQuality) -> Arc<Self> {
        let loader = OrthancSlicesLoader::new(client);

        Arc::new_cyclic(|weak| {
            let handle = ObserverHandle::new(client.broker());
            let id = handle.id();

            let emitter = loader.observable();
            emitter.register_observer_callback(Box::new(ObserverCallable::from_weak(
                weak.clone(),
                id,
                Self::on_slice_geometry_ready,
            )));
            emitter.register_observer_callback(Box::new(ObserverCallable::from_weak(
                weak.clone(),
                id,
                Self::on_slice_geometry_error,
            )));
            emitter.register_observer_callback(Box::new(ObserverCallable::from_weak(
                weak.clone(),
                id,
                Self::on_slice_image_ready,
            )));
            emitter.register_observer_callback(Box::new(ObserverCallable::from_weak(
                weak.clone(),
                id,
                Self::on_slice_image_error,
            )));

            Self {
                handle,
                observable: Observable::new(client.broker()),
                loader: Arc::clone(&loader),
                quality,
            }
        })
    }

    pub fn load_series(&self, series_id: &str) -> Result<(), StoneError> {
        self.loader.schedule_load_series(series_id)
    }

    pub fn load_instance(&self, instance_id: &str) -> Result<(), StoneError> {
        self.loader.schedule_load_instance(instance_id)
    }

    pub fn load_frame(&self, instance_id: &str, frame: u32) -> Result<(), StoneError> {
        self.loader.schedule_load_frame(instance_id, frame)
    }

    pub fn loader(&self) -> &Arc<OrthancSlicesLoader> {
        &self.loader
    }

    pub fn image_quality(&self) -> SliceImageQuality {
        self.quality
    }

    pub fn slice_count(&self) -> Result<usize, StoneError> {
        self.loader.slice_count()
    }

    pub fn slice(&self, index: usize) -> Result<Slice, StoneError> {
        self.loader.slice(index)
    }

    fn lookup(&self, plane: &CoordinateSystem3D) -> Option<usize> {
        self.loader.lookup_slice(plane).ok().flatten()
    }

    fn on_slice_geometry_ready(&self, _: &SliceGeometryReadyMessage) {
        let origin = self.observable.id();
        if self.slice_count().unwrap_or(0) > 0 {
            self.observable
                .broadcast_message(&LayerGeometryReadyMessage { origin });
        } else {
            self.observable
                .broadcast_message(&LayerGeometryErrorMessage { origin });
        }
    }

    fn on_slice_geometry_error(&self, _: &SliceGeometryErrorMessage) {
        self.observable.broadcast_message(&LayerGeometryErrorMessage {
            origin: self.observable.id(),
        });
    }

    fn on_slice_image_ready(&self, message: &SliceImageReadyMessage) {
        let origin = self.observable.id();

        // Caches see the frame before the layer is rendered
        self.observable.broadcast_message(&FrameReadyMessage {
            origin,
            slice: message.slice.clone(),
            image: Arc::clone(&message.image),
            quality: message.quality,
        });
        self.observable.broadcast_message(&LayerReadyMessage {
            origin,
            slice: message.slice.clone(),
            image: Arc::clone(&message.image),
            quality: message.quality,
        });
    }

    fn on_slice_image_error(&self, message: &SliceImageErrorMessage) {
        self.observable.broadcast_message(&LayerErrorMessage {
            origin: self.observable.id(),
            plane: message.slice.geometry().clone(),
        });
    }
}

impl VolumeSlicer for DicomSeriesVolumeSlicer {
    fn extent(&self, plane: &CoordinateSystem3D) -> Option<[Vector; 4]> {
        let index = self.lookup(plane)?;
        self.slice(index).ok().map(|slice| slice.extent())
    }

    fn schedule_layer_creation(&self, plane: &CoordinateSystem3D) {
        let Some(index) = self.lookup(plane) else {
            debug!("No slice of {} contains the requested plane", self.observable.id());
            return;
        };

        if let Err(e) = self.loader.schedule_load_slice_image(index, self.quality) {
            error!("Cannot schedule the image of slice {}: {}", index, e);
            self.observable.broadcast_message(&LayerErrorMessage {
                origin: self.observable.id(),
                plane: plane.clone(),
            });
        }
    }

    fn reference_plane(&self) -> Option<CoordinateSystem3D> {
        self.slice(0).ok().map(|slice| slice.geometry().clone())
    }
}

impl Observer for DicomSeriesVolumeSlicer {
    fn observer_handle(&self) -> &ObserverHandle {
        &self.handle
    }
}

impl AsObservable for DicomSeriesVolumeSlicer {
    fn observable(&self) -> &Observable {
        &self.observable
    }
}
