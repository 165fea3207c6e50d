use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, warn};

use super::messages::{
    LayerErrorMessage, LayerGeometryErrorMessage, LayerGeometryReadyMessage, LayerReadyMessage,
    WidgetContentChangedMessage,
};
use super::VolumeSlicer;
use crate::error::StoneError;
use crate::geometry::{CoordinateSystem3D, Vector};
use crate::loader::SliceImageQuality;
use crate::messages::{
    AsObservable, MessageBroker, ObservableId, Observable, Observer, ObserverCallable,
    ObserverHandle,
};
use crate::slice::{Slice, SliceImage};

/// Latest known state of a layer.
#[derive(Debug, Clone)]
pub enum LayerState {
    /// Waiting for the geometry of the layer.
    Loading,
    /// Geometry known, no image received for the current plane yet.
    GeometryReady,
    /// The layer will never produce an image.
    GeometryError,
    Ready {
        slice: Slice,
        image: Arc<SliceImage>,
        quality: SliceImageQuality,
    },
    Error {
        plane: CoordinateSystem3D,
    },
}

impl LayerState {
    pub fn is_ready(&self) -> bool {
        matches!(self, LayerState::Ready { .. })
    }
}

struct Layer {
    slicer: Arc<dyn VolumeSlicer>,
    state: LayerState,
}

struct Inner {
    plane: Option<CoordinateSystem3D>,
    layers: Vec<Layer>,
}

/// A viewport showing a stack of layers cut by one plane.
///
/// The widget does not render: it tracks which layers are ready for its
/// current plane and tells its own observers through
/// [`WidgetContentChangedMessage`].
///
/// ```text
///   layer ──LayerGeometryReady──> widget ──schedule_layer_creation(plane)──> layer
///   layer ──LayerReady/Error────> widget ──WidgetContentChanged──> observers
/// ```
pub struct SliceViewerWidget {
    handle: ObserverHandle,
    observable: Observable,
    weak: Weak<Self>,
    name: String,
    inner: Mutex<Inner>,
}

impl SliceViewerWidget {
    pub fn new(broker: &MessageBroker, name: impl Into<String>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            handle: ObserverHandle::new(broker),
            observable: Observable::new(broker),
            weak: weak.clone(),
            name: name.into(),
            inner: Mutex::new(Inner {
                plane: None,
                layers: Vec::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plane(&self) -> Option<CoordinateSystem3D> {
        self.lock().plane.clone()
    }

    /// Move the widget to `plane` and request every layer for it.
    pub fn set_plane(&self, plane: CoordinateSystem3D) {
        let slicers = {
            let mut inner = self.lock();
            inner.plane = Some(plane.clone());
            inner
                .layers
                .iter()
                .map(|layer| Arc::clone(&layer.slicer))
                .collect::<Vec<_>>()
        };

        for slicer in slicers {
            slicer.schedule_layer_creation(&plane);
        }
    }

    pub fn layer_count(&self) -> usize {
        self.lock().layers.len()
    }

    pub fn layer_state(&self, index: usize) -> Option<LayerState> {
        self.lock().layers.get(index).map(|layer| layer.state.clone())
    }

    /// Corners of layer `index` in the current plane.
    pub fn layer_extent(&self, index: usize) -> Option<[Vector; 4]> {
        let (slicer, plane) = {
            let inner = self.lock();
            let layer = inner.layers.get(index)?;
            (Arc::clone(&layer.slicer), inner.plane.clone()?)
        };
        slicer.extent(&plane)
    }

    /// Append a layer on top of the others. Returns its index.
    pub fn add_layer(&self, slicer: Arc<dyn VolumeSlicer>) -> usize {
        self.subscribe(slicer.as_ref());

        let mut inner = self.lock();
        inner.layers.push(Layer {
            slicer,
            state: LayerState::Loading,
        });
        debug!("Widget {}: added layer {}", self.name, inner.layers.len() - 1);
        inner.layers.len() - 1
    }

    /// Replace layer `index`. Messages of the previous layer are ignored
    /// from now on.
    pub fn replace_layer(
        &self,
        index: usize,
        slicer: Arc<dyn VolumeSlicer>,
    ) -> Result<(), StoneError> {
        let count = self.layer_count();
        if index >= count {
            return Err(StoneError::ParameterOutOfRange { index, size: count });
        }

        self.subscribe(slicer.as_ref());

        let mut inner = self.lock();
        let layer = inner
            .layers
            .get_mut(index)
            .ok_or(StoneError::ParameterOutOfRange { index, size: count })?;
        layer.slicer = slicer;
        layer.state = LayerState::Loading;
        debug!("Widget {}: replaced layer {}", self.name, index);
        Ok(())
    }

    /// Add the layer if `index` is the next free slot, replace it if it
    /// names an existing layer.
    pub fn set_layer(&self, index: usize, slicer: Arc<dyn VolumeSlicer>) -> Result<(), StoneError> {
        let count = self.layer_count();
        match index.cmp(&count) {
            std::cmp::Ordering::Less => self.replace_layer(index, slicer),
            std::cmp::Ordering::Equal => {
                self.add_layer(slicer);
                Ok(())
            }
            std::cmp::Ordering::Greater => {
                Err(StoneError::CanOnlyAddOneLayerAtATime { index, count })
            }
        }
    }

    fn subscribe(&self, slicer: &dyn VolumeSlicer) {
        let emitter = slicer.observable();
        let id = self.observer_id();

        emitter.register_observer_callback(Box::new(ObserverCallable::from_weak(
            self.weak.clone(),
            id,
            Self::on_geometry_ready,
        )));
        emitter.register_observer_callback(Box::new(ObserverCallable::from_weak(
            self.weak.clone(),
            id,
            Self::on_geometry_error,
        )));
        emitter.register_observer_callback(Box::new(ObserverCallable::from_weak(
            self.weak.clone(),
            id,
            Self::on_layer_ready,
        )));
        emitter.register_observer_callback(Box::new(ObserverCallable::from_weak(
            self.weak.clone(),
            id,
            Self::on_layer_error,
        )));
    }

    fn layer_index(inner: &Inner, origin: ObservableId) -> Option<usize> {
        inner
            .layers
            .iter()
            .position(|layer| layer.slicer.observable().id() == origin)
    }

    // =========================================================================
    // Layer messages
    // =========================================================================

    fn on_geometry_ready(&self, message: &LayerGeometryReadyMessage) {
        // Creation is requested outside the lock: the layer may answer
        // synchronously
        let (slicer, plane) = {
            let mut inner = self.lock();
            let Some(index) = Self::layer_index(&inner, message.origin) else {
                return;
            };

            let slicer = Arc::clone(&inner.layers[index].slicer);
            inner.layers[index].state = LayerState::GeometryReady;
            if inner.plane.is_none() {
                inner.plane = slicer.reference_plane();
            }
            (slicer, inner.plane.clone())
        };

        match plane {
            Some(plane) => slicer.schedule_layer_creation(&plane),
            None => debug!("Widget {} has no plane to display yet", self.name),
        }
    }

    fn on_geometry_error(&self, message: &LayerGeometryErrorMessage) {
        let index = {
            let mut inner = self.lock();
            let Some(index) = Self::layer_index(&inner, message.origin) else {
                return;
            };
            inner.layers[index].state = LayerState::GeometryError;
            index
        };

        warn!("Widget {}: layer {} has no geometry", self.name, index);
        self.notify_content_changed(index);
    }

    fn on_layer_ready(&self, message: &LayerReadyMessage) {
        let index = {
            let mut inner = self.lock();
            let Some(index) = Self::layer_index(&inner, message.origin) else {
                return;
            };
            inner.layers[index].state = LayerState::Ready {
                slice: message.slice.clone(),
                image: Arc::clone(&message.image),
                quality: message.quality,
            };
            index
        };

        debug!(
            "Widget {}: layer {} ready ({})",
            self.name, index, message.quality
        );
        self.notify_content_changed(index);
    }

    fn on_layer_error(&self, message: &LayerErrorMessage) {
        let index = {
            let mut inner = self.lock();
            let Some(index) = Self::layer_index(&inner, message.origin) else {
                return;
            };
            inner.layers[index].state = LayerState::Error {
                plane: message.plane.clone(),
            };
            index
        };

        warn!("Widget {}: layer {} failed to load", self.name, index);
        self.notify_content_changed(index);
    }

    fn notify_content_changed(&self, layer_index: usize) {
        self.observable
            .broadcast_message(&WidgetContentChangedMessage {
                origin: self.observable.id(),
                layer_index,
            });
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Observer for SliceViewerWidget {
    fn observer_handle(&self) -> &ObserverHandle {
        &self.handle
    }
}

impl AsObservable for SliceViewerWidget {
    fn observable(&self) -> &Observable {
        &self.observable
    }
}
