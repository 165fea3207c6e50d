use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::messages::{
    LayerErrorMessage, LayerGeometryErrorMessage, LayerGeometryReadyMessage, LayerReadyMessage,
};
use super::VolumeSlicer;
use crate::geometry::{CoordinateSystem3D, Vector};
use crate::loader::SliceImageQuality;
use crate::messages::{AsObservable, MessageBroker, Observable};
use crate::slice::{Slice, SliceImage};

/// Progress of a cached frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CachedSliceStatus {
    ScheduledToLoad,
    GeometryLoaded,
    ImageLoaded,
}

/// Content of a cache entry. Pixels are shared, never copied.
#[derive(Debug, Clone)]
pub(crate) enum CacheEntry {
    Scheduled,
    Geometry {
        slice: Slice,
        quality: SliceImageQuality,
    },
    Image {
        slice: Slice,
        image: Arc<SliceImage>,
        quality: SliceImageQuality,
    },
}

impl CacheEntry {
    pub(crate) fn status(&self) -> CachedSliceStatus {
        match self {
            CacheEntry::Scheduled => CachedSliceStatus::ScheduledToLoad,
            CacheEntry::Geometry { .. } => CachedSliceStatus::GeometryLoaded,
            CacheEntry::Image { .. } => CachedSliceStatus::ImageLoaded,
        }
    }

    fn slice(&self) -> Option<&Slice> {
        match self {
            CacheEntry::Scheduled => None,
            CacheEntry::Geometry { slice, .. } | CacheEntry::Image { slice, .. } => Some(slice),
        }
    }
}

/// A layer replaying a frame from the [`SmartLoader`](super::SmartLoader)
/// cache.
///
/// Each widget gets its own `CachedSlice` (and thus its own subscribers),
/// while the decoded pixels are shared by all of them. A slice handed out
/// while its frame is still loading is updated by the cache as the load
/// progresses.
pub struct CachedSlice {
    observable: Observable,
    entry: Mutex<CacheEntry>,
}

impl CachedSlice {
    pub(crate) fn new(broker: &MessageBroker, entry: CacheEntry) -> Arc<Self> {
        Arc::new(Self {
            observable: Observable::new(broker),
            entry: Mutex::new(entry),
        })
    }

    pub fn status(&self) -> CachedSliceStatus {
        self.lock().status()
    }

    pub fn slice(&self) -> Option<Slice> {
        self.lock().slice().cloned()
    }

    pub fn image(&self) -> Option<Arc<SliceImage>> {
        match &*self.lock() {
            CacheEntry::Image { image, .. } => Some(Arc::clone(image)),
            _ => None,
        }
    }

    pub fn quality(&self) -> Option<SliceImageQuality> {
        match &*self.lock() {
            CacheEntry::Scheduled => None,
            CacheEntry::Geometry { quality, .. } | CacheEntry::Image { quality, .. } => {
                Some(*quality)
            }
        }
    }

    /// Copy with the same content and no subscribers.
    pub fn clone_slice(&self) -> Arc<Self> {
        Self::new(self.observable.broker(), self.lock().clone())
    }

    /// Announce the geometry, if known. Used once the widget displaying
    /// this slice has subscribed to it.
    pub(crate) fn replay(&self) {
        if self.status() != CachedSliceStatus::ScheduledToLoad {
            self.notify_geometry_ready();
        }
    }

    /// Progress of the load this slice follows.
    pub(crate) fn update(&self, entry: CacheEntry) {
        let previous = {
            let mut current = self.lock();
            std::mem::replace(&mut *current, entry.clone()).status()
        };

        match entry {
            CacheEntry::Scheduled => {}
            CacheEntry::Geometry { .. } => self.notify_geometry_ready(),
            // The widget asks for the layer once it knows the geometry
            CacheEntry::Image { .. } if previous == CachedSliceStatus::ScheduledToLoad => {
                self.notify_geometry_ready()
            }
            CacheEntry::Image {
                slice,
                image,
                quality,
            } => self.observable.broadcast_message(&LayerReadyMessage {
                origin: self.observable.id(),
                slice,
                image,
                quality,
            }),
        }
    }

    /// The load this slice follows failed before the geometry was known.
    pub(crate) fn fail_geometry(&self) {
        self.observable
            .broadcast_message(&LayerGeometryErrorMessage {
                origin: self.observable.id(),
            });
    }

    /// The load this slice follows failed to produce the image.
    pub(crate) fn fail_layer(&self) {
        let plane = self
            .slice()
            .map(|slice| slice.geometry().clone())
            .unwrap_or_else(CoordinateSystem3D::canonical);
        self.observable.broadcast_message(&LayerErrorMessage {
            origin: self.observable.id(),
            plane,
        });
    }

    fn notify_geometry_ready(&self) {
        self.observable
            .broadcast_message(&LayerGeometryReadyMessage {
                origin: self.observable.id(),
            });
    }

    fn lock(&self) -> MutexGuard<'_, CacheEntry> {
        self.entry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl VolumeSlicer for CachedSlice {
    // A cached slice holds a single frame: the plane is not looked up
    fn extent(&self, _plane: &CoordinateSystem3D) -> Option<[Vector; 4]> {
        self.lock().slice().map(Slice::extent)
    }

    fn schedule_layer_creation(&self, _plane: &CoordinateSystem3D) {
        let entry = self.lock().clone();
        match entry {
            CacheEntry::Image {
                slice,
                image,
                quality,
            } => {
                debug!("Layer of cached frame {} is ready", slice.key());
                self.observable.broadcast_message(&LayerReadyMessage {
                    origin: self.observable.id(),
                    slice,
                    image,
                    quality,
                });
            }
            _ => debug!("Layer requested before the cached frame is loaded"),
        }
    }

    fn reference_plane(&self) -> Option<CoordinateSystem3D> {
        self.lock().slice().map(|slice| slice.geometry().clone())
    }
}

impl AsObservable for CachedSlice {
    fn observable(&self) -> &Observable {
        &self.observable
    }
}
