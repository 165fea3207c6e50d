//! Frame cache shared by the widgets of an application.
//!
//! # Cache Key
//!
//! Frames are cached by `"{instance_id}:{frame}"`, the key of their
//! [`Slice`](crate::slice::Slice).
//!
//! # Lifecycle of an entry
//!
//! ```text
//!   set_frame_in_widget ──miss──> DicomSeriesVolumeSlicer::load_frame
//!                                    │
//!   LayerGeometryReady ──> GeometryLoaded ──FrameReady──> ImageLoaded
//!         │                                   │
//!         └───────── followers updated ───────┘
//!
//!   LayerGeometryError / LayerError ──> entry evicted, next request retries
//! ```
//!
//! A frame requested again while its load is in flight does not start a
//! second load: the new widget gets a [`CachedSlice`] following the first
//! load.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use lru::LruCache;
use tracing::{debug, info, warn};

use super::cached_slice::{CacheEntry, CachedSlice, CachedSliceStatus};
use super::messages::{
    FrameReadyMessage, LayerErrorMessage, LayerGeometryErrorMessage, LayerGeometryReadyMessage,
    LayerReadyMessage,
};
use super::{DicomSeriesVolumeSlicer, SliceViewerWidget, VolumeSlicer};
use crate::error::StoneError;
use crate::loader::SliceImageQuality;
use crate::messages::{
    AsObservable, ObservableId, Observable, Observer, ObserverCallable, ObserverHandle,
};
use crate::slice::frame_key;
use crate::web::OrthancApiClient;

/// Default number of cached frames.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Options of a [`SmartLoader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmartLoaderOptions {
    /// Maximum number of cached frames.
    pub cache_capacity: usize,
    /// Encoding of the downloaded frames.
    pub quality: SliceImageQuality,
}

impl Default for SmartLoaderOptions {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            quality: SliceImageQuality::FullPam,
        }
    }
}

/// A frame load in flight.
struct Loading {
    slicer: Arc<DicomSeriesVolumeSlicer>,
    followers: Vec<Weak<CachedSlice>>,
}

impl Loading {
    fn live_followers(&self) -> Vec<Arc<CachedSlice>> {
        self.followers.iter().filter_map(Weak::upgrade).collect()
    }
}

struct Inner {
    cache: LruCache<String, CacheEntry>,
    loading: HashMap<String, Loading>,
    /// Key loaded by each slicer this loader created.
    origins: HashMap<ObservableId, String>,
}

/// Loads frames into widgets, downloading each frame once.
///
/// Messages of the slicers it creates are re-broadcast unchanged on the
/// loader's own observable, so caching is transparent to its observers.
pub struct SmartLoader {
    handle: ObserverHandle,
    observable: Observable,
    weak: Weak<Self>,
    client: OrthancApiClient,
    options: SmartLoaderOptions,
    inner: Mutex<Inner>,
}

impl SmartLoader {
    pub fn new(client: &OrthancApiClient, options: SmartLoaderOptions) -> Arc<Self> {
        let capacity = NonZeroUsize::new(options.cache_capacity).unwrap_or(NonZeroUsize::MIN);

        Arc::new_cyclic(|weak| Self {
            handle: ObserverHandle::new(client.broker()),
            observable: Observable::new(client.broker()),
            weak: weak.clone(),
            client: client.clone(),
            options,
            inner: Mutex::new(Inner {
                cache: LruCache::new(capacity),
                loading: HashMap::new(),
                origins: HashMap::new(),
            }),
        })
    }

    pub fn options(&self) -> &SmartLoaderOptions {
        &self.options
    }

    /// Show frame `frame` of `instance_id` as layer `layer_index` of
    /// `widget`.
    ///
    /// `layer_index` either names an existing layer, which is replaced, or
    /// the next free one.
    pub fn set_frame_in_widget(
        &self,
        widget: &SliceViewerWidget,
        layer_index: usize,
        instance_id: &str,
        frame: u32,
    ) -> Result<(), StoneError> {
        let count = widget.layer_count();
        if layer_index > count {
            return Err(StoneError::CanOnlyAddOneLayerAtATime {
                index: layer_index,
                count,
            });
        }

        let key = frame_key(instance_id, frame);

        let cached = {
            let mut inner = self.lock();
            let is_loading = inner.loading.contains_key(&key);
            let entry = match inner.cache.get(&key) {
                Some(entry) => Some(entry.clone()),
                None if is_loading => Some(CacheEntry::Scheduled),
                None => None,
            };

            entry.map(|entry| {
                let slice = CachedSlice::new(self.observable.broker(), entry);
                if let Some(loading) = inner.loading.get_mut(&key) {
                    loading.followers.push(Arc::downgrade(&slice));
                }
                slice
            })
        };

        match cached {
            Some(slice) => {
                debug!("Frame {} served from cache ({:?})", key, slice.status());
                widget.set_layer(layer_index, Arc::clone(&slice) as Arc<dyn VolumeSlicer>)?;
                slice.replay();
            }
            None => {
                let slicer = self.start_loading(&key, instance_id, frame)?;
                widget.set_layer(layer_index, slicer)?;
            }
        }

        Ok(())
    }

    /// Number of cached frames.
    pub fn cache_len(&self) -> usize {
        self.lock().cache.len()
    }

    /// Status of a cached frame, without touching its recency.
    pub fn cached_status(&self, instance_id: &str, frame: u32) -> Option<CachedSliceStatus> {
        self.lock()
            .cache
            .peek(&frame_key(instance_id, frame))
            .map(CacheEntry::status)
    }

    /// Whether the frame is being downloaded.
    pub fn is_loading(&self, instance_id: &str, frame: u32) -> bool {
        self.lock()
            .loading
            .contains_key(&frame_key(instance_id, frame))
    }

    fn start_loading(
        &self,
        key: &str,
        instance_id: &str,
        frame: u32,
    ) -> Result<Arc<DicomSeriesVolumeSlicer>, StoneError> {
        info!("Loading frame {} ({})", key, self.options.quality);

        let slicer = DicomSeriesVolumeSlicer::new(&self.client, self.options.quality);
        self.subscribe(&slicer);
        slicer.load_frame(instance_id, frame)?;

        let mut inner = self.lock();
        inner.origins.insert(slicer.observable().id(), key.to_string());
        inner.loading.insert(
            key.to_string(),
            Loading {
                slicer: Arc::clone(&slicer),
                followers: Vec::new(),
            },
        );
        Ok(slicer)
    }

    fn subscribe(&self, slicer: &DicomSeriesVolumeSlicer) {
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
            Self::on_frame_ready,
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

    // =========================================================================
    // Slicer messages
    // =========================================================================

    fn on_geometry_ready(&self, message: &LayerGeometryReadyMessage) {
        let update = {
            let mut inner = self.lock();
            let Some(key) = inner.origins.get(&message.origin).cloned() else {
                return;
            };
            let Some(loading) = inner.loading.get(&key) else {
                return;
            };

            match loading.slicer.slice(0) {
                Ok(slice) => {
                    let followers = loading.live_followers();
                    let entry = CacheEntry::Geometry {
                        slice,
                        quality: self.options.quality,
                    };
                    debug!("Frame {} geometry cached", key);
                    inner.cache.put(key, entry.clone());
                    Some((followers, entry))
                }
                Err(e) => {
                    warn!("Frame {} has no slice: {}", key, e);
                    None
                }
            }
        };

        if let Some((followers, entry)) = update {
            for follower in followers {
                follower.update(entry.clone());
            }
        }
        self.observable.broadcast_message(message);
    }

    fn on_geometry_error(&self, message: &LayerGeometryErrorMessage) {
        for follower in self.evict(message.origin) {
            follower.fail_geometry();
        }
        self.observable.broadcast_message(message);
    }

    fn on_frame_ready(&self, message: &FrameReadyMessage) {
        let followers = {
            let mut inner = self.lock();
            let Some(key) = inner.origins.get(&message.origin).cloned() else {
                return;
            };

            debug!("Frame {} image cached ({})", key, message.quality);
            inner.cache.put(
                key.clone(),
                CacheEntry::Image {
                    slice: message.slice.clone(),
                    image: Arc::clone(&message.image),
                    quality: message.quality,
                },
            );
            inner
                .loading
                .remove(&key)
                .map(|loading| loading.live_followers())
                .unwrap_or_default()
        };

        let entry = CacheEntry::Image {
            slice: message.slice.clone(),
            image: Arc::clone(&message.image),
            quality: message.quality,
        };
        for follower in followers {
            follower.update(entry.clone());
        }
        self.observable.broadcast_message(message);
    }

    fn on_layer_ready(&self, message: &LayerReadyMessage) {
        self.lock().origins.remove(&message.origin);
        self.observable.broadcast_message(message);
    }

    fn on_layer_error(&self, message: &LayerErrorMessage) {
        for follower in self.evict(message.origin) {
            follower.fail_layer();
        }
        self.observable.broadcast_message(message);
    }

    /// Forget the frame loaded by `origin`, so that the next request
    /// downloads it again. Returns the slices that were following the load.
    fn evict(&self, origin: ObservableId) -> Vec<Arc<CachedSlice>> {
        let mut inner = self.lock();
        let Some(key) = inner.origins.remove(&origin) else {
            return Vec::new();
        };

        warn!("Frame {} failed to load, evicting it", key);
        inner.cache.pop(&key);
        inner
            .loading
            .remove(&key)
            .map(|loading| loading.live_followers())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Observer for SmartLoader {
    fn observer_handle(&self) -> &ObserverHandle {
        &self.handle
    }
}

impl AsObservable for SmartLoader {
    fn observable(&self) -> &Observable {
        &self.observable
    }
}
