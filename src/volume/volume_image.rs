use std::iter;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use super::messages::{
    SliceContentChangedMessage, VolumeDegradedMessage, VolumeGeometryErrorMessage,
    VolumeGeometryReadyMessage, VolumeReadyMessage,
};
use super::{DownloadStack, ImageBuffer3D, VolumeImageGeometry, VolumeProjection};
use crate::error::{GeometryError, StoneError};
use crate::geometry::{is_near, is_parallel};
use crate::loader::{
    OrthancSlicesLoader, SliceGeometryErrorMessage, SliceGeometryReadyMessage,
    SliceImageErrorMessage, SliceImageQuality, SliceImageReadyMessage,
};
use crate::messages::{AsObservable, Observable, Observer, ObserverCallable, ObserverHandle};
use crate::slice::{Slice, SliceImage};
use crate::web::OrthancApiClient;

/// Tuning of an [`OrthancVolumeImage`].
#[derive(Debug, Clone)]
pub struct VolumeImageOptions {
    /// Slice images downloaded at the same time.
    pub max_concurrent_downloads: usize,
    /// Accepted deviation of the distance between successive slices, in mm.
    pub spacing_tolerance: f64,
    /// Encoding requested for the slice images.
    pub quality: SliceImageQuality,
}

impl Default for VolumeImageOptions {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 4,
            spacing_tolerance: 0.001,
            quality: SliceImageQuality::Jpeg90,
        }
    }
}

/// Lifecycle of an [`OrthancVolumeImage`].
///
/// ```text
///   Initialization ──> LoadingGeometry ──┬──> LoadingSlices ──┬──> Ready
///                                        │                    └──> Degraded
///                                        └──> Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeState {
    Initialization,
    LoadingGeometry,
    LoadingSlices,
    /// Every slice was loaded.
    Ready,
    /// Every download completed, some of them failed.
    Degraded,
    Error,
}

impl VolumeState {
    /// Whether the voxel buffer is allocated.
    pub fn has_geometry(self) -> bool {
        matches!(
            self,
            VolumeState::LoadingSlices | VolumeState::Ready | VolumeState::Degraded
        )
    }
}

struct Inner {
    state: VolumeState,
    image: Option<ImageBuffer3D>,
    downloads: Option<DownloadStack>,
    pending: usize,
    loaded: usize,
    failed: Vec<usize>,
}

/// Outcome of one slice download.
#[derive(Default)]
struct Settled {
    written: bool,
    next: Option<usize>,
    /// Failed slices, once every download has completed.
    finished: Option<Vec<usize>>,
}

/// A 3D voxel buffer filled from the slices of an [`OrthancSlicesLoader`].
///
/// Once the loader has sorted the slices, they are checked for consistency
/// (parallel normals, same format, size and pixel spacing, constant
/// spacing along the normal) and the buffer is allocated. Slice images are
/// then downloaded from a [`DownloadStack`], a bounded number at a time:
///
/// ```text
///   loader ── SliceGeometryReady ──> validate ──> allocate ──> pop 4 downloads
///                                                   │
///                                  VolumeGeometryReady
///
///   loader ── SliceImageReady ──> write slice ──> SliceContentChanged ──> pop next
///          └─ SliceImageError ──> record failure ──────────────────────> pop next
///
///   last download ──> VolumeReady (or VolumeDegraded)
/// ```
///
/// Failed slices are not retried; their voxels stay at zero.
pub struct OrthancVolumeImage {
    handle: ObserverHandle,
    observable: Observable,
    loader: Arc<OrthancSlicesLoader>,
    options: VolumeImageOptions,
    inner: Mutex<Inner>,
}

impl OrthancVolumeImage {
    pub fn new(client: &OrthancApiClient, options: VolumeImageOptions) -> Arc<Self> {
        let loader = OrthancSlicesLoader::new(client);

        Arc::new_cyclic(|weak| {
            let handle = ObserverHandle::new(client.broker());
            let id = handle.id();

            let emitter = loader.observable();
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
                options,
                inner: Mutex::new(Inner {
                    state: VolumeState::Initialization,
                    image: None,
                    downloads: None,
                    pending: 0,
                    loaded: 0,
                    failed: Vec::new(),
                }),
            }
        })
    }

    pub fn loader(&self) -> &Arc<OrthancSlicesLoader> {
        &self.loader
    }

    pub fn options(&self) -> &VolumeImageOptions {
        &self.options
    }

    pub fn state(&self) -> VolumeState {
        self.lock().state
    }

    pub fn schedule_load_series(&self, series_id: &str) -> Result<(), StoneError> {
        self.loader.schedule_load_series(series_id)?;
        self.lock().state = VolumeState::LoadingGeometry;
        Ok(())
    }

    pub fn schedule_load_instance(&self, instance_id: &str) -> Result<(), StoneError> {
        self.loader.schedule_load_instance(instance_id)?;
        self.lock().state = VolumeState::LoadingGeometry;
        Ok(())
    }

    pub fn schedule_load_frame(&self, instance_id: &str, frame: u32) -> Result<(), StoneError> {
        self.loader.schedule_load_frame(instance_id, frame)?;
        self.lock().state = VolumeState::LoadingGeometry;
        Ok(())
    }

    pub fn slice_count(&self) -> Result<usize, StoneError> {
        self.loader.slice_count()
    }

    pub fn slice(&self, index: usize) -> Result<Slice, StoneError> {
        self.loader.slice(index)
    }

    /// Number of slices written into the buffer so far.
    pub fn loaded_slice_count(&self) -> usize {
        self.lock().loaded
    }

    /// Slices whose download or decoding failed, in completion order.
    pub fn failed_slices(&self) -> Vec<usize> {
        self.lock().failed.clone()
    }

    /// Run `f` on the voxel buffer.
    ///
    /// The volume is locked while `f` runs: `f` must not call back into it.
    pub fn with_image<R>(&self, f: impl FnOnce(&ImageBuffer3D) -> R) -> Result<R, StoneError> {
        let inner = self.lock();
        let image = inner
            .image
            .as_ref()
            .ok_or(StoneError::BadSequenceOfCalls("the volume geometry is not ready"))?;
        Ok(f(image))
    }

    /// Geometry of the volume resampled along `projection`.
    pub fn geometry(&self, projection: VolumeProjection) -> Result<VolumeImageGeometry, StoneError> {
        if !self.state().has_geometry() {
            return Err(StoneError::BadSequenceOfCalls(
                "the volume geometry is not ready",
            ));
        }
        VolumeImageGeometry::from_slices(&self.loader.slices()?, projection)
    }

    /// Download slice `index` next, e.g. because a viewport displays it.
    pub fn prioritize_slice(&self, index: usize) -> Result<(), StoneError> {
        let mut inner = self.lock();
        inner
            .downloads
            .as_mut()
            .ok_or(StoneError::BadSequenceOfCalls(
                "the volume geometry is not ready",
            ))?
            .set_top_node(index)
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    fn on_geometry_ready(&self, _: &SliceGeometryReadyMessage) {
        let image = self
            .loader
            .slices()
            .and_then(|slices| {
                build_image(&slices, self.options.spacing_tolerance).map_err(StoneError::from)
            });

        let image = match image {
            Ok(image) => image,
            Err(e) => {
                error!("Cannot build the volume image: {}", e);
                return self.fail();
            }
        };

        let first = {
            let mut inner = self.lock();
            let count = image.depth();
            let mut downloads = DownloadStack::new(count);
            let first: Vec<usize> = iter::from_fn(|| downloads.pop())
                .take(self.options.max_concurrent_downloads.max(1))
                .collect();

            inner.state = VolumeState::LoadingSlices;
            inner.image = Some(image);
            inner.downloads = Some(downloads);
            inner.pending = count;
            first
        };

        // Geometry is announced before any download can settle
        self.observable
            .broadcast_message(&VolumeGeometryReadyMessage {
                origin: self.observable.id(),
            });

        for index in first {
            self.advance(Settled {
                next: Some(index),
                ..Default::default()
            });
        }
    }

    fn on_geometry_error(&self, _: &SliceGeometryErrorMessage) {
        error!("Unable to download the geometry of the volume image");
        self.fail();
    }

    fn fail(&self) {
        self.lock().state = VolumeState::Error;
        self.observable
            .broadcast_message(&VolumeGeometryErrorMessage {
                origin: self.observable.id(),
            });
    }

    // =========================================================================
    // Slices
    // =========================================================================

    fn on_slice_image_ready(&self, message: &SliceImageReadyMessage) {
        let settled = self.settle(message.slice_index, Some(&message.image));

        if settled.written {
            self.observable
                .broadcast_message(&SliceContentChangedMessage {
                    origin: self.observable.id(),
                    slice_index: message.slice_index,
                    slice: message.slice.clone(),
                });
        }
        self.advance(settled);
    }

    fn on_slice_image_error(&self, message: &SliceImageErrorMessage) {
        error!("Cannot download slice {} of the volume image", message.slice_index);
        let settled = self.settle(message.slice_index, None);
        self.advance(settled);
    }

    /// Record the outcome of slice `index` and pop the next download.
    fn settle(&self, index: usize, image: Option<&SliceImage>) -> Settled {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if inner.state != VolumeState::LoadingSlices {
            debug!("Ignoring slice {} outside of the download phase", index);
            return Settled::default();
        }

        let written = match (inner.image.as_mut(), image) {
            (Some(buffer), Some(image)) => match buffer.write_axial_slice(index, image) {
                Ok(()) => true,
                Err(e) => {
                    error!("Cannot write slice {} into the volume image: {}", index, e);
                    false
                }
            },
            _ => false,
        };

        if written {
            inner.loaded += 1;
        } else {
            inner.failed.push(index);
        }
        inner.pending = inner.pending.saturating_sub(1);

        let next = inner.downloads.as_mut().and_then(DownloadStack::pop);
        let finished = (inner.pending == 0).then(|| {
            inner.state = if inner.failed.is_empty() {
                VolumeState::Ready
            } else {
                VolumeState::Degraded
            };
            inner.failed.clone()
        });

        Settled {
            written,
            next,
            finished,
        }
    }

    /// Start the next download, or report completion after the last one.
    ///
    /// A pending download means some slice is still unsettled, so `next` and
    /// `finished` are never both set.
    fn advance(&self, mut settled: Settled) {
        while let Some(index) = settled.next {
            match self
                .loader
                .schedule_load_slice_image(index, self.options.quality)
            {
                Ok(()) => break,
                Err(e) => {
                    error!("Cannot schedule slice {} of the volume image: {}", index, e);
                    settled = self.settle(index, None);
                }
            }
        }

        if let Some(failed) = settled.finished {
            self.notify_finished(failed);
        }
    }

    fn notify_finished(&self, failed: Vec<usize>) {
        let origin = self.observable.id();
        if failed.is_empty() {
            info!("Volume image is complete");
            self.observable
                .broadcast_message(&VolumeReadyMessage { origin });
        } else {
            warn!(
                "Volume image is complete, {} slice(s) could not be loaded",
                failed.len()
            );
            self.observable.broadcast_message(&VolumeDegradedMessage {
                origin,
                failed_slices: failed,
            });
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Observer for OrthancVolumeImage {
    fn observer_handle(&self) -> &ObserverHandle {
        &self.handle
    }
}

impl AsObservable for OrthancVolumeImage {
    fn observable(&self) -> &Observable {
        &self.observable
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Relative slack added to the spacing tolerance.
const SPACING_ROUNDING: f64 = 1e-9;

/// Allocate a zeroed buffer for `slices`, after checking they form a volume.
fn build_image(slices: &[Slice], tolerance: f64) -> Result<ImageBuffer3D, GeometryError> {
    let spacing_z = validate_slices(slices, tolerance)?;
    let first = slices.first().ok_or(GeometryError::Empty)?;
    let format = first.converter().expected_pixel_format();

    let mut image = ImageBuffer3D::new(format, first.width(), first.height(), slices.len());
    image.set_axial_geometry(first.geometry().clone());
    image.set_voxel_dimensions(
        first.pixel_spacing_x(),
        first.pixel_spacing_y(),
        spacing_z,
    )?;
    Ok(image)
}

/// Check `slices` can be stacked, and return the distance between them.
fn validate_slices(slices: &[Slice], tolerance: f64) -> Result<f64, GeometryError> {
    let first = slices.first().ok_or(GeometryError::Empty)?;

    for (index, slice) in slices.iter().enumerate().skip(1) {
        check_compatible(index, first, slice)?;
    }

    // A single slice gets a dummy thickness
    let spacing = match slices {
        [a, b, ..] => distance(a, b),
        _ => 1.0,
    };

    // Positions are decimal strings: a deviation equal to the tolerance
    // must not be rejected because of their binary rounding
    let threshold = tolerance + SPACING_ROUNDING * spacing.abs().max(1.0);

    for (index, pair) in slices.windows(2).enumerate() {
        let actual = distance(&pair[0], &pair[1]);
        if (actual - spacing).abs() > threshold {
            return Err(GeometryError::NonUniformSpacing {
                index,
                next: index + 1,
                expected: spacing,
                actual,
            });
        }
    }

    Ok(spacing)
}

fn check_compatible(index: usize, first: &Slice, other: &Slice) -> Result<(), GeometryError> {
    if !is_parallel(first.geometry().normal(), other.geometry().normal()) {
        return Err(GeometryError::NotParallel { index });
    }

    let expected = first.converter().expected_pixel_format();
    let actual = other.converter().expected_pixel_format();
    if expected != actual {
        return Err(GeometryError::PixelFormatMismatch {
            index,
            expected,
            actual,
        });
    }

    if first.width() != other.width() || first.height() != other.height() {
        return Err(GeometryError::DimensionsMismatch {
            index,
            width: first.width(),
            height: first.height(),
            actual_width: other.width(),
            actual_height: other.height(),
        });
    }

    if !is_near(first.pixel_spacing_x(), other.pixel_spacing_x())
        || !is_near(first.pixel_spacing_y(), other.pixel_spacing_y())
    {
        return Err(GeometryError::PixelSpacingMismatch { index });
    }

    Ok(())
}

/// Distance between two parallel slices, along the normal of `a`.
fn distance(a: &Slice, b: &Slice) -> f64 {
    let geometry = a.geometry();
    (geometry.project_along_normal(geometry.origin())
        - geometry.project_along_normal(b.geometry().origin()))
    .abs()
}
