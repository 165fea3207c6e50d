use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use http::header::{HeaderValue, ACCEPT};
use http::HeaderMap;
use image::ImageFormat;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use urlencoding::encode;

use super::decode::{decode_full, decode_raw, decode_web_viewer_jpeg};
use super::messages::{
    SliceGeometryErrorMessage, SliceGeometryReadyMessage, SliceImageErrorMessage,
    SliceImageReadyMessage,
};
use super::SliceImageQuality;
use crate::error::{GeometryError, SliceError, StoneError};
use crate::geometry::CoordinateSystem3D;
use crate::messages::{AsObservable, Observable, Observer, ObserverCallable, ObserverHandle};
use crate::slice::{DicomDataset, PixelFormat, Slice, SliceKind, SlicesSorter};
use crate::web::{
    BinaryResponseReadyMessage, HttpErrorMessage, JsonResponseReadyMessage, OrthancApiClient,
};

/// Lifecycle of an [`OrthancSlicesLoader`].
///
/// ```text
///   Initialization ──schedule_load_*──> LoadingGeometry ──┬──> GeometryReady
///                                                         └──> Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Initialization,
    LoadingGeometry,
    GeometryReady,
    Error,
}

/// Context of a request, echoed back with its answer.
enum Operation {
    SeriesGeometry,
    InstanceGeometry {
        instance_id: String,
    },
    FrameGeometry {
        instance_id: String,
        frame: u32,
    },
    SliceImage {
        index: usize,
        slice: Slice,
        quality: SliceImageQuality,
    },
}

struct Inner {
    state: LoaderState,
    slices: SlicesSorter,
}

/// Resolves a series, an instance or a single frame into sorted slices, then
/// downloads slice images on demand.
///
/// Geometry failures are final: the loader stays in [`LoaderState::Error`].
/// Image failures only concern one slice; the loader remains usable.
pub struct OrthancSlicesLoader {
    handle: ObserverHandle,
    observable: Observable,
    client: OrthancApiClient,
    weak: Weak<Self>,
    inner: Mutex<Inner>,
}

impl OrthancSlicesLoader {
    pub fn new(client: &OrthancApiClient) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            handle: ObserverHandle::new(client.broker()),
            observable: Observable::new(client.broker()),
            client: client.clone(),
            weak: weak.clone(),
            inner: Mutex::new(Inner {
                state: LoaderState::Initialization,
                slices: SlicesSorter::new(),
            }),
        })
    }

    pub fn state(&self) -> LoaderState {
        self.lock().state
    }

    pub fn is_geometry_ready(&self) -> bool {
        self.state() == LoaderState::GeometryReady
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    /// Load the slices of every instance of a series.
    pub fn schedule_load_series(&self, series_id: &str) -> Result<(), StoneError> {
        self.start_loading()?;
        self.get_geometry(
            format!("/series/{}/instances-tags", encode(series_id)),
            Operation::SeriesGeometry,
        );
        Ok(())
    }

    /// Load the slices of every frame of an instance.
    pub fn schedule_load_instance(&self, instance_id: &str) -> Result<(), StoneError> {
        self.start_loading()?;
        self.get_geometry(
            format!("/instances/{}/tags", encode(instance_id)),
            Operation::InstanceGeometry {
                instance_id: instance_id.to_string(),
            },
        );
        Ok(())
    }

    /// Load the slice of a single frame.
    pub fn schedule_load_frame(&self, instance_id: &str, frame: u32) -> Result<(), StoneError> {
        self.start_loading()?;
        self.get_geometry(
            format!("/instances/{}/tags", encode(instance_id)),
            Operation::FrameGeometry {
                instance_id: instance_id.to_string(),
                frame,
            },
        );
        Ok(())
    }

    fn start_loading(&self) -> Result<(), StoneError> {
        let mut inner = self.lock();
        if inner.state != LoaderState::Initialization {
            return Err(StoneError::BadSequenceOfCalls(
                "the loader has already been started",
            ));
        }
        inner.state = LoaderState::LoadingGeometry;
        Ok(())
    }

    fn get_geometry(&self, uri: String, operation: Operation) {
        self.client.get_json_async(
            uri,
            Box::new(ObserverCallable::from_weak(
                self.weak.clone(),
                self.observer_id(),
                Self::on_geometry_answer,
            )),
            Some(Box::new(ObserverCallable::from_weak(
                self.weak.clone(),
                self.observer_id(),
                Self::on_geometry_failure,
            ))),
            Some(Box::new(operation)),
        );
    }

    fn on_geometry_answer(&self, message: &JsonResponseReadyMessage) {
        let mut sorter = SlicesSorter::new();

        match message.payload::<Operation>() {
            Some(Operation::SeriesGeometry) => {
                let Some(instances) = message.json().as_object() else {
                    error!("Series answer from {} is not an object", message.uri());
                    return self.set_geometry(Err(SliceError::InvalidDataset.into()));
                };

                for (instance_id, tags) in instances {
                    match parse_instance(instance_id, tags) {
                        Ok(slices) => slices.into_iter().for_each(|s| sorter.add_slice(s)),
                        Err(e) => warn!("Skipping invalid instance {}: {}", instance_id, e),
                    }
                }
            }
            Some(Operation::InstanceGeometry { instance_id }) => {
                match parse_instance(instance_id, message.json()) {
                    Ok(slices) => slices.into_iter().for_each(|s| sorter.add_slice(s)),
                    Err(e) => {
                        error!("Invalid instance {}: {}", instance_id, e);
                        return self.set_geometry(Err(e.into()));
                    }
                }
            }
            Some(Operation::FrameGeometry { instance_id, frame }) => {
                match parse_frame(instance_id, *frame, message.json()) {
                    Ok(slice) => sorter.add_slice(slice),
                    Err(e) => {
                        error!("Invalid frame {} of instance {}: {}", frame, instance_id, e);
                        return self.set_geometry(Err(e.into()));
                    }
                }
            }
            _ => {
                error!("Unexpected geometry answer from {}", message.uri());
                return self.set_geometry(Err(SliceError::InvalidDataset.into()));
            }
        }

        self.set_geometry(sort_slices(sorter));
    }

    fn on_geometry_failure(&self, message: &HttpErrorMessage) {
        error!(
            "Cannot download geometry from {}: {}",
            message.uri(),
            message.error()
        );
        self.set_geometry(Err(message.error().clone().into()));
    }

    fn set_geometry(&self, result: Result<SlicesSorter, StoneError>) {
        let origin = self.observable.id();

        // The lock is released before broadcasting: observers query the loader
        let ready = {
            let mut inner = self.lock();
            match result {
                Ok(slices) => {
                    info!("Loaded {} slice(s)", slices.slice_count());
                    inner.slices = slices;
                    inner.state = LoaderState::GeometryReady;
                    true
                }
                Err(e) => {
                    error!("Cannot build the geometry: {}", e);
                    inner.state = LoaderState::Error;
                    false
                }
            }
        };

        if ready {
            self.observable
                .broadcast_message(&SliceGeometryReadyMessage { origin });
        } else {
            self.observable
                .broadcast_message(&SliceGeometryErrorMessage { origin });
        }
    }

    // =========================================================================
    // Slices
    // =========================================================================

    pub fn slice_count(&self) -> Result<usize, StoneError> {
        Ok(self.ready()?.slices.slice_count())
    }

    /// Copy of slice `index`, in sorted order.
    pub fn slice(&self, index: usize) -> Result<Slice, StoneError> {
        self.ready()?.slices.slice(index).cloned()
    }

    /// Copy of every slice, in sorted order.
    pub fn slices(&self) -> Result<Vec<Slice>, StoneError> {
        Ok(self.ready()?.slices.slices().cloned().collect())
    }

    /// Index of the slice containing `plane`, if any.
    pub fn lookup_slice(&self, plane: &CoordinateSystem3D) -> Result<Option<usize>, StoneError> {
        Ok(self.ready()?.slices.lookup_slice(plane))
    }

    fn ready(&self) -> Result<MutexGuard<'_, Inner>, StoneError> {
        let inner = self.lock();
        if inner.state != LoaderState::GeometryReady {
            return Err(StoneError::BadSequenceOfCalls("the geometry is not ready"));
        }
        Ok(inner)
    }

    // =========================================================================
    // Images
    // =========================================================================

    /// Download and decode the pixels of slice `index`.
    ///
    /// Frames that Orthanc cannot render (RT-DOSE) are always downloaded raw,
    /// whatever `quality` is requested; the messages report the quality
    /// actually used.
    pub fn schedule_load_slice_image(
        &self,
        index: usize,
        quality: SliceImageQuality,
    ) -> Result<(), StoneError> {
        let slice = self.slice(index)?;
        let (uri, headers, effective) = image_request(&slice, quality)?;
        debug!("Slice {} requested as {} ({})", index, effective, uri);

        self.client.get_binary_async(
            uri,
            headers,
            Box::new(ObserverCallable::from_weak(
                self.weak.clone(),
                self.observer_id(),
                Self::on_image_answer,
            )),
            Some(Box::new(ObserverCallable::from_weak(
                self.weak.clone(),
                self.observer_id(),
                Self::on_image_failure,
            ))),
            Some(Box::new(Operation::SliceImage {
                index,
                slice,
                quality: effective,
            })),
        );
        Ok(())
    }

    fn on_image_answer(&self, message: &BinaryResponseReadyMessage) {
        let Some(Operation::SliceImage {
            index,
            slice,
            quality,
        }) = message.payload::<Operation>()
        else {
            error!("Unexpected image answer from {}", message.uri());
            return;
        };

        let body = message.body();
        let decoded = match quality {
            SliceImageQuality::FullPng => decode_full(body, ImageFormat::Png, slice),
            SliceImageQuality::FullPam => decode_full(body, ImageFormat::Pnm, slice),
            SliceImageQuality::InternalRaw => decode_raw(body, slice),
            SliceImageQuality::Jpeg50 | SliceImageQuality::Jpeg90 | SliceImageQuality::Jpeg95 => {
                decode_web_viewer_jpeg(body, slice)
            }
        };

        match decoded {
            Ok(image) => self.observable.broadcast_message(&SliceImageReadyMessage {
                origin: self.observable.id(),
                slice_index: *index,
                slice: slice.clone(),
                image: Arc::new(image),
                quality: *quality,
            }),
            Err(e) => {
                error!("Cannot decode slice {} from {}: {}", index, message.uri(), e);
                self.notify_image_error(*index, slice, *quality);
            }
        }
    }

    fn on_image_failure(&self, message: &HttpErrorMessage) {
        match message.payload::<Operation>() {
            Some(Operation::SliceImage {
                index,
                slice,
                quality,
            }) => {
                error!("Cannot download slice {}: {}", index, message.error());
                self.notify_image_error(*index, slice, *quality);
            }
            _ => error!("Unexpected image failure from {}", message.uri()),
        }
    }

    fn notify_image_error(&self, index: usize, slice: &Slice, quality: SliceImageQuality) {
        self.observable.broadcast_message(&SliceImageErrorMessage {
            origin: self.observable.id(),
            slice_index: index,
            slice: slice.clone(),
            quality,
        });
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Observer for OrthancSlicesLoader {
    fn observer_handle(&self) -> &ObserverHandle {
        &self.handle
    }
}

impl AsObservable for OrthancSlicesLoader {
    fn observable(&self) -> &Observable {
        &self.observable
    }
}

// =============================================================================
// Parsing
// =============================================================================

fn parse_instance(instance_id: &str, tags: &Value) -> Result<Vec<Slice>, SliceError> {
    let dataset = DicomDataset::new(tags).ok_or(SliceError::InvalidDataset)?;
    let first = Slice::parse_orthanc_frame(&dataset, instance_id, 0)?;

    let mut slices = Vec::with_capacity(first.frame_count() as usize);
    let frame_count = first.frame_count();
    slices.push(first);
    for frame in 1..frame_count {
        slices.push(Slice::parse_orthanc_frame(&dataset, instance_id, frame)?);
    }
    Ok(slices)
}

fn parse_frame(instance_id: &str, frame: u32, tags: &Value) -> Result<Slice, SliceError> {
    let dataset = DicomDataset::new(tags).ok_or(SliceError::InvalidDataset)?;
    Slice::parse_orthanc_frame(&dataset, instance_id, frame)
}

fn sort_slices(mut sorter: SlicesSorter) -> Result<SlicesSorter, StoneError> {
    if sorter.slice_count() == 0 {
        return Err(GeometryError::Empty.into());
    }

    let normal = sorter
        .select_normal()
        .ok_or(GeometryError::NoCommonNormal {
            count: sorter.slice_count(),
        })?;
    sorter.filter_normal(&normal);
    sorter.set_normal(&normal);
    sorter.sort()?;
    Ok(sorter)
}

/// URI, headers and effective quality of a slice image request.
fn image_request(
    slice: &Slice,
    quality: SliceImageQuality,
) -> Result<(String, HeaderMap, SliceImageQuality), StoneError> {
    let instance = slice.instance_id();
    let frame = slice.frame();
    let mut headers = HeaderMap::new();

    if slice.kind() == SliceKind::RawFrame || quality == SliceImageQuality::InternalRaw {
        let uri = format!("/instances/{}/frames/{}/raw", encode(instance), frame);
        return Ok((uri, headers, SliceImageQuality::InternalRaw));
    }

    if let Some(jpeg) = quality.jpeg_quality() {
        // Requires the Orthanc web viewer plugin
        let uri = format!("/web-viewer/instances/jpeg{}-{}_{}", jpeg, encode(instance), frame);
        return Ok((uri, headers, quality));
    }

    let suffix = match slice.converter().expected_pixel_format() {
        PixelFormat::Rgb24 => "preview",
        PixelFormat::Grayscale16 => "image-uint16",
        PixelFormat::SignedGrayscale16 => "image-int16",
        other => return Err(StoneError::IncompatibleImageFormat(other)),
    };
    let accept = match quality {
        SliceImageQuality::FullPam => "image/x-portable-arbitrarymap",
        _ => "image/png",
    };
    headers.insert(ACCEPT, HeaderValue::from_static(accept));

    let uri = format!("/instances/{}/frames/{}/{}", encode(instance), frame, suffix);
    Ok((uri, headers, quality))
}
