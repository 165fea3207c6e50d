//! Test utilities for integration tests.
//!
//! This module provides a request-tracking web service and builders for
//! synthetic Orthanc answers: instance tags, series listings and 16-bit PNG
//! frames.

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma};
use serde_json::{json, Map, Value};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use orthanc_stone::error::WebError;
use orthanc_stone::messages::{
    Message, MessageBroker, Observable, Observer, ObserverCallable, ObserverHandle,
};
use orthanc_stone::web::{InMemoryWebService, MessageLoop, OrthancApiClient, WebService};

/// Identifier of the synthetic series.
pub const SERIES_ID: &str = "series-1";

/// Rows and columns of the synthetic frames.
pub const ROWS: u32 = 4;
pub const COLUMNS: u32 = 6;

// =============================================================================
// Web Service with Request Tracking
// =============================================================================

/// A web service that records every request before forwarding it.
///
/// Also measures how many requests the service is serving at the same time.
pub struct TrackingWebService {
    inner: InMemoryWebService,
    requests: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl TrackingWebService {
    pub fn new(inner: InMemoryWebService) -> Self {
        Self {
            inner,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, uri: &str) -> usize {
        self.inner.request_count(uri)
    }

    pub fn total_requests(&self) -> usize {
        self.inner.total_requests()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebService for TrackingWebService {
    async fn get_binary(&self, uri: &str, headers: &HeaderMap) -> Result<Bytes, WebError> {
        self.requests.lock().unwrap().push(uri.to_string());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        let result = self.inner.get_binary(uri, headers).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn identifier(&self) -> &str {
        "tracking"
    }
}

/// Client over `service`, with its broker and message loop.
pub fn client_for<S: WebService + 'static>(
    service: Arc<S>,
) -> (MessageBroker, OrthancApiClient, MessageLoop) {
    let broker = MessageBroker::new();
    let (client, message_loop) = OrthancApiClient::new(&broker, service);
    (broker, client, message_loop)
}

// =============================================================================
// Message Recording
// =============================================================================

/// Observer recording a label for every message it receives, in order.
pub struct Recorder {
    handle: ObserverHandle,
    events: Mutex<Vec<String>>,
}

impl Observer for Recorder {
    fn observer_handle(&self) -> &ObserverHandle {
        &self.handle
    }
}

impl Recorder {
    pub fn new(broker: &MessageBroker) -> Arc<Self> {
        Arc::new(Self {
            handle: ObserverHandle::new(broker),
            events: Mutex::new(Vec::new()),
        })
    }

    /// Record every `M` emitted by `observable` as `label(message)`.
    pub fn record<M, F>(self: &Arc<Self>, observable: &Observable, label: F)
    where
        M: Message,
        F: Fn(&M) -> String + Send + Sync + 'static,
    {
        observable.register_observer_callback(Box::new(ObserverCallable::new(
            self,
            move |recorder: &Recorder, message: &M| {
                recorder.events.lock().unwrap().push(label(message));
            },
        )));
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Number of recorded labels starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.starts_with(prefix))
            .count()
    }

    pub fn last(&self) -> Option<String> {
        self.events().last().cloned()
    }
}

// =============================================================================
// Synthetic Tags
// =============================================================================

/// Tags of an unsigned 16-bit axial CT frame at height `z`.
pub fn ct_tags(z: f64) -> Value {
    ct_tags_at([0.0, 0.0, z], "1\\0\\0\\0\\1\\0")
}

/// Tags of an unsigned 16-bit CT frame with explicit position and
/// orientation.
pub fn ct_tags_at(position: [f64; 3], orientation: &str) -> Value {
    json!({
        "0008,0016": "1.2.840.10008.5.1.4.1.1.2",
        "0018,0050": "2",
        "0020,0032": format!("{}\\{}\\{}", position[0], position[1], position[2]),
        "0020,0037": orientation,
        "0028,0004": "MONOCHROME2",
        "0028,0010": ROWS.to_string(),
        "0028,0011": COLUMNS.to_string(),
        "0028,0030": "0.5\\0.5",
        "0028,0103": "0",
        "0028,1052": "-1024",
        "0028,1053": "1"
    })
}

/// Orthanc identifier of instance `index` of the synthetic series.
pub fn instance_id(index: usize) -> String {
    format!("instance-{:03}", index)
}

/// Answer of `/series/{id}/instances-tags` for axial slices at heights `z`.
pub fn series_tags(z: &[f64]) -> Value {
    let instances: Map<String, Value> = z
        .iter()
        .enumerate()
        .map(|(i, z)| (instance_id(i), ct_tags(*z)))
        .collect();
    Value::Object(instances)
}

/// URI of the series listing.
pub fn series_uri(series_id: &str) -> String {
    format!("/series/{}/instances-tags", series_id)
}

/// URI of a frame downloaded as lossless unsigned PNG/PAM.
pub fn frame_uri(instance: &str, frame: u32) -> String {
    format!("/instances/{}/frames/{}/image-uint16", instance, frame)
}

// =============================================================================
// Synthetic Pixels
// =============================================================================

/// Encode a 16-bit grayscale PNG filled by `value(x, y)`.
pub fn png16(width: u32, height: u32, value: impl Fn(u32, u32) -> u16) -> Vec<u8> {
    let buffer: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::from_fn(width, height, |x, y| Luma([value(x, y)]));

    let mut bytes = Vec::new();
    DynamicImage::ImageLuma16(buffer)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// Frame of slice `index`: every pixel holds `index * 100 + x`.
pub fn frame_png(index: usize) -> Vec<u8> {
    png16(COLUMNS, ROWS, |x, _| (index * 100) as u16 + x as u16)
}

// =============================================================================
// Synthetic Series
// =============================================================================

/// Series of `count` axial slices `spacing` mm apart, with their frames.
pub fn series_service(count: usize, spacing: f64) -> InMemoryWebService {
    let z: Vec<f64> = (0..count).map(|i| i as f64 * spacing).collect();
    series_service_at(&z)
}

/// Series of axial slices at heights `z`, with their frames.
pub fn series_service_at(z: &[f64]) -> InMemoryWebService {
    let mut service = InMemoryWebService::new().with_json(series_uri(SERIES_ID), &series_tags(z));
    for index in 0..z.len() {
        service = service.with_response(frame_uri(&instance_id(index), 0), frame_png(index));
    }
    service
}

/// Same as [`series_service`], with every answer delayed so that the
/// downloads overlap.
pub fn slow_series_service(count: usize, spacing: f64) -> InMemoryWebService {
    series_service(count, spacing).with_latency(Duration::from_millis(5))
}

/// Service serving a single instance and its frame.
pub fn instance_service(instance: &str) -> InMemoryWebService {
    InMemoryWebService::new()
        .with_json(format!("/instances/{}/tags", instance), &ct_tags(0.0))
        .with_response(frame_uri(instance, 0), frame_png(7))
}
