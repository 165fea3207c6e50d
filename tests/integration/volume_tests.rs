//! Volume assembly integration tests.
//!
//! Tests verify:
//! - Consistent series become volumes, inconsistent ones are geometry errors
//! - The spacing tolerance boundary
//! - Slice downloads are bounded, every slice is reported once, then the
//!   volume is reported ready
//! - Partial failures end in a degraded volume
//! - Coronal and sagittal projections of an axial stack

use std::sync::Arc;

use orthanc_stone::geometry::{CoordinateSystem3D, Vector};
use orthanc_stone::loader::SliceImageQuality;
use orthanc_stone::messages::AsObservable;
use orthanc_stone::slice::{DicomFrameConverter, Slice};
use orthanc_stone::volume::{
    OrthancVolumeImage, SliceContentChangedMessage, VolumeDegradedMessage,
    VolumeGeometryErrorMessage, VolumeGeometryReadyMessage, VolumeImageGeometry,
    VolumeImageOptions, VolumeProjection, VolumeReadyMessage, VolumeState,
};
use orthanc_stone::web::InMemoryWebService;
use serde_json::json;

use super::test_utils::{
    client_for, ct_tags, frame_png, frame_uri, instance_id, series_service, series_service_at,
    series_tags, series_uri, slow_series_service, Recorder, TrackingWebService, COLUMNS, ROWS,
    SERIES_ID,
};

fn options() -> VolumeImageOptions {
    VolumeImageOptions {
        quality: SliceImageQuality::FullPng,
        ..Default::default()
    }
}

fn record(recorder: &Arc<Recorder>, volume: &OrthancVolumeImage) {
    let observable = volume.observable();
    recorder.record(observable, |_: &VolumeGeometryReadyMessage| "geometry-ready".to_string());
    recorder.record(observable, |_: &VolumeGeometryErrorMessage| "geometry-error".to_string());
    recorder.record(observable, |m: &SliceContentChangedMessage| {
        format!("content {}", m.slice_index)
    });
    recorder.record(observable, |_: &VolumeReadyMessage| "volume-ready".to_string());
    recorder.record(observable, |m: &VolumeDegradedMessage| {
        format!("volume-degraded {:?}", m.failed_slices)
    });
}

/// Load the synthetic series served by `service` into a volume.
async fn load(
    service: InMemoryWebService,
    options: VolumeImageOptions,
) -> (Arc<OrthancVolumeImage>, Arc<Recorder>) {
    let (broker, client, mut message_loop) = client_for(Arc::new(service));
    let volume = OrthancVolumeImage::new(&client, options);
    let recorder = Recorder::new(&broker);
    record(&recorder, &volume);

    volume.schedule_load_series(SERIES_ID).unwrap();
    message_loop.run_until_idle().await;
    (volume, recorder)
}

// =============================================================================
// Geometry Consistency
// =============================================================================

#[tokio::test]
async fn test_consistent_series_is_ready() {
    let (volume, recorder) = load(series_service(5, 2.0), options()).await;

    assert_eq!(recorder.events()[0], "geometry-ready");
    assert_eq!(recorder.count("content"), 5);
    assert_eq!(recorder.last().as_deref(), Some("volume-ready"));
    assert_eq!(volume.state(), VolumeState::Ready);
    assert_eq!(volume.loaded_slice_count(), 5);
    assert!(volume.failed_slices().is_empty());
}

#[tokio::test]
async fn test_displaced_slice_is_geometry_error() {
    let count = 6;
    for k in 1..count - 1 {
        let z: Vec<f64> = (0..count)
            .map(|i| i as f64 * 2.0 + if i == k { 0.01 } else { 0.0 })
            .collect();

        let (volume, recorder) = load(series_service_at(&z), options()).await;

        assert_eq!(recorder.events(), ["geometry-error"], "slice {} displaced", k);
        assert_eq!(volume.state(), VolumeState::Error);
        assert!(volume.with_image(|_| ()).is_err());
    }
}

#[tokio::test]
async fn test_missing_middle_slice_is_geometry_error() {
    let (volume, recorder) = load(series_service_at(&[0.0, 2.0, 6.0, 8.0]), options()).await;

    assert_eq!(recorder.events(), ["geometry-error"]);
    assert_eq!(volume.state(), VolumeState::Error);
}

#[tokio::test]
async fn test_geometry_download_failure() {
    let (volume, recorder) = load(InMemoryWebService::new(), options()).await;

    assert_eq!(recorder.events(), ["geometry-error"]);
    assert_eq!(volume.state(), VolumeState::Error);
}

// =============================================================================
// Spacing Tolerance
// =============================================================================

#[tokio::test]
async fn test_spacing_deviation_equal_to_tolerance_is_accepted() {
    let tolerant = VolumeImageOptions {
        spacing_tolerance: 0.25,
        ..options()
    };

    let (volume, _) = load(series_service_at(&[0.0, 2.0, 4.0, 6.25]), tolerant.clone()).await;
    assert_eq!(volume.state(), VolumeState::Ready);

    let (volume, _) = load(series_service_at(&[0.0, 2.0, 4.0, 6.5]), tolerant).await;
    assert_eq!(volume.state(), VolumeState::Error);
}

#[tokio::test]
async fn test_default_spacing_tolerance() {
    let (volume, _) = load(series_service_at(&[0.0, 2.0, 4.0, 6.0005]), options()).await;
    assert_eq!(volume.state(), VolumeState::Ready);

    let (volume, _) = load(series_service_at(&[0.0, 2.0, 4.0, 6.002]), options()).await;
    assert_eq!(volume.state(), VolumeState::Error);
}

// =============================================================================
// Bounded Concurrency
// =============================================================================

#[tokio::test]
async fn test_downloads_are_bounded() {
    let service = Arc::new(TrackingWebService::new(slow_series_service(20, 2.0)));
    let (broker, client, mut message_loop) = client_for(Arc::clone(&service));
    let volume = OrthancVolumeImage::new(&client, options());
    let recorder = Recorder::new(&broker);
    record(&recorder, &volume);

    volume.schedule_load_series(SERIES_ID).unwrap();
    message_loop.run_until_idle().await;

    assert!(client.peak_outstanding_requests() <= 4);
    assert!(service.peak_in_flight() <= 4);
    assert_eq!(service.total_requests(), 21);

    let events = recorder.events();
    assert_eq!(recorder.count("content"), 20);
    assert_eq!(recorder.count("volume-ready"), 1);
    assert_eq!(events.last().map(String::as_str), Some("volume-ready"));

    let mut indices: Vec<usize> = events
        .iter()
        .filter_map(|e| e.strip_prefix("content "))
        .map(|i| i.parse().unwrap())
        .collect();
    indices.sort_unstable();
    assert_eq!(indices, (0..20).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_configurable_concurrency() {
    let service = Arc::new(TrackingWebService::new(slow_series_service(10, 2.0)));
    let (_broker, client, mut message_loop) = client_for(Arc::clone(&service));
    let volume = OrthancVolumeImage::new(
        &client,
        VolumeImageOptions {
            max_concurrent_downloads: 1,
            ..options()
        },
    );

    volume.schedule_load_series(SERIES_ID).unwrap();
    message_loop.run_until_idle().await;

    assert_eq!(client.peak_outstanding_requests(), 1);
    assert_eq!(volume.state(), VolumeState::Ready);
}

#[tokio::test]
async fn test_prioritized_slice_is_downloaded_next() {
    let service = Arc::new(TrackingWebService::new(series_service(8, 2.0)));
    let (_broker, client, mut message_loop) = client_for(Arc::clone(&service));
    let volume = OrthancVolumeImage::new(
        &client,
        VolumeImageOptions {
            max_concurrent_downloads: 1,
            ..options()
        },
    );

    volume.schedule_load_series(SERIES_ID).unwrap();
    assert!(volume.prioritize_slice(6).is_err());

    // Geometry, then the first slice is requested
    assert!(message_loop.run_one().await);
    volume.prioritize_slice(6).unwrap();
    message_loop.run_until_idle().await;

    let requests = service.requests();
    assert_eq!(requests[1], frame_uri(&instance_id(0), 0));
    assert_eq!(requests[2], frame_uri(&instance_id(6), 0));
    assert!(volume.prioritize_slice(8).is_err());
}

// =============================================================================
// Partial Failures
// =============================================================================

#[tokio::test]
async fn test_failed_slices_degrade_the_volume() {
    let z = [0.0, 2.0, 4.0, 6.0];
    let mut service = InMemoryWebService::new().with_json(series_uri(SERIES_ID), &series_tags(&z));
    for index in [0, 1, 3] {
        service = service.with_response(frame_uri(&instance_id(index), 0), frame_png(index));
    }

    let (volume, recorder) = load(service, options()).await;

    assert_eq!(recorder.count("content"), 3);
    assert_eq!(recorder.count("volume-ready"), 0);
    assert_eq!(recorder.last().as_deref(), Some("volume-degraded [2]"));
    assert_eq!(volume.state(), VolumeState::Degraded);
    assert_eq!(volume.failed_slices(), [2]);
    assert_eq!(volume.loaded_slice_count(), 3);
}

#[tokio::test]
async fn test_geometry_is_announced_before_completion() {
    // A dose grid without position: it stays a compressed frame, whose
    // 32-bit pixels no full-quality image route can carry
    let mut tags = ct_tags(0.0);
    let map = tags.as_object_mut().unwrap();
    for tag in ["0020,0032", "0020,0037", "0028,1052", "0028,1053"] {
        map.remove(tag);
    }
    map.insert("3004,000E".to_string(), json!("0.001"));
    map.insert("0028,0101".to_string(), json!("32"));

    let service = InMemoryWebService::new()
        .with_json(series_uri(SERIES_ID), &json!({ instance_id(0): tags }));
    let (volume, recorder) = load(service, options()).await;

    assert_eq!(recorder.events(), ["geometry-ready", "volume-degraded [0]"]);
    assert_eq!(volume.state(), VolumeState::Degraded);
}

// =============================================================================
// Projections
// =============================================================================

#[test]
fn test_projection_mapping() {
    let slices: Vec<Slice> = (0..100)
        .map(|i| {
            let geometry =
                CoordinateSystem3D::canonical().with_origin(Vector::new(0.0, 0.0, i as f64 * 2.0));
            Slice::new(geometry, 0.5, 0.5, 2.0, 512, 512, DicomFrameConverter::default())
        })
        .collect();

    let axial = VolumeImageGeometry::from_slices(&slices, VolumeProjection::Axial).unwrap();
    assert_eq!((axial.width(), axial.height(), axial.slice_count()), (512, 512, 100));
    assert_eq!(axial.slice_thickness(), 2.0);

    let coronal = VolumeImageGeometry::from_slices(&slices, VolumeProjection::Coronal).unwrap();
    assert_eq!(coronal.width(), 512);
    assert_eq!(coronal.height(), 100);
    assert_eq!(coronal.slice_count(), 512);
    assert_eq!(
        (coronal.pixel_spacing_x(), coronal.pixel_spacing_y()),
        (0.5, 2.0)
    );
    assert_eq!(coronal.slice_thickness(), 0.5);

    let sagittal = VolumeImageGeometry::from_slices(&slices, VolumeProjection::Sagittal).unwrap();
    assert_eq!(sagittal.width(), 512);
    assert_eq!(sagittal.height(), 100);
    assert_eq!(sagittal.slice_count(), 512);
    assert_eq!(
        (sagittal.pixel_spacing_x(), sagittal.pixel_spacing_y()),
        (0.5, 2.0)
    );
}

#[tokio::test]
async fn test_volume_projections_and_reslicing() {
    let count = 5;
    let (volume, _) = load(series_service(count, 2.0), options()).await;
    assert_eq!(volume.state(), VolumeState::Ready);

    let coronal = volume.geometry(VolumeProjection::Coronal).unwrap();
    assert_eq!(
        (coronal.width(), coronal.height(), coronal.slice_count()),
        (COLUMNS, count as u32, ROWS as usize)
    );

    let sagittal = volume.geometry(VolumeProjection::Sagittal).unwrap();
    assert_eq!(
        (sagittal.width(), sagittal.height(), sagittal.slice_count()),
        (ROWS, count as u32, COLUMNS as usize)
    );

    // Each coronal slice found by its plane
    for index in 0..ROWS as usize {
        let plane = coronal.slice(index).unwrap().geometry().clone();
        assert_eq!(coronal.lookup_slice(&plane), Some(index));
    }
    let axial_plane = volume.slice(0).unwrap().geometry().clone();
    assert_eq!(coronal.lookup_slice(&axial_plane), None);

    // Rows of the reslices run from the top of the volume down
    let (top, bottom, side) = volume
        .with_image(|image| {
            let reslice = image.extract_slice(VolumeProjection::Coronal, 0).unwrap();
            let side = image.extract_slice(VolumeProjection::Sagittal, 2).unwrap();
            (
                reslice.value(3, 0).unwrap(),
                reslice.value(3, count as u32 - 1).unwrap(),
                side.value(1, 0).unwrap(),
            )
        })
        .unwrap();
    assert_eq!(top, ((count - 1) * 100 + 3) as f64);
    assert_eq!(bottom, 3.0);
    assert_eq!(side, ((count - 1) * 100 + 2) as f64);
}
