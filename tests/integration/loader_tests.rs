//! Slice loader integration tests.
//!
//! Tests verify:
//! - Series, instance and frame geometry against synthetic Orthanc answers
//! - Out-of-plane slices are dropped, empty or broken answers are errors
//! - Slice images are downloaded, decoded and reported per slice

use std::sync::Arc;

use orthanc_stone::error::WebError;
use orthanc_stone::geometry::Vector;
use orthanc_stone::loader::{
    LoaderState, OrthancSlicesLoader, SliceGeometryErrorMessage, SliceGeometryReadyMessage,
    SliceImageErrorMessage, SliceImageQuality, SliceImageReadyMessage,
};
use orthanc_stone::messages::AsObservable;
use orthanc_stone::slice::PixelFormat;
use orthanc_stone::web::InMemoryWebService;

use super::test_utils::{
    client_for, ct_tags, ct_tags_at, frame_png, frame_uri, instance_id, series_service_at,
    series_tags, series_uri, Recorder, TrackingWebService, COLUMNS, ROWS, SERIES_ID,
};

fn record(recorder: &Arc<Recorder>, loader: &OrthancSlicesLoader) {
    let observable = loader.observable();
    recorder.record(observable, |_: &SliceGeometryReadyMessage| "geometry-ready".to_string());
    recorder.record(observable, |_: &SliceGeometryErrorMessage| "geometry-error".to_string());
    recorder.record(observable, |m: &SliceImageReadyMessage| {
        format!("image-ready {}", m.slice_index)
    });
    recorder.record(observable, |m: &SliceImageErrorMessage| {
        format!("image-error {}", m.slice_index)
    });
}

// =============================================================================
// Geometry
// =============================================================================

#[tokio::test]
async fn test_series_slices_are_sorted() {
    let service = Arc::new(TrackingWebService::new(series_service_at(&[4.0, 0.0, 2.0])));
    let (broker, client, mut message_loop) = client_for(Arc::clone(&service));
    let loader = OrthancSlicesLoader::new(&client);
    let recorder = Recorder::new(&broker);
    record(&recorder, &loader);

    loader.schedule_load_series(SERIES_ID).unwrap();
    message_loop.run_until_idle().await;

    assert_eq!(recorder.events(), ["geometry-ready"]);
    assert_eq!(loader.state(), LoaderState::GeometryReady);
    assert_eq!(loader.slice_count().unwrap(), 3);

    let heights: Vec<f64> = loader
        .slices()
        .unwrap()
        .iter()
        .map(|slice| slice.geometry().origin().z)
        .collect();
    assert_eq!(heights, [0.0, 2.0, 4.0]);
    assert_eq!(loader.slice(0).unwrap().instance_id(), instance_id(1));
    assert_eq!(service.requests(), [series_uri(SERIES_ID)]);
}

#[tokio::test]
async fn test_out_of_plane_slice_is_dropped() {
    let mut tags = series_tags(&[0.0, 2.0, 4.0, 6.0]);
    tags["preview"] = ct_tags_at([0.0, 0.0, 0.0], "1\\0\\0\\0\\0\\1");
    let service = InMemoryWebService::new().with_json(series_uri(SERIES_ID), &tags);

    let (_broker, client, mut message_loop) = client_for(Arc::new(service));
    let loader = OrthancSlicesLoader::new(&client);

    loader.schedule_load_series(SERIES_ID).unwrap();
    message_loop.run_until_idle().await;

    assert_eq!(loader.slice_count().unwrap(), 4);
    assert!(loader
        .slices()
        .unwrap()
        .iter()
        .all(|slice| slice.instance_id() != "preview"));
}

#[tokio::test]
async fn test_lookup_slice_by_plane() {
    let (_broker, client, mut message_loop) =
        client_for(Arc::new(series_service_at(&[0.0, 2.0, 4.0])));
    let loader = OrthancSlicesLoader::new(&client);

    loader.schedule_load_series(SERIES_ID).unwrap();
    message_loop.run_until_idle().await;

    let plane = loader.slice(2).unwrap().geometry().clone();
    assert_eq!(loader.lookup_slice(&plane).unwrap(), Some(2));

    let elsewhere = plane.with_origin(Vector::new(0.0, 0.0, 3.0));
    assert_eq!(loader.lookup_slice(&elsewhere).unwrap(), None);
}

#[tokio::test]
async fn test_single_frame_geometry() {
    let service = InMemoryWebService::new().with_json("/instances/abc/tags", &ct_tags(12.5));
    let (broker, client, mut message_loop) = client_for(Arc::new(service));
    let loader = OrthancSlicesLoader::new(&client);
    let recorder = Recorder::new(&broker);
    record(&recorder, &loader);

    loader.schedule_load_frame("abc", 0).unwrap();
    message_loop.run_until_idle().await;

    assert_eq!(recorder.events(), ["geometry-ready"]);
    let slice = loader.slice(0).unwrap();
    assert_eq!(slice.key(), "abc:0");
    assert_eq!(slice.geometry().origin().z, 12.5);
    assert_eq!((slice.width(), slice.height()), (COLUMNS, ROWS));
}

#[tokio::test]
async fn test_frame_out_of_range_is_geometry_error() {
    let service = InMemoryWebService::new().with_json("/instances/abc/tags", &ct_tags(0.0));
    let (broker, client, mut message_loop) = client_for(Arc::new(service));
    let loader = OrthancSlicesLoader::new(&client);
    let recorder = Recorder::new(&broker);
    record(&recorder, &loader);

    loader.schedule_load_frame("abc", 3).unwrap();
    message_loop.run_until_idle().await;

    assert_eq!(recorder.events(), ["geometry-error"]);
    assert_eq!(loader.state(), LoaderState::Error);
}

#[tokio::test]
async fn test_http_failure_is_geometry_error() {
    let service = InMemoryWebService::new().with_failure(
        series_uri(SERIES_ID),
        WebError::Status {
            uri: series_uri(SERIES_ID),
            status: 503,
        },
    );
    let (broker, client, mut message_loop) = client_for(Arc::new(service));
    let loader = OrthancSlicesLoader::new(&client);
    let recorder = Recorder::new(&broker);
    record(&recorder, &loader);

    loader.schedule_load_series(SERIES_ID).unwrap();
    message_loop.run_until_idle().await;

    assert_eq!(recorder.events(), ["geometry-error"]);
    assert_eq!(loader.state(), LoaderState::Error);
    assert!(loader.slice_count().is_err());
}

#[tokio::test]
async fn test_empty_series_is_geometry_error() {
    let service = InMemoryWebService::new().with_json(series_uri(SERIES_ID), &series_tags(&[]));
    let (broker, client, mut message_loop) = client_for(Arc::new(service));
    let loader = OrthancSlicesLoader::new(&client);
    let recorder = Recorder::new(&broker);
    record(&recorder, &loader);

    loader.schedule_load_series(SERIES_ID).unwrap();
    message_loop.run_until_idle().await;

    assert_eq!(recorder.events(), ["geometry-error"]);
}

#[tokio::test]
async fn test_dropped_loader_receives_nothing() {
    let service = Arc::new(TrackingWebService::new(series_service_at(&[0.0, 2.0])));
    let (broker, client, mut message_loop) = client_for(Arc::clone(&service));
    let loader = OrthancSlicesLoader::new(&client);
    let recorder = Recorder::new(&broker);
    record(&recorder, &loader);

    loader.schedule_load_series(SERIES_ID).unwrap();
    drop(loader);
    message_loop.run_until_idle().await;

    assert_eq!(service.total_requests(), 1);
    assert!(recorder.events().is_empty());
}

// =============================================================================
// Images
// =============================================================================

#[tokio::test]
async fn test_slice_image_is_decoded() {
    let (broker, client, mut message_loop) =
        client_for(Arc::new(series_service_at(&[0.0, 2.0, 4.0])));
    let loader = OrthancSlicesLoader::new(&client);
    let recorder = Recorder::new(&broker);
    record(&recorder, &loader);

    loader.schedule_load_series(SERIES_ID).unwrap();
    message_loop.run_until_idle().await;

    loader
        .schedule_load_slice_image(1, SliceImageQuality::FullPng)
        .unwrap();
    message_loop.run_until_idle().await;

    assert_eq!(recorder.events(), ["geometry-ready", "image-ready 1"]);
}

#[tokio::test]
async fn test_slice_image_content() {
    let service = InMemoryWebService::new()
        .with_json("/instances/abc/tags", &ct_tags(0.0))
        .with_response(frame_uri("abc", 0), frame_png(3));
    let (broker, client, mut message_loop) = client_for(Arc::new(service));
    let loader = OrthancSlicesLoader::new(&client);

    let images = Recorder::new(&broker);
    images.record(loader.observable(), |m: &SliceImageReadyMessage| {
        format!(
            "{:?} {}x{} {:?} {}",
            m.image.format(),
            m.image.width(),
            m.image.height(),
            m.image.value(5, 2),
            m.quality
        )
    });

    loader.schedule_load_frame("abc", 0).unwrap();
    message_loop.run_until_idle().await;
    loader
        .schedule_load_slice_image(0, SliceImageQuality::FullPng)
        .unwrap();
    message_loop.run_until_idle().await;

    assert_eq!(
        images.events(),
        [format!(
            "{:?} {}x{} {:?} full-png",
            PixelFormat::Grayscale16,
            COLUMNS,
            ROWS,
            Some(305.0)
        )]
    );
}

#[tokio::test]
async fn test_missing_image_keeps_loader_usable() {
    let z = [0.0, 2.0, 4.0];
    let service = InMemoryWebService::new()
        .with_json(series_uri(SERIES_ID), &series_tags(&z))
        .with_response(frame_uri(&instance_id(0), 0), frame_png(0));
    let (broker, client, mut message_loop) = client_for(Arc::new(service));
    let loader = OrthancSlicesLoader::new(&client);
    let recorder = Recorder::new(&broker);
    record(&recorder, &loader);

    loader.schedule_load_series(SERIES_ID).unwrap();
    message_loop.run_until_idle().await;

    loader
        .schedule_load_slice_image(2, SliceImageQuality::FullPng)
        .unwrap();
    message_loop.run_until_idle().await;
    loader
        .schedule_load_slice_image(0, SliceImageQuality::FullPng)
        .unwrap();
    message_loop.run_until_idle().await;

    assert_eq!(
        recorder.events(),
        ["geometry-ready", "image-error 2", "image-ready 0"]
    );
    assert_eq!(loader.state(), LoaderState::GeometryReady);
}

#[tokio::test]
async fn test_image_index_out_of_range() {
    let (_broker, client, mut message_loop) = client_for(Arc::new(series_service_at(&[0.0])));
    let loader = OrthancSlicesLoader::new(&client);

    loader.schedule_load_series(SERIES_ID).unwrap();
    message_loop.run_until_idle().await;

    assert!(loader
        .schedule_load_slice_image(1, SliceImageQuality::FullPng)
        .is_err());
}
