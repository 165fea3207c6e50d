//! Frame cache and widget integration tests.
//!
//! Tests verify:
//! - Widgets showing the same frame share one download, whether the frame is
//!   still loading or already cached
//! - Failed frames are evicted and downloaded again on the next request
//! - Widgets report layer changes to their observers
//! - A whole series can back a widget layer
//! - A streamed volume backs layers in any projection

use std::sync::Arc;

use orthanc_stone::loader::SliceImageQuality;
use orthanc_stone::messages::AsObservable;
use orthanc_stone::smart_loader::{
    CachedSliceStatus, DicomSeriesVolumeSlicer, LayerReadyMessage, LayerState, SliceViewerWidget,
    SmartLoader, SmartLoaderOptions, VolumeImageSlicer, VolumeSlicer, WidgetContentChangedMessage,
};
use orthanc_stone::volume::{
    OrthancVolumeImage, VolumeImageOptions, VolumeProjection, VolumeState,
};
use orthanc_stone::web::InMemoryWebService;

use super::test_utils::{
    client_for, ct_tags, frame_png, frame_uri, instance_id, instance_service, series_service,
    Recorder, TrackingWebService, COLUMNS, ROWS, SERIES_ID,
};

const INSTANCE: &str = "instance-a";

fn options() -> SmartLoaderOptions {
    SmartLoaderOptions {
        quality: SliceImageQuality::FullPng,
        ..Default::default()
    }
}

fn tags_uri(instance: &str) -> String {
    format!("/instances/{}/tags", instance)
}

fn record_widget(recorder: &Arc<Recorder>, widget: &SliceViewerWidget) {
    let name = widget.name().to_string();
    recorder.record(widget.observable(), move |m: &WidgetContentChangedMessage| {
        format!("{} layer {}", name, m.layer_index)
    });
}

/// Value of pixel `(x, y)` of layer 0 of `widget`, if it is ready.
fn layer_value(widget: &SliceViewerWidget, x: u32, y: u32) -> Option<f64> {
    match widget.layer_state(0)? {
        LayerState::Ready { image, .. } => image.value(x, y),
        _ => None,
    }
}

// =============================================================================
// Shared Downloads
// =============================================================================

#[tokio::test]
async fn test_in_flight_frame_is_downloaded_once() {
    let service = Arc::new(TrackingWebService::new(instance_service(INSTANCE)));
    let (broker, client, mut message_loop) = client_for(Arc::clone(&service));
    let loader = SmartLoader::new(&client, options());
    let recorder = Recorder::new(&broker);

    let first = SliceViewerWidget::new(&broker, "first");
    let second = SliceViewerWidget::new(&broker, "second");
    record_widget(&recorder, &first);
    record_widget(&recorder, &second);

    loader.set_frame_in_widget(&first, 0, INSTANCE, 0).unwrap();
    loader.set_frame_in_widget(&second, 0, INSTANCE, 0).unwrap();
    message_loop.run_until_idle().await;

    assert_eq!(service.request_count(&tags_uri(INSTANCE)), 1);
    assert_eq!(service.request_count(&frame_uri(INSTANCE, 0)), 1);
    assert!(first.layer_state(0).unwrap().is_ready());
    assert!(second.layer_state(0).unwrap().is_ready());
    assert_eq!(layer_value(&first, 4, 1), Some(704.0));
    assert_eq!(layer_value(&second, 4, 1), Some(704.0));

    assert_eq!(recorder.count("first layer 0"), 1);
    assert_eq!(recorder.count("second layer 0"), 1);
    assert!(!loader.is_loading(INSTANCE, 0));
}

#[tokio::test]
async fn test_cached_frame_is_not_downloaded_again() {
    let service = Arc::new(TrackingWebService::new(instance_service(INSTANCE)));
    let (broker, client, mut message_loop) = client_for(Arc::clone(&service));
    let loader = SmartLoader::new(&client, options());

    let first = SliceViewerWidget::new(&broker, "first");
    loader.set_frame_in_widget(&first, 0, INSTANCE, 0).unwrap();
    message_loop.run_until_idle().await;

    assert_eq!(loader.cache_len(), 1);
    assert_eq!(
        loader.cached_status(INSTANCE, 0),
        Some(CachedSliceStatus::ImageLoaded)
    );

    // Served synchronously from the cache
    let second = SliceViewerWidget::new(&broker, "second");
    loader.set_frame_in_widget(&second, 0, INSTANCE, 0).unwrap();
    assert!(second.layer_state(0).unwrap().is_ready());
    assert_eq!(second.plane(), first.plane());

    message_loop.run_until_idle().await;
    assert_eq!(service.total_requests(), 2);
}

#[tokio::test]
async fn test_cache_hit_shares_pixels() {
    let (broker, client, mut message_loop) = client_for(Arc::new(instance_service(INSTANCE)));
    let loader = SmartLoader::new(&client, options());

    let first = SliceViewerWidget::new(&broker, "first");
    let second = SliceViewerWidget::new(&broker, "second");
    loader.set_frame_in_widget(&first, 0, INSTANCE, 0).unwrap();
    message_loop.run_until_idle().await;
    loader.set_frame_in_widget(&second, 0, INSTANCE, 0).unwrap();

    let (Some(LayerState::Ready { image: a, .. }), Some(LayerState::Ready { image: b, .. })) =
        (first.layer_state(0), second.layer_state(0))
    else {
        panic!("both layers should be ready");
    };
    assert!(Arc::ptr_eq(&a, &b));
}

#[tokio::test]
async fn test_least_recently_used_frame_is_evicted() {
    let service = InMemoryWebService::new();
    let service = ["a", "b", "c"].iter().fold(service, |service, instance| {
        service
            .with_json(tags_uri(instance), &ct_tags(0.0))
            .with_response(frame_uri(instance, 0), frame_png(1))
    });
    let service = Arc::new(TrackingWebService::new(service));
    let (broker, client, mut message_loop) = client_for(Arc::clone(&service));
    let loader = SmartLoader::new(
        &client,
        SmartLoaderOptions {
            cache_capacity: 2,
            ..options()
        },
    );

    let widget = SliceViewerWidget::new(&broker, "main");
    for instance in ["a", "b", "c"] {
        loader.set_frame_in_widget(&widget, 0, instance, 0).unwrap();
        message_loop.run_until_idle().await;
    }

    assert_eq!(loader.cache_len(), 2);
    assert_eq!(loader.cached_status("a", 0), None);

    loader.set_frame_in_widget(&widget, 0, "a", 0).unwrap();
    message_loop.run_until_idle().await;
    assert_eq!(service.request_count(&tags_uri("a")), 2);
    assert!(widget.layer_state(0).unwrap().is_ready());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_missing_frame_is_evicted_and_retried() {
    let service = Arc::new(TrackingWebService::new(InMemoryWebService::new()));
    let (broker, client, mut message_loop) = client_for(Arc::clone(&service));
    let loader = SmartLoader::new(&client, options());
    let recorder = Recorder::new(&broker);

    let first = SliceViewerWidget::new(&broker, "first");
    let second = SliceViewerWidget::new(&broker, "second");
    record_widget(&recorder, &first);
    record_widget(&recorder, &second);

    loader.set_frame_in_widget(&first, 0, INSTANCE, 0).unwrap();
    loader.set_frame_in_widget(&second, 0, INSTANCE, 0).unwrap();
    message_loop.run_until_idle().await;

    assert!(matches!(first.layer_state(0), Some(LayerState::GeometryError)));
    assert!(matches!(second.layer_state(0), Some(LayerState::GeometryError)));
    assert_eq!(recorder.count("first layer 0"), 1);
    assert_eq!(recorder.count("second layer 0"), 1);
    assert_eq!(loader.cache_len(), 0);
    assert!(!loader.is_loading(INSTANCE, 0));

    loader.set_frame_in_widget(&first, 0, INSTANCE, 0).unwrap();
    message_loop.run_until_idle().await;
    assert_eq!(service.request_count(&tags_uri(INSTANCE)), 2);
}

#[tokio::test]
async fn test_missing_image_is_evicted() {
    let service = InMemoryWebService::new().with_json(tags_uri(INSTANCE), &ct_tags(0.0));
    let (broker, client, mut message_loop) = client_for(Arc::new(service));
    let loader = SmartLoader::new(&client, options());

    let widget = SliceViewerWidget::new(&broker, "main");
    loader.set_frame_in_widget(&widget, 0, INSTANCE, 0).unwrap();
    message_loop.run_until_idle().await;

    assert!(matches!(widget.layer_state(0), Some(LayerState::Error { .. })));
    assert_eq!(loader.cached_status(INSTANCE, 0), None);
}

// =============================================================================
// Widgets
// =============================================================================

#[tokio::test]
async fn test_smart_loader_forwards_layer_messages() {
    let (broker, client, mut message_loop) = client_for(Arc::new(instance_service(INSTANCE)));
    let loader = SmartLoader::new(&client, options());
    let recorder = Recorder::new(&broker);
    recorder.record(loader.observable(), |m: &LayerReadyMessage| {
        format!("layer-ready {}", m.slice.instance_id())
    });

    let widget = SliceViewerWidget::new(&broker, "main");
    loader.set_frame_in_widget(&widget, 0, INSTANCE, 0).unwrap();
    message_loop.run_until_idle().await;

    assert_eq!(recorder.events(), [format!("layer-ready {}", INSTANCE)]);
}

#[tokio::test]
async fn test_widget_layers_are_independent() {
    let service = InMemoryWebService::new()
        .with_json(tags_uri("a"), &ct_tags(0.0))
        .with_response(frame_uri("a", 0), frame_png(1))
        .with_json(tags_uri("b"), &ct_tags(0.0));
    let (broker, client, mut message_loop) = client_for(Arc::new(service));
    let loader = SmartLoader::new(&client, options());
    let recorder = Recorder::new(&broker);

    let widget = SliceViewerWidget::new(&broker, "main");
    record_widget(&recorder, &widget);
    loader.set_frame_in_widget(&widget, 0, "a", 0).unwrap();
    loader.set_frame_in_widget(&widget, 1, "b", 0).unwrap();
    assert!(loader.set_frame_in_widget(&widget, 3, "a", 0).is_err());
    message_loop.run_until_idle().await;

    assert_eq!(widget.layer_count(), 2);
    assert!(widget.layer_state(0).unwrap().is_ready());
    assert!(matches!(widget.layer_state(1), Some(LayerState::Error { .. })));
    assert_eq!(recorder.count("main layer 0"), 1);
    assert_eq!(recorder.count("main layer 1"), 1);
}

#[tokio::test]
async fn test_series_layer_follows_the_plane() {
    let (broker, client, mut message_loop) = client_for(Arc::new(series_service(4, 2.0)));
    let slicer = DicomSeriesVolumeSlicer::new(&client, SliceImageQuality::FullPng);
    let widget = SliceViewerWidget::new(&broker, "main");

    widget.add_layer(slicer.clone());
    slicer.load_series(SERIES_ID).unwrap();
    message_loop.run_until_idle().await;

    // The widget starts on the first slice of the series
    assert_eq!(layer_value(&widget, 2, 0), Some(2.0));
    let extent = widget.layer_extent(0).unwrap();
    assert!(extent.iter().all(|corner| corner.z == 0.0));

    let plane = slicer.slice(3).unwrap().geometry().clone();
    widget.set_plane(plane);
    message_loop.run_until_idle().await;

    match widget.layer_state(0) {
        Some(LayerState::Ready { slice, .. }) => assert_eq!(slice.instance_id(), instance_id(3)),
        other => panic!("unexpected layer state {:?}", other),
    }
    assert_eq!(layer_value(&widget, 2, 0), Some(302.0));
}

#[tokio::test]
async fn test_volume_layers_follow_the_streamed_slices() {
    let count = 4;
    let (broker, client, mut message_loop) = client_for(Arc::new(series_service(count, 2.0)));
    let volume = OrthancVolumeImage::new(
        &client,
        VolumeImageOptions {
            quality: SliceImageQuality::FullPng,
            ..Default::default()
        },
    );
    let recorder = Recorder::new(&broker);

    // One slicer per widget: a slicer follows the plane of its widget
    let axial = SliceViewerWidget::new(&broker, "axial");
    let coronal = SliceViewerWidget::new(&broker, "coronal");
    axial.add_layer(VolumeImageSlicer::new(&volume));
    let coronal_slicer = VolumeImageSlicer::new(&volume);
    coronal.add_layer(coronal_slicer.clone());
    record_widget(&recorder, &axial);
    record_widget(&recorder, &coronal);

    volume.schedule_load_series(SERIES_ID).unwrap();
    assert!(message_loop.run_one().await);
    assert_eq!(volume.state(), VolumeState::LoadingSlices);

    // Before any slice is downloaded, the layers show empty voxels
    let plane = volume
        .geometry(VolumeProjection::Coronal)
        .unwrap()
        .slice(1)
        .unwrap()
        .geometry()
        .clone();
    coronal.set_plane(plane.clone());
    assert_eq!(layer_value(&axial, 2, 0), Some(0.0));
    assert_eq!(layer_value(&coronal, 3, 0), Some(0.0));
    let extent = coronal_slicer.extent(&plane).unwrap();
    assert!(extent.iter().all(|corner| corner.y == plane.origin().y));

    message_loop.run_until_idle().await;
    assert_eq!(volume.state(), VolumeState::Ready);

    // The axial widget starts on the first slice and is refreshed by it only
    assert_eq!(axial.plane().unwrap(), *volume.slice(0).unwrap().geometry());
    assert_eq!(layer_value(&axial, 2, 0), Some(2.0));
    assert_eq!(recorder.count("axial layer 0"), 2);

    // The coronal reslice is refreshed by every slice, top row last slice
    match coronal.layer_state(0) {
        Some(LayerState::Ready { slice, image, .. }) => {
            assert_eq!((slice.width(), slice.height()), (COLUMNS, count as u32));
            assert_eq!((image.width(), image.height()), (COLUMNS, count as u32));
        }
        other => panic!("unexpected layer state {:?}", other),
    }
    assert_eq!(layer_value(&coronal, 3, 0), Some(((count - 1) * 100 + 3) as f64));
    assert_eq!(layer_value(&coronal, 3, count as u32 - 1), Some(3.0));
    assert_eq!(recorder.count("coronal layer 0"), 1 + 1 + count);

    // Out of the volume: no layer
    let below = plane.with_origin(*plane.origin() - plane.normal() * f64::from(ROWS) * 10.0);
    assert!(coronal_slicer.extent(&below).is_none());
}
