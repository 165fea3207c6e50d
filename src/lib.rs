//! # Orthanc Stone
//!
//! Message-passing core and slice/volume loaders for DICOM viewers backed by
//! an Orthanc server.
//!
//! Components talk through typed messages: an observable broadcasts a message,
//! and every live observer registered for that message type receives it. A
//! broker tracks which observers are alive, so a message addressed to a
//! dropped observer is silently discarded. HTTP answers are delivered one at a
//! time through a [`MessageLoop`](web::MessageLoop), which serializes every
//! callback triggered by the network.
//!
//! ## Features
//!
//! - **Geometry**: slices of a series, instance or frame are parsed from the
//!   Orthanc tags and sorted along their normal
//! - **Volumes**: a series is validated and streamed into a 3D voxel buffer
//!   with bounded download concurrency, then resliced axially, coronally or
//!   sagittally
//! - **Frame cache**: widgets showing the same frame share a single download
//!   and the decoded pixels
//!
//! ## Architecture
//!
//! - [`messages`] - Broker, observers, observables, forwarders and promises
//! - [`geometry`] - Vectors and 3D coordinate systems
//! - [`slice`] - DICOM slices, pixel formats and value conversion
//! - [`web`] - Asynchronous access to the Orthanc REST API
//! - [`loader`] - Slice geometry and image loading
//! - [`volume`] - Volume assembly and projections
//! - [`smart_loader`] - Layers, viewer widgets and the frame cache
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use orthanc_stone::{MessageBroker, OrthancApiClient, OrthancHttpService, OrthancVolumeImage};
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = OrthancHttpService::new(
//!         "http://localhost:8042",
//!         None,
//!         None,
//!         Duration::from_secs(30),
//!     )
//!     .unwrap();
//!
//!     let broker = MessageBroker::new();
//!     let (client, mut message_loop) = OrthancApiClient::new(&broker, Arc::new(service));
//!
//!     let volume = OrthancVolumeImage::new(&client, Default::default());
//!     volume.schedule_load_series("series-id").unwrap();
//!     message_loop.run_until_idle().await;
//!
//!     println!("{:?}", volume.state());
//! }
//! ```

pub mod config;
pub mod error;
pub mod geometry;
pub mod loader;
pub mod messages;
pub mod slice;
pub mod smart_loader;
pub mod volume;
pub mod web;

// Re-export commonly used types
pub use config::{CheckConfig, Cli, Command, FrameConfig, OrthancConfig, VolumeConfig};
pub use error::{DecodeError, GeometryError, SliceError, StoneError, WebError};
pub use geometry::{CoordinateSystem3D, Vector};
pub use loader::{LoaderState, OrthancSlicesLoader, SliceImageQuality};
pub use messages::{
    AsObservable, Callable, Message, MessageBroker, MessageForwarder, Observable, ObservableId,
    Observer, ObserverCallable, ObserverHandle, ObserverId, Promise, PromiseState,
};
pub use slice::{DicomFrameConverter, PixelFormat, Slice, SliceImage, SlicesSorter};
pub use smart_loader::{
    CachedSlice, CachedSliceStatus, DicomSeriesVolumeSlicer, LayerState, SliceViewerWidget,
    SmartLoader, SmartLoaderOptions, VolumeImageSlicer, VolumeSlicer,
};
pub use volume::{
    ImageBuffer3D, OrthancVolumeImage, VolumeImageGeometry, VolumeImageOptions, VolumeProjection,
    VolumeState,
};
pub use web::{InMemoryWebService, MessageLoop, OrthancApiClient, OrthancHttpService, WebService};
