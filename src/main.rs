//! Orthanc Stone - loads DICOM slices and volumes from an Orthanc server.
//!
//! This binary drives the library against a live server: it assembles
//! volumes, loads single frames through the cache and checks connectivity.

use clap::Parser;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orthanc_stone::{
    config::{CheckConfig, Cli, Command, FrameConfig, OrthancConfig, VolumeConfig},
    messages::{AsObservable, MessageBroker, Observer, ObserverCallable, ObserverHandle},
    smart_loader::{LayerState, SliceViewerWidget, SmartLoader},
    volume::{
        OrthancVolumeImage, SliceContentChangedMessage, VolumeProjection, VolumeState,
    },
    web::{OrthancApiClient, OrthancHttpService, WebService},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.command.orthanc().verbose);

    match cli.command {
        Command::Volume(config) => run_volume(config).await,
        Command::Frame(config) => run_frame(config).await,
        Command::Check(config) => run_check(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "orthanc_stone=debug"
    } else {
        "orthanc_stone=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn connect(config: &OrthancConfig) -> Option<Arc<OrthancHttpService>> {
    match OrthancHttpService::new(
        &config.url,
        config.username.clone(),
        config.password.clone(),
        config.timeout(),
    ) {
        Ok(service) => Some(Arc::new(service)),
        Err(e) => {
            error!("Cannot reach {}: {}", config.url, e);
            None
        }
    }
}

// =============================================================================
// Volume Command
// =============================================================================

/// Logs the streaming progress of a volume.
struct Progress {
    handle: ObserverHandle,
    written: AtomicUsize,
    total: usize,
}

impl Observer for Progress {
    fn observer_handle(&self) -> &ObserverHandle {
        &self.handle
    }
}

impl Progress {
    fn on_slice(&self, message: &SliceContentChangedMessage) {
        let written = self.written.fetch_add(1, Ordering::SeqCst) + 1;
        if written % 10 == 0 || written == self.total {
            info!(
                "  {}/{} slices (last: {})",
                written,
                self.total,
                message.slice.key()
            );
        }
    }
}

async fn run_volume(config: VolumeConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let Some(service) = connect(&config.orthanc) else {
        return ExitCode::FAILURE;
    };

    let broker = MessageBroker::new();
    let (client, mut message_loop) = OrthancApiClient::new(&broker, service);
    let volume = OrthancVolumeImage::new(&client, config.volume_options());

    info!("Loading series {} from {}", config.series, config.orthanc.url);
    info!(
        "  {} download(s) in flight, {} quality",
        config.max_concurrent_downloads, config.quality
    );

    if let Err(e) = volume.schedule_load_series(&config.series) {
        error!("Cannot load series {}: {}", config.series, e);
        return ExitCode::FAILURE;
    }

    // The slice count is only known once the geometry is in
    while !volume.state().has_geometry() && volume.state() != VolumeState::Error {
        if !message_loop.run_one().await {
            break;
        }
    }

    if volume.state() == VolumeState::Error {
        error!("Series {} does not form a volume", config.series);
        return ExitCode::FAILURE;
    }

    let progress = Arc::new(Progress {
        handle: ObserverHandle::new(&broker),
        written: AtomicUsize::new(volume.loaded_slice_count()),
        total: volume.slice_count().unwrap_or(0),
    });
    volume
        .observable()
        .register_observer_callback(Box::new(ObserverCallable::new(
            &progress,
            Progress::on_slice,
        )));

    message_loop.run_until_idle().await;

    for projection in VolumeProjection::ALL {
        match volume.geometry(projection) {
            Ok(geometry) => info!(
                "  {}: {}x{}x{}, spacing {:.3}x{:.3} mm, thickness {:.3} mm",
                projection,
                geometry.width(),
                geometry.height(),
                geometry.slice_count(),
                geometry.pixel_spacing_x(),
                geometry.pixel_spacing_y(),
                geometry.slice_thickness()
            ),
            Err(e) => warn!("  {}: {}", projection, e),
        }
    }

    if let Ok(Some((min, max))) = volume.with_image(|image| image.value_range()) {
        info!("  Stored values: [{}, {}]", min, max);
    }

    match volume.state() {
        VolumeState::Ready => {
            info!("Volume ready");
            ExitCode::SUCCESS
        }
        VolumeState::Degraded => {
            warn!(
                "Volume loaded with {} missing slice(s): {:?}",
                volume.failed_slices().len(),
                volume.failed_slices()
            );
            ExitCode::FAILURE
        }
        state => {
            error!("Volume stopped in state {:?}", state);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Frame Command
// =============================================================================

async fn run_frame(config: FrameConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let Some(service) = connect(&config.orthanc) else {
        return ExitCode::FAILURE;
    };

    let broker = MessageBroker::new();
    let (client, mut message_loop) = OrthancApiClient::new(&broker, service);
    let smart_loader = SmartLoader::new(&client, config.smart_loader_options());
    let widget = SliceViewerWidget::new(&broker, "frame");

    if let Err(e) = smart_loader.set_frame_in_widget(&widget, 0, &config.instance, config.frame) {
        error!("Cannot load frame {} of {}: {}", config.frame, config.instance, e);
        return ExitCode::FAILURE;
    }

    message_loop.run_until_idle().await;

    match widget.layer_state(0) {
        Some(LayerState::Ready {
            slice,
            image,
            quality,
        }) => {
            info!("Frame {} ready", slice.key());
            info!(
                "  {}x{} {:?}, {} encoding",
                image.width(),
                image.height(),
                image.format(),
                quality
            );
            info!(
                "  Spacing {:.3}x{:.3} mm, thickness {:.3} mm",
                slice.pixel_spacing_x(),
                slice.pixel_spacing_y(),
                slice.thickness()
            );
            ExitCode::SUCCESS
        }
        Some(state) => {
            error!("Frame not loaded: {:?}", state);
            ExitCode::FAILURE
        }
        None => {
            error!("No layer was installed");
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: CheckConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let Some(service) = connect(&config.orthanc) else {
        return ExitCode::FAILURE;
    };

    info!("Connecting to {}...", config.orthanc.url);
    match service.get_system().await {
        Ok(system) => {
            info!("  Connected successfully");
            info!("  Orthanc {} ({})", system.version, system.name);
            if let Some(aet) = system.dicom_aet {
                info!("  DICOM AET: {}", aet);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("  Failed to connect: {}", e);
            error!("");
            error!("  Please check:");
            error!("    - The server is running and reachable");
            error!("    - The credentials are correct");
            ExitCode::FAILURE
        }
    }
}
