//! Hand landmark overlay with SDL2 and camera integration

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

use handlens::capture::{SyntheticSource, V4l2Capture};
use handlens::detector::{DetectorFactory, ReplayDetectorFactory};
use handlens::display::Sdl2Display;
use handlens::export::{ExportAdapter, ExportSink, JsonLinesSink};
use handlens::{utils, Config, Session};

fn init_tracing() {
    let registry = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("handlens=debug")),
        )
        .with(utils::log_layer());

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("Hand landmarker launching...");

    // First argument: optional config file
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let mut config = Config::load(config_path.as_deref())?;

    // Auto-detect capture device if needed
    let synthetic = config.capture.device.path == "synthetic";
    if config.capture.device.path.is_empty() {
        match utils::auto_detect_device().await {
            Ok(device) => {
                config.capture.format = device.format;
                config.capture.device = device;
            }
            Err(e) => warn!("{}", e),
        }
    }
    info!("Using capture device: {:?}", config.capture.device);

    let factory: Box<dyn DetectorFactory> = match &config.detector.replay_path {
        Some(path) => match ReplayDetectorFactory::from_path(path) {
            Ok(factory) => Box::new(factory.with_latency(Duration::from_millis(
                config.detector.replay_latency_ms,
            ))),
            Err(e) => {
                error!("{}", e);
                Box::new(ReplayDetectorFactory::default())
            }
        },
        None => {
            warn!(
                "No model runtime linked for {}, replaying empty results",
                config.detector.model_asset_path
            );
            Box::new(ReplayDetectorFactory::default())
        }
    };

    let (mut session, receiver) = Session::start(&config, factory.as_ref());

    // Binding failures leave the window up with nothing to show.
    let capture_config = config.capture.clone();
    let bound = if synthetic {
        session.bind_camera(move || {
            Ok(SyntheticSource::new(capture_config.width, capture_config.height, capture_config.fps)
                .with_rotation(capture_config.rotation_degrees)
                .with_lens_facing(capture_config.lens_facing))
        })
    } else {
        session.bind_camera(move || {
            let mut capture = V4l2Capture::new(capture_config)?;
            capture.start_stream()?;
            Ok(capture)
        })
    };
    if let Err(e) = bound {
        warn!("Continuing without camera: {}", e);
    }

    let sink: Box<dyn ExportSink> = match &config.export.output {
        Some(path) => Box::new(JsonLinesSink::new(File::create(path)?)),
        None => Box::new(JsonLinesSink::new(std::io::stdout())),
    };
    let exporter = ExportAdapter::new(config.export.view_id, sink);
    info!("Exporting landmarks on {}", exporter.channel());

    let shutdown = Arc::new(AtomicBool::new(false));
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received");
            signal_shutdown.store(true, Ordering::Release);
        }
    });

    // Initialize SDL2
    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;

    let mut app = Sdl2Display::new(&sdl_context, config.display.width, config.display.height)?;
    let run = app.run(
        &sdl_context,
        receiver,
        session.preview(),
        exporter,
        config.detector.running_mode,
        shutdown,
    );

    session.stop();
    let metrics = session.metrics();
    info!(?metrics, "Hand landmarker shutting down");
    run
}
