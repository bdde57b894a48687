use std::io;
use std::path::Path;
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, Subscriber};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::{registry::LookupSpan, Layer};
use v4l::{capability::Flags, video::Capture, Device};

use crate::capture::frame::PixelFormat;
use crate::error::{Error, Result};

/// A capture node and the format it will stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

impl FoundDevice {
    pub fn new(path: String, format: PixelFormat) -> Self {
        Self { path, format }
    }
}

/// Device nodes scanned when no capture device is configured.
const SCAN_NODES: u32 = 10;

/// Finds the first capture node that can stream a format we decode.
///
/// Scanning opens device nodes, so it runs on the blocking pool.
pub async fn auto_detect_device() -> Result<FoundDevice> {
    info!("Auto-detecting capture devices...");

    let found = tokio::task::spawn_blocking(|| (0..SCAN_NODES).find_map(scan_node))
        .await
        .map_err(|e| Error::Binding(format!("device scan failed: {e}")))?;

    found.ok_or_else(|| Error::Binding("no suitable capture device found".into()))
}

fn scan_node(index: u32) -> Option<FoundDevice> {
    let path = format!("/dev/video{index}");
    if !Path::new(&path).exists() {
        return None;
    }

    let dev = Device::with_path(&path).ok()?;
    let caps = dev.query_caps().ok()?;
    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
        debug!("{} is not a capture device", path);
        return None;
    }

    let format = dev.enum_formats().ok()?.into_iter().find_map(|desc| {
        match &desc.fourcc.repr {
            b"MJPG" => Some(PixelFormat::Mjpeg),
            b"YUYV" => Some(PixelFormat::Yuyv4),
            _ => None,
        }
    })?;

    info!("Found {:?} device: {} - {}", format, path, caps.card);
    Some(FoundDevice::new(path, format))
}

/// Human-readable log output. Goes to stderr: stdout carries the export stream.
pub fn log_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    log_layer_to(std::io::stderr)
}

pub fn log_layer_to<S, W>(writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .with_writer(writer)
        .with_timer(fmt::time::uptime())
        .with_ansi(false)
}

/// Spawn a named thread that inherits the current tracing dispatcher.
pub fn spawn_thread<F, T>(name: impl Into<String>, f: F) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name(name.into())
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}
