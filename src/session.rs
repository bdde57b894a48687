//! Explicit session lifecycle: `start` wires detector, pipeline and
//! dispatcher; `bind_camera` attaches a frame source; `stop` tears everything
//! down once.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use flume::Receiver;
use image::RgbaImage;
use tracing::{error, info, warn};

use crate::capture::FrameSource;
use crate::detector::{DetectorCallback, DetectorEvent, DetectorFactory};
use crate::dispatch::{ResultDispatcher, ResultReceiver};
use crate::error::{Error, Result};
use crate::pipeline::{DetectionPipeline, FrameSubmitter, InFlight, Mailbox, PipelineSettings};
use crate::utils::spawn_thread;
use crate::{Config, Metrics};

/// Back-off after a failed capture before trying the next frame.
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(10);

struct CaptureThread {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    exited: Receiver<()>,
}

/// One attached camera view with its detector.
pub struct Session {
    pipeline: DetectionPipeline,
    dispatcher: ResultDispatcher,
    capture: Option<CaptureThread>,
    source_drops: Arc<AtomicU64>,
    settings: PipelineSettings,
    stopped: bool,
}

impl Session {
    /// Creates the detector and starts the pipeline worker.
    ///
    /// A detector that fails to initialize is reported and leaves the session
    /// inert: frames are discarded and no results arrive.
    pub fn start(config: &Config, factory: &dyn DetectorFactory) -> (Self, ResultReceiver) {
        let settings = PipelineSettings::from(&config.pipeline);
        let (dispatcher, receiver) =
            ResultDispatcher::new(Duration::from_millis(config.pipeline.fps_window_ms));
        let inflight = Arc::new(InFlight::new());

        let callback: DetectorCallback = {
            let dispatcher = dispatcher.clone();
            let inflight = inflight.clone();
            Arc::new(move |event: DetectorEvent| {
                let ts = match &event {
                    DetectorEvent::Result(result) => Some(result.timestamp_ms()),
                    DetectorEvent::Error(e) => e.timestamp_ms,
                };
                dispatcher.on_event(event);
                inflight.resolve(ts);
            })
        };

        let pipeline = match factory.create(&config.detector.options(), callback) {
            Ok(detector) => match DetectionPipeline::spawn(detector, inflight, settings) {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    error!("Failed to start detection pipeline: {}", e);
                    DetectionPipeline::inert()
                }
            },
            Err(e) => {
                error!("Hand landmarker failed to initialize: {}", e);
                DetectionPipeline::inert()
            }
        };

        (
            Self {
                pipeline,
                dispatcher,
                capture: None,
                source_drops: Arc::new(AtomicU64::new(0)),
                settings,
                stopped: false,
            },
            receiver,
        )
    }

    pub fn is_inert(&self) -> bool {
        self.pipeline.is_inert()
    }

    /// Push-side handle for frame sources driven by the embedder.
    pub fn submitter(&self) -> FrameSubmitter {
        self.pipeline.submitter()
    }

    /// Converted camera images for drawing the preview.
    pub fn preview(&self) -> Arc<Mailbox<RgbaImage>> {
        self.pipeline.preview()
    }

    /// Opens a frame source on a dedicated capture thread and feeds the pipeline.
    ///
    /// `open` runs on that thread. If it fails or does not return within the
    /// shutdown timeout, the failure is reported and returned, and the session
    /// keeps running without a camera stream.
    pub fn bind_camera<F, S>(&mut self, open: F) -> Result<()>
    where
        F: FnOnce() -> Result<S> + Send + 'static,
        S: FrameSource + 'static,
    {
        if self.stopped {
            return Err(Error::Binding("session already stopped".into()));
        }
        self.unbind_camera();

        let running = Arc::new(AtomicBool::new(true));
        let (bound_tx, bound_rx) = flume::bounded::<Result<()>>(1);
        let (exited_tx, exited_rx) = flume::bounded(1);
        let submitter = self.pipeline.submitter();
        let thread_running = running.clone();
        let source_drops = self.source_drops.clone();

        let handle = spawn_thread("camera-capture", move || {
            let mut source = match open() {
                Ok(source) => {
                    let _ = bound_tx.send(Ok(()));
                    source
                }
                Err(e) => {
                    let _ = bound_tx.send(Err(e));
                    let _ = exited_tx.send(());
                    return;
                }
            };
            if !thread_running.load(Ordering::Acquire) {
                let _ = exited_tx.send(());
                return;
            }
            info!("Camera bound ({:?} facing)", source.lens_facing());
            let drops_before = source_drops.load(Ordering::Relaxed);

            while thread_running.load(Ordering::Acquire) {
                match source.next_frame() {
                    Ok(frame) => {
                        submitter.submit(frame);
                        source_drops
                            .store(drops_before + source.dropped_frames(), Ordering::Relaxed);
                    }
                    Err(e) => {
                        warn!("Capture error: {}", e);
                        std::thread::sleep(CAPTURE_RETRY_DELAY);
                    }
                }
            }
            let _ = exited_tx.send(());
        })
        .map_err(|e| Error::Binding(format!("failed to spawn capture thread: {e}")))?;

        let bound = match bound_rx.recv_timeout(self.settings.shutdown_timeout) {
            Ok(bound) => bound,
            Err(flume::RecvTimeoutError::Timeout) => {
                // Tell the thread to exit if the camera ever opens.
                running.store(false, Ordering::Release);
                Err(Error::Binding(format!(
                    "camera did not open within {:?}",
                    self.settings.shutdown_timeout
                )))
            }
            Err(flume::RecvTimeoutError::Disconnected) => {
                Err(Error::Binding("capture thread exited".into()))
            }
        };

        self.capture = Some(CaptureThread {
            running,
            handle: Some(handle),
            exited: exited_rx,
        });

        if let Err(e) = &bound {
            error!("Use case binding failed: {}", e);
        }
        bound
    }

    fn unbind_camera(&mut self) {
        let Some(mut capture) = self.capture.take() else {
            return;
        };
        capture.running.store(false, Ordering::Release);

        match capture.exited.recv_timeout(self.settings.shutdown_timeout) {
            Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => {
                if let Some(handle) = capture.handle.take() {
                    if handle.join().is_err() {
                        error!("Capture thread panicked");
                    }
                }
            }
            Err(flume::RecvTimeoutError::Timeout) => {
                warn!("Capture thread still blocked in the camera, detaching it");
            }
        }
    }

    pub fn metrics(&self) -> Metrics {
        let stats = self.pipeline.stats();
        Metrics {
            frames_submitted: stats.frames_submitted,
            frames_superseded: stats.frames_superseded,
            frames_dropped: stats.frames_dropped,
            requests_dispatched: stats.requests_dispatched,
            slow_requests: stats.slow_requests,
            source_drops: self.source_drops.load(Ordering::Relaxed),
            results_received: self.dispatcher.results_received(),
            detector_errors: stats.detector_errors + self.dispatcher.errors_received(),
        }
    }

    /// Stops accepting frames, stops the worker (which releases the detector)
    /// and detaches the camera. Each wait is bounded. Idempotent.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        if let Some(capture) = &self.capture {
            capture.running.store(false, Ordering::Release);
        }
        self.pipeline.stop();
        self.dispatcher.close();
        self.unbind_camera();
        info!("Session stopped");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}
