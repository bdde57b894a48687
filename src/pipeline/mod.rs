//! Frame-to-detector pipeline.
//!
//! The camera thread overwrites a single-slot [`Mailbox`]; one worker thread
//! takes the newest frame, converts it and hands it to the detector, with at
//! most one request outstanding at a time.

pub mod inflight;
pub mod mailbox;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use flume::Receiver;
use image::RgbaImage;
use tracing::{debug, error, info, trace, warn};

use crate::capture::{Frame, FrameConverter};
use crate::detector::{DetectionRequest, Detector};
use crate::error::Result;
use crate::utils::spawn_thread;
use crate::PipelineConfig;

pub use inflight::InFlight;
pub use mailbox::{Mailbox, MailboxStats};

/// Timing knobs for the worker, derived from [`PipelineConfig`].
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// How long the worker blocks before re-checking for shutdown
    pub idle_poll: Duration,
    /// A request unresolved for this long is reported as slow. The gate stays
    /// closed until the detector answers.
    pub slow_request: Duration,
    /// Upper bound on how long `stop` waits for the worker
    pub shutdown_timeout: Duration,
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            idle_poll: Duration::from_millis(config.idle_poll_ms),
            slow_request: Duration::from_millis(config.slow_request_ms),
            shutdown_timeout: Duration::from_millis(config.shutdown_timeout_ms),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        (&PipelineConfig::default()).into()
    }
}

/// Counters for one pipeline's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_submitted: u64,
    pub frames_superseded: u64,
    /// Frames that failed conversion
    pub frames_dropped: u64,
    pub requests_dispatched: u64,
    pub detector_errors: u64,
    /// Requests that ran past `slow_request`
    pub slow_requests: u64,
}

#[derive(Default)]
struct Counters {
    frames_submitted: AtomicU64,
    frames_superseded: AtomicU64,
    frames_dropped: AtomicU64,
    requests_dispatched: AtomicU64,
    detector_errors: AtomicU64,
    slow_requests: AtomicU64,
}

struct Shared {
    frames: Mailbox<Frame>,
    preview: Arc<Mailbox<RgbaImage>>,
    inflight: Arc<InFlight>,
    accepting: AtomicBool,
    running: AtomicBool,
    counters: Counters,
}

/// Cheap handle the capture side uses to push frames.
#[derive(Clone)]
pub struct FrameSubmitter {
    shared: Arc<Shared>,
}

impl FrameSubmitter {
    /// Overwrites the pending frame. Never blocks.
    ///
    /// Returns `false` if the pipeline is inert or shutting down and the frame
    /// was discarded.
    pub fn submit(&self, frame: Frame) -> bool {
        if !self.shared.accepting.load(Ordering::Acquire) {
            trace!(ts = frame.timestamp_ms, "pipeline not accepting, frame discarded");
            return false;
        }

        self.shared
            .counters
            .frames_submitted
            .fetch_add(1, Ordering::Relaxed);
        metrics::counter!("handlens_frames_submitted").increment(1);

        if self.shared.frames.post(frame) {
            self.shared
                .counters
                .frames_superseded
                .fetch_add(1, Ordering::Relaxed);
            metrics::counter!("handlens_frames_superseded").increment(1);
        }
        true
    }
}

/// The single-worker detection stage.
pub struct DetectionPipeline {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    exited: Option<Receiver<()>>,
    settings: PipelineSettings,
}

impl DetectionPipeline {
    /// Spawns the worker. `inflight` must be the gate the detector's callback resolves.
    pub fn spawn(
        detector: Box<dyn Detector>,
        inflight: Arc<InFlight>,
        settings: PipelineSettings,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            frames: Mailbox::new(),
            preview: Arc::new(Mailbox::new()),
            inflight,
            accepting: AtomicBool::new(true),
            running: AtomicBool::new(true),
            counters: Counters::default(),
        });

        let (exited_tx, exited_rx) = flume::bounded(1);
        let worker_shared = shared.clone();
        let handle = spawn_thread("detection-pipeline", move || {
            run_worker(&worker_shared, detector, settings);
            let _ = exited_tx.send(());
        })?;

        info!("Detection pipeline started");
        Ok(Self {
            shared,
            worker: Some(handle),
            exited: Some(exited_rx),
            settings,
        })
    }

    /// A pipeline with no detector. Accepts nothing and processes nothing.
    pub fn inert() -> Self {
        let shared = Arc::new(Shared {
            frames: Mailbox::new(),
            preview: Arc::new(Mailbox::new()),
            inflight: Arc::new(InFlight::new()),
            accepting: AtomicBool::new(false),
            running: AtomicBool::new(false),
            counters: Counters::default(),
        });
        Self {
            shared,
            worker: None,
            exited: None,
            settings: PipelineSettings::default(),
        }
    }

    pub fn is_inert(&self) -> bool {
        self.worker.is_none() && !self.shared.accepting.load(Ordering::Acquire)
    }

    pub fn submitter(&self) -> FrameSubmitter {
        FrameSubmitter {
            shared: self.shared.clone(),
        }
    }

    /// Converted images, newest only, for drawing the camera preview.
    pub fn preview(&self) -> Arc<Mailbox<RgbaImage>> {
        self.shared.preview.clone()
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.shared.counters;
        PipelineStats {
            frames_submitted: c.frames_submitted.load(Ordering::Relaxed),
            frames_superseded: c.frames_superseded.load(Ordering::Relaxed),
            frames_dropped: c.frames_dropped.load(Ordering::Relaxed),
            requests_dispatched: c.requests_dispatched.load(Ordering::Relaxed),
            detector_errors: c.detector_errors.load(Ordering::Relaxed),
            slow_requests: c.slow_requests.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting frames, waits (bounded) for the worker, which releases
    /// the detector on its way out. Safe to call more than once.
    pub fn stop(&mut self) {
        self.shared.accepting.store(false, Ordering::Release);
        self.shared.running.store(false, Ordering::Release);

        let Some(exited) = self.exited.take() else {
            return;
        };

        match exited.recv_timeout(self.settings.shutdown_timeout) {
            Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.worker.take() {
                    if handle.join().is_err() {
                        error!("Detection pipeline worker panicked");
                    }
                }
                info!("Detection pipeline stopped");
            }
            Err(flume::RecvTimeoutError::Timeout) => {
                // The worker is stuck inside the detector. It will close the
                // detector itself once the call returns.
                warn!(
                    "Detection pipeline did not stop within {:?}, detaching worker",
                    self.settings.shutdown_timeout
                );
                self.worker.take();
            }
        }
    }
}

impl Drop for DetectionPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Capture timestamps must be strictly increasing for the detector.
pub(crate) fn next_timestamp(candidate: u64, last: Option<u64>) -> u64 {
    match last {
        Some(last) if candidate <= last => last + 1,
        _ => candidate,
    }
}

fn run_worker(shared: &Shared, mut detector: Box<dyn Detector>, settings: PipelineSettings) {
    let converter = FrameConverter::new();
    let mut last_ts: Option<u64> = None;
    let mut dispatched_at = Instant::now();
    let mut reported_slow: Option<u64> = None;

    while shared.running.load(Ordering::Acquire) {
        if !shared.inflight.wait_idle(settings.idle_poll) {
            // Report once per request; only the detector's answer opens the gate.
            let outstanding = shared.inflight.outstanding();
            if let Some(ts) = outstanding.filter(|_| outstanding != reported_slow) {
                if dispatched_at.elapsed() < settings.slow_request {
                    continue;
                }
                reported_slow = outstanding;
                warn!(
                    ts,
                    "Detector request unresolved after {:?}, still waiting",
                    settings.slow_request
                );
                shared.counters.slow_requests.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("handlens_slow_requests").increment(1);
            }
            continue;
        }

        let Some(frame) = shared.frames.wait_take(settings.idle_poll) else {
            continue;
        };
        if !shared.running.load(Ordering::Acquire) {
            break;
        }

        let image = match converter.convert(&frame) {
            Ok(image) => Arc::new(image),
            Err(e) => {
                warn!(ts = frame.timestamp_ms, "Dropping frame: {}", e);
                shared.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("handlens_frames_dropped").increment(1);
                continue;
            }
        };

        let ts = next_timestamp(frame.timestamp_ms, last_ts);
        last_ts = Some(ts);
        shared.preview.post_arc(image.clone());

        // Open the gate before submitting: the callback may fire before
        // `detect_async` returns.
        shared.inflight.begin(ts);
        match detector.detect_async(DetectionRequest {
            image,
            timestamp_ms: ts,
        }) {
            Ok(()) => {
                dispatched_at = Instant::now();
                shared
                    .counters
                    .requests_dispatched
                    .fetch_add(1, Ordering::Relaxed);
                let latency_ms = frame.captured_at.elapsed().as_secs_f64() * 1000.0;
                metrics::histogram!("handlens_dispatch_latency_ms").record(latency_ms);
                debug!(ts, latency_ms, "Request dispatched");
            }
            Err(e) => {
                shared.inflight.resolve(Some(ts));
                error!("Detector rejected request: {}", e);
                shared.counters.detector_errors.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("handlens_detector_errors").increment(1);
            }
        }
    }

    detector.close();
    debug!("Detector released");
}
