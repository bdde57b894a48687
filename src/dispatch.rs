//! Moves detector output from the detector's thread onto the consumption thread.
//!
//! [`ResultDispatcher::on_event`] runs on whatever thread the detector calls
//! back on and only posts into a single-slot mailbox. The consumption thread
//! owns the matching [`ResultReceiver`] and is the only place consumers run.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace};

use crate::detector::{DetectionResult, DetectorEvent};
use crate::pipeline::Mailbox;

/// Counts results per reporting window.
#[derive(Debug, Clone)]
pub struct FpsMeter {
    window: Duration,
    count: u32,
    window_start: Instant,
}

impl FpsMeter {
    pub fn new(window: Duration, now: Instant) -> Self {
        Self {
            window,
            count: 0,
            window_start: now,
        }
    }

    /// Records one result. Returns the rate once the window has elapsed, then
    /// starts a new window.
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        self.count += 1;
        let delta = now.saturating_duration_since(self.window_start);
        if delta <= self.window {
            return None;
        }

        let fps = f64::from(self.count) / delta.as_secs_f64();
        self.count = 0;
        self.window_start = now;
        Some(fps)
    }
}

/// Something that runs on the consumption thread for every delivered result.
pub trait ResultConsumer {
    fn consume(&mut self, result: &Arc<DetectionResult>);
}

struct Inner {
    latest: Mailbox<DetectionResult>,
    fps: Mutex<FpsMeter>,
    closed: AtomicBool,
    results: AtomicU64,
    errors: AtomicU64,
}

/// Detector-side half. Cheap to clone into the detector callback.
#[derive(Clone)]
pub struct ResultDispatcher {
    inner: Arc<Inner>,
}

impl ResultDispatcher {
    pub fn new(fps_window: Duration) -> (Self, ResultReceiver) {
        let inner = Arc::new(Inner {
            latest: Mailbox::new(),
            fps: Mutex::new(FpsMeter::new(fps_window, Instant::now())),
            closed: AtomicBool::new(false),
            results: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        });
        (
            Self {
                inner: inner.clone(),
            },
            ResultReceiver {
                inner,
                last_delivered: None,
            },
        )
    }

    /// Called from the detector's thread. Never invokes consumers directly.
    pub fn on_event(&self, event: DetectorEvent) {
        if self.inner.closed.load(Ordering::Acquire) {
            trace!("dispatcher closed, dropping detector event");
            return;
        }

        match event {
            DetectorEvent::Result(result) => {
                self.inner.latest.post(result);
                self.inner.results.fetch_add(1, Ordering::Relaxed);

                let fps = self
                    .inner
                    .fps
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .tick(Instant::now());
                if let Some(fps) = fps {
                    debug!("FPS: {:.0}", fps);
                    metrics::gauge!("handlens_results_fps").set(fps);
                }
            }
            DetectorEvent::Error(e) => {
                self.inner.errors.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("handlens_detector_errors").increment(1);
                error!("Hand landmarker error: {}", e);
            }
        }
    }

    /// Later events are dropped.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn results_received(&self) -> u64 {
        self.inner.results.load(Ordering::Relaxed)
    }

    pub fn errors_received(&self) -> u64 {
        self.inner.errors.load(Ordering::Relaxed)
    }
}

/// Consumption-side half. Owned by the one thread that renders and exports.
pub struct ResultReceiver {
    inner: Arc<Inner>,
    last_delivered: Option<u64>,
}

impl ResultReceiver {
    /// Newest undelivered result, if any.
    pub fn try_recv(&mut self) -> Option<Arc<DetectionResult>> {
        let result = self.inner.latest.take()?;
        self.accept(result)
    }

    /// Waits up to `timeout` for a newer result.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<Arc<DetectionResult>> {
        let result = self.inner.latest.wait_take(timeout)?;
        self.accept(result)
    }

    /// Delivers the newest result, if any, to every consumer in order.
    pub fn deliver(&mut self, consumers: &mut [&mut dyn ResultConsumer]) -> bool {
        let Some(result) = self.try_recv() else {
            return false;
        };
        for consumer in consumers.iter_mut() {
            consumer.consume(&result);
        }
        true
    }

    // Last result wins: anything not newer than what was already delivered is stale.
    fn accept(&mut self, result: Arc<DetectionResult>) -> Option<Arc<DetectionResult>> {
        let ts = result.timestamp_ms();
        if matches!(self.last_delivered, Some(last) if ts <= last) {
            trace!(ts, "dropping stale result");
            return None;
        }
        self.last_delivered = Some(ts);
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::InputDescriptor;
    use crate::error::DetectorError;
    use std::thread;

    fn result(ts: u64) -> DetectionResult {
        DetectionResult {
            hands: Vec::new(),
            input: InputDescriptor {
                width: 640,
                height: 480,
                timestamp_ms: ts,
            },
        }
    }

    struct Recorder(Vec<u64>);

    impl ResultConsumer for Recorder {
        fn consume(&mut self, result: &Arc<DetectionResult>) {
            self.0.push(result.timestamp_ms());
        }
    }

    #[test]
    fn fps_meter_reports_after_window() {
        let start = Instant::now();
        let mut meter = FpsMeter::new(Duration::from_secs(1), start);
        for i in 1..30 {
            assert_eq!(meter.tick(start + Duration::from_millis(i * 30)), None);
        }
        let fps = meter.tick(start + Duration::from_millis(1_200)).unwrap();
        assert!((fps - 25.0).abs() < 1e-9);
        // New window starts empty.
        assert_eq!(meter.tick(start + Duration::from_millis(1_300)), None);
    }

    #[test]
    fn newer_result_supersedes_undelivered_one() {
        let (dispatcher, mut receiver) = ResultDispatcher::new(Duration::from_secs(1));
        dispatcher.on_event(DetectorEvent::Result(result(1)));
        dispatcher.on_event(DetectorEvent::Result(result(2)));

        assert_eq!(receiver.try_recv().map(|r| r.timestamp_ms()), Some(2));
        assert!(receiver.try_recv().is_none());
        assert_eq!(dispatcher.results_received(), 2);
    }

    #[test]
    fn stale_results_are_dropped() {
        let (dispatcher, mut receiver) = ResultDispatcher::new(Duration::from_secs(1));
        dispatcher.on_event(DetectorEvent::Result(result(5)));
        assert!(receiver.try_recv().is_some());

        dispatcher.on_event(DetectorEvent::Result(result(4)));
        assert!(receiver.try_recv().is_none());
        dispatcher.on_event(DetectorEvent::Result(result(5)));
        assert!(receiver.try_recv().is_none());
        dispatcher.on_event(DetectorEvent::Result(result(6)));
        assert!(receiver.try_recv().is_some());
    }

    #[test]
    fn errors_are_counted_not_delivered() {
        let (dispatcher, mut receiver) = ResultDispatcher::new(Duration::from_secs(1));
        dispatcher.on_event(DetectorEvent::Error(DetectorError::new("boom")));
        assert_eq!(dispatcher.errors_received(), 1);
        assert!(receiver.try_recv().is_none());
    }

    #[test]
    fn closed_dispatcher_ignores_events() {
        let (dispatcher, mut receiver) = ResultDispatcher::new(Duration::from_secs(1));
        dispatcher.close();
        dispatcher.on_event(DetectorEvent::Result(result(1)));
        assert!(receiver.try_recv().is_none());
    }

    #[test]
    fn consumers_run_on_the_receiving_thread() {
        let (dispatcher, mut receiver) = ResultDispatcher::new(Duration::from_secs(1));
        let consumer_thread = thread::current().id();

        let producer = thread::spawn(move || {
            dispatcher.on_event(DetectorEvent::Result(result(9)));
        });
        producer.join().unwrap();

        struct ThreadCheck(thread::ThreadId, bool);
        impl ResultConsumer for ThreadCheck {
            fn consume(&mut self, _: &Arc<DetectionResult>) {
                self.1 = thread::current().id() == self.0;
            }
        }

        let mut check = ThreadCheck(consumer_thread, false);
        let mut recorder = Recorder(Vec::new());
        assert!(receiver.deliver(&mut [&mut check, &mut recorder]));
        assert!(check.1);
        assert_eq!(recorder.0, vec![9]);
        assert!(!receiver.deliver(&mut [&mut recorder]));
    }
}
