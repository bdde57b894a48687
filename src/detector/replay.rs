//! Detector that answers with recorded hands instead of running a model.

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use flume::Sender;
use tracing::{debug, info, warn};

use super::{
    DetectionRequest, DetectionResult, Detector, DetectorCallback, DetectorEvent, DetectorFactory,
    DetectorOptions, Hand, InputDescriptor,
};
use crate::error::{DetectorError, Error, Result};
use crate::utils::spawn_thread;

/// Creates [`ReplayDetector`]s that cycle through a fixed list of results.
#[derive(Debug, Clone, Default)]
pub struct ReplayDetectorFactory {
    frames: Arc<Vec<Vec<Hand>>>,
    latency: Duration,
}

impl ReplayDetectorFactory {
    /// Each entry of `frames` is the hand list for one result, replayed in order.
    pub fn new(frames: Vec<Vec<Hand>>) -> Self {
        Self {
            frames: Arc::new(frames),
            latency: Duration::ZERO,
        }
    }

    /// Loads a JSON array of results, each an array of hands.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let frames: Vec<Vec<Hand>> = serde_json::from_str(&text).map_err(|e| {
            Error::Initialization(format!("invalid replay file {}: {e}", path.display()))
        })?;
        info!("Loaded {} recorded results from {}", frames.len(), path.display());
        Ok(Self::new(frames))
    }

    /// Simulated inference time per request.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

impl DetectorFactory for ReplayDetectorFactory {
    fn create(
        &self,
        options: &DetectorOptions,
        callback: DetectorCallback,
    ) -> Result<Box<dyn Detector>> {
        let frames = self.frames.clone();
        let latency = self.latency;
        let max_hands = options.num_hands as usize;
        let (tx, rx) = flume::unbounded::<InputDescriptor>();

        let handle = spawn_thread("replay-detector", move || {
            let mut cursor = 0usize;
            for input in rx.iter() {
                if !latency.is_zero() {
                    std::thread::sleep(latency);
                }
                let hands = if frames.is_empty() {
                    Vec::new()
                } else {
                    let hands = frames[cursor % frames.len()].iter().take(max_hands).cloned();
                    cursor += 1;
                    hands.collect()
                };
                callback(DetectorEvent::Result(DetectionResult { hands, input }));
            }
            debug!("replay detector thread exiting");
        })?;

        Ok(Box::new(ReplayDetector {
            sender: Some(tx),
            handle: Some(handle),
        }))
    }
}

/// Answers every request on its own thread, in submission order.
pub struct ReplayDetector {
    sender: Option<Sender<InputDescriptor>>,
    handle: Option<JoinHandle<()>>,
}

impl Detector for ReplayDetector {
    fn detect_async(&mut self, request: DetectionRequest) -> Result<(), DetectorError> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| DetectorError::at(request.timestamp_ms, "detector closed"))?;

        sender
            .send(InputDescriptor {
                width: request.image.width(),
                height: request.image.height(),
                timestamp_ms: request.timestamp_ms,
            })
            .map_err(|_| DetectorError::at(request.timestamp_ms, "detector thread gone"))
    }

    fn close(&mut self) {
        drop(self.sender.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("replay detector thread panicked");
            }
        }
    }
}

impl Drop for ReplayDetector {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{Category, Landmark};
    use image::RgbaImage;
    use std::io::Write;
    use std::sync::Mutex;

    fn hand(label: &str) -> Hand {
        Hand {
            landmarks: vec![Landmark::new(0.5, 0.5, 0.0); 21],
            handedness: vec![Category {
                category_name: label.into(),
                score: 0.9,
            }],
        }
    }

    fn request(ts: u64) -> DetectionRequest {
        DetectionRequest {
            image: Arc::new(RgbaImage::new(4, 3)),
            timestamp_ms: ts,
        }
    }

    #[test]
    fn replays_in_order_and_respects_num_hands() {
        let factory = ReplayDetectorFactory::new(vec![
            vec![hand("Left"), hand("Right"), hand("Left")],
            vec![],
        ]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: DetectorCallback = Arc::new(move |event| {
            if let DetectorEvent::Result(result) = event {
                sink.lock().unwrap().push(result);
            }
        });

        let mut detector = factory.create(&DetectorOptions::default(), callback).unwrap();
        for ts in 1..=3 {
            detector.detect_async(request(ts)).unwrap();
        }
        detector.close();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].hands.len(), 2);
        assert!(seen[1].hands.is_empty());
        assert_eq!(seen[2].hands.len(), 2);
        assert_eq!(
            seen.iter().map(|r| r.timestamp_ms()).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!((seen[0].input.width, seen[0].input.height), (4, 3));
    }

    #[test]
    fn closed_detector_rejects_requests() {
        let mut detector = ReplayDetectorFactory::default()
            .create(&DetectorOptions::default(), Arc::new(|_| {}))
            .unwrap();
        detector.close();
        let err = detector.detect_async(request(7)).unwrap_err();
        assert_eq!(err.timestamp_ms, Some(7));
    }

    #[test]
    fn loads_recorded_hands_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[[{{"landmarks":[{{"x":0.1,"y":0.2,"z":0.0}}],"handedness":[{{"category_name":"Right","score":0.8}}]}}],[]]"#
        )
        .unwrap();

        let factory = ReplayDetectorFactory::from_path(file.path()).unwrap();
        assert_eq!(factory.frames.len(), 2);
        assert_eq!(factory.frames[0][0].handedness_label(), Some("Right"));
    }

    #[test]
    fn malformed_replay_file_is_an_initialization_failure() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            ReplayDetectorFactory::from_path(file.path()),
            Err(Error::Initialization(_))
        ));
    }
}
