//! Host-facing landmark export.
//!
//! Every result becomes an ordered list of per-hand records, the only payload
//! format hosts need to parse, and is emitted as the `onLandmarks` method on a
//! per-view channel.

use std::io::Write;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::detector::DetectionResult;
use crate::dispatch::ResultConsumer;
use crate::error::Result;

pub const UNKNOWN_HANDEDNESS: &str = "Unknown";
pub const METHOD_ON_LANDMARKS: &str = "onLandmarks";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkRecord {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandRecord {
    pub landmarks: Vec<LandmarkRecord>,
    pub handedness: String,
}

/// Channel name for the view with the given id.
pub fn channel_name(view_id: i64) -> String {
    format!("hand_landmarker_channel_{view_id}")
}

/// Flattens a result into per-hand records, in detector order.
pub fn to_records(result: &DetectionResult) -> Vec<HandRecord> {
    result
        .hands
        .iter()
        .map(|hand| HandRecord {
            landmarks: hand
                .landmarks
                .iter()
                .map(|lm| LandmarkRecord {
                    x: lm.x,
                    y: lm.y,
                    z: lm.z,
                })
                .collect(),
            handedness: hand
                .handedness_label()
                .unwrap_or(UNKNOWN_HANDEDNESS)
                .to_owned(),
        })
        .collect()
}

/// The cross-boundary transport. Implemented by whatever embeds the core.
pub trait ExportSink: Send {
    fn invoke(&mut self, channel: &str, method: &str, args: &[HandRecord]) -> Result<()>;
}

#[derive(Serialize)]
struct Envelope<'a> {
    channel: &'a str,
    method: &'a str,
    args: &'a [HandRecord],
}

/// Writes one JSON object per call, newline terminated.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ExportSink for JsonLinesSink<W> {
    fn invoke(&mut self, channel: &str, method: &str, args: &[HandRecord]) -> Result<()> {
        let envelope = Envelope {
            channel,
            method,
            args,
        };
        serde_json::to_writer(&mut self.writer, &envelope).map_err(std::io::Error::from)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Serializes every delivered result and hands it to an [`ExportSink`].
pub struct ExportAdapter {
    channel: String,
    sink: Box<dyn ExportSink>,
}

impl ExportAdapter {
    pub fn new(view_id: i64, sink: Box<dyn ExportSink>) -> Self {
        Self {
            channel: channel_name(view_id),
            sink,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn export(&mut self, result: &DetectionResult) -> Result<()> {
        let records = to_records(result);
        self.sink.invoke(&self.channel, METHOD_ON_LANDMARKS, &records)
    }
}

impl ResultConsumer for ExportAdapter {
    fn consume(&mut self, result: &Arc<DetectionResult>) {
        if let Err(e) = self.export(result) {
            warn!(ts = result.timestamp_ms(), "Failed to export landmarks: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{Category, Hand, InputDescriptor, Landmark};
    use std::sync::Mutex;

    fn result(hands: Vec<Hand>) -> DetectionResult {
        DetectionResult {
            hands,
            input: InputDescriptor {
                width: 640,
                height: 480,
                timestamp_ms: 3,
            },
        }
    }

    #[test]
    fn missing_handedness_is_unknown() {
        let records = to_records(&result(vec![Hand {
            landmarks: vec![Landmark::new(0.1, 0.2, 0.3)],
            handedness: Vec::new(),
        }]));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].handedness, "Unknown");
        assert_eq!(
            records[0].landmarks,
            vec![LandmarkRecord {
                x: 0.1,
                y: 0.2,
                z: 0.3
            }]
        );
    }

    #[test]
    fn hands_keep_detector_order_and_labels() {
        let hand = |label: &str| Hand {
            landmarks: vec![Landmark::default(); 21],
            handedness: vec![Category {
                category_name: label.into(),
                score: 0.7,
            }],
        };
        let records = to_records(&result(vec![hand("Right"), hand("Left")]));
        assert_eq!(
            records.iter().map(|r| r.handedness.as_str()).collect::<Vec<_>>(),
            vec!["Right", "Left"]
        );
        assert!(records.iter().all(|r| r.landmarks.len() == 21));
    }

    #[test]
    fn zero_hands_export_an_empty_list() {
        assert!(to_records(&result(vec![])).is_empty());

        let mut adapter = ExportAdapter::new(7, Box::new(JsonLinesSink::new(Vec::new())));
        adapter.export(&result(vec![])).unwrap();
    }

    #[test]
    fn json_lines_envelope() {
        let mut sink = JsonLinesSink::new(Vec::new());
        let records = vec![HandRecord {
            landmarks: vec![LandmarkRecord {
                x: 0.5,
                y: 0.25,
                z: 0.0,
            }],
            handedness: "Left".into(),
        }];
        sink.invoke(&channel_name(2), METHOD_ON_LANDMARKS, &records)
            .unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert!(text.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(value["channel"], "hand_landmarker_channel_2");
        assert_eq!(value["method"], "onLandmarks");
        assert_eq!(value["args"][0]["handedness"], "Left");
        assert_eq!(value["args"][0]["landmarks"][0]["y"], 0.25);
    }

    struct Capture(Arc<Mutex<Vec<(String, usize)>>>);

    impl ExportSink for Capture {
        fn invoke(&mut self, channel: &str, _method: &str, args: &[HandRecord]) -> Result<()> {
            self.0.lock().unwrap().push((channel.to_owned(), args.len()));
            Ok(())
        }
    }

    #[test]
    fn adapter_consumes_results() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut adapter = ExportAdapter::new(4, Box::new(Capture(calls.clone())));
        adapter.consume(&Arc::new(result(vec![Hand::default()])));

        assert_eq!(
            *calls.lock().unwrap(),
            vec![("hand_landmarker_channel_4".to_owned(), 1)]
        );
    }
}
