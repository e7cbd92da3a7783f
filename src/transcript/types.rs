//! Transcript data shared by the merger, the progress channel and the subtitle generator.

use serde::{Deserialize, Serialize};

/// One aligned piece of the transcript.
///
/// `start`/`end` are `None` only when the recognizer produced no timestamp for
/// that side of the segment. An open end is left open here; consumers that need
/// a concrete end time synthesize one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub text: String,
}

impl TranscriptSegment {
    pub fn new(start: Option<f64>, end: Option<f64>, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// Full text plus segments, recomputed from the pending windows after every
/// recognizer callback.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TranscriptSnapshot {
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
}

impl TranscriptSnapshot {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.text.is_empty()
    }
}

/// Transcript as accepted from callers: a bare segment list or a whole snapshot.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TranscriptInput {
    Segments(Vec<TranscriptSegment>),
    Snapshot(TranscriptSnapshot),
}

impl TranscriptInput {
    pub fn into_segments(self) -> Vec<TranscriptSegment> {
        match self {
            TranscriptInput::Segments(segments) => segments,
            TranscriptInput::Snapshot(snapshot) => snapshot.segments,
        }
    }
}

/// Timing hint attached to a recognition window, in seconds.
///
/// `left` and `right` are the overlap margins that belong to the neighbouring
/// windows; they are zero at the start and end of the clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStride {
    pub chunk_len: f64,
    pub left: f64,
    pub right: f64,
}

/// One element of the in-flight decode buffer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PendingWindow {
    pub tokens: Vec<u32>,
    pub finalized: bool,
    pub stride: Option<WindowStride>,
}

/// Final token set of a window, delivered by the recognizer at a window boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedWindow {
    pub tokens: Vec<u32>,
    pub stride: Option<WindowStride>,
    pub is_last: bool,
}

/// Current best guess for the open window. Each step replaces the previous one.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeStep {
    pub tokens: Vec<u32>,
    pub stride: Option<WindowStride>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_serializes_null_timestamps() {
        let segment = TranscriptSegment::new(Some(2.0), None, "world");
        let json = serde_json::to_string(&segment).unwrap();
        assert_eq!(json, r#"{"start":2.0,"end":null,"text":"world"}"#);
    }

    #[test]
    fn segment_deserializes_missing_timestamps_as_none() {
        let segment: TranscriptSegment = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert_eq!(segment, TranscriptSegment::new(None, None, "hi"));
    }

    #[test]
    fn default_snapshot_is_empty() {
        assert!(TranscriptSnapshot::default().is_empty());
    }
}
