//! Incremental merge of recognizer callbacks into a transcript.

use std::sync::Arc;

use super::decode::decode_windows;
use super::types::{DecodeStep, DecodedWindow, PendingWindow, TranscriptSnapshot};
use super::vocabulary::Vocabulary;

/// Owns the pending window list of one run.
///
/// The list starts with one open window and only ever grows. Every element
/// except the last is finalized; the last one is open until the recognizer
/// delivers the window flagged as last.
pub struct ChunkedDecodeMerger {
    windows: Vec<PendingWindow>,
    vocabulary: Arc<dyn Vocabulary>,
    time_precision: f64,
}

impl ChunkedDecodeMerger {
    pub fn new(vocabulary: Arc<dyn Vocabulary>, time_precision: f64) -> Self {
        Self {
            windows: vec![PendingWindow::default()],
            vocabulary,
            time_precision,
        }
    }

    /// Apply a window boundary and return the recomputed snapshot.
    pub fn on_window(&mut self, window: DecodedWindow) -> TranscriptSnapshot {
        if self.is_complete() {
            tracing::warn!("window callback after the last window, ignoring");
            return self.snapshot();
        }

        if let Some(last) = self.windows.last_mut() {
            last.tokens = window.tokens;
            last.stride = window.stride;
            last.finalized = true;
        }
        if !window.is_last {
            self.windows.push(PendingWindow::default());
        }
        self.snapshot()
    }

    /// Replace the open window's tokens with the latest partial decode.
    pub fn on_step(&mut self, step: DecodeStep) -> TranscriptSnapshot {
        if self.is_complete() {
            tracing::debug!("decode step after the last window, ignoring");
            return self.snapshot();
        }

        if let Some(last) = self.windows.last_mut() {
            last.tokens = step.tokens;
            if step.stride.is_some() {
                last.stride = step.stride;
            }
        }
        self.snapshot()
    }

    pub fn snapshot(&self) -> TranscriptSnapshot {
        decode_windows(&self.windows, self.vocabulary.as_ref(), self.time_precision)
    }

    pub fn windows(&self) -> &[PendingWindow] {
        &self.windows
    }

    pub fn finalized_count(&self) -> usize {
        self.windows.iter().filter(|w| w.finalized).count()
    }

    /// True once the last window of the clip has been finalized.
    pub fn is_complete(&self) -> bool {
        self.windows.last().is_some_and(|w| w.finalized)
    }
}

/// Transcription percent for `finalized` of an estimated `estimated_total` windows.
///
/// Capped at 99 so that only the completion event reports 100.
pub fn transcription_percent(finalized: usize, estimated_total: usize) -> u8 {
    if estimated_total == 0 {
        return 0;
    }
    let percent = finalized.saturating_mul(100) / estimated_total;
    percent.min(99) as u8
}

/// `ceil(samples / (window_secs * sample_rate))`.
pub fn estimated_window_count(sample_count: usize, window_secs: f64, sample_rate: u32) -> usize {
    let per_window = window_secs * f64::from(sample_rate);
    if per_window <= 0.0 {
        return 0;
    }
    (sample_count as f64 / per_window).ceil() as usize
}
