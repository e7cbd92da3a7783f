use std::ops::ControlFlow;
use std::sync::Arc;

use crate::defaults;
use crate::error::{Result, VidscribeError};
use crate::transcript::{DecodeStep, DecodedWindow, TableVocabulary, Vocabulary, WindowStride};

/// Receives decode progress from a recognizer.
///
/// Returning `ControlFlow::Break` asks the recognizer to stop; it then returns
/// `Ok(())` without delivering further windows.
pub trait RecognitionSink: Send {
    fn on_step(&mut self, step: DecodeStep) -> ControlFlow<()>;

    fn on_window(&mut self, window: DecodedWindow) -> ControlFlow<()>;
}

/// Parameters for one recognition pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizeOptions {
    pub window_secs: f64,
    pub stride_secs: f64,
    pub sample_rate: u32,
    pub language: String,
}

impl Default for RecognizeOptions {
    fn default() -> Self {
        Self {
            window_secs: defaults::WINDOW_SECS,
            stride_secs: defaults::STRIDE_SECS,
            sample_rate: defaults::SAMPLE_RATE,
            language: defaults::DEFAULT_LANGUAGE.to_string(),
        }
    }
}

/// Windowed speech recognizer.
///
/// This trait allows swapping implementations (real Whisper vs scripted).
/// `recognize` blocks; callers run it on a blocking thread.
pub trait Recognizer: Send + Sync {
    fn name(&self) -> &str;

    /// Vocabulary for the token ids this recognizer emits.
    fn vocabulary(&self) -> Arc<dyn Vocabulary>;

    /// Seconds per timestamp token.
    fn time_precision(&self) -> f64 {
        defaults::TIME_PRECISION
    }

    fn recognize(
        &self,
        samples: &[f32],
        options: &RecognizeOptions,
        sink: &mut dyn RecognitionSink,
    ) -> Result<()>;
}

impl<T: Recognizer + ?Sized> Recognizer for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn vocabulary(&self) -> Arc<dyn Vocabulary> {
        (**self).vocabulary()
    }

    fn time_precision(&self) -> f64 {
        (**self).time_precision()
    }

    fn recognize(
        &self,
        samples: &[f32],
        options: &RecognizeOptions,
        sink: &mut dyn RecognitionSink,
    ) -> Result<()> {
        (**self).recognize(samples, options, sink)
    }
}

/// One window of the input, in samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSpan {
    pub start: usize,
    pub end: usize,
    pub stride: WindowStride,
    pub is_last: bool,
}

/// Split `sample_count` samples into overlapping windows.
///
/// Windows advance by `window - 2 * stride`. The first window has no left
/// margin and the last has no right margin.
pub fn plan_windows(
    sample_count: usize,
    sample_rate: u32,
    window_secs: f64,
    stride_secs: f64,
) -> Vec<WindowSpan> {
    let rate = f64::from(sample_rate);
    let window = (window_secs * rate).round().max(1.0) as usize;
    let stride = (stride_secs * rate).round().max(0.0) as usize;
    let jump = window.saturating_sub(2 * stride).max(1);

    let mut spans = Vec::new();
    let mut start = 0;
    while start < sample_count {
        let end = (start + window).min(sample_count);
        let is_first = start == 0;
        let is_last = start + jump >= sample_count;
        spans.push(WindowSpan {
            start,
            end,
            stride: WindowStride {
                chunk_len: (end - start) as f64 / rate,
                left: if is_first { 0.0 } else { stride as f64 / rate },
                right: if is_last { 0.0 } else { stride as f64 / rate },
            },
            is_last,
        });
        start += jump;
    }
    spans
}

/// Timestamp token id used by the scripted recognizer (Whisper's `<|0.00|>`).
pub const SCRIPTED_TIMESTAMP_BEGIN: u32 = 50364;

/// Scripted output for one window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptedWindow {
    /// Partial decodes delivered before the window is final.
    pub steps: Vec<Vec<u32>>,
    pub tokens: Vec<u32>,
}

/// Recognizer that replays a fixed script, for tests and dry runs.
///
/// Windows beyond the script are delivered empty, so any input length
/// produces the planned number of windows.
#[derive(Debug, Clone)]
pub struct ScriptedRecognizer {
    name: String,
    vocabulary: Arc<TableVocabulary>,
    windows: Vec<ScriptedWindow>,
    fail_at_window: Option<usize>,
}

impl ScriptedRecognizer {
    pub fn new(vocabulary: TableVocabulary, windows: Vec<ScriptedWindow>) -> Self {
        Self {
            name: "scripted".to_string(),
            vocabulary: Arc::new(vocabulary),
            windows,
            fail_at_window: None,
        }
    }

    /// One phrase per window, each spanning the first second of its window.
    ///
    /// Every word becomes one token; steps reveal the phrase word by word.
    pub fn with_phrases(phrases: &[&str]) -> Self {
        let ts = SCRIPTED_TIMESTAMP_BEGIN;
        let vocabulary = TableVocabulary::new(ts);
        let mut next_id = 1;
        let windows = phrases
            .iter()
            .map(|phrase| {
                let words: Vec<u32> = phrase
                    .split_whitespace()
                    .map(|word| {
                        let id = next_id;
                        next_id += 1;
                        vocabulary.insert(id, format!(" {}", word));
                        id
                    })
                    .collect();
                let steps: Vec<Vec<u32>> = (1..=words.len())
                    .map(|n| {
                        let mut step = vec![ts];
                        step.extend_from_slice(&words[..n]);
                        step
                    })
                    .collect();
                let mut tokens = vec![ts];
                tokens.extend_from_slice(&words);
                tokens.push(ts + 50);
                ScriptedWindow { steps, tokens }
            })
            .collect();
        Self::new(vocabulary, windows)
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Fail with `RecognitionFailure` when window `index` is reached.
    pub fn with_failure_at(mut self, index: usize) -> Self {
        self.fail_at_window = Some(index);
        self
    }
}

impl Recognizer for ScriptedRecognizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn vocabulary(&self) -> Arc<dyn Vocabulary> {
        self.vocabulary.clone()
    }

    fn recognize(
        &self,
        samples: &[f32],
        options: &RecognizeOptions,
        sink: &mut dyn RecognitionSink,
    ) -> Result<()> {
        let spans = plan_windows(
            samples.len(),
            options.sample_rate,
            options.window_secs,
            options.stride_secs,
        );

        for (index, span) in spans.iter().enumerate() {
            if self.fail_at_window == Some(index) {
                return Err(VidscribeError::recognition(format!(
                    "scripted failure at window {}",
                    index
                )));
            }

            let script = self.windows.get(index).cloned().unwrap_or_default();
            for tokens in script.steps {
                let step = DecodeStep {
                    tokens,
                    stride: Some(span.stride),
                };
                if sink.on_step(step).is_break() {
                    return Ok(());
                }
            }

            let window = DecodedWindow {
                tokens: script.tokens,
                stride: Some(span.stride),
                is_last: span.is_last,
            };
            if sink.on_window(window).is_break() {
                return Ok(());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collect {
        steps: Vec<DecodeStep>,
        windows: Vec<DecodedWindow>,
        stop_after_windows: Option<usize>,
    }

    impl RecognitionSink for Collect {
        fn on_step(&mut self, step: DecodeStep) -> ControlFlow<()> {
            self.steps.push(step);
            ControlFlow::Continue(())
        }

        fn on_window(&mut self, window: DecodedWindow) -> ControlFlow<()> {
            self.windows.push(window);
            match self.stop_after_windows {
                Some(n) if self.windows.len() >= n => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            }
        }
    }

    #[test]
    fn thirty_five_seconds_make_two_windows() {
        let spans = plan_windows(35 * 16000, 16000, 30.0, 5.0);
        assert_eq!(spans.len(), 2);

        assert_eq!(spans[0].start, 0);
        assert_eq!(spans[0].end, 30 * 16000);
        assert!(!spans[0].is_last);
        assert_eq!(spans[0].stride.left, 0.0);
        assert_eq!(spans[0].stride.right, 5.0);

        assert_eq!(spans[1].start, 20 * 16000);
        assert_eq!(spans[1].end, 35 * 16000);
        assert!(spans[1].is_last);
        assert_eq!(spans[1].stride.chunk_len, 15.0);
        assert_eq!(spans[1].stride.left, 5.0);
        assert_eq!(spans[1].stride.right, 0.0);
    }

    #[test]
    fn short_clip_is_one_window_without_margins() {
        let spans = plan_windows(16000, 16000, 30.0, 5.0);
        assert_eq!(spans.len(), 1);
        assert!(spans[0].is_last);
        assert_eq!(spans[0].stride.left, 0.0);
        assert_eq!(spans[0].stride.right, 0.0);
        assert_eq!(spans[0].stride.chunk_len, 1.0);
    }

    #[test]
    fn no_samples_no_windows() {
        assert!(plan_windows(0, 16000, 30.0, 5.0).is_empty());
    }

    #[test]
    fn exactly_one_window_worth() {
        let spans = plan_windows(30 * 16000, 16000, 30.0, 5.0);
        assert_eq!(spans.len(), 2);
        assert!(spans[1].is_last);
    }

    #[test]
    fn scripted_replays_steps_then_window() {
        let recognizer = ScriptedRecognizer::with_phrases(&["hello world", "again"]);
        let mut sink = Collect::default();
        let samples = vec![0.0; 35 * 16000];
        recognizer
            .recognize(&samples, &RecognizeOptions::default(), &mut sink)
            .unwrap();

        assert_eq!(sink.steps.len(), 3);
        assert_eq!(sink.windows.len(), 2);
        assert!(!sink.windows[0].is_last);
        assert!(sink.windows[1].is_last);
        let vocab = recognizer.vocabulary();
        assert_eq!(vocab.decode(&sink.windows[0].tokens[1..3]), " hello world");
    }

    #[test]
    fn scripted_pads_missing_windows_with_silence() {
        let recognizer = ScriptedRecognizer::with_phrases(&["only"]);
        let mut sink = Collect::default();
        let samples = vec![0.0; 50 * 16000];
        recognizer
            .recognize(&samples, &RecognizeOptions::default(), &mut sink)
            .unwrap();
        assert_eq!(sink.windows.len(), 3);
        assert!(sink.windows[2].tokens.is_empty());
    }

    #[test]
    fn scripted_stops_when_sink_breaks() {
        let recognizer = ScriptedRecognizer::with_phrases(&["a", "b", "c"]);
        let mut sink = Collect {
            stop_after_windows: Some(1),
            ..Default::default()
        };
        let samples = vec![0.0; 50 * 16000];
        recognizer
            .recognize(&samples, &RecognizeOptions::default(), &mut sink)
            .unwrap();
        assert_eq!(sink.windows.len(), 1);
    }

    #[test]
    fn scripted_failure() {
        let recognizer = ScriptedRecognizer::with_phrases(&["a"]).with_failure_at(0);
        let mut sink = Collect::default();
        let err = recognizer
            .recognize(&[0.0; 100], &RecognizeOptions::default(), &mut sink)
            .unwrap_err();
        assert!(matches!(err, VidscribeError::RecognitionFailure { .. }));
    }

    #[test]
    fn recognizer_trait_is_object_safe() {
        let recognizer: Arc<dyn Recognizer> =
            Arc::new(ScriptedRecognizer::with_phrases(&["x"]).with_name("boxed"));
        assert_eq!(recognizer.name(), "boxed");
        assert_eq!(recognizer.time_precision(), defaults::TIME_PRECISION);
    }
}
