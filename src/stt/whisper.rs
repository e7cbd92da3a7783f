//! Whisper-based windowed recognition.
//!
//! This module provides a Whisper implementation of the [`Recognizer`] trait
//! using whisper-rs. Each planned window is decoded with one `full` pass; the
//! resulting segments are reported as cumulative decode steps, then the window
//! is delivered with its timestamp tokens.
//!
//! # Feature Gate
//!
//! Real inference requires the `whisper` feature and cmake:
//!
//! ```bash
//! cargo build --features whisper
//! ```

use std::path::PathBuf;
#[cfg(feature = "whisper")]
use std::sync::Arc;

use crate::defaults;
use crate::error::{Result, VidscribeError};
use crate::stt::recognizer::{RecognizeOptions, RecognitionSink, Recognizer};
#[cfg(feature = "whisper")]
use crate::stt::recognizer::plan_windows;
#[cfg(feature = "whisper")]
use crate::transcript::{DecodeStep, DecodedWindow, TableVocabulary, Vocabulary};

#[cfg(feature = "whisper")]
use std::sync::{Mutex, Once};
#[cfg(feature = "whisper")]
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Configuration for the Whisper recognizer.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Path to the ggml model file
    pub model_path: PathBuf,
    /// Language code ("en", "es", ...) or "auto"
    pub language: String,
    /// Number of inference threads (None = whisper.cpp default)
    pub threads: Option<usize>,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/ggml-base.bin"),
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            threads: None,
        }
    }
}

fn model_name_from_path(path: &std::path::Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

/// Whisper recognizer. The context is shared behind a mutex; each call gets
/// its own decoding state.
#[cfg(feature = "whisper")]
pub struct WhisperRecognizer {
    context: Mutex<WhisperContext>,
    vocabulary: Arc<TableVocabulary>,
    config: WhisperConfig,
    model_name: String,
}

#[cfg(feature = "whisper")]
impl std::fmt::Debug for WhisperRecognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperRecognizer")
            .field("config", &self.config)
            .field("model_name", &self.model_name)
            .field("context", &"<WhisperContext>")
            .finish()
    }
}

/// Whisper recognizer placeholder (without the whisper feature).
///
/// Loading checks the model path; recognition always fails.
#[cfg(not(feature = "whisper"))]
#[derive(Debug)]
pub struct WhisperRecognizer {
    config: WhisperConfig,
    model_name: String,
    vocabulary: std::sync::Arc<crate::transcript::TableVocabulary>,
}

#[cfg(feature = "whisper")]
impl WhisperRecognizer {
    /// Load a model.
    ///
    /// # Errors
    /// `ModelNotFound` if the file is missing, `RecognitionFailure` if whisper.cpp
    /// rejects it.
    pub fn new(config: WhisperConfig) -> Result<Self> {
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        if !config.model_path.exists() {
            return Err(VidscribeError::ModelNotFound {
                path: config.model_path.to_string_lossy().to_string(),
            });
        }

        let model_name = model_name_from_path(&config.model_path);

        let mut context_params = WhisperContextParameters::default();
        context_params.flash_attn(true);
        let context = WhisperContext::new_with_params(
            config
                .model_path
                .to_str()
                .ok_or_else(|| VidscribeError::recognition("Invalid UTF-8 in model path"))?,
            context_params,
        )
        .map_err(|e| VidscribeError::recognition(format!("Failed to load Whisper model: {}", e)))?;

        let timestamp_begin = u32::try_from(context.token_beg())
            .map_err(|_| VidscribeError::recognition("model reports a negative timestamp token"))?;
        let vocabulary = Arc::new(TableVocabulary::new(timestamp_begin));

        Ok(Self {
            context: Mutex::new(context),
            vocabulary,
            config,
            model_name,
        })
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }

    fn params<'a>(&'a self, options: &'a RecognizeOptions) -> FullParams<'a, 'a> {
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

        let language = if options.language.is_empty() {
            self.config.language.as_str()
        } else {
            options.language.as_str()
        };
        if language == defaults::AUTO_LANGUAGE {
            params.set_language(None);
        } else {
            params.set_language(Some(language));
        }

        if let Some(threads) = self.config.threads {
            params.set_n_threads(threads as i32);
        }

        // each window is decoded independently; overlap is resolved by the merger
        params.set_no_context(true);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params
    }
}

#[cfg(not(feature = "whisper"))]
impl WhisperRecognizer {
    /// Create a placeholder (stub implementation).
    pub fn new(config: WhisperConfig) -> Result<Self> {
        if !config.model_path.exists() {
            return Err(VidscribeError::ModelNotFound {
                path: config.model_path.to_string_lossy().to_string(),
            });
        }

        let model_name = model_name_from_path(&config.model_path);
        Ok(Self {
            config,
            model_name,
            vocabulary: std::sync::Arc::new(crate::transcript::TableVocabulary::new(
                u32::MAX,
            )),
        })
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }
}

/// Timestamp token for a whisper.cpp centisecond offset.
#[cfg(feature = "whisper")]
fn timestamp_token(timestamp_begin: u32, centiseconds: i64) -> u32 {
    let positions = (centiseconds.max(0) as f64 / (defaults::TIME_PRECISION * 100.0)).round();
    timestamp_begin + positions as u32
}

#[cfg(feature = "whisper")]
impl Recognizer for WhisperRecognizer {
    fn name(&self) -> &str {
        &self.model_name
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
        let context = self
            .context
            .lock()
            .map_err(|e| VidscribeError::recognition(format!("Failed to acquire context lock: {}", e)))?;
        let mut state = context
            .create_state()
            .map_err(|e| VidscribeError::recognition(format!("Failed to create Whisper state: {}", e)))?;

        let timestamp_begin = self.vocabulary.timestamp_begin();
        let end_of_text = context.token_eot();

        let spans = plan_windows(
            samples.len(),
            options.sample_rate,
            options.window_secs,
            options.stride_secs,
        );

        for (index, span) in spans.iter().enumerate() {
            state
                .full(self.params(options), &samples[span.start..span.end])
                .map_err(|e| {
                    VidscribeError::recognition(format!(
                        "Whisper inference failed on window {}: {}",
                        index, e
                    ))
                })?;

            let mut tokens = Vec::new();
            for segment in state.as_iter() {
                tokens.push(timestamp_token(timestamp_begin, segment.start_timestamp()));
                for i in 0..segment.n_tokens() {
                    let Some(token) = segment.get_token(i) else {
                        continue;
                    };
                    let id = token.token_id();
                    if id >= end_of_text || id < 0 {
                        continue;
                    }
                    let id = id as u32;
                    if !self.vocabulary.contains(id) {
                        let piece = token.to_bytes().map_err(|e| {
                            VidscribeError::recognition(format!("Failed to read token {}: {}", id, e))
                        })?;
                        self.vocabulary.insert(id, piece);
                    }
                    tokens.push(id);
                }
                tokens.push(timestamp_token(timestamp_begin, segment.end_timestamp()));

                let step = DecodeStep {
                    tokens: tokens.clone(),
                    stride: Some(span.stride),
                };
                if sink.on_step(step).is_break() {
                    return Ok(());
                }
            }

            tracing::debug!(
                window = index,
                tokens = tokens.len(),
                is_last = span.is_last,
                "whisper window decoded"
            );
            let window = DecodedWindow {
                tokens,
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

#[cfg(not(feature = "whisper"))]
impl Recognizer for WhisperRecognizer {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn vocabulary(&self) -> std::sync::Arc<dyn crate::transcript::Vocabulary> {
        self.vocabulary.clone()
    }

    fn recognize(
        &self,
        _samples: &[f32],
        _options: &RecognizeOptions,
        _sink: &mut dyn RecognitionSink,
    ) -> Result<()> {
        Err(VidscribeError::recognition(concat!(
            "Whisper feature not enabled. This binary was built without speech recognition.\n",
            "To fix: cargo build --release --features whisper\n",
            "If build fails with cmake errors, install: sudo apt install cmake"
        )))
    }
}
