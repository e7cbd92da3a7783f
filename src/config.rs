use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::defaults;
use crate::error::{Result, VidscribeError};
use crate::media::SubtitleMode;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub stt: SttConfig,
    pub media: MediaConfig,
    pub subtitle: SubtitleConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub body_limit: usize,
}

/// Windowing and channel sizes for transcription runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub window_secs: f64,
    pub stride_secs: f64,
    pub sample_rate: u32,
    pub progress_capacity: usize,
    pub recognizer_event_capacity: usize,
}

/// Speech-to-text configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SttConfig {
    pub model: String,
    pub language: String,
    /// Explicit model file; overrides the cache lookup by `model` name.
    pub model_path: Option<PathBuf>,
    pub threads: Option<usize>,
    pub auto_download: bool,
}

/// Media retrieval and transcoding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MediaConfig {
    pub fetcher: FetcherKind,
    /// Directory for transient artifacts (defaults to `$TMPDIR/vidscribe`).
    pub work_dir: Option<PathBuf>,
    pub ffmpeg: String,
    pub ffprobe: String,
    pub yt_dlp: String,
}

/// How source locators are resolved to bytes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FetcherKind {
    /// Plain HTTP(S) GET of the locator
    Http,
    /// Resolve stream URLs with yt-dlp, then fetch them over HTTP
    YtDlp,
}

/// Subtitle generation and muxing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SubtitleConfig {
    pub default_duration_secs: f64,
    pub mode: SubtitleMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: defaults::BIND_ADDRESS.to_string(),
            body_limit: defaults::REQUEST_BODY_LIMIT,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_secs: defaults::WINDOW_SECS,
            stride_secs: defaults::STRIDE_SECS,
            sample_rate: defaults::SAMPLE_RATE,
            progress_capacity: defaults::PROGRESS_CAPACITY,
            recognizer_event_capacity: defaults::RECOGNIZER_EVENT_CAPACITY,
        }
    }
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model: defaults::DEFAULT_MODEL.to_string(),
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            model_path: None,
            threads: None,
            auto_download: true,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            fetcher: FetcherKind::YtDlp,
            work_dir: None,
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            yt_dlp: "yt-dlp".to_string(),
        }
    }
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            default_duration_secs: defaults::SUBTITLE_DURATION_SECS,
            mode: SubtitleMode::Soft,
        }
    }
}

impl MediaConfig {
    /// Work directory with the default applied.
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("vidscribe"))
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML or invalid values.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents).map_err(|e| VidscribeError::ConfigParse {
            message: format!("{}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VIDSCRIBE_BIND → server.bind
    /// - VIDSCRIBE_MODEL → stt.model
    /// - VIDSCRIBE_LANGUAGE → stt.language
    /// - VIDSCRIBE_WORK_DIR → media.work_dir
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(bind) = std::env::var("VIDSCRIBE_BIND")
            && !bind.is_empty()
        {
            self.server.bind = bind;
        }

        if let Ok(model) = std::env::var("VIDSCRIBE_MODEL")
            && !model.is_empty()
        {
            self.stt.model = model;
        }

        if let Ok(language) = std::env::var("VIDSCRIBE_LANGUAGE")
            && !language.is_empty()
        {
            self.stt.language = language;
        }

        if let Ok(work_dir) = std::env::var("VIDSCRIBE_WORK_DIR")
            && !work_dir.is_empty()
        {
            self.media.work_dir = Some(PathBuf::from(work_dir));
        }

        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if !(p.window_secs > 0.0) {
            return Err(invalid("pipeline.window_secs", "must be positive"));
        }
        if !(p.stride_secs >= 0.0) || 2.0 * p.stride_secs >= p.window_secs {
            return Err(invalid(
                "pipeline.stride_secs",
                "must be non-negative and less than half the window",
            ));
        }
        if p.sample_rate == 0 {
            return Err(invalid("pipeline.sample_rate", "must be positive"));
        }
        if p.progress_capacity == 0 {
            return Err(invalid("pipeline.progress_capacity", "must be at least 1"));
        }
        if p.recognizer_event_capacity == 0 {
            return Err(invalid(
                "pipeline.recognizer_event_capacity",
                "must be at least 1",
            ));
        }
        if !(self.subtitle.default_duration_secs > 0.0) {
            return Err(invalid("subtitle.default_duration_secs", "must be positive"));
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/vidscribe/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vidscribe")
            .join("config.toml")
    }
}

fn invalid(key: &str, message: &str) -> VidscribeError {
    VidscribeError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
