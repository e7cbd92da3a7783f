//! Error types for vidscribe.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VidscribeError {
    // Stage errors
    #[error("Source unavailable: {message}")]
    SourceUnavailable { message: String },

    #[error("Unsupported audio format: {message}")]
    UnsupportedAudioFormat { message: String },

    #[error("Transcode failed: {message}")]
    TranscodeFailure { message: String },

    #[error("Recognition failed: {message}")]
    RecognitionFailure { message: String },

    #[error("Resource lifecycle violation: {0}")]
    ResourceLifecycleViolation(#[from] crate::resources::LifecycleViolation),

    /// The progress consumer went away. Only stops the run, never reported to a client.
    #[error("Progress consumer disconnected")]
    TransportAbandoned,

    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    // Model errors
    #[error("Recognizer model not found at {path}")]
    ModelNotFound { path: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl VidscribeError {
    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            message: message.into(),
        }
    }

    pub fn unsupported_audio(message: impl Into<String>) -> Self {
        Self::UnsupportedAudioFormat {
            message: message.into(),
        }
    }

    pub fn transcode(message: impl Into<String>) -> Self {
        Self::TranscodeFailure {
            message: message.into(),
        }
    }

    pub fn recognition(message: impl Into<String>) -> Self {
        Self::RecognitionFailure {
            message: message.into(),
        }
    }

    /// True for the cancellation signal raised when the consumer disconnects.
    pub fn is_abandoned(&self) -> bool {
        matches!(self, Self::TransportAbandoned)
    }
}

pub type Result<T> = std::result::Result<T, VidscribeError>;
