//! vidscribe - Transcribe remote videos with live progress
//!
//! Fetches a video's audio, converts and normalizes it, runs a windowed
//! speech recognizer and streams progress to the caller. Finished transcripts
//! can be muxed back into the video as soft or burned-in subtitles.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod media;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod resources;
pub mod server;
pub mod stt;
pub mod subtitle;
pub mod transcript;

// Adapter seams (fetch → transcode → recognize)
pub use media::{MediaFetcher, SourceLocator, Transcoder};
pub use stt::{Recognizer, RecognizerHandle};

// Pipelines
pub use pipeline::{TranscriptionPipeline, VideoAssembler};
pub use progress::{ProgressEvent, ProgressStream, Stage, Status};

// Error handling
pub use error::{Result, VidscribeError};

// Config
pub use config::Config;

pub use transcript::{TranscriptSegment, TranscriptSnapshot};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_has_short_hash_when_built_from_git() {
        let ver = version_string();
        match option_env!("GIT_HASH").filter(|h| !h.is_empty()) {
            Some(_) => {
                let hash_part = ver.split('+').nth(1).unwrap_or("");
                assert_eq!(hash_part.len(), 7, "unexpected hash in {}", ver);
            }
            None => assert_eq!(ver, env!("CARGO_PKG_VERSION")),
        }
    }
}
