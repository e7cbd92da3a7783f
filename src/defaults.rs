//! Default configuration constants for vidscribe.
//!
//! Shared by the config types, the pipeline and the CLI so every entry point
//! agrees on the same numbers.

/// Sample rate the recognizer expects, in Hz.
pub const SAMPLE_RATE: u32 = 16000;

/// Length of one recognition window in seconds.
///
/// Whisper consumes exactly 30 seconds of audio per inference pass.
pub const WINDOW_SECS: f64 = 30.0;

/// Overlap margin on each side of a window, in seconds.
///
/// Consecutive windows advance by `WINDOW_SECS - 2 * STRIDE_SECS`.
pub const STRIDE_SECS: f64 = 5.0;

/// Seconds represented by one Whisper timestamp token (30 s / 1500 positions).
pub const TIME_PRECISION: f64 = 0.02;

/// Duration given to a subtitle entry whose end time is unknown, in seconds.
pub const SUBTITLE_DURATION_SECS: f64 = 2.0;

/// Capacity of the progress channel between a run and its consumer.
pub const PROGRESS_CAPACITY: usize = 16;

/// Capacity of the channel carrying recognizer callbacks to the merger.
pub const RECOGNIZER_EVENT_CAPACITY: usize = 4;

/// Default listen address for `vidscribe serve`.
pub const BIND_ADDRESS: &str = "127.0.0.1:8787";

/// Largest accepted JSON request body (transcripts of long videos are big).
pub const REQUEST_BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Default Whisper model name.
pub const DEFAULT_MODEL: &str = "base";

/// Default language code for transcription.
pub const DEFAULT_LANGUAGE: &str = "auto";

/// Language value that triggers automatic language detection.
pub const AUTO_LANGUAGE: &str = "auto";

/// Soft subtitles are muxed by copying these video codecs into MP4.
pub const MP4_COPY_VIDEO_CODECS: &[&str] = &["h264", "hevc", "av1", "mpeg4"];

/// Audio codecs that can be copied into MP4 without re-encoding.
pub const MP4_COPY_AUDIO_CODECS: &[&str] = &["aac", "mp3"];

/// Report the GPU backend compiled into this build.
pub fn gpu_backend() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA"
    } else if cfg!(feature = "vulkan") {
        "Vulkan"
    } else if cfg!(feature = "hipblas") {
        "HipBLAS (AMD)"
    } else if cfg!(feature = "openblas") {
        "OpenBLAS"
    } else {
        "CPU"
    }
}
