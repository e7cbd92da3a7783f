//! Adapters for the outside world: where media comes from and how it is converted.

pub mod fetcher;
pub mod locator;
pub mod transcoder;

pub use fetcher::{
    DownloadProgress, FetchChunk, FetchStream, HttpFetcher, MediaFetcher, MediaKind, YtDlpFetcher,
};
pub use locator::{LocatorError, SourceLocator};
pub use transcoder::{
    FfmpegTranscoder, MediaInfo, MuxPlan, SubtitleMode, TranscodeJob, TranscodeProgress,
    TranscodeStream, Transcoder, conversion_percent,
};
