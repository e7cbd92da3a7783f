//! Transcript model and the chunked decode merger.

pub mod decode;
pub mod merger;
pub mod types;
pub mod vocabulary;

pub use decode::{decode_windows, longest_common_sequence};
pub use merger::{ChunkedDecodeMerger, estimated_window_count, transcription_percent};
pub use types::{
    DecodeStep, DecodedWindow, PendingWindow, TranscriptInput, TranscriptSegment, TranscriptSnapshot,
    WindowStride,
};
pub use vocabulary::{TableVocabulary, Vocabulary};
