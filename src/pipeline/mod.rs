//! Request pipelines.
//!
//! [`TranscriptionPipeline`] turns a source locator into a stream of progress
//! events ending with the transcript. [`VideoAssembler`] renders a subtitled
//! copy of the source from a finished transcript.

pub mod assembler;
pub mod error;
pub mod orchestrator;

pub use assembler::{AssembledVideo, VideoAssembler};
pub use error::{StageContext, StageError};
pub use orchestrator::TranscriptionPipeline;
