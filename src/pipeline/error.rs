//! Stage-tagged errors for a pipeline run.

use thiserror::Error;

use crate::error::VidscribeError;
use crate::progress::Stage;

/// An error together with the stage that raised it.
#[derive(Error, Debug)]
#[error("{stage} stage failed: {error}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub error: VidscribeError,
}

impl StageError {
    pub fn new(stage: Stage, error: VidscribeError) -> Self {
        Self { stage, error }
    }

    /// The consumer disconnected; nothing should be reported.
    pub fn is_abandoned(&self) -> bool {
        self.error.is_abandoned()
    }

    /// Text for the terminal `Error` event.
    pub fn client_message(&self) -> String {
        self.error.to_string()
    }
}

/// Attach a stage to a stage result.
pub trait StageContext<T> {
    fn at(self, stage: Stage) -> Result<T, StageError>;
}

impl<T> StageContext<T> for crate::error::Result<T> {
    fn at(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|error| StageError::new(stage, error))
    }
}
