pub mod handle;
pub mod recognizer;
pub mod whisper;

pub use handle::RecognizerHandle;
pub use recognizer::{
    RecognitionSink, RecognizeOptions, Recognizer, ScriptedRecognizer, ScriptedWindow, WindowSpan,
    plan_windows,
};
pub use whisper::{WhisperConfig, WhisperRecognizer};
