//! Process-wide recognizer handle with guarded lazy initialization.

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::config::SttConfig;
use crate::error::{Result, VidscribeError};
use crate::models::download::{download_model, model_path};
use crate::stt::recognizer::Recognizer;
use crate::stt::whisper::{WhisperConfig, WhisperRecognizer};

type Loader = Arc<dyn Fn() -> Result<Arc<dyn Recognizer>> + Send + Sync>;

/// Loads the recognizer on first use and shares it afterwards.
///
/// Concurrent first callers wait for a single load. A failed load is not
/// cached; the next caller tries again.
pub struct RecognizerHandle {
    cell: OnceCell<Arc<dyn Recognizer>>,
    loader: Loader,
}

impl std::fmt::Debug for RecognizerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognizerHandle")
            .field("loaded", &self.name())
            .finish()
    }
}

impl RecognizerHandle {
    /// Create a handle that runs `loader` on a blocking thread at first use.
    pub fn lazy<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Recognizer>> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            loader: Arc::new(loader),
        }
    }

    /// Create a handle around an already loaded recognizer.
    pub fn ready(recognizer: Arc<dyn Recognizer>) -> Self {
        Self {
            cell: OnceCell::new_with(Some(recognizer)),
            loader: Arc::new(|| Err(VidscribeError::Other("recognizer already loaded".into()))),
        }
    }

    /// Whisper handle for the configured model.
    ///
    /// The model file is resolved at first use. A missing catalog model is
    /// downloaded first when `auto_download` is set.
    pub fn from_config(stt: &SttConfig) -> Self {
        let stt = stt.clone();
        let runtime = tokio::runtime::Handle::try_current().ok();
        Self::lazy(move || {
            let path = stt
                .model_path
                .clone()
                .unwrap_or_else(|| model_path(&stt.model));
            if !path.exists() && stt.model_path.is_none() && stt.auto_download {
                let runtime = runtime.as_ref().ok_or_else(|| {
                    VidscribeError::Other("model download needs a tokio runtime".into())
                })?;
                runtime.block_on(download_model(&stt.model, &mut |_, _| {}))?;
            }
            let recognizer = WhisperRecognizer::new(WhisperConfig {
                model_path: path,
                language: stt.language.clone(),
                threads: stt.threads,
            })?;
            Ok(Arc::new(recognizer) as Arc<dyn Recognizer>)
        })
    }

    pub async fn get(&self) -> Result<Arc<dyn Recognizer>> {
        let recognizer = self
            .cell
            .get_or_try_init(|| async {
                let loader = Arc::clone(&self.loader);
                let started = std::time::Instant::now();
                let recognizer = tokio::task::spawn_blocking(move || loader())
                    .await
                    .map_err(|e| VidscribeError::recognition(format!("model loader panicked: {}", e)))??;
                tracing::info!(
                    model = recognizer.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "recognizer loaded"
                );
                Ok::<_, VidscribeError>(recognizer)
            })
            .await?;
        Ok(Arc::clone(recognizer))
    }

    /// Name of the loaded recognizer, `None` until the first successful load.
    pub fn name(&self) -> Option<String> {
        self.cell.get().map(|r| r.name().to_string())
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stt::recognizer::ScriptedRecognizer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn loads_once_for_concurrent_callers() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let handle = Arc::new(RecognizerHandle::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(ScriptedRecognizer::with_phrases(&["x"])) as Arc<dyn Recognizer>)
        }));
        assert!(!handle.is_loaded());
        assert_eq!(handle.name(), None);

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let handle = Arc::clone(&handle);
                tokio::spawn(async move { handle.get().await.map(|r| r.name().to_string()) })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "scripted");
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(handle.name().as_deref(), Some("scripted"));
    }

    #[tokio::test]
    async fn failed_load_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let handle = RecognizerHandle::lazy(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(VidscribeError::ModelNotFound {
                    path: "/missing.bin".into(),
                })
            } else {
                Ok(Arc::new(ScriptedRecognizer::with_phrases(&[])) as Arc<dyn Recognizer>)
            }
        });

        assert!(matches!(
            handle.get().await,
            Err(VidscribeError::ModelNotFound { .. })
        ));
        assert!(handle.get().await.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn configured_handle_reports_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let stt = SttConfig {
            model_path: Some(dir.path().join("ggml-missing.bin")),
            ..SttConfig::default()
        };
        let handle = RecognizerHandle::from_config(&stt);
        assert!(matches!(
            handle.get().await,
            Err(VidscribeError::ModelNotFound { .. })
        ));
        assert!(!handle.is_loaded());
    }

    #[tokio::test]
    async fn ready_handle_never_loads() {
        let handle = RecognizerHandle::ready(Arc::new(
            ScriptedRecognizer::with_phrases(&[]).with_name("preloaded"),
        ));
        assert!(handle.is_loaded());
        assert_eq!(handle.get().await.unwrap().name(), "preloaded");
    }
}
