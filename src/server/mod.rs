//! HTTP surface.
//!
//! `POST /transcribe` streams NDJSON progress, `POST /download-subtitled-video`
//! streams a rendered MP4 and `GET /health` reports readiness.

mod routes;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::{Result, VidscribeError};
use crate::media::{FfmpegTranscoder, SubtitleMode, Transcoder, fetcher};
use crate::pipeline::{TranscriptionPipeline, VideoAssembler};
use crate::resources::ResourceManager;
use crate::stt::RecognizerHandle;

pub use routes::ApiError;

/// Shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: TranscriptionPipeline,
    pub assembler: VideoAssembler,
    /// Used when a render request does not name a mode.
    pub default_mode: SubtitleMode,
}

impl AppState {
    pub fn new(pipeline: TranscriptionPipeline, assembler: VideoAssembler) -> Self {
        Self {
            pipeline,
            assembler,
            default_mode: SubtitleMode::default(),
        }
    }

    pub fn with_default_mode(mut self, mode: SubtitleMode) -> Self {
        self.default_mode = mode;
        self
    }

    /// Wire the production adapters described by `config`.
    pub fn from_config(config: &Config, recognizer: Arc<RecognizerHandle>) -> Result<Self> {
        let resources = ResourceManager::new(config.media.work_dir())?;
        let fetcher = fetcher::from_config(&config.media);
        let transcoder: Arc<dyn Transcoder> =
            Arc::new(FfmpegTranscoder::from_config(&config.media));

        let pipeline = TranscriptionPipeline::new(
            Arc::clone(&fetcher),
            Arc::clone(&transcoder),
            recognizer,
            resources.clone(),
        )
        .with_config(config.pipeline.clone())
        .with_language(config.stt.language.clone());
        let assembler = VideoAssembler::new(fetcher, transcoder, resources)
            .with_default_duration(config.subtitle.default_duration_secs);

        Ok(Self::new(pipeline, assembler).with_default_mode(config.subtitle.mode))
    }
}

pub fn router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/transcribe", post(routes::transcribe))
        .route("/download-subtitled-video", post(routes::download_subtitled_video))
        .route("/health", get(routes::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind, serve until SIGINT/SIGTERM, then drain open requests.
pub async fn serve(config: &Config, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .map_err(|e| {
            VidscribeError::Other(format!("Failed to bind {}: {}", config.server.bind, e))
        })?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router(state, config.server.body_limit))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let terminate = async {
        if let Err(e) = wait_for_sigterm().await {
            tracing::error!(error = %e, "SIGTERM handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
        VidscribeError::Other(format!("Failed to register SIGTERM handler: {}", e))
    })?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    std::future::pending::<()>().await
}
