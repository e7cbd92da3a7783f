use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::AppState;
use crate::media::{SourceLocator, SubtitleMode};
use crate::transcript::TranscriptInput;

/// JSON error body: `{"error": <code>, "detail": <message>}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    detail: String,
}

impl ApiError {
    pub fn bad_request(code: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            detail: detail.into(),
        }
    }

    pub fn internal(code: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code,
            detail: detail.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({
                "error": self.code,
                "detail": self.detail,
            })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TranscribeRequest {
    #[serde(default, alias = "url")]
    source_locator: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RenderRequest {
    #[serde(default, alias = "url")]
    source_locator: Option<String>,
    #[serde(default, alias = "transcription")]
    transcript: Option<TranscriptInput>,
    #[serde(default)]
    subtitle_mode: Option<SubtitleMode>,
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request("invalid_body", e.to_string()))
}

fn parse_locator(raw: Option<&str>) -> Result<SourceLocator, ApiError> {
    SourceLocator::parse(raw.unwrap_or_default())
        .map_err(|e| ApiError::bad_request("invalid_source_locator", e.to_string()))
}

pub(super) async fn transcribe(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: TranscribeRequest = parse_body(&body)?;
    let locator = parse_locator(request.source_locator.as_deref())?;
    tracing::info!(%locator, "transcription requested");

    let events = state
        .pipeline
        .run(locator)
        .map(|event| event.to_ndjson().map(Bytes::from));

    Ok(([(CONTENT_TYPE, "application/x-ndjson")], Body::from_stream(events)).into_response())
}

pub(super) async fn download_subtitled_video(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: RenderRequest = parse_body(&body)?;
    let locator = parse_locator(request.source_locator.as_deref())?;
    let segments = request
        .transcript
        .ok_or_else(|| ApiError::bad_request("missing_transcript", "transcript is required"))?
        .into_segments();
    let mode = request.subtitle_mode.unwrap_or(state.default_mode);

    let video = state
        .assembler
        .assemble(&locator, &segments, mode)
        .await
        .map_err(|e| {
            tracing::warn!(%locator, error = %e, "render failed");
            ApiError::internal("render_failed", e.to_string())
        })?;
    tracing::info!(%locator, bytes = video.len(), "streaming subtitled video");

    Ok((
        [
            (CONTENT_TYPE, "video/mp4"),
            (CONTENT_DISPOSITION, "attachment; filename=\"video.mp4\""),
        ],
        Body::from_stream(video),
    )
        .into_response())
}

pub(super) async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "recognizer": state.pipeline.recognizer().name(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcribe_request_accepts_url_alias() {
        let request: TranscribeRequest =
            serde_json::from_str(r#"{"url": "https://example.com/v"}"#).unwrap();
        assert_eq!(request.source_locator.as_deref(), Some("https://example.com/v"));

        let request: TranscribeRequest = serde_json::from_str("{}").unwrap();
        assert!(request.source_locator.is_none());
    }

    #[test]
    fn render_request_accepts_segments_or_snapshot() {
        let request: RenderRequest = serde_json::from_str(
            r#"{"sourceLocator": "https://e.com/v", "transcription": [{"start": 0.0, "end": null, "text": "hi"}], "subtitleMode": "burned"}"#,
        )
        .unwrap();
        assert_eq!(request.subtitle_mode, Some(SubtitleMode::Burned));
        let segments = request.transcript.unwrap().into_segments();
        assert_eq!(segments[0].end, None);

        let request: RenderRequest = serde_json::from_str(
            r#"{"url": "https://e.com/v", "transcript": {"text": " hi", "segments": [{"start": 1.0, "end": 2.0, "text": " hi"}]}}"#,
        )
        .unwrap();
        assert_eq!(request.transcript.unwrap().into_segments()[0].start, Some(1.0));
    }

    #[test]
    fn missing_locator_is_bad_request() {
        let err = parse_locator(None).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn malformed_json_is_bad_request() {
        let err = parse_body::<TranscribeRequest>(&Bytes::from_static(b"{nope")).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
