//! Progress channel between a pipeline run and its single consumer.
//!
//! The producer side ([`ProgressSender`]) is handed to the stages; the consumer
//! side ([`ProgressStream`]) is a `Stream` of [`ProgressEvent`]s. The channel is
//! bounded, so a slow consumer holds the producer back. Dropping the stream
//! cancels the run.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::{Result, VidscribeError};
use crate::transcript::TranscriptSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Download,
    Conversion,
    Normalization,
    Transcription,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Conversion => "conversion",
            Stage::Normalization => "normalization",
            Stage::Transcription => "transcription",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Idle,
    Started,
    InProgress,
    Completed,
    Error,
}

/// One progress report. Serialized as a single NDJSON line on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub status: Status,
    pub percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<TranscriptSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn started(stage: Stage) -> Self {
        Self {
            stage,
            status: Status::Started,
            percent: 0,
            payload: None,
            message: None,
        }
    }

    /// In-progress report. The percent is clamped to 99; 100 belongs to `completed`.
    pub fn in_progress(stage: Stage, percent: u8) -> Self {
        Self {
            stage,
            status: Status::InProgress,
            percent: percent.min(99),
            payload: None,
            message: None,
        }
    }

    pub fn completed(stage: Stage) -> Self {
        Self {
            stage,
            status: Status::Completed,
            percent: 100,
            payload: None,
            message: None,
        }
    }

    pub fn error(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            status: Status::Error,
            percent: 0,
            payload: None,
            message: Some(message.into()),
        }
    }

    pub fn with_payload(mut self, payload: TranscriptSnapshot) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status == Status::Error
            || (self.stage == Stage::Transcription && self.status == Status::Completed)
    }

    /// JSON followed by a newline.
    pub fn to_ndjson(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Create a bounded progress channel.
pub fn channel(capacity: usize) -> (ProgressSender, ProgressStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let cancel = CancellationToken::new();
    let sender = ProgressSender {
        tx,
        cancel: cancel.clone(),
    };
    let stream = ProgressStream {
        inner: ReceiverStream::new(rx),
        _cancel_on_drop: cancel.drop_guard(),
    };
    (sender, stream)
}

/// Producer half. Cloning it does not create a second consumer.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressEvent>,
    cancel: CancellationToken,
}

impl ProgressSender {
    /// Send one event, waiting while the channel is full.
    ///
    /// Fails with [`VidscribeError::TransportAbandoned`] once the consumer is gone.
    pub async fn emit(&self, event: ProgressEvent) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(VidscribeError::TransportAbandoned);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(VidscribeError::TransportAbandoned),
            sent = self.tx.send(event) => sent.map_err(|_| VidscribeError::TransportAbandoned),
        }
    }

    /// Token cancelled when the consumer drops its stream.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_abandoned(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

/// Consumer half. Dropping it cancels the producing run.
#[derive(Debug)]
pub struct ProgressStream {
    inner: ReceiverStream<ProgressEvent>,
    _cancel_on_drop: DropGuard,
}

impl Stream for ProgressStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::TranscriptSegment;
    use futures_util::StreamExt;

    #[test]
    fn status_serializes_kebab_case() {
        let json = serde_json::to_string(&ProgressEvent::in_progress(Stage::Download, 42)).unwrap();
        assert_eq!(
            json,
            r#"{"stage":"download","status":"in-progress","percent":42}"#
        );
    }

    #[test]
    fn in_progress_never_reports_100() {
        assert_eq!(ProgressEvent::in_progress(Stage::Conversion, 100).percent, 99);
        assert_eq!(ProgressEvent::completed(Stage::Conversion).percent, 100);
    }

    #[test]
    fn ndjson_line_carries_payload() {
        let snapshot = TranscriptSnapshot {
            text: " hi".into(),
            segments: vec![TranscriptSegment::new(Some(0.0), None, " hi")],
        };
        let line = ProgressEvent::completed(Stage::Transcription)
            .with_payload(snapshot)
            .to_ndjson()
            .unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let parsed: ProgressEvent = serde_json::from_str(line.trim_end()).unwrap();
        assert!(parsed.is_terminal());
        assert_eq!(parsed.payload.unwrap().segments[0].end, None);
    }

    #[test]
    fn error_event_carries_message() {
        let event = ProgressEvent::error(Stage::Conversion, "Transcode failed: boom");
        assert!(event.is_terminal());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "Transcode failed: boom");
    }

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (tx, rx) = channel(4);
        tokio::spawn(async move {
            for p in [0u8, 10, 20] {
                tx.emit(ProgressEvent::in_progress(Stage::Download, p))
                    .await
                    .unwrap();
            }
        });
        let percents: Vec<u8> = rx.map(|e| e.percent).collect().await;
        assert_eq!(percents, vec![0, 10, 20]);
    }

    #[tokio::test]
    async fn dropping_stream_cancels_and_abandons() {
        let (tx, rx) = channel(1);
        let token = tx.cancellation().clone();
        drop(rx);
        assert!(token.is_cancelled());
        assert!(tx.is_abandoned());
        let err = tx
            .emit(ProgressEvent::started(Stage::Download))
            .await
            .unwrap_err();
        assert!(err.is_abandoned());
    }

    #[tokio::test]
    async fn full_channel_applies_backpressure() {
        let (tx, mut rx) = channel(1);
        tx.emit(ProgressEvent::started(Stage::Download)).await.unwrap();

        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            tx.emit(ProgressEvent::in_progress(Stage::Download, 1)),
        )
        .await;
        assert!(pending.is_err(), "second emit should wait for the consumer");

        assert_eq!(rx.next().await.unwrap().status, Status::Started);
        tx.emit(ProgressEvent::in_progress(Stage::Download, 2))
            .await
            .unwrap();
        assert_eq!(rx.next().await.unwrap().percent, 2);
    }

    #[tokio::test]
    async fn blocked_emit_wakes_on_disconnect() {
        let (tx, rx) = channel(1);
        tx.emit(ProgressEvent::started(Stage::Download)).await.unwrap();
        let waiter = tokio::spawn({
            let tx = tx.clone();
            async move { tx.emit(ProgressEvent::in_progress(Stage::Download, 5)).await }
        });
        tokio::task::yield_now().await;
        drop(rx);
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(VidscribeError::TransportAbandoned)));
    }
}
