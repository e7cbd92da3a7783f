//! Transcription run: Download → Conversion → Normalization → Transcription.
//!
//! Each run is one tokio task that drives the stages in order and reports
//! through a [`ProgressStream`]. Dropping the stream cancels the task, which
//! drops in-flight fetch and transcode futures (killing their child
//! processes) and stops the recognizer at its next callback.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::audio::AudioNormalizer;
use crate::config::PipelineConfig;
use crate::defaults;
use crate::error::{Result, VidscribeError};
use crate::media::{
    DownloadProgress, FetchChunk, MediaFetcher, MediaInfo, MediaKind, SourceLocator, TranscodeJob,
    Transcoder, conversion_percent,
};
use crate::pipeline::error::{StageContext, StageError};
use crate::progress::{self, ProgressEvent, ProgressSender, ProgressStream, Stage};
use crate::resources::{ManagedResource, ResourceKind, ResourceManager, ResourceScope};
use crate::stt::{RecognitionSink, RecognizeOptions, RecognizerHandle};
use crate::transcript::{
    ChunkedDecodeMerger, DecodeStep, DecodedWindow, TranscriptSnapshot, estimated_window_count,
    transcription_percent,
};

/// Runs transcriptions. Cheap to clone; clones share the recognizer and the
/// resource registry.
#[derive(Clone)]
pub struct TranscriptionPipeline {
    fetcher: Arc<dyn MediaFetcher>,
    transcoder: Arc<dyn Transcoder>,
    recognizer: Arc<RecognizerHandle>,
    resources: ResourceManager,
    normalizer: AudioNormalizer,
    config: PipelineConfig,
    language: String,
}

impl TranscriptionPipeline {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        transcoder: Arc<dyn Transcoder>,
        recognizer: Arc<RecognizerHandle>,
        resources: ResourceManager,
    ) -> Self {
        let config = PipelineConfig::default();
        Self {
            fetcher,
            transcoder,
            recognizer,
            resources,
            normalizer: AudioNormalizer::new(config.sample_rate),
            config,
            language: defaults::DEFAULT_LANGUAGE.to_string(),
        }
    }

    /// Sets window, stride, rate and channel sizes.
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.normalizer = AudioNormalizer::new(config.sample_rate);
        self.config = config;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    pub fn recognizer(&self) -> &Arc<RecognizerHandle> {
        &self.recognizer
    }

    /// Start a run in the background and return its progress.
    ///
    /// The stream ends after `Completed(Transcription)` or a single `Error` event.
    pub fn run(&self, locator: SourceLocator) -> ProgressStream {
        let (tx, stream) = progress::channel(self.config.progress_capacity);
        let span = tracing::info_span!("transcribe", %locator);
        tokio::spawn(self.clone().drive(locator, tx).instrument(span));
        stream
    }

    async fn drive(self, locator: SourceLocator, tx: ProgressSender) {
        let started = Instant::now();
        let mut scope = ResourceScope::new(self.resources.clone());
        let cancel = tx.cancellation().clone();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.stages(&locator, &tx, &mut scope) => Some(result),
        };

        match outcome {
            Some(Ok(())) => {
                tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "run completed");
            }
            None => {
                drop(scope);
                tracing::info!("consumer disconnected, run cancelled");
            }
            Some(Err(error)) if error.is_abandoned() => {
                drop(scope);
                tracing::info!(stage = %error.stage, "consumer disconnected, run cancelled");
            }
            Some(Err(error)) => {
                drop(scope);
                tracing::warn!(stage = %error.stage, error = %error.error, "run failed");
                let event = ProgressEvent::error(error.stage, error.client_message());
                if tx.emit(event).await.is_err() {
                    tracing::debug!("consumer gone before the error event");
                }
            }
        }
    }

    async fn stages(
        &self,
        locator: &SourceLocator,
        tx: &ProgressSender,
        scope: &mut ResourceScope,
    ) -> std::result::Result<(), StageError> {
        let raw = self.download(locator, tx, scope).await.at(Stage::Download)?;
        let wav = self.convert(&raw, tx, scope).await.at(Stage::Conversion)?;
        let samples = self.normalize(&wav, tx, scope).await.at(Stage::Normalization)?;
        self.transcribe(samples, tx).await.at(Stage::Transcription)?;
        Ok(())
    }

    async fn download(
        &self,
        locator: &SourceLocator,
        tx: &ProgressSender,
        scope: &mut ResourceScope,
    ) -> Result<ManagedResource> {
        tx.emit(ProgressEvent::started(Stage::Download)).await?;

        let raw = scope.allocate(ResourceKind::RawMedia, "media");
        let mut stream = self.fetcher.fetch(locator, MediaKind::Audio).await?;
        let mut file = tokio::fs::File::create(raw.path()).await?;
        let mut progress = DownloadProgress::default();

        while let Some(chunk) = stream.next().await {
            match chunk? {
                FetchChunk::SizeHint(total) => progress.set_total(total),
                FetchChunk::Data(data) => {
                    file.write_all(&data).await?;
                    if let Some(percent) = progress.advance(data.len()) {
                        tx.emit(ProgressEvent::in_progress(Stage::Download, percent))
                            .await?;
                    }
                }
            }
        }
        file.flush().await?;

        if progress.received() == 0 {
            return Err(VidscribeError::source_unavailable(format!(
                "{} returned no data",
                self.fetcher.name()
            )));
        }
        tracing::debug!(bytes = progress.received(), "download finished");

        tx.emit(ProgressEvent::completed(Stage::Download)).await?;
        Ok(raw)
    }

    async fn convert(
        &self,
        raw: &ManagedResource,
        tx: &ProgressSender,
        scope: &mut ResourceScope,
    ) -> Result<ManagedResource> {
        tx.emit(ProgressEvent::started(Stage::Conversion)).await?;

        let info: MediaInfo = self.transcoder.probe(raw.path()).await?;
        if !info.has_audio() {
            return Err(VidscribeError::transcode("source has no audio stream"));
        }

        let wav = scope.allocate(ResourceKind::NormalizedAudio, "wav");
        let mut job = self.transcoder.transcode(TranscodeJob::ExtractWav {
            input: raw.path().to_path_buf(),
            output: wav.path().to_path_buf(),
        });

        let mut last_percent = 0;
        while let Some(progress) = job.next().await {
            let progress = progress?;
            if let Some(percent) = conversion_percent(progress, info.duration_secs)
                && percent > last_percent
            {
                last_percent = percent;
                tx.emit(ProgressEvent::in_progress(Stage::Conversion, percent))
                    .await?;
            }
        }

        scope.release(raw);
        tx.emit(ProgressEvent::completed(Stage::Conversion)).await?;
        Ok(wav)
    }

    async fn normalize(
        &self,
        wav: &ManagedResource,
        tx: &ProgressSender,
        scope: &mut ResourceScope,
    ) -> Result<Vec<f32>> {
        tx.emit(ProgressEvent::started(Stage::Normalization)).await?;

        let bytes = tokio::fs::read(wav.path()).await?;
        scope.release(wav);

        let (percent_tx, mut percent_rx) = mpsc::channel::<u8>(self.config.recognizer_event_capacity);
        let normalizer = self.normalizer;
        let task = tokio::task::spawn_blocking(move || {
            normalizer.normalize(&bytes, &mut |percent| {
                // A closed receiver means the run was cancelled; finish quietly.
                let _ = percent_tx.blocking_send(percent);
            })
        });

        while let Some(percent) = percent_rx.recv().await {
            tx.emit(ProgressEvent::in_progress(Stage::Normalization, percent))
                .await?;
        }
        let samples = task
            .await
            .map_err(|e| VidscribeError::unsupported_audio(format!("normalizer panicked: {}", e)))??;

        tracing::debug!(samples = samples.len(), "audio normalized");
        tx.emit(ProgressEvent::completed(Stage::Normalization)).await?;
        Ok(samples)
    }

    async fn transcribe(&self, samples: Vec<f32>, tx: &ProgressSender) -> Result<TranscriptSnapshot> {
        tx.emit(ProgressEvent::started(Stage::Transcription)).await?;

        let recognizer = self.recognizer.get().await?;
        let estimated_total = estimated_window_count(
            samples.len(),
            self.config.window_secs,
            self.config.sample_rate,
        );
        let mut merger =
            ChunkedDecodeMerger::new(recognizer.vocabulary(), recognizer.time_precision());

        let options = RecognizeOptions {
            window_secs: self.config.window_secs,
            stride_secs: self.config.stride_secs,
            sample_rate: self.config.sample_rate,
            language: self.language.clone(),
        };
        let (event_tx, mut event_rx) = mpsc::channel(self.config.recognizer_event_capacity);
        let mut sink = ChannelSink {
            events: event_tx,
            cancel: tx.cancellation().clone(),
        };
        let task = tokio::task::spawn_blocking(move || {
            recognizer.recognize(&samples, &options, &mut sink)
        });

        while let Some(event) = event_rx.recv().await {
            let snapshot = match event {
                RecognizerEvent::Step(step) => merger.on_step(step),
                RecognizerEvent::Window(window) => merger.on_window(window),
            };
            let percent = transcription_percent(merger.finalized_count(), estimated_total);
            tx.emit(ProgressEvent::in_progress(Stage::Transcription, percent).with_payload(snapshot))
                .await?;
        }
        task.await
            .map_err(|e| VidscribeError::recognition(format!("recognizer panicked: {}", e)))??;

        if tx.is_abandoned() {
            return Err(VidscribeError::TransportAbandoned);
        }

        let snapshot = merger.snapshot();
        tracing::debug!(
            windows = merger.windows().len(),
            segments = snapshot.segments.len(),
            "transcription finished"
        );
        tx.emit(ProgressEvent::completed(Stage::Transcription).with_payload(snapshot.clone()))
            .await?;
        Ok(snapshot)
    }
}

enum RecognizerEvent {
    Step(DecodeStep),
    Window(DecodedWindow),
}

/// Forwards recognizer callbacks to the async side of the run.
struct ChannelSink {
    events: mpsc::Sender<RecognizerEvent>,
    cancel: CancellationToken,
}

impl ChannelSink {
    fn forward(&mut self, event: RecognizerEvent) -> ControlFlow<()> {
        if self.cancel.is_cancelled() || self.events.blocking_send(event).is_err() {
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }
}

impl RecognitionSink for ChannelSink {
    fn on_step(&mut self, step: DecodeStep) -> ControlFlow<()> {
        self.forward(RecognizerEvent::Step(step))
    }

    fn on_window(&mut self, window: DecodedWindow) -> ControlFlow<()> {
        self.forward(RecognizerEvent::Window(window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{FetchStream, MediaInfo, TranscodeProgress, TranscodeStream};
    use crate::progress::Status;
    use crate::stt::{Recognizer, ScriptedRecognizer};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::stream;
    use std::path::Path;

    struct BytesFetcher(Vec<u8>);

    #[async_trait]
    impl MediaFetcher for BytesFetcher {
        fn name(&self) -> &str {
            "bytes"
        }

        async fn fetch(&self, _: &SourceLocator, _: MediaKind) -> Result<FetchStream> {
            let data = Bytes::from(self.0.clone());
            let chunks: Vec<Result<FetchChunk>> = vec![
                Ok(FetchChunk::SizeHint(data.len() as u64)),
                Ok(FetchChunk::Data(data.slice(..data.len() / 2))),
                Ok(FetchChunk::Data(data.slice(data.len() / 2..))),
            ];
            Ok(stream::iter(chunks).boxed())
        }
    }

    /// Copies the input file; the fetched bytes already are a WAV.
    struct CopyTranscoder;

    #[async_trait]
    impl Transcoder for CopyTranscoder {
        async fn probe(&self, _: &Path) -> Result<MediaInfo> {
            Ok(MediaInfo {
                duration_secs: Some(2.0),
                video_codec: None,
                audio_codec: Some("pcm_s16le".into()),
            })
        }

        fn transcode(&self, job: TranscodeJob) -> TranscodeStream {
            let TranscodeJob::ExtractWav { input, output, .. } = job else {
                return stream::iter(vec![Err(VidscribeError::transcode("unexpected job"))]).boxed();
            };
            let copied = std::fs::copy(&input, &output)
                .map(|_| TranscodeProgress { processed_secs: 1.0 })
                .map_err(VidscribeError::from);
            stream::iter(vec![copied]).boxed()
        }
    }

    fn wav_bytes(seconds: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..seconds * 16000 {
                writer.write_sample(((i % 100) as i16) * 10).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn pipeline(dir: &Path, seconds: usize) -> TranscriptionPipeline {
        let recognizer: Arc<dyn Recognizer> = Arc::new(ScriptedRecognizer::with_phrases(&["hello world"]));
        TranscriptionPipeline::new(
            Arc::new(BytesFetcher(wav_bytes(seconds))),
            Arc::new(CopyTranscoder),
            Arc::new(RecognizerHandle::ready(recognizer)),
            ResourceManager::new(dir).unwrap(),
        )
    }

    #[tokio::test]
    async fn run_walks_all_stages_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), 2);
        let locator = SourceLocator::parse("https://example.com/a.wav").unwrap();
        let events: Vec<ProgressEvent> = pipeline.run(locator).collect().await;

        let mut stages: Vec<Stage> = events.iter().map(|e| e.stage).collect();
        stages.dedup();
        assert_eq!(
            stages,
            vec![
                Stage::Download,
                Stage::Conversion,
                Stage::Normalization,
                Stage::Transcription
            ]
        );
        let last = events.last().unwrap();
        assert_eq!(last.status, Status::Completed);
        assert_eq!(last.percent, 100);
        assert_eq!(last.payload.as_ref().unwrap().text, " hello world");
        assert_eq!(pipeline.resources().live_count(), 0);
    }

    #[tokio::test]
    async fn channel_sink_stops_on_cancel() {
        let (events, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let mut sink = ChannelSink {
            events,
            cancel: cancel.clone(),
        };
        cancel.cancel();
        let step = DecodeStep {
            tokens: vec![1],
            stride: None,
        };
        assert!(sink.on_step(step).is_break());
    }
}
