//! Renders a subtitled copy of a source video.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio_util::io::ReaderStream;

use crate::defaults;
use crate::error::{Result, VidscribeError};
use crate::media::fetcher::save_stream;
use crate::media::{
    MediaFetcher, MediaKind, MuxPlan, SourceLocator, SubtitleMode, TranscodeJob, Transcoder,
};
use crate::resources::{ResourceKind, ResourceLease, ResourceManager, ResourceScope};
use crate::subtitle::to_subtitle_track;
use crate::transcript::TranscriptSegment;

/// Fetches, writes subtitles, muxes.
#[derive(Clone)]
pub struct VideoAssembler {
    fetcher: Arc<dyn MediaFetcher>,
    transcoder: Arc<dyn Transcoder>,
    resources: ResourceManager,
    default_duration: f64,
}

impl VideoAssembler {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        transcoder: Arc<dyn Transcoder>,
        resources: ResourceManager,
    ) -> Self {
        Self {
            fetcher,
            transcoder,
            resources,
            default_duration: defaults::SUBTITLE_DURATION_SECS,
        }
    }

    /// Duration given to segments without an end time.
    pub fn with_default_duration(mut self, secs: f64) -> Self {
        self.default_duration = secs;
        self
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// Produce the muxed MP4 as a byte stream.
    ///
    /// Every artifact of the render stays on disk until the returned stream
    /// is dropped. On error they are removed before this returns.
    pub async fn assemble(
        &self,
        locator: &SourceLocator,
        segments: &[TranscriptSegment],
        mode: SubtitleMode,
    ) -> Result<AssembledVideo> {
        let mut scope = ResourceScope::new(self.resources.clone());

        let video = scope.allocate(ResourceKind::RawMedia, "video");
        let stream = self.fetcher.fetch(locator, MediaKind::Video).await?;
        save_stream(stream, video.path()).await?;
        let video_info = self.transcoder.probe(video.path()).await?;
        if !video_info.has_video() {
            return Err(VidscribeError::transcode("source has no video stream"));
        }

        let (audio, audio_codec) = if video_info.has_audio() {
            (None, video_info.audio_codec.clone())
        } else {
            let audio = scope.allocate(ResourceKind::RawMedia, "audio");
            let stream = self.fetcher.fetch(locator, MediaKind::Audio).await?;
            save_stream(stream, audio.path()).await?;
            let info = self.transcoder.probe(audio.path()).await?;
            (Some(audio.path().to_path_buf()), info.audio_codec)
        };

        let subtitles = scope.allocate(ResourceKind::SubtitleTrack, "srt");
        tokio::fs::write(
            subtitles.path(),
            to_subtitle_track(segments, self.default_duration),
        )
        .await?;

        let plan = MuxPlan::decide(&video_info, audio_codec.as_deref(), mode);
        tracing::info!(
            %locator,
            ?plan,
            separate_audio = audio.is_some(),
            segments = segments.len(),
            "muxing subtitled video"
        );

        let output = scope.allocate(ResourceKind::MuxedOutput, "mp4");
        let mut job = self.transcoder.transcode(TranscodeJob::Mux {
            video: video.path().to_path_buf(),
            audio,
            subtitles: subtitles.path().to_path_buf(),
            output: output.path().to_path_buf(),
            plan,
        });
        while let Some(progress) = job.next().await {
            let progress = progress?;
            tracing::trace!(processed_secs = progress.processed_secs, "mux progress");
        }

        let file = tokio::fs::File::open(output.path()).await?;
        let len = file.metadata().await?.len();
        Ok(AssembledVideo {
            body: ReaderStream::new(file),
            len,
            plan,
            _leases: scope.into_leases(),
        })
    }
}

/// The rendered MP4. Holds every artifact of the render until dropped.
pub struct AssembledVideo {
    // Declared before the leases so the file is closed before it is removed.
    body: ReaderStream<tokio::fs::File>,
    len: u64,
    plan: MuxPlan,
    _leases: Vec<ResourceLease>,
}

impl AssembledVideo {
    /// Size of the output file in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn plan(&self) -> MuxPlan {
        self.plan
    }
}

impl std::fmt::Debug for AssembledVideo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssembledVideo")
            .field("len", &self.len)
            .field("plan", &self.plan)
            .field("leases", &self._leases.len())
            .finish()
    }
}

impl Stream for AssembledVideo {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.body).poll_next(cx)
    }
}
