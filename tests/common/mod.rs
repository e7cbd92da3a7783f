//! Fakes shared by the integration tests: an in-memory fetcher, a transcoder
//! that needs no ffmpeg, and pipelines wired from them.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, stream};
use vidscribe::media::{
    FetchChunk, FetchStream, MediaFetcher, MediaInfo, MediaKind, SourceLocator, TranscodeJob,
    TranscodeProgress, TranscodeStream, Transcoder,
};
use vidscribe::pipeline::{TranscriptionPipeline, VideoAssembler};
use vidscribe::resources::ResourceManager;
use vidscribe::stt::{Recognizer, RecognizerHandle, ScriptedRecognizer};
use vidscribe::{Result, VidscribeError};

/// Mono 16-bit WAV of a quiet sawtooth.
pub fn wav_bytes(seconds: usize, sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..seconds * sample_rate as usize {
            writer.write_sample(((i % 200) as i16 - 100) * 20).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub enum FetchBehavior {
    /// Deliver the bytes in a few chunks with a size hint.
    Serve(Vec<u8>),
    /// Fail before any data arrives.
    Unavailable,
    /// Deliver one chunk, then never finish.
    Stall,
}

pub struct FakeFetcher {
    pub behavior: FetchBehavior,
}

impl FakeFetcher {
    pub fn serving(bytes: Vec<u8>) -> Self {
        Self {
            behavior: FetchBehavior::Serve(bytes),
        }
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    fn name(&self) -> &str {
        "fake"
    }

    async fn fetch(&self, _: &SourceLocator, _: MediaKind) -> Result<FetchStream> {
        match &self.behavior {
            FetchBehavior::Serve(bytes) => {
                let data = Bytes::from(bytes.clone());
                let mut chunks = vec![Ok(FetchChunk::SizeHint(data.len() as u64))];
                for piece in data.chunks(data.len().div_ceil(4).max(1)) {
                    chunks.push(Ok(FetchChunk::Data(Bytes::copy_from_slice(piece))));
                }
                Ok(stream::iter(chunks).boxed())
            }
            FetchBehavior::Unavailable => Err(VidscribeError::source_unavailable("HTTP 404")),
            FetchBehavior::Stall => {
                let head = stream::iter(vec![
                    Ok(FetchChunk::SizeHint(1_000_000)),
                    Ok(FetchChunk::Data(Bytes::from(vec![0u8; 100_000]))),
                ]);
                Ok(head.chain(stream::pending::<Result<FetchChunk>>()).boxed())
            }
        }
    }
}

/// Treats fetched bytes as a ready WAV and writes the subtitle file as the muxed output.
pub struct FakeTranscoder {
    pub fail: bool,
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn probe(&self, _: &Path) -> Result<MediaInfo> {
        Ok(MediaInfo {
            duration_secs: Some(35.0),
            video_codec: Some("h264".into()),
            audio_codec: Some("aac".into()),
        })
    }

    fn transcode(&self, job: TranscodeJob) -> TranscodeStream {
        if self.fail {
            return stream::iter(vec![Err(VidscribeError::transcode("ffmpeg exited with 1"))])
                .boxed();
        }
        let (input, output) = match job {
            TranscodeJob::ExtractWav { input, output, .. } => (input, output),
            TranscodeJob::Mux {
                subtitles, output, ..
            } => (subtitles, output),
        };
        let steps = vec![
            Ok(TranscodeProgress {
                processed_secs: 10.0,
            }),
            std::fs::copy(&input, &output)
                .map(|_| TranscodeProgress {
                    processed_secs: 35.0,
                })
                .map_err(VidscribeError::from),
        ];
        stream::iter(steps).boxed()
    }
}

/// Converts successfully but writes something that is not a WAV file.
pub struct TextTranscoder;

#[async_trait]
impl Transcoder for TextTranscoder {
    async fn probe(&self, _: &Path) -> Result<MediaInfo> {
        Ok(MediaInfo {
            duration_secs: Some(2.0),
            video_codec: None,
            audio_codec: Some("opus".into()),
        })
    }

    fn transcode(&self, job: TranscodeJob) -> TranscodeStream {
        let written = std::fs::write(job.output(), b"this is not audio")
            .map(|_| TranscodeProgress {
                processed_secs: 2.0,
            })
            .map_err(VidscribeError::from);
        stream::iter(vec![written]).boxed()
    }
}

pub fn pipeline_with(
    dir: &Path,
    fetcher: FakeFetcher,
    transcoder: impl Transcoder + 'static,
    recognizer: ScriptedRecognizer,
) -> TranscriptionPipeline {
    let recognizer: Arc<dyn Recognizer> = Arc::new(recognizer);
    TranscriptionPipeline::new(
        Arc::new(fetcher),
        Arc::new(transcoder),
        Arc::new(RecognizerHandle::ready(recognizer)),
        ResourceManager::new(dir).unwrap(),
    )
}

pub fn assembler_with(dir: &Path, fetcher: FakeFetcher, transcoder: FakeTranscoder) -> VideoAssembler {
    VideoAssembler::new(
        Arc::new(fetcher),
        Arc::new(transcoder),
        ResourceManager::new(dir).unwrap(),
    )
}

pub fn locator() -> SourceLocator {
    SourceLocator::parse("https://media.example.com/talk.mp4").unwrap()
}
