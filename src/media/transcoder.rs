//! Container and codec conversion through `ffmpeg`/`ffprobe` child processes.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::config::MediaConfig;
use crate::defaults;
use crate::error::{Result, VidscribeError};

/// How subtitles end up in the rendered video.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleMode {
    /// Selectable `mov_text` track.
    #[default]
    Soft,
    /// Drawn into the picture.
    Burned,
}

/// What `ffprobe` reports about a file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub duration_secs: Option<f64>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
}

impl MediaInfo {
    pub fn has_video(&self) -> bool {
        self.video_codec.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio_codec.is_some()
    }
}

/// Stream handling for one mux.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxPlan {
    pub copy_video: bool,
    pub copy_audio: bool,
    pub burn_subtitles: bool,
}

impl MuxPlan {
    /// Copy what MP4 can carry, re-encode the rest.
    ///
    /// Burning always re-encodes the video. Audio is copied when it is AAC or
    /// MP3, otherwise encoded to AAC.
    pub fn decide(video: &MediaInfo, audio_codec: Option<&str>, mode: SubtitleMode) -> Self {
        let burn_subtitles = mode == SubtitleMode::Burned;
        let copy_video = !burn_subtitles
            && video
                .video_codec
                .as_deref()
                .is_some_and(|codec| defaults::MP4_COPY_VIDEO_CODECS.contains(&codec));
        let copy_audio =
            audio_codec.is_some_and(|codec| defaults::MP4_COPY_AUDIO_CODECS.contains(&codec));
        Self {
            copy_video,
            copy_audio,
            burn_subtitles,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranscodeJob {
    /// Decode the first audio stream into a PCM WAV file at the source rate.
    ExtractWav { input: PathBuf, output: PathBuf },
    /// Combine video, audio and an SRT file into one MP4.
    Mux {
        video: PathBuf,
        /// Separate audio source. `None` takes the audio from `video`.
        audio: Option<PathBuf>,
        subtitles: PathBuf,
        output: PathBuf,
        plan: MuxPlan,
    },
}

impl TranscodeJob {
    pub fn output(&self) -> &Path {
        match self {
            TranscodeJob::ExtractWav { output, .. } | TranscodeJob::Mux { output, .. } => output,
        }
    }
}

/// Media time processed so far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TranscodeProgress {
    pub processed_secs: f64,
}

pub type TranscodeStream = BoxStream<'static, Result<TranscodeProgress>>;

#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo>;

    /// Run `job`. The stream ends after the output is complete; dropping it
    /// aborts the conversion.
    fn transcode(&self, job: TranscodeJob) -> TranscodeStream;
}

/// Percent of `duration` covered by `progress`, capped at 99.
///
/// `None` when the duration is unknown.
pub fn conversion_percent(progress: TranscodeProgress, duration_secs: Option<f64>) -> Option<u8> {
    let duration = duration_secs.filter(|d| d.is_finite() && *d > 0.0)?;
    let ratio = (progress.processed_secs / duration).clamp(0.0, 1.0);
    Some(((ratio * 100.0).floor() as u8).min(99))
}

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: String,
    ffprobe: String,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub fn from_config(media: &MediaConfig) -> Self {
        Self::new(media.ffmpeg.clone(), media.ffprobe.clone())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                VidscribeError::transcode(format!("failed to run {}: {}", self.ffprobe, e))
            })?;

        if !output.status.success() {
            return Err(VidscribeError::transcode(format!(
                "{} could not read {}: {}",
                self.ffprobe,
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_probe(&output.stdout)
    }

    fn transcode(&self, job: TranscodeJob) -> TranscodeStream {
        tracing::debug!(output = %job.output().display(), "starting ffmpeg");
        run_ffmpeg(self.ffmpeg.clone(), ffmpeg_args(&job)).boxed()
    }
}

fn ffmpeg_args(job: &TranscodeJob) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-hide_banner",
        "-nostdin",
        "-y",
        "-loglevel",
        "error",
        "-progress",
        "pipe:1",
        "-nostats",
    ]
    .iter()
    .map(OsString::from)
    .collect();

    match job {
        TranscodeJob::ExtractWav { input, output } => {
            args.push("-i".into());
            args.push(input.into());
            args.extend(["-vn", "-map", "0:a:0", "-c:a", "pcm_s16le"].map(OsString::from));
            args.extend(["-f", "wav"].map(OsString::from));
            args.push(output.into());
        }
        TranscodeJob::Mux {
            video,
            audio,
            subtitles,
            output,
            plan,
        } => {
            // Inputs first: ffmpeg binds options to the file that follows them.
            args.push("-i".into());
            args.push(video.into());
            if let Some(audio) = audio {
                args.push("-i".into());
                args.push(audio.into());
            }
            if !plan.burn_subtitles {
                args.push("-i".into());
                args.push(subtitles.into());
            }

            let audio_map = if audio.is_some() { "1:a:0" } else { "0:a:0?" };
            args.extend(["-map", "0:v:0", "-map", audio_map].map(OsString::from));

            if plan.burn_subtitles {
                args.push("-vf".into());
                args.push(format!("subtitles={}", escape_filter_path(subtitles)).into());
                args.extend(
                    ["-c:v", "libx264", "-preset", "veryfast", "-crf", "23"].map(OsString::from),
                );
            } else {
                let subtitle_index = if audio.is_some() { 2 } else { 1 };
                args.push("-map".into());
                args.push(format!("{}:s:0", subtitle_index).into());
                args.extend(["-c:s", "mov_text"].map(OsString::from));
                if plan.copy_video {
                    args.extend(["-c:v", "copy"].map(OsString::from));
                } else {
                    args.extend(
                        ["-c:v", "libx264", "-preset", "veryfast", "-crf", "23"]
                            .map(OsString::from),
                    );
                }
            }

            if plan.copy_audio {
                args.extend(["-c:a", "copy"].map(OsString::from));
            } else {
                args.extend(["-c:a", "aac", "-b:a", "160k"].map(OsString::from));
            }
            args.extend(["-movflags", "+faststart", "-f", "mp4"].map(OsString::from));
            args.push(output.into());
        }
    }
    args
}

/// Escape a path for use as the `subtitles` filter argument.
fn escape_filter_path(path: &Path) -> String {
    let mut escaped = String::new();
    for c in path.to_string_lossy().chars() {
        if matches!(c, '\\' | ':' | '\'' | ',' | ';' | '[' | ']') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn run_ffmpeg(binary: String, args: Vec<OsString>) -> impl Stream<Item = Result<TranscodeProgress>> {
    try_stream! {
        let mut child = Command::new(&binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VidscribeError::transcode(format!("failed to start {}: {}", binary, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VidscribeError::transcode("ffmpeg stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| VidscribeError::transcode("ffmpeg stderr was not captured"))?;
        let stderr_tail = tokio::spawn(tail_lines(stderr, 8));

        let mut lines = BufReader::new(stdout).lines();
        let mut parser = ProgressParser::default();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| VidscribeError::transcode(format!("reading ffmpeg progress: {}", e)))?
        {
            if let Some(progress) = parser.feed(&line) {
                yield progress;
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| VidscribeError::transcode(format!("waiting for ffmpeg: {}", e)))?;
        let tail = stderr_tail.await.unwrap_or_default();
        if !status.success() {
            Err::<(), _>(VidscribeError::transcode(format!(
                "{} exited with {}: {}",
                binary, status, tail
            )))?;
        }
    }
}

/// Last `keep` non-empty lines of `reader`, joined with " | ".
async fn tail_lines<R: AsyncRead + Unpin>(reader: R, keep: usize) -> String {
    let mut lines = BufReader::new(reader).lines();
    let mut tail = VecDeque::with_capacity(keep);
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        if tail.len() == keep {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join(" | ")
}

/// Reads `-progress` key/value blocks. A block ends with a `progress=` line.
#[derive(Debug, Default)]
struct ProgressParser {
    latest: Option<f64>,
}

impl ProgressParser {
    fn feed(&mut self, line: &str) -> Option<TranscodeProgress> {
        let (key, value) = line.trim().split_once('=')?;
        match key {
            // ffmpeg writes microseconds under both names
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.latest = Some(us.max(0) as f64 / 1_000_000.0);
                }
                None
            }
            "out_time" => {
                if let Some(secs) = parse_clock(value) {
                    self.latest = Some(secs);
                }
                None
            }
            "progress" => self.latest.map(|processed_secs| TranscodeProgress { processed_secs }),
            _ => None,
        }
    }
}

/// `HH:MM:SS.micros` to seconds.
fn parse_clock(value: &str) -> Option<f64> {
    let mut parts = value.trim().splitn(3, ':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    let total = hours * 3600.0 + minutes * 60.0 + seconds;
    (total.is_finite() && total >= 0.0).then_some(total)
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_probe(json: &[u8]) -> Result<MediaInfo> {
    let probe: ProbeOutput = serde_json::from_slice(json)
        .map_err(|e| VidscribeError::transcode(format!("unreadable ffprobe output: {}", e)))?;

    let positive = |value: &Option<String>| {
        value
            .as_deref()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0)
    };
    let codec_of = |kind: &str| {
        probe
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some(kind))
            .and_then(|s| s.codec_name.clone())
    };

    let duration_secs = probe
        .format
        .as_ref()
        .and_then(|f| positive(&f.duration))
        .or_else(|| {
            probe
                .streams
                .iter()
                .filter_map(|s| positive(&s.duration))
                .reduce(f64::max)
        });

    Ok(MediaInfo {
        duration_secs,
        video_codec: codec_of("video"),
        audio_codec: codec_of("audio"),
    })
}
