//! Media fetchers: stream the bytes behind a [`SourceLocator`].
//!
//! A fetch yields an optional [`FetchChunk::SizeHint`] followed by data
//! chunks. Dropping the stream aborts the transfer.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::{StreamExt, TryStreamExt};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::{FetcherKind, MediaConfig};
use crate::error::{Result, VidscribeError};
use crate::media::locator::SourceLocator;

/// Which part of the source a caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchChunk {
    /// Expected total size in bytes. Sent at most once, before any data.
    SizeHint(u64),
    Data(Bytes),
}

pub type FetchStream = BoxStream<'static, Result<FetchChunk>>;

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    fn name(&self) -> &str;

    /// Start fetching. Fails with `SourceUnavailable` when the source cannot be opened.
    async fn fetch(&self, locator: &SourceLocator, kind: MediaKind) -> Result<FetchStream>;
}

/// Fetcher for locators that point straight at a media file.
///
/// The requested [`MediaKind`] is ignored: the file is returned as is.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn open(&self, url: &str) -> Result<FetchStream> {
        let response = self.client.get(url).send().await.map_err(|e| {
            VidscribeError::source_unavailable(format!("request to {} failed: {}", url, e))
        })?;

        if !response.status().is_success() {
            return Err(VidscribeError::source_unavailable(format!(
                "{} returned HTTP {}",
                url,
                response.status()
            )));
        }

        let size_hint = response.content_length().filter(|len| *len > 0);
        tracing::debug!(url, size_hint, "media download started");

        let head = stream::iter(size_hint.map(|len| Ok(FetchChunk::SizeHint(len))));
        let body = response
            .bytes_stream()
            .map_ok(FetchChunk::Data)
            .map_err(|e| VidscribeError::source_unavailable(format!("download interrupted: {}", e)));
        Ok(head.chain(body).boxed())
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, locator: &SourceLocator, _kind: MediaKind) -> Result<FetchStream> {
        self.open(locator.as_str()).await
    }
}

/// Fetcher for video pages (YouTube and friends).
///
/// Resolves the page to a direct media URL with `yt-dlp -g`, then streams
/// that URL over HTTP.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    binary: String,
    http: HttpFetcher,
}

impl YtDlpFetcher {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            http: HttpFetcher::new(),
        }
    }

    pub fn with_http(mut self, http: HttpFetcher) -> Self {
        self.http = http;
        self
    }

    fn format_selector(kind: MediaKind) -> &'static str {
        match kind {
            MediaKind::Audio => "bestaudio/best",
            MediaKind::Video => "bestvideo[ext=mp4]/bestvideo/best",
        }
    }

    /// Ask yt-dlp for the direct URL of the selected format.
    pub async fn resolve(&self, locator: &SourceLocator, kind: MediaKind) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(["--no-playlist", "--no-warnings", "-f"])
            .arg(Self::format_selector(kind))
            .arg("-g")
            .arg(locator.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                VidscribeError::source_unavailable(format!("failed to run {}: {}", self.binary, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("no output");
            return Err(VidscribeError::source_unavailable(format!(
                "{} could not resolve {}: {}",
                self.binary, locator, reason
            )));
        }

        parse_resolved_url(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            VidscribeError::source_unavailable(format!("{} returned no media URL", self.binary))
        })
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn fetch(&self, locator: &SourceLocator, kind: MediaKind) -> Result<FetchStream> {
        let url = self.resolve(locator, kind).await?;
        tracing::debug!(%locator, ?kind, "resolved media URL");
        self.http.open(&url).await
    }
}

/// First non-empty line of `yt-dlp -g` output.
fn parse_resolved_url(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("http://") || line.starts_with("https://"))
        .map(str::to_string)
}

/// Build the fetcher selected in the configuration.
pub fn from_config(media: &MediaConfig) -> Arc<dyn MediaFetcher> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("vidscribe/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default();
    let http = HttpFetcher::with_client(client);
    match media.fetcher {
        FetcherKind::Http => Arc::new(http),
        FetcherKind::YtDlp => Arc::new(YtDlpFetcher::new(media.yt_dlp.clone()).with_http(http)),
    }
}

/// Turns byte counts into download percentages.
#[derive(Debug, Default, Clone)]
pub struct DownloadProgress {
    total: Option<u64>,
    received: u64,
    last_percent: u8,
}

impl DownloadProgress {
    pub fn set_total(&mut self, total: u64) {
        self.total = (total > 0).then_some(total);
    }

    /// Count `len` more bytes. Returns the percent when its integer value changed.
    ///
    /// Without a size hint there is nothing to report. Capped at 99.
    pub fn advance(&mut self, len: usize) -> Option<u8> {
        self.received += len as u64;
        let total = self.total?;
        let percent = (self.received.saturating_mul(100) / total).min(99) as u8;
        if percent == self.last_percent {
            return None;
        }
        self.last_percent = percent;
        Some(percent)
    }

    pub fn received(&self) -> u64 {
        self.received
    }
}

/// Drain a fetch into `path`. Returns the number of bytes written.
pub async fn save_stream(mut stream: FetchStream, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        if let FetchChunk::Data(data) = chunk? {
            file.write_all(&data).await?;
            written += data.len() as u64;
        }
    }
    file.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_reports_only_changes() {
        let mut progress = DownloadProgress::default();
        progress.set_total(1000);
        assert_eq!(progress.advance(5), None);
        assert_eq!(progress.advance(5), Some(1));
        assert_eq!(progress.advance(3), None);
        assert_eq!(progress.advance(487), Some(50));
        assert_eq!(progress.advance(500), Some(99));
        assert_eq!(progress.received(), 1000);
    }

    #[test]
    fn progress_without_size_hint_is_silent() {
        let mut progress = DownloadProgress::default();
        assert_eq!(progress.advance(4096), None);
        progress.set_total(0);
        assert_eq!(progress.advance(4096), None);
        assert_eq!(progress.received(), 8192);
    }

    #[test]
    fn parses_first_url_line() {
        let out = "\nhttps://rr1.example.com/videoplayback?x=1\nhttps://rr2.example.com/audio\n";
        assert_eq!(
            parse_resolved_url(out).as_deref(),
            Some("https://rr1.example.com/videoplayback?x=1")
        );
        assert_eq!(parse_resolved_url("WARNING: nothing\n"), None);
    }

    #[test]
    fn format_selectors_by_kind() {
        assert!(YtDlpFetcher::format_selector(MediaKind::Audio).starts_with("bestaudio"));
        assert!(YtDlpFetcher::format_selector(MediaKind::Video).starts_with("bestvideo"));
    }

    #[test]
    fn config_selects_fetcher() {
        let mut media = MediaConfig::default();
        media.fetcher = FetcherKind::Http;
        assert_eq!(from_config(&media).name(), "http");
        media.fetcher = FetcherKind::YtDlp;
        assert_eq!(from_config(&media).name(), "yt-dlp");
    }

    #[tokio::test]
    async fn save_stream_writes_data_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.bin");
        let chunks: Vec<Result<FetchChunk>> = vec![
            Ok(FetchChunk::SizeHint(6)),
            Ok(FetchChunk::Data(Bytes::from_static(b"abc"))),
            Ok(FetchChunk::Data(Bytes::from_static(b"def"))),
        ];
        let written = save_stream(stream::iter(chunks).boxed(), &path).await.unwrap();
        assert_eq!(written, 6);
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn save_stream_propagates_errors() {
        let dir = tempfile::tempdir().unwrap();
        let chunks: Vec<Result<FetchChunk>> = vec![
            Ok(FetchChunk::Data(Bytes::from_static(b"abc"))),
            Err(VidscribeError::source_unavailable("reset")),
        ];
        let err = save_stream(stream::iter(chunks).boxed(), &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, VidscribeError::SourceUnavailable { .. }));
    }
}
