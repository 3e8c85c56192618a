use std::ffi::OsStr;
use std::io::Read;
use std::time::Duration;

use tracing::{debug, info};
use url::Url;

use crate::config::DownloadConfig;
use crate::error::StageError;
use crate::sanitize::redact_url;
use crate::stages::tools::ToolRunner;
use crate::stages::Downloader;
use crate::storage::{ArtifactKind, ArtifactRef, ArtifactStore};

/// Validates a caller-supplied source URL against the allowed schemes.
pub fn parse_source_url(raw: &str, allowed_schemes: &[String]) -> Result<Url, StageError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(StageError::InvalidUrl("URL is empty".to_string()));
    }

    let url = Url::parse(trimmed)
        .map_err(|e| StageError::InvalidUrl(format!("{}: {}", redact_url(trimmed), e)))?;

    if !allowed_schemes
        .iter()
        .any(|scheme| scheme.eq_ignore_ascii_case(url.scheme()))
    {
        return Err(StageError::InvalidUrl(format!(
            "scheme '{}' is not allowed",
            url.scheme()
        )));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(StageError::InvalidUrl(format!(
            "{} has no host",
            redact_url(trimmed)
        )));
    }

    Ok(url)
}

/// Streams the source over HTTP(S) with a size limit.
pub struct HttpDownloader {
    client: reqwest::blocking::Client,
    max_bytes: u64,
}

impl HttpDownloader {
    pub fn new(config: &DownloadConfig) -> Result<Self, StageError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StageError::Fetch(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_bytes: config.max_bytes,
        })
    }
}

impl Downloader for HttpDownloader {
    fn run(
        &self,
        job_id: &str,
        source: &Url,
        store: &ArtifactStore,
    ) -> Result<ArtifactRef, StageError> {
        let display_url = redact_url(source.as_str());
        debug!(url = %display_url, "Requesting source video");

        let response = self
            .client
            .get(source.clone())
            .send()
            .map_err(|e| StageError::Fetch(format!("request to {} failed: {}", display_url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StageError::Fetch(format!(
                "{} returned HTTP {}",
                display_url, status
            )));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(StageError::Fetch(format!(
                    "source is {} bytes, limit is {}",
                    length, self.max_bytes
                )));
            }
        }

        let mut staged = store.stage(job_id, ArtifactKind::Source)?;
        // One byte past the limit tells an oversized body from an exact fit.
        let mut body = response.take(self.max_bytes.saturating_add(1));
        let copied = std::io::copy(&mut body, staged.writer())
            .map_err(|e| StageError::Fetch(format!("reading {} failed: {}", display_url, e)))?;

        if copied > self.max_bytes {
            return Err(StageError::Fetch(format!(
                "source exceeds the {} byte limit",
                self.max_bytes
            )));
        }
        if copied == 0 {
            return Err(StageError::Fetch(format!("{} returned an empty body", display_url)));
        }

        let artifact = staged.commit()?;
        info!(bytes = copied, "Downloaded source video");
        Ok(artifact)
    }
}

/// Delegates to `yt-dlp`, which handles hosting sites as well as direct
/// links.
pub struct YtDlpDownloader {
    runner: ToolRunner,
}

impl YtDlpDownloader {
    pub fn new(config: &DownloadConfig) -> Self {
        Self {
            runner: ToolRunner::new(&config.yt_dlp_path),
        }
    }
}

impl Downloader for YtDlpDownloader {
    fn run(
        &self,
        job_id: &str,
        source: &Url,
        store: &ArtifactStore,
    ) -> Result<ArtifactRef, StageError> {
        let staged = store.stage(job_id, ArtifactKind::Source)?;

        // The staged file already exists, so overwriting must be allowed.
        self.runner
            .run([
                OsStr::new(source.as_str()),
                OsStr::new("-o"),
                staged.path().as_os_str(),
                OsStr::new("--format"),
                OsStr::new("mp4"),
                OsStr::new("--restrict-filenames"),
                OsStr::new("--no-playlist"),
                OsStr::new("--force-overwrites"),
                OsStr::new("--no-part"),
                OsStr::new("--quiet"),
            ])
            .map_err(|e| StageError::Fetch(e.to_string()))?;

        let artifact = staged.commit()?;
        info!(url = %redact_url(source.as_str()), "Downloaded source video with yt-dlp");
        Ok(artifact)
    }
}
