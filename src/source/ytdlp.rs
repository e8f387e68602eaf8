use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tokio::time::timeout;

use super::models::{ExtractionResult, MediaStream, StreamKind};
use super::{ExtractorError, MediaExtractor};
use crate::config::ExtractorConfig;
use crate::logging::logger;

const STDERR_EXCERPT_CHARS: usize = 400;

/// `MediaExtractor` backed by the `yt-dlp` command line tool.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    config: ExtractorConfig,
    cookies_file: PathBuf,
}

impl YtDlpExtractor {
    pub fn new(config: ExtractorConfig, cookies_file: PathBuf) -> Self {
        Self {
            config,
            cookies_file,
        }
    }

    fn base_command(&self) -> Command {
        let mut command = Command::new(&self.config.binary);
        command
            .arg("--no-warnings")
            .arg("--no-check-certificate")
            .arg("--geo-bypass")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// yt-dlp rewrites its cookie jar on exit, so each credentialed call gets
    /// a private copy and the shared file stays untouched.
    async fn credential_copy(&self) -> Result<Option<NamedTempFile>, ExtractorError> {
        match tokio::fs::try_exists(&self.cookies_file).await {
            Ok(true) => {}
            _ => {
                logger().debug(
                    "source.cookies_unavailable",
                    json!({ "path": self.cookies_file.display().to_string() }),
                );
                return Ok(None);
            }
        }
        let copy = NamedTempFile::new().map_err(ExtractorError::Io)?;
        tokio::fs::copy(&self.cookies_file, copy.path())
            .await
            .map_err(ExtractorError::Io)?;
        Ok(Some(copy))
    }

    async fn run(
        &self,
        mut command: Command,
        limit: Option<Duration>,
    ) -> Result<Vec<u8>, ExtractorError> {
        let output = match limit {
            Some(limit) => timeout(limit, command.output())
                .await
                .map_err(|_| ExtractorError::TimedOut(limit))?,
            None => command.output().await,
        }
        .map_err(ExtractorError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractorError::Failed(excerpt(stderr.trim())));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn resolve(
        &self,
        url: &str,
        use_credentials: bool,
    ) -> Result<ExtractionResult, ExtractorError> {
        let credentials = if use_credentials {
            self.credential_copy().await?
        } else {
            None
        };

        let mut command = self.base_command();
        command.arg("--dump-single-json").arg("--no-playlist");
        if let Some(jar) = credentials.as_ref() {
            command.arg("--cookies").arg(jar.path());
        }
        command.arg("--").arg(url);

        let stdout = self.run(command, Some(self.config.timeout)).await?;
        parse_info_json(&stdout)
    }

    async fn download(
        &self,
        url: &str,
        destination_template: &Path,
        format_selector: &str,
        use_credentials: bool,
    ) -> Result<PathBuf, ExtractorError> {
        let credentials = if use_credentials {
            self.credential_copy().await?
        } else {
            None
        };

        let mut command = self.base_command();
        command
            .arg("--no-playlist")
            .arg("--no-progress")
            .arg("-f")
            .arg(format_selector)
            .arg("-o")
            .arg(destination_template)
            .arg("--print")
            .arg("after_move:filepath");
        if let Some(jar) = credentials.as_ref() {
            command.arg("--cookies").arg(jar.path());
        }
        command.arg("--").arg(url);

        let stdout = self.run(command, self.config.download_timeout).await?;
        String::from_utf8_lossy(&stdout)
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| ExtractorError::Failed("downloader reported no output file".into()))
    }
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    formats: Option<Vec<RawFormat>>,
    #[serde(flatten)]
    single: RawFormat,
}

#[derive(Debug, Default, Deserialize)]
struct RawFormat {
    format_id: Option<String>,
    url: Option<String>,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<u32>,
    abr: Option<f64>,
    http_headers: Option<BTreeMap<String, String>>,
}

pub(crate) fn parse_info_json(bytes: &[u8]) -> Result<ExtractionResult, ExtractorError> {
    let raw: RawInfo = serde_json::from_slice(bytes)
        .map_err(|err| ExtractorError::Malformed(err.to_string()))?;

    // Single-format sources report the stream at the top level.
    let formats = match raw.formats {
        Some(formats) if !formats.is_empty() => formats,
        _ => vec![raw.single],
    };

    let streams = formats
        .into_iter()
        .enumerate()
        .filter_map(|(idx, format)| into_media_stream(idx, format))
        .collect();

    Ok(ExtractionResult {
        id: raw.id,
        title: raw.title,
        duration: raw.duration,
        streams,
    })
}

fn into_media_stream(idx: usize, raw: RawFormat) -> Option<MediaStream> {
    let url = raw.url.filter(|url| !url.trim().is_empty())?;
    let video_codec = normalize_codec(raw.vcodec.as_deref());
    let audio_codec = normalize_codec(raw.acodec.as_deref());

    // An unreported vcodec still means video when a height is present.
    let has_video = match raw.vcodec.as_deref() {
        Some(_) => video_codec.is_some(),
        None => raw.height.is_some(),
    };
    let has_audio = audio_codec.is_some();

    let kind = match (has_video, has_audio) {
        (true, true) => StreamKind::Muxed,
        (true, false) => StreamKind::VideoOnly,
        (false, true) => StreamKind::AudioOnly,
        (false, false) => return None,
    };

    Some(MediaStream {
        format_id: raw.format_id.unwrap_or_else(|| idx.to_string()),
        kind,
        container: raw.ext.unwrap_or_default(),
        video_codec,
        audio_codec,
        height: raw.height,
        audio_bitrate: raw.abr,
        url,
        headers: raw.http_headers.unwrap_or_default().into_iter().collect(),
    })
}

fn normalize_codec(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|codec| !codec.is_empty() && !codec.eq_ignore_ascii_case("none"))
        .map(str::to_string)
}

fn excerpt(message: &str) -> String {
    let last_line = message.lines().rev().find(|line| !line.trim().is_empty());
    let text = last_line.unwrap_or(message);
    if text.chars().count() <= STDERR_EXCERPT_CHARS {
        return text.to_string();
    }
    text.chars().take(STDERR_EXCERPT_CHARS).collect()
}
