use std::{env, path::PathBuf, time::Duration};

use serde::Serialize;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscodeMode {
    /// ffmpeg reads both remote streams directly.
    Direct,
    /// The source is materialized into the workspace first.
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingAudioPolicy {
    Fail,
    Silence,
}

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub port: u16,
    pub default_resolution: u32,
    pub storage: StorageConfig,
    pub gate: GateConfig,
    pub extractor: ExtractorConfig,
    pub transcoder: TranscoderConfig,
    pub readiness: ReadinessConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageConfig {
    pub hls_root: PathBuf,
    pub mount_prefix: String,
    pub public_base_url: Option<String>,
    pub cookies_file: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct GateConfig {
    pub max_concurrent_sessions: usize,
    /// 0 means any number of requests may wait for a slot.
    pub max_waiting: usize,
    pub wait_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractorConfig {
    pub binary: String,
    /// Bound on one metadata extraction.
    pub timeout: Duration,
    /// Bound on materializing a whole source; `None` waits for completion.
    pub download_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscoderConfig {
    pub binary: String,
    pub mode: TranscodeMode,
    pub missing_audio: MissingAudioPolicy,
    pub user_agent: String,
    pub segment_seconds: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessConfig {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let port = env_u16("PORT", 8000)?;
        let default_resolution = env_u32("DEFAULT_RESOLUTION", 1080)?;
        if default_resolution == 0 {
            return Err(ConfigError::Message(
                "DEFAULT_RESOLUTION must be greater than zero.".into(),
            ));
        }

        Ok(Self {
            port,
            default_resolution,
            storage: StorageConfig::from_env()?,
            gate: GateConfig::from_env()?,
            extractor: ExtractorConfig::from_env()?,
            transcoder: TranscoderConfig::from_env()?,
            readiness: ReadinessConfig::from_env()?,
        })
    }
}

impl StorageConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let hls_root = env::var("HLS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir().join("hls_segments"));
        let mount_prefix = normalize_mount_prefix(
            &env::var("HLS_MOUNT_PREFIX").unwrap_or_else(|_| "/hls".into()),
        )?;
        let public_base_url = env::var("PUBLIC_BASE_URL")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty());
        if let Some(base) = public_base_url.as_deref() {
            let parsed = Url::parse(base)
                .map_err(|err| ConfigError::Message(format!("Invalid PUBLIC_BASE_URL: {err}")))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(ConfigError::Message(
                    "PUBLIC_BASE_URL must use http or https".into(),
                ));
            }
        }
        let cookies_file = env::var("COOKIES_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("yt.txt"));

        Ok(Self {
            hls_root,
            mount_prefix,
            public_base_url,
            cookies_file,
        })
    }
}

impl GateConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let max_concurrent_sessions = env_usize("MAX_CONCURRENT_SESSIONS", 30)?;
        if max_concurrent_sessions == 0 {
            return Err(ConfigError::Message(
                "MAX_CONCURRENT_SESSIONS must be greater than zero.".into(),
            ));
        }
        let max_waiting = env_usize("GATE_MAX_WAITING", 0)?;
        let wait_timeout = optional_millis(env_u64("GATE_WAIT_TIMEOUT_MS", 0)?);
        Ok(Self {
            max_concurrent_sessions,
            max_waiting,
            wait_timeout,
        })
    }
}

impl ExtractorConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let binary = env::var("YTDLP_BINARY").unwrap_or_else(|_| "yt-dlp".into());
        if binary.trim().is_empty() {
            return Err(ConfigError::Message("YTDLP_BINARY cannot be empty.".into()));
        }
        let timeout = Duration::from_millis(env_u64("EXTRACTOR_TIMEOUT_MS", 60_000)?.max(1));
        let download_timeout = optional_millis(env_u64("DOWNLOAD_TIMEOUT_MS", 0)?);
        Ok(Self {
            binary,
            timeout,
            download_timeout,
        })
    }
}

impl TranscoderConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let binary = env::var("FFMPEG_BINARY").unwrap_or_else(|_| "ffmpeg".into());
        if binary.trim().is_empty() {
            return Err(ConfigError::Message("FFMPEG_BINARY cannot be empty.".into()));
        }
        let mode = parse_transcode_mode(env::var("TRANSCODE_MODE").ok().as_deref())?;
        let missing_audio =
            parse_missing_audio_policy(env::var("MISSING_AUDIO_POLICY").ok().as_deref())?;
        let user_agent =
            env::var("TRANSCODE_USER_AGENT").unwrap_or_else(|_| "Mozilla/5.0".to_string());
        if user_agent.trim().is_empty() {
            return Err(ConfigError::Message(
                "TRANSCODE_USER_AGENT cannot be empty.".into(),
            ));
        }
        let segment_seconds = env_u32("HLS_SEGMENT_SECONDS", 4)?.max(1);

        Ok(Self {
            binary,
            mode,
            missing_audio,
            user_agent,
            segment_seconds,
        })
    }
}

impl ReadinessConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let poll_interval =
            Duration::from_millis(env_u64("READINESS_POLL_INTERVAL_MS", 500)?.max(1));
        let max_attempts = env_u32("READINESS_MAX_ATTEMPTS", 20)?.max(1);
        Ok(Self {
            poll_interval,
            max_attempts,
        })
    }
}

/// 0 disables the bound.
fn optional_millis(ms: u64) -> Option<Duration> {
    match ms {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    }
}

fn normalize_mount_prefix(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if !trimmed.starts_with('/') {
        return Err(ConfigError::Message(
            "HLS_MOUNT_PREFIX must start with '/'".into(),
        ));
    }
    if trimmed.len() < 2 {
        return Err(ConfigError::Message(
            "HLS_MOUNT_PREFIX cannot be the root path".into(),
        ));
    }
    Ok(trimmed.to_string())
}

fn parse_transcode_mode(value: Option<&str>) -> Result<TranscodeMode, ConfigError> {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(TranscodeMode::Direct),
        Some(mode) if mode.is_empty() || mode == "direct" => Ok(TranscodeMode::Direct),
        Some(mode) if mode == "download" => Ok(TranscodeMode::Download),
        Some(other) => Err(ConfigError::Message(format!(
            "TRANSCODE_MODE must be 'direct' or 'download', got '{other}'"
        ))),
    }
}

fn parse_missing_audio_policy(value: Option<&str>) -> Result<MissingAudioPolicy, ConfigError> {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(MissingAudioPolicy::Fail),
        Some(policy) if policy.is_empty() || policy == "fail" => Ok(MissingAudioPolicy::Fail),
        Some(policy) if policy == "silence" => Ok(MissingAudioPolicy::Silence),
        Some(other) => Err(ConfigError::Message(format!(
            "MISSING_AUDIO_POLICY must be 'fail' or 'silence', got '{other}'"
        ))),
    }
}

fn env_u16(key: &str, default: u16) -> Result<u16, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Message(format!("{key} must be a valid u16"))),
        Err(_) => Ok(default),
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Message(format!("{key} must be a valid u32"))),
        Err(_) => Ok(default),
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Message(format!("{key} must be a valid u64"))),
        Err(_) => Ok(default),
    }
}

fn env_usize(key: &str, default: usize) -> Result<usize, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Message(format!("{key} must be a valid usize"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_prefix_is_normalized() {
        assert_eq!(normalize_mount_prefix("/hls/").unwrap(), "/hls");
        assert_eq!(normalize_mount_prefix(" /media/hls ").unwrap(), "/media/hls");
        assert!(normalize_mount_prefix("hls").is_err());
        assert!(normalize_mount_prefix("/").is_err());
    }

    #[test]
    fn zero_millis_means_unbounded() {
        assert_eq!(optional_millis(0), None);
        assert_eq!(optional_millis(1500), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn transcode_mode_defaults_to_direct() {
        assert_eq!(parse_transcode_mode(None).unwrap(), TranscodeMode::Direct);
        assert_eq!(
            parse_transcode_mode(Some("Download")).unwrap(),
            TranscodeMode::Download
        );
        assert!(parse_transcode_mode(Some("stream")).is_err());
    }

    #[test]
    fn missing_audio_policy_defaults_to_fail() {
        assert_eq!(
            parse_missing_audio_policy(None).unwrap(),
            MissingAudioPolicy::Fail
        );
        assert_eq!(
            parse_missing_audio_policy(Some("SILENCE")).unwrap(),
            MissingAudioPolicy::Silence
        );
        assert!(parse_missing_audio_policy(Some("mute")).is_err());
    }
}
