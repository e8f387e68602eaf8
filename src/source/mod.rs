mod models;
mod ytdlp;

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use crate::logging::Logger;
use crate::session::SessionError;

pub use models::{ExtractionResult, MediaStream, RequestHeaders, StreamKind};
pub use ytdlp::YtDlpExtractor;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("failed to start extractor: {0}")]
    Spawn(#[source] io::Error),
    #[error("extractor i/o error: {0}")]
    Io(#[source] io::Error),
    #[error("extractor timed out after {0:?}")]
    TimedOut(Duration),
    #[error("{0}")]
    Failed(String),
    #[error("unreadable extractor output: {0}")]
    Malformed(String),
}

/// Metadata extraction capability (yt-dlp in production).
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn resolve(
        &self,
        url: &str,
        use_credentials: bool,
    ) -> Result<ExtractionResult, ExtractorError>;

    /// Materializes the source locally. `destination_template` may contain
    /// an `%(ext)s` placeholder; the returned path is the file actually written.
    async fn download(
        &self,
        url: &str,
        destination_template: &Path,
        format_selector: &str,
        use_credentials: bool,
    ) -> Result<PathBuf, ExtractorError>;
}

/// Outcome of resolution, remembering which extractor configuration
/// produced it so later calls for the same source reuse it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub result: ExtractionResult,
    pub credentialed: bool,
}

/// Turns a source URL into candidate streams, trying the credentialed
/// configuration first and the anonymous one once if that fails.
#[derive(Clone)]
pub struct SourceResolver {
    extractor: Arc<dyn MediaExtractor>,
}

impl SourceResolver {
    pub fn new(extractor: Arc<dyn MediaExtractor>) -> Self {
        Self { extractor }
    }

    pub fn extractor(&self) -> &Arc<dyn MediaExtractor> {
        &self.extractor
    }

    pub async fn resolve(
        &self,
        url: &str,
        logger: &Logger,
    ) -> Result<Resolved, SessionError> {
        let first = match self.extractor.resolve(url, true).await {
            Ok(result) => {
                logger.debug(
                    "source.resolved",
                    json!({ "credentials": true, "streams": result.streams.len() }),
                );
                return Ok(Resolved {
                    result,
                    credentialed: true,
                });
            }
            Err(err) => err,
        };

        logger.warn(
            "source.credentialed_failed",
            json!({ "url": url, "error": first.to_string() }),
        );

        match self.extractor.resolve(url, false).await {
            Ok(result) => {
                logger.info(
                    "source.resolved",
                    json!({ "credentials": false, "streams": result.streams.len() }),
                );
                Ok(Resolved {
                    result,
                    credentialed: false,
                })
            }
            Err(second) => {
                logger.error(
                    "source.anonymous_failed",
                    json!({ "url": url, "error": second.to_string() }),
                );
                Err(SessionError::ExtractionFailed(second.to_string()))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Scripted extractor recording every call it receives.
    #[derive(Default)]
    pub struct ScriptedExtractor {
        pub credentialed: Option<Result<ExtractionResult, String>>,
        pub anonymous: Option<Result<ExtractionResult, String>>,
        pub calls: Mutex<Vec<bool>>,
        /// Extension of the file a download writes; `None` fails downloads.
        pub download_ext: Option<&'static str>,
        /// Credentialed downloads fail the way stale cookies do.
        pub reject_credentialed_download: bool,
        pub downloads: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl MediaExtractor for ScriptedExtractor {
        async fn resolve(
            &self,
            _url: &str,
            use_credentials: bool,
        ) -> Result<ExtractionResult, ExtractorError> {
            self.calls.lock().unwrap().push(use_credentials);
            let scripted = if use_credentials {
                &self.credentialed
            } else {
                &self.anonymous
            };
            match scripted {
                Some(Ok(result)) => Ok(result.clone()),
                Some(Err(message)) => Err(ExtractorError::Failed(message.clone())),
                None => Err(ExtractorError::Failed("not scripted".into())),
            }
        }

        async fn download(
            &self,
            _url: &str,
            destination_template: &Path,
            _format_selector: &str,
            use_credentials: bool,
        ) -> Result<PathBuf, ExtractorError> {
            self.downloads.lock().unwrap().push(use_credentials);
            if use_credentials && self.reject_credentialed_download {
                return Err(ExtractorError::Failed("cookies rejected".into()));
            }
            let ext = self
                .download_ext
                .ok_or_else(|| ExtractorError::Failed("download not scripted".into()))?;
            let dir = destination_template.parent().unwrap_or(Path::new("."));
            let path = dir.join(format!("source.{ext}"));
            tokio::fs::write(&path, b"media").await.map_err(ExtractorError::Io)?;
            Ok(path)
        }
    }
}
