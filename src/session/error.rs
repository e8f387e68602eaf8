use axum::http::StatusCode;
use thiserror::Error;

use crate::gate::GateError;

/// Every way a stream request can end without a playlist.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Too many concurrent streams, try again later")]
    TooBusy,
    #[error("{0}")]
    ExtractionFailed(String),
    #[error("No {resolution}p video stream available")]
    NoMatchingFormat { resolution: u32 },
    #[error("No audio stream available")]
    NoAudioStream,
    #[error("Failed to create session workspace: {0}")]
    WorkspaceError(String),
    #[error("Failed to start transcoder: {0}")]
    LaunchError(String),
    #[error("Failed to download source: {0}")]
    DownloadFailed(String),
    #[error("HLS playlist generation failed")]
    PlaylistTimeout,
    #[error("Transcoder exited before producing a playlist ({status})")]
    TranscoderExited { status: String },
    #[error("{0}")]
    Internal(String),
}

impl SessionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SessionError::BadRequest(_) => StatusCode::BAD_REQUEST,
            SessionError::TooBusy => StatusCode::SERVICE_UNAVAILABLE,
            SessionError::NoMatchingFormat { .. } | SessionError::NoAudioStream => {
                StatusCode::NOT_FOUND
            }
            SessionError::ExtractionFailed(_)
            | SessionError::WorkspaceError(_)
            | SessionError::LaunchError(_)
            | SessionError::DownloadFailed(_)
            | SessionError::PlaylistTimeout
            | SessionError::TranscoderExited { .. }
            | SessionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable identifier used in log events.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::BadRequest(_) => "bad_request",
            SessionError::TooBusy => "too_busy",
            SessionError::ExtractionFailed(_) => "extraction_failed",
            SessionError::NoMatchingFormat { .. } => "no_matching_format",
            SessionError::NoAudioStream => "no_audio_stream",
            SessionError::WorkspaceError(_) => "workspace_error",
            SessionError::LaunchError(_) => "launch_error",
            SessionError::DownloadFailed(_) => "download_failed",
            SessionError::PlaylistTimeout => "playlist_timeout",
            SessionError::TranscoderExited { .. } => "transcoder_exited",
            SessionError::Internal(_) => "internal",
        }
    }
}

impl From<GateError> for SessionError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::TooBusy => SessionError::TooBusy,
            GateError::Closed => SessionError::Internal("concurrency gate closed".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_errors_to_statuses() {
        assert_eq!(
            SessionError::NoMatchingFormat { resolution: 720 }.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(SessionError::TooBusy.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            SessionError::PlaylistTimeout.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            SessionError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn messages_match_client_facing_text() {
        assert_eq!(
            SessionError::NoMatchingFormat { resolution: 1080 }.to_string(),
            "No 1080p video stream available"
        );
        assert_eq!(
            SessionError::PlaylistTimeout.to_string(),
            "HLS playlist generation failed"
        );
        assert_eq!(
            SessionError::ExtractionFailed("ERROR: private video".into()).to_string(),
            "ERROR: private video"
        );
    }
}
