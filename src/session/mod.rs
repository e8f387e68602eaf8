mod error;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::config::{Config, TranscodeMode, TranscoderConfig};
use crate::cookies::load_cookie_header;
use crate::gate::ConcurrencyGate;
use crate::logging::{logger, Logger};
use crate::readiness::ReadinessPoller;
use crate::selection::{select_streams, AudioPlan, Selection};
use crate::source::{MediaExtractor, SourceResolver};
use crate::transcoder::{Supervisor, TranscodeJob, TranscodeParams};
use crate::workspace::{new_session_id, Workspace, WorkspaceManager, MANIFEST_FILE};

pub use error::SessionError;

const DOWNLOAD_TEMPLATE: &str = "source.%(ext)s";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Pending,
    Resolving,
    Selecting,
    Transcoding,
    Ready,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Failed)
    }
}

/// One stream request from admission to its terminal state. Owned by the
/// task that drives it; nothing else mutates it.
#[derive(Debug)]
pub struct Session {
    id: String,
    state: SessionState,
    workspace: Option<PathBuf>,
    created_at: DateTime<Utc>,
    started: Instant,
    logger: Logger,
}

impl Session {
    pub fn new(base: &Logger) -> Self {
        let id = new_session_id();
        let logger = base.scoped(json!({ "sessionId": id }));
        let session = Self {
            id,
            state: SessionState::Pending,
            workspace: None,
            created_at: Utc::now(),
            started: Instant::now(),
            logger,
        };
        session.logger.debug(
            "session.created",
            json!({ "createdAt": session.created_at.to_rfc3339() }),
        );
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn workspace(&self) -> Option<&Path> {
        self.workspace.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Moves forward to `next`. Terminal states and backward moves are
    /// ignored.
    pub fn advance(&mut self, next: SessionState) -> bool {
        if self.state.is_terminal() || next <= self.state {
            return false;
        }
        self.logger.info(
            "session.state",
            json!({
                "from": self.state,
                "to": next,
                "elapsedMs": self.started.elapsed().as_millis() as u64,
            }),
        );
        self.state = next;
        true
    }

    pub fn fail(&mut self, err: &SessionError) {
        if self.state.is_terminal() {
            return;
        }
        self.logger.error(
            "session.failed",
            json!({
                "stage": self.state,
                "kind": err.kind(),
                "error": err.to_string(),
                "elapsedMs": self.started.elapsed().as_millis() as u64,
            }),
        );
        self.state = SessionState::Failed;
    }

    fn attach_workspace(&mut self, dir: &Path) {
        self.workspace = Some(dir.to_path_buf());
    }
}

#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub url: String,
    pub resolution: u32,
}

/// Where a ready playlist can be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedPlaylist {
    pub session_id: String,
    pub location: String,
}

/// Drives a request through gate, resolve, select, allocate, launch and
/// readiness, strictly in that order.
#[derive(Clone)]
pub struct SessionPipeline {
    gate: ConcurrencyGate,
    resolver: SourceResolver,
    workspaces: WorkspaceManager,
    supervisor: Supervisor,
    poller: ReadinessPoller,
    transcoder: TranscoderConfig,
    cookies_file: PathBuf,
    public_base_url: Option<String>,
}

impl SessionPipeline {
    pub fn new(config: &Config, extractor: Arc<dyn MediaExtractor>) -> Self {
        Self {
            gate: ConcurrencyGate::new(config.gate.clone()),
            resolver: SourceResolver::new(extractor),
            workspaces: WorkspaceManager::new(
                config.storage.hls_root.clone(),
                config.storage.mount_prefix.clone(),
            ),
            supervisor: Supervisor::new(),
            poller: ReadinessPoller::from_config(&config.readiness),
            transcoder: config.transcoder.clone(),
            cookies_file: config.storage.cookies_file.clone(),
            public_base_url: config.storage.public_base_url.clone(),
        }
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Runs the session on its own task so a dropped client connection
    /// cannot abort it halfway. A panic inside the pipeline surfaces as
    /// `Internal`.
    pub async fn spawn(
        &self,
        request: StreamRequest,
    ) -> Result<PublishedPlaylist, SessionError> {
        let pipeline = self.clone();
        match tokio::spawn(async move { pipeline.run(request).await }).await {
            Ok(result) => result,
            Err(join) => {
                let message = if join.is_panic() {
                    "session pipeline panicked"
                } else {
                    "session pipeline was cancelled"
                };
                logger().error("session.join_failed", json!({ "error": join.to_string() }));
                Err(SessionError::Internal(message.into()))
            }
        }
    }

    pub async fn run(&self, request: StreamRequest) -> Result<PublishedPlaylist, SessionError> {
        let mut session = Session::new(logger());
        session.logger().info(
            "session.requested",
            json!({ "url": request.url, "resolution": request.resolution }),
        );

        // Held until this function returns, whatever the outcome.
        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(err) => {
                let err = SessionError::from(err);
                session.fail(&err);
                return Err(err);
            }
        };

        match self.drive(&mut session, &request).await {
            Ok(published) => {
                session.advance(SessionState::Ready);
                session.logger().info(
                    "session.published",
                    json!({
                        "location": published.location,
                        "workspace": session.workspace().map(|dir| dir.display().to_string()),
                        "createdAt": session.created_at().to_rfc3339(),
                    }),
                );
                Ok(published)
            }
            Err(err) => {
                session.fail(&err);
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        session: &mut Session,
        request: &StreamRequest,
    ) -> Result<PublishedPlaylist, SessionError> {
        session.advance(SessionState::Resolving);
        let resolved = self.resolver.resolve(&request.url, session.logger()).await?;

        session.advance(SessionState::Selecting);
        let selection = select_streams(
            &resolved.result,
            request.resolution,
            self.transcoder.missing_audio,
        )?;
        log_selection(session.logger(), &selection);

        let workspace = self.workspaces.allocate(session.id()).await?;
        session.attach_workspace(workspace.dir());

        session.advance(SessionState::Transcoding);
        // Locators from an anonymous extraction are fetched without the jar.
        let cookie_header = if resolved.credentialed {
            load_cookie_header(&self.cookies_file).await
        } else {
            String::new()
        };
        let params = TranscodeParams {
            segment_seconds: self.transcoder.segment_seconds,
            user_agent: self.transcoder.user_agent.clone(),
            cookie_header,
        };
        let job = match self.transcoder.mode {
            TranscodeMode::Direct => TranscodeJob::direct(
                &self.transcoder.binary,
                &selection,
                &params,
                workspace.dir(),
            ),
            TranscodeMode::Download => {
                let source = self
                    .materialize(
                        &request.url,
                        &selection,
                        resolved.credentialed,
                        &workspace,
                        session.logger(),
                    )
                    .await?;
                TranscodeJob::from_local(
                    &self.transcoder.binary,
                    &source,
                    &selection.audio,
                    &params,
                    workspace.dir(),
                )
            }
        };

        let mut process = self.supervisor.launch(&job, session.logger())?;
        self.poller
            .wait(&job.manifest_path, &mut process, session.logger())
            .await?;
        session
            .logger()
            .debug("session.transcoder_detached", json!({ "pid": process.pid() }));
        process.detach();

        Ok(PublishedPlaylist {
            session_id: session.id().to_string(),
            location: self.location_for(&workspace),
        })
    }

    /// Downloads the selected formats into the workspace with the same
    /// extractor configuration that resolved the source.
    async fn materialize(
        &self,
        url: &str,
        selection: &Selection,
        credentialed: bool,
        workspace: &Workspace,
        logger: &Logger,
    ) -> Result<PathBuf, SessionError> {
        let template = workspace.dir().join(DOWNLOAD_TEMPLATE);
        let selector = selection.format_selector();
        logger.info(
            "source.download_started",
            json!({ "formats": selector, "credentials": credentialed }),
        );

        let source = self
            .resolver
            .extractor()
            .download(url, &template, &selector, credentialed)
            .await
            .map_err(|err| SessionError::DownloadFailed(err.to_string()))?;

        logger.info(
            "source.download_finished",
            json!({ "path": source.display().to_string() }),
        );
        Ok(source)
    }

    fn location_for(&self, workspace: &Workspace) -> String {
        let path = workspace.public_path(MANIFEST_FILE);
        match self.public_base_url.as_deref() {
            Some(base) => format!("{base}{path}"),
            None => path,
        }
    }
}

fn log_selection(logger: &Logger, selection: &Selection) {
    let audio = match &selection.audio {
        AudioPlan::Stream(stream) => json!({
            "formatId": stream.format_id,
            "bitrate": stream.audio_bitrate,
        }),
        AudioPlan::Silence => json!("silence"),
    };
    logger.info(
        "session.selected",
        json!({
            "video": {
                "formatId": selection.video.format_id,
                "height": selection.video.height,
                "container": selection.video.container,
            },
            "audio": audio,
            "sharedInput": selection.shares_input(),
        }),
    );
}
