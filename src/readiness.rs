use std::{path::Path, time::Duration};

use serde_json::json;
use tokio::time::sleep;

use crate::config::ReadinessConfig;
use crate::logging::Logger;
use crate::session::SessionError;
use crate::transcoder::TranscodeProcess;

/// Waits for the transcoder's manifest to show up on disk. Existence of the
/// manifest is the only readiness signal.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessPoller {
    interval: Duration,
    max_attempts: u32,
}

impl ReadinessPoller {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &ReadinessConfig) -> Self {
        Self::new(config.poll_interval, config.max_attempts)
    }

    pub fn deadline(&self) -> Duration {
        self.interval * self.max_attempts
    }

    /// Polls every `interval` until `manifest` exists. Once the attempts are
    /// used up the process is killed and `PlaylistTimeout` is returned. A
    /// process that already exited non-zero without producing a manifest
    /// fails the wait early.
    pub async fn wait(
        &self,
        manifest: &Path,
        process: &mut TranscodeProcess,
        logger: &Logger,
    ) -> Result<(), SessionError> {
        for attempt in 1..=self.max_attempts {
            if manifest_exists(manifest).await {
                logger.info("readiness.manifest_ready", json!({ "attempt": attempt }));
                return Ok(());
            }

            match process.exit_status() {
                Ok(Some(status)) if !status.success() => {
                    // Output written just before the exit still counts.
                    if manifest_exists(manifest).await {
                        return Ok(());
                    }
                    logger.error(
                        "readiness.transcoder_exited",
                        json!({ "attempt": attempt, "status": status.to_string() }),
                    );
                    return Err(SessionError::TranscoderExited {
                        status: status.to_string(),
                    });
                }
                Ok(_) => {}
                Err(err) => logger.warn(
                    "readiness.status_unavailable",
                    json!({ "error": err.to_string() }),
                ),
            }

            sleep(self.interval).await;
        }

        if manifest_exists(manifest).await {
            logger.info(
                "readiness.manifest_ready",
                json!({ "attempt": self.max_attempts }),
            );
            return Ok(());
        }

        logger.error(
            "readiness.timeout",
            json!({
                "attempts": self.max_attempts,
                "waitedMs": self.deadline().as_millis() as u64,
            }),
        );
        process.terminate().await;
        Err(SessionError::PlaylistTimeout)
    }
}

async fn manifest_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::config::TranscodeMode;
    use crate::logging::logger;
    use crate::transcoder::{Supervisor, TranscodeJob};
    use crate::workspace::MANIFEST_FILE;

    fn spawn(dir: &Path, script: &str) -> TranscodeProcess {
        let job = TranscodeJob::new(
            "sh",
            vec!["-c".into(), script.into()],
            dir,
            TranscodeMode::Direct,
        );
        Supervisor::new().launch(&job, logger()).unwrap()
    }

    #[tokio::test]
    async fn reports_ready_as_soon_as_manifest_appears() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = spawn(dir.path(), "sleep 0.15; touch index.m3u8; sleep 30");
        let poller = ReadinessPoller::new(Duration::from_millis(50), 40);

        let started = Instant::now();
        poller
            .wait(&dir.path().join(MANIFEST_FILE), &mut process, logger())
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_millis(1500));
        assert!(!process.has_exited());
        process.terminate().await;
    }

    #[tokio::test]
    async fn missing_manifest_times_out_and_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = spawn(dir.path(), "sleep 30");
        let poller = ReadinessPoller::new(Duration::from_millis(20), 10);

        let started = Instant::now();
        let err = poller
            .wait(&dir.path().join(MANIFEST_FILE), &mut process, logger())
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::PlaylistTimeout));
        assert!(started.elapsed() >= poller.deadline());
        assert!(process.has_exited());
    }

    #[tokio::test]
    async fn failed_process_ends_the_wait_early() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = spawn(dir.path(), "exit 3");
        let poller = ReadinessPoller::new(Duration::from_millis(20), 500);

        let started = Instant::now();
        let err = poller
            .wait(&dir.path().join(MANIFEST_FILE), &mut process, logger())
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::TranscoderExited { .. }));
        assert!(started.elapsed() < poller.deadline());
    }

    #[tokio::test]
    async fn clean_exit_without_manifest_still_waits_for_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = spawn(dir.path(), "exit 0");
        let poller = ReadinessPoller::new(Duration::from_millis(10), 5);

        let err = poller
            .wait(&dir.path().join(MANIFEST_FILE), &mut process, logger())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::PlaylistTimeout));
    }
}
