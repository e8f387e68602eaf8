use std::{
    io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::config::TranscodeMode;
use crate::logging::Logger;
use crate::selection::{AudioPlan, Selection};
use crate::session::SessionError;
use crate::source::MediaStream;
use crate::workspace::{MANIFEST_FILE, SEGMENT_PATTERN};

const SILENT_AUDIO_SOURCE: &str = "anullsrc=channel_layout=stereo:sample_rate=44100";

/// Per-session inputs to the ffmpeg invocation that do not come from the
/// selected streams themselves.
#[derive(Debug, Clone)]
pub struct TranscodeParams {
    pub segment_seconds: u32,
    pub user_agent: String,
    pub cookie_header: String,
}

/// Fully resolved ffmpeg invocation. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeJob {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub mode: TranscodeMode,
}

struct ArgList(Vec<String>);

impl ArgList {
    fn new() -> Self {
        Self(vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-loglevel".into(),
            "error".into(),
        ])
    }

    fn push(&mut self, values: &[&str]) -> &mut Self {
        self.0.extend(values.iter().map(|value| value.to_string()));
        self
    }

    fn remote_input(&mut self, stream: &MediaStream, params: &TranscodeParams) -> &mut Self {
        let headers = input_headers(stream, params);
        if !headers.is_empty() {
            self.0.push("-headers".into());
            self.0.push(headers);
        }
        self.0.push("-i".into());
        self.0.push(stream.url.clone());
        self
    }

    fn silent_input(&mut self) -> &mut Self {
        self.push(&["-f", "lavfi", "-i", SILENT_AUDIO_SOURCE])
    }

    fn audio_codec(&mut self, synthesized: bool) -> &mut Self {
        if synthesized {
            self.push(&["-c:a", "aac", "-shortest"])
        } else {
            self.push(&["-c:a", "copy"])
        }
    }

    fn hls_output(&mut self, params: &TranscodeParams) -> &mut Self {
        let segment_seconds = params.segment_seconds.to_string();
        self.push(&[
            "-f",
            "hls",
            "-hls_time",
            segment_seconds.as_str(),
            "-hls_list_size",
            "0",
            "-hls_flags",
            "delete_segments+append_list",
            "-hls_segment_filename",
            SEGMENT_PATTERN,
            MANIFEST_FILE,
        ])
    }
}

/// Header block passed to ffmpeg's `-headers` for one remote input: the
/// stream's own headers, the configured user agent when the stream has
/// none, then the credential cookie when there is one.
pub fn input_headers(stream: &MediaStream, params: &TranscodeParams) -> String {
    let mut block = String::new();
    for (name, value) in stream.headers.iter() {
        if name.eq_ignore_ascii_case("cookie") {
            continue;
        }
        block.push_str(&format!("{name}: {value}\r\n"));
    }
    if !stream.headers.contains("user-agent") {
        block.push_str(&format!("User-Agent: {}\r\n", params.user_agent));
    }
    if !params.cookie_header.is_empty() {
        block.push_str(&format!("Cookie: {}\r\n", params.cookie_header));
    }
    block
}

impl TranscodeJob {
    pub fn new(program: &str, args: Vec<String>, working_dir: &Path, mode: TranscodeMode) -> Self {
        Self {
            program: program.to_string(),
            args,
            working_dir: working_dir.to_path_buf(),
            manifest_path: working_dir.join(MANIFEST_FILE),
            mode,
        }
    }

    /// Streams straight from the remote locators, copying video.
    pub fn direct(
        program: &str,
        selection: &Selection,
        params: &TranscodeParams,
        working_dir: &Path,
    ) -> Self {
        let mut args = ArgList::new();
        args.remote_input(&selection.video, params);

        let synthesized = match &selection.audio {
            _ if selection.shares_input() => {
                args.push(&["-map", "0:v:0", "-map", "0:a:0"]);
                false
            }
            AudioPlan::Stream(audio) => {
                args.remote_input(audio, params)
                    .push(&["-map", "0:v:0", "-map", "1:a:0"]);
                false
            }
            AudioPlan::Silence => {
                args.silent_input().push(&["-map", "0:v:0", "-map", "1:a:0"]);
                true
            }
        };

        args.push(&["-c:v", "copy"])
            .audio_codec(synthesized)
            .hls_output(params);

        Self::new(program, args.0, working_dir, TranscodeMode::Direct)
    }

    /// Transcodes a source already materialized inside the workspace.
    pub fn from_local(
        program: &str,
        source: &Path,
        audio: &AudioPlan,
        params: &TranscodeParams,
        working_dir: &Path,
    ) -> Self {
        let mut args = ArgList::new();
        args.0.push("-i".into());
        args.0.push(source.to_string_lossy().into_owned());

        let synthesized = matches!(audio, AudioPlan::Silence);
        if synthesized {
            args.silent_input().push(&["-map", "0:v:0", "-map", "1:a:0"]);
        } else {
            args.push(&["-map", "0:v:0", "-map", "0:a:0"]);
        }

        args.push(&["-c:v", "copy"])
            .audio_codec(synthesized)
            .hls_output(params);

        Self::new(program, args.0, working_dir, TranscodeMode::Download)
    }
}

/// Launches transcode jobs. The spawned process outlives the request; it
/// keeps appending segments after the redirect has been returned.
#[derive(Debug, Clone, Default)]
pub struct Supervisor;

impl Supervisor {
    pub fn new() -> Self {
        Self
    }

    pub fn launch(
        &self,
        job: &TranscodeJob,
        logger: &Logger,
    ) -> Result<TranscodeProcess, SessionError> {
        let mut child = Command::new(&job.program)
            .args(&job.args)
            .current_dir(&job.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| SessionError::LaunchError(format!("{}: {err}", job.program)))?;

        let pid = child.id();
        logger.info(
            "transcoder.launched",
            json!({
                "pid": pid,
                "program": job.program,
                "mode": job.mode,
                "workingDir": job.working_dir.display().to_string(),
            }),
        );

        if let Some(stderr) = child.stderr.take() {
            let stderr_logger = logger.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.trim().is_empty() {
                        continue;
                    }
                    stderr_logger
                        .warn("transcoder.stderr", json!({ "pid": pid, "line": line }));
                }
            });
        }

        Ok(TranscodeProcess {
            child,
            pid,
            logger: logger.clone(),
        })
    }
}

/// Handle on a running transcoder.
#[derive(Debug)]
pub struct TranscodeProcess {
    child: Child,
    pid: Option<u32>,
    logger: Logger,
}

impl TranscodeProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// `Some(status)` once the process has exited.
    pub fn exit_status(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    pub fn has_exited(&mut self) -> bool {
        matches!(self.exit_status(), Ok(Some(_)))
    }

    /// Kills the process and reaps it.
    pub async fn terminate(&mut self) {
        if self.has_exited() {
            return;
        }
        match self.child.kill().await {
            Ok(()) => self
                .logger
                .warn("transcoder.killed", json!({ "pid": self.pid })),
            Err(err) => self.logger.warn(
                "transcoder.kill_failed",
                json!({ "pid": self.pid, "error": err.to_string() }),
            ),
        }
    }

    /// Leaves the process running and reaps it in the background once it
    /// exits on its own.
    pub fn detach(self) {
        let TranscodeProcess {
            mut child,
            pid,
            logger,
        } = self;
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    logger.info("transcoder.finished", json!({ "pid": pid }));
                }
                Ok(status) => logger.warn(
                    "transcoder.exited",
                    json!({ "pid": pid, "status": status.to_string(), "code": status.code() }),
                ),
                Err(err) => logger.error(
                    "transcoder.wait_failed",
                    json!({ "pid": pid, "error": err.to_string() }),
                ),
            }
        });
    }
}
