//! Subprocess execution behind a trait seam

use async_trait::async_trait;
use kiln_errors::{BuildError, Error};
use kiln_events::{AppEvent, BuildEvent, EventEmitter, EventSender, OutputStream};
use kiln_types::Phase;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Everything needed to spawn one phase command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub recipe: String,
    pub phase: Phase,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Complete environment; the parent environment is not inherited
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs phase commands
///
/// Implementations must return `BuildError::Cancelled` promptly once the
/// token fires and must not leave the child running.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        request: &CommandRequest,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, Error>;
}

/// Spawns real processes with tokio
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    events: Option<EventSender>,
}

impl ProcessRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward each output line as a build event
    #[must_use]
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }
}

impl EventEmitter for ProcessRunner {
    fn event_sender(&self) -> Option<&EventSender> {
        self.events.as_ref()
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        request: &CommandRequest,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, Error> {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled {
                phase: request.phase.to_string(),
            }
            .into());
        }

        let mut child = Command::new(&request.program)
            .args(&request.args)
            .current_dir(&request.cwd)
            .env_clear()
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BuildError::SpawnFailed {
                command: request.program.clone(),
                message: e.to_string(),
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let completed = async {
            let (out, err, status) = tokio::join!(
                self.collect(request, stdout, OutputStream::Stdout),
                self.collect(request, stderr, OutputStream::Stderr),
                child.wait(),
            );
            let status = status?;
            Ok::<_, Error>(CommandOutput {
                exit_code: status.code(),
                stdout: out?,
                stderr: err?,
            })
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(BuildError::Cancelled {
                phase: request.phase.to_string(),
            }
            .into()),
            output = completed => output,
        }
    }
}

impl ProcessRunner {
    async fn collect<R: AsyncRead + Unpin>(
        &self,
        request: &CommandRequest,
        reader: Option<R>,
        stream: OutputStream,
    ) -> Result<String, Error> {
        let Some(reader) = reader else {
            return Ok(String::new());
        };
        // Tools may print bytes that are not UTF-8; keep them lossily
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut captured = String::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            }
            let line = String::from_utf8_lossy(&buf).into_owned();
            captured.push_str(&line);
            captured.push('\n');
            self.emit(AppEvent::Build(BuildEvent::Output {
                recipe: request.recipe.clone(),
                phase: request.phase.to_string(),
                stream,
                line,
            }));
        }
        Ok(captured)
    }
}
