//! Sequential phase execution

use super::runner::{CommandRequest, CommandRunner};
use super::Invocation;
use crate::environment::Environment;
use kiln_errors::{BuildError, Error};
use kiln_events::{AppEvent, BuildEvent, EventEmitter, EventSender};
use kiln_types::Phase;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A phase with its final command and environment
#[derive(Debug, Clone)]
pub struct ResolvedPhase {
    pub phase: Phase,
    pub invocation: Invocation,
    pub env: Environment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

/// Runs resolved phases one after another in a work directory
pub struct PhaseExecutor<'a> {
    recipe: &'a str,
    runner: &'a dyn CommandRunner,
    cancel: &'a CancellationToken,
    events: Option<EventSender>,
}

impl EventEmitter for PhaseExecutor<'_> {
    fn event_sender(&self) -> Option<&EventSender> {
        self.events.as_ref()
    }

    fn correlation_id(&self) -> Option<&str> {
        Some(self.recipe)
    }
}

impl<'a> PhaseExecutor<'a> {
    #[must_use]
    pub fn new(recipe: &'a str, runner: &'a dyn CommandRunner, cancel: &'a CancellationToken) -> Self {
        Self {
            recipe,
            runner,
            cancel,
            events: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: Option<EventSender>) -> Self {
        self.events = events;
        self
    }

    /// Run every phase in order, stopping at the first failure.
    ///
    /// Cancellation is observed before each phase and while a phase runs.
    ///
    /// # Errors
    ///
    /// Returns `PhaseFailure` for a non-zero exit, `Cancelled` once the
    /// token fires, or whatever the runner reports.
    pub async fn run(&self, phases: &[ResolvedPhase], work_dir: &Path) -> Result<Vec<PhaseRecord>, Error> {
        let mut records = Vec::with_capacity(phases.len());
        for resolved in phases {
            if self.cancel.is_cancelled() {
                return Err(BuildError::Cancelled {
                    phase: resolved.phase.to_string(),
                }
                .into());
            }

            let (program, args) = resolved.invocation.argv();
            let request = CommandRequest {
                recipe: self.recipe.to_string(),
                phase: resolved.phase,
                program,
                args,
                cwd: work_dir.to_path_buf(),
                env: resolved.env.clone().into_map(),
            };

            self.emit_phase_started(self.recipe, resolved.phase.as_str(), resolved.invocation.to_string());
            let started = Instant::now();
            let output = self.runner.run(&request, self.cancel).await?;
            let duration = started.elapsed();

            if !output.success() {
                return Err(BuildError::PhaseFailure {
                    phase: resolved.phase.to_string(),
                    exit_code: output.exit_code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                }
                .into());
            }

            self.emit_phase_completed(self.recipe, resolved.phase.as_str(), duration);
            records.push(PhaseRecord {
                phase: resolved.phase,
                exit_code: output.exit_code,
                duration,
            });
        }
        Ok(records)
    }

    /// Report a phase that will not run
    pub fn skip(&self, phase: Phase, reason: &str) {
        self.emit(AppEvent::Build(BuildEvent::PhaseSkipped {
            recipe: self.recipe.to_string(),
            phase: phase.to_string(),
            reason: reason.to_string(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::runner::CommandOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Scripted {
        seen: Mutex<Vec<Phase>>,
        fail_at: Option<Phase>,
        cancel_after: Option<(Phase, CancellationToken)>,
    }

    #[async_trait]
    impl CommandRunner for Scripted {
        async fn run(&self, request: &CommandRequest, _: &CancellationToken) -> Result<CommandOutput, Error> {
            self.seen.lock().unwrap().push(request.phase);
            if let Some((phase, token)) = &self.cancel_after {
                if *phase == request.phase {
                    token.cancel();
                }
            }
            let exit_code = if self.fail_at == Some(request.phase) { 2 } else { 0 };
            Ok(CommandOutput {
                exit_code: Some(exit_code),
                stdout: String::new(),
                stderr: "boom\n".into(),
            })
        }
    }

    fn phases(list: &[Phase]) -> Vec<ResolvedPhase> {
        list.iter()
            .map(|phase| ResolvedPhase {
                phase: *phase,
                invocation: Invocation::exec("true", Vec::<String>::new()),
                env: Environment::default(),
            })
            .collect()
    }

    #[tokio::test]
    async fn stops_at_first_failure() {
        let runner = Scripted {
            fail_at: Some(Phase::Build),
            ..Scripted::default()
        };
        let cancel = CancellationToken::new();
        let err = PhaseExecutor::new("demo@1", &runner, &cancel)
            .run(&phases(&[Phase::Configure, Phase::Build, Phase::Install]), Path::new("/"))
            .await
            .unwrap_err();
        match err {
            Error::Build(BuildError::PhaseFailure { phase, exit_code, stderr, .. }) => {
                assert_eq!(phase, "build");
                assert_eq!(exit_code, Some(2));
                assert_eq!(stderr, "boom\n");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*runner.seen.lock().unwrap(), vec![Phase::Configure, Phase::Build]);
    }

    #[tokio::test]
    async fn cancellation_is_checked_between_phases() {
        let cancel = CancellationToken::new();
        let runner = Scripted {
            cancel_after: Some((Phase::Configure, cancel.clone())),
            ..Scripted::default()
        };
        let err = PhaseExecutor::new("demo@1", &runner, &cancel)
            .run(&phases(&[Phase::Configure, Phase::Build]), Path::new("/"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Build(BuildError::Cancelled { ref phase }) if phase == "build"));
        assert_eq!(*runner.seen.lock().unwrap(), vec![Phase::Configure]);
    }

    #[tokio::test]
    async fn emits_phase_events() {
        let (tx, mut rx) = kiln_events::channel();
        let runner = Scripted::default();
        let cancel = CancellationToken::new();
        let executor = PhaseExecutor::new("demo@1", &runner, &cancel).with_events(Some(tx));
        executor.skip(Phase::Check, "checks disabled");
        let records = executor
            .run(&phases(&[Phase::Build]), Path::new("/"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        drop(executor);

        let mut kinds = Vec::new();
        while let Some(message) = rx.recv().await {
            assert_eq!(message.meta.correlation_id.as_deref(), Some("demo@1"));
            if let AppEvent::Build(event) = message.event {
                kinds.push(match event {
                    BuildEvent::PhaseSkipped { .. } => "skipped",
                    BuildEvent::PhaseStarted { .. } => "started",
                    BuildEvent::PhaseCompleted { .. } => "completed",
                    _ => "other",
                });
            }
        }
        assert_eq!(kinds, vec!["skipped", "started", "completed"]);
    }
}
