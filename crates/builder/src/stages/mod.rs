//! Phase planning and execution
//!
//! A build's `phases` configuration is resolved into a [`PhasePlan`]: an
//! ordered list of phases, each with an explicit [`PhaseOverride`]. The
//! plan is then turned into concrete invocations and run by the
//! [`PhaseExecutor`](executor::PhaseExecutor).

pub mod executor;
pub mod runner;

pub use executor::{PhaseExecutor, PhaseRecord, ResolvedPhase};
pub use runner::{CommandOutput, CommandRequest, CommandRunner, ProcessRunner};

use kiln_args::{Fragment, MergedConfig, Value};
use kiln_errors::{ArgsError, BuildError, Error};
use kiln_types::Phase;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A command as written in a recipe: a shell script or an argv list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Shell(String),
    Exec(Vec<String>),
}

impl CommandSpec {
    /// # Errors
    ///
    /// Returns `RecipeError` for an empty argv list.
    pub fn into_invocation(self) -> Result<Invocation, Error> {
        match self {
            Self::Shell(script) => Ok(Invocation::Shell(script)),
            Self::Exec(argv) => {
                let mut argv = argv.into_iter();
                let program = argv.next().ok_or_else(|| BuildError::RecipeError {
                    message: "phase command list is empty".to_string(),
                })?;
                Ok(Invocation::Exec {
                    program,
                    args: argv.collect(),
                })
            }
        }
    }
}

/// A runnable command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Run with `sh -c`
    Shell(String),
    Exec { program: String, args: Vec<String> },
}

impl Invocation {
    #[must_use]
    pub fn exec<S: Into<String>>(program: &str, args: impl IntoIterator<Item = S>) -> Self {
        Self::Exec {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Append arguments; for shell scripts they are quoted onto the last line
    #[must_use]
    pub fn with_args(self, extra: &[String]) -> Self {
        if extra.is_empty() {
            return self;
        }
        match self {
            Self::Shell(mut script) => {
                let trimmed = script.trim_end().len();
                script.truncate(trimmed);
                for arg in extra {
                    script.push(' ');
                    script.push_str(&shell_quote(arg));
                }
                Self::Shell(script)
            }
            Self::Exec { program, mut args } => {
                args.extend(extra.iter().cloned());
                Self::Exec { program, args }
            }
        }
    }

    /// Program and argument vector to spawn
    #[must_use]
    pub fn argv(&self) -> (String, Vec<String>) {
        match self {
            Self::Shell(script) => ("sh".to_string(), vec!["-c".to_string(), script.clone()]),
            Self::Exec { program, args } => (program.clone(), args.clone()),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(script) => f.write_str(script),
            Self::Exec { program, args } => {
                f.write_str(&shell_quote(program))?;
                for arg in args {
                    write!(f, " {}", shell_quote(arg))?;
                }
                Ok(())
            }
        }
    }
}

/// Quote for POSIX sh when needed
#[must_use]
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// How a phase relates to its build system's default
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOverride {
    UseDefault,
    AppendArgs(Vec<String>),
    ReplaceCommand {
        command: CommandSpec,
        args: Vec<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PhaseConfig {
    #[serde(default)]
    command: Option<CommandSpec>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: Option<Value>,
}

/// One phase selected to run
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedPhase {
    pub phase: Phase,
    pub action: PhaseOverride,
    /// Environment given inline in the resolved phase object
    pub env: Option<Fragment>,
}

/// Ordered phases plus the reasons others were left out
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhasePlan {
    pub phases: Vec<PlannedPhase>,
    pub skipped: Vec<(Phase, &'static str)>,
}

impl PhasePlan {
    /// Read `order` and `phases` from a merged build configuration.
    ///
    /// A phase whose entry was removed with `unset` is elided. `check`
    /// only runs when `run_check` is set or the phase is overridden.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` for malformed phase entries and
    /// `InvalidFragment` for unknown phases or an `order` that repeats one.
    pub fn from_config(config: &MergedConfig, run_check: bool) -> Result<Self, Error> {
        if let Some(Value::Object(phases)) = config.get("phases") {
            if let Some(unknown) = phases.keys().find(|name| name.parse::<Phase>().is_err()) {
                return Err(ArgsError::InvalidFragment {
                    message: format!("unknown phase {unknown}"),
                }
                .into());
            }
        }

        let order = match config.get_typed::<Vec<Phase>>("order")? {
            Some(order) => {
                let mut seen = Vec::with_capacity(order.len());
                for phase in &order {
                    if seen.contains(phase) {
                        return Err(ArgsError::InvalidFragment {
                            message: format!("order lists phase {phase} twice"),
                        }
                        .into());
                    }
                    seen.push(*phase);
                }
                order
            }
            None => Phase::CANONICAL.to_vec(),
        };

        let mut plan = Self::default();
        for phase in order {
            let Some(entry) = config.get_typed::<PhaseConfig>(&format!("phases.{phase}"))? else {
                plan.skipped.push((phase, "elided"));
                continue;
            };
            let action = match entry.command {
                Some(command) => PhaseOverride::ReplaceCommand {
                    command,
                    args: entry.args,
                },
                None if !entry.args.is_empty() => PhaseOverride::AppendArgs(entry.args),
                None => PhaseOverride::UseDefault,
            };
            if phase == Phase::Check && !run_check && action == PhaseOverride::UseDefault {
                plan.skipped.push((phase, "checks disabled"));
                continue;
            }
            let env = entry
                .env
                .map(Fragment::from_value)
                .transpose()
                .map_err(Error::from)?;
            plan.phases.push(PlannedPhase { phase, action, env });
        }
        Ok(plan)
    }

    #[must_use]
    pub fn contains(&self, phase: Phase) -> bool {
        self.phases.iter().any(|p| p.phase == phase)
    }
}
