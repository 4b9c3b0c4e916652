//! Build engine error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum BuildError {
    /// A phase command exited unsuccessfully
    #[error("phase {phase} failed with exit code {}: {}", display_code(*exit_code), tail(stderr, stdout))]
    PhaseFailure {
        phase: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("host {host} is not supported (supported: {})", supported.join(", "))]
    UnsupportedHost { host: String, supported: Vec<String> },

    #[error("missing dependency: {name}")]
    MissingDependency { name: String },

    #[error("dependency cycle: {}", cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("recipe error: {message}")]
    RecipeError { message: String },

    #[error("extraction failed: {message}")]
    ExtractionFailed { message: String },

    #[error("unsupported archive format: {format}")]
    UnsupportedArchiveFormat { format: String },

    #[error("no build system detected in {path}")]
    NoBuildSystemDetected { path: String },

    #[error("command could not be started: {command}: {message}")]
    SpawnFailed { command: String, message: String },

    #[error("build cancelled before phase {phase}")]
    Cancelled { phase: String },

    #[error("assertion failed for {artifact}: {message}")]
    AssertionFailed { artifact: String, message: String },
}

fn display_code(code: Option<i32>) -> String {
    code.map_or_else(|| "none (terminated by signal)".to_string(), |c| c.to_string())
}

/// Last few lines of captured output, preferring stderr
fn tail(stderr: &str, stdout: &str) -> String {
    let source = if stderr.trim().is_empty() { stdout } else { stderr };
    let lines: Vec<&str> = source.lines().collect();
    let start = lines.len().saturating_sub(10);
    lines[start..].join("\n")
}

impl UserFacingError for BuildError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::MissingDependency { .. } => {
                Some("Add the dependency's recipe to the recipe book or fix its name.")
            }
            Self::DependencyCycle { .. } => Some("Break the cycle between the listed recipes."),
            Self::UnsupportedHost { .. } => {
                Some("Build for one of the supported hosts or extend the recipe's host list.")
            }
            Self::RecipeError { .. } => Some("Correct the recipe definition before retrying."),
            Self::PhaseFailure { .. } => {
                Some("Inspect the captured output above; rerun with --keep-work to debug.")
            }
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::PhaseFailure { .. } => "build.phase_failure",
            Self::UnsupportedHost { .. } => "build.unsupported_host",
            Self::MissingDependency { .. } => "build.missing_dependency",
            Self::DependencyCycle { .. } => "build.dependency_cycle",
            Self::RecipeError { .. } => "build.recipe_error",
            Self::ExtractionFailed { .. } => "build.extraction_failed",
            Self::UnsupportedArchiveFormat { .. } => "build.unsupported_archive_format",
            Self::NoBuildSystemDetected { .. } => "build.no_build_system_detected",
            Self::SpawnFailed { .. } => "build.spawn_failed",
            Self::Cancelled { .. } => "build.cancelled",
            Self::AssertionFailed { .. } => "build.assertion_failed",
        };
        Some(code)
    }
}
