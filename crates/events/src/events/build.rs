use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::FailureContext;

/// Which output stream a captured chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Build-specific events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BuildEvent {
    /// A recipe build was requested and its cache key computed
    Started {
        recipe: String,
        version: String,
        key: String,
        build: String,
        host: String,
        target: String,
    },

    /// Another build holds the lock for this key
    LockWaiting { recipe: String, key: String },

    /// The artifact was already cached; no phase ran
    CacheHit {
        recipe: String,
        key: String,
        artifact: String,
    },

    /// A dependency finished (built or cached) and its output is available
    DependencyReady {
        recipe: String,
        dependency: String,
        artifact: String,
    },

    PhaseStarted {
        recipe: String,
        phase: String,
        command: String,
    },

    PhaseCompleted {
        recipe: String,
        phase: String,
        duration: Duration,
    },

    /// Phase elided by the recipe or disabled by default
    PhaseSkipped {
        recipe: String,
        phase: String,
        reason: String,
    },

    /// A line of subprocess output
    Output {
        recipe: String,
        phase: String,
        stream: OutputStream,
        line: String,
    },

    /// A post-build assertion held
    AssertionPassed { recipe: String, check: String },

    Completed {
        recipe: String,
        artifact: String,
        path: PathBuf,
        duration: Duration,
    },

    Failed {
        recipe: String,
        phase: Option<String>,
        failure: FailureContext,
    },
}
