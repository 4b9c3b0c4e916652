use serde::{Deserialize, Serialize};

use crate::EventSource;
use kiln_errors::UserFacingError;

/// Structured failure information shared across domains
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub retryable: bool,
}

impl FailureContext {
    /// Build failure context from a `UserFacingError` implementation
    #[must_use]
    pub fn from_error<E: UserFacingError + ?Sized>(error: &E) -> Self {
        Self {
            code: error.user_code().map(str::to_string),
            message: error.user_message().into_owned(),
            hint: error.user_hint().map(str::to_string),
            retryable: error.is_retryable(),
        }
    }
}

pub mod build;
pub mod fetch;
pub mod general;

pub use build::*;
pub use fetch::*;
pub use general::*;

/// Top-level application event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum AppEvent {
    /// Warnings, errors and generic operations
    General(GeneralEvent),

    /// Recipe builds: phases, cache hits, dependencies
    Build(BuildEvent),

    /// Source downloads and verification
    Fetch(FetchEvent),
}

impl AppEvent {
    #[must_use]
    pub fn event_source(&self) -> EventSource {
        match self {
            Self::General(_) => EventSource::GENERAL,
            Self::Build(_) => EventSource::BUILD,
            Self::Fetch(_) => EventSource::FETCH,
        }
    }

    /// Determine the appropriate tracing log level for this event
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;

        match self {
            Self::Build(BuildEvent::Failed { .. })
            | Self::Fetch(FetchEvent::Failed { .. }) => Level::ERROR,

            Self::General(GeneralEvent::Warning { .. }) => Level::WARN,

            Self::General(GeneralEvent::DebugLog { .. })
            | Self::Build(
                BuildEvent::PhaseSkipped { .. }
                | BuildEvent::LockWaiting { .. }
                | BuildEvent::Output { .. },
            )
            | Self::Fetch(FetchEvent::Progress { .. }) => Level::DEBUG,

            _ => Level::INFO,
        }
    }

    /// Log target for structured logging
    #[must_use]
    pub fn log_target(&self) -> &'static str {
        match self {
            Self::General(_) => "kiln::events::general",
            Self::Build(_) => "kiln::events::build",
            Self::Fetch(_) => "kiln::events::fetch",
        }
    }
}
