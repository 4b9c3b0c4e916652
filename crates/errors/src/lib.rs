#![warn(mismatched_lifetime_syntaxes)]
#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Error types for the kiln build engine
//!
//! This crate provides fine-grained error types organized by domain.
//! All error types implement Clone so they can be shared between tasks
//! that await the same memoized build or fetch.

use std::borrow::Cow;

use thiserror::Error;

pub mod args;
pub mod build;
pub mod config;
pub mod environment;
pub mod network;
pub mod storage;

// Re-export all error types at the root
pub use args::ArgsError;
pub use build::BuildError;
pub use config::ConfigError;
pub use environment::EnvironmentError;
pub use network::NetworkError;
pub use storage::StorageError;

/// Generic error type for cross-crate boundaries
#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Error {
    #[error("argument error: {0}")]
    Args(#[from] ArgsError),

    #[error("environment error: {0}")]
    Environment(#[from] EnvironmentError),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("build error: {0}")]
    Build(#[from] BuildError),

    /// Failure attributed to a recipe and, when known, one of its phases
    #[error("{}", recipe_context(recipe, phase.as_deref(), source))]
    Recipe {
        recipe: String,
        phase: Option<String>,
        source: Box<Error>,
    },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {message}")]
    Io {
        #[cfg_attr(feature = "serde", serde(with = "io_kind_as_str"))]
        kind: std::io::ErrorKind,
        message: String,
        path: Option<std::path::PathBuf>,
    },
}

fn recipe_context(recipe: &str, phase: Option<&str>, source: &Error) -> String {
    match phase {
        Some(phase) => format!("recipe {recipe}, phase {phase}: {source}"),
        None => format!("recipe {recipe}: {source}"),
    }
}

impl Error {
    /// Create an internal error with a message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an Io error with an associated path
    pub fn io_with_path(err: &std::io::Error, path: impl Into<std::path::PathBuf>) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
            path: Some(path.into()),
        }
    }

    /// Attribute this error to a recipe.
    ///
    /// Errors that already carry a recipe context are returned unchanged so the
    /// innermost (most specific) recipe stays visible.
    #[must_use]
    pub fn in_recipe(self, recipe: impl Into<String>) -> Self {
        match self {
            Self::Recipe { .. } => self,
            other => {
                let phase = other.phase().map(str::to_string);
                Self::Recipe {
                    recipe: recipe.into(),
                    phase,
                    source: Box::new(other),
                }
            }
        }
    }

    /// The recipe this error is attributed to, if any
    #[must_use]
    pub fn recipe(&self) -> Option<&str> {
        match self {
            Self::Recipe { recipe, .. } => Some(recipe),
            _ => None,
        }
    }

    /// The build phase this error originated in, if any
    #[must_use]
    pub fn phase(&self) -> Option<&str> {
        match self {
            Self::Recipe { phase, source, .. } => phase.as_deref().or_else(|| source.phase()),
            Self::Build(BuildError::PhaseFailure { phase, .. }) => Some(phase),
            _ => None,
        }
    }

    /// Strip recipe context and return the underlying error
    #[must_use]
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::Recipe { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
            path: None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {err}"))
    }
}

/// Result type alias for kiln operations
pub type Result<T> = std::result::Result<T, Error>;

/// Minimal interface for rendering user-facing error information without
/// requiring heavyweight envelopes.
pub trait UserFacingError {
    /// Short message suitable for CLI output.
    fn user_message(&self) -> Cow<'_, str>;

    /// Optional remediation hint.
    fn user_hint(&self) -> Option<&'static str> {
        None
    }

    /// Whether retrying the same operation by hand is likely to succeed.
    ///
    /// The engine itself never retries; this is advisory for callers.
    fn is_retryable(&self) -> bool {
        false
    }

    /// Stable error code for analytics / structured reporting.
    fn user_code(&self) -> Option<&'static str> {
        None
    }
}

impl UserFacingError for Error {
    fn user_message(&self) -> Cow<'_, str> {
        match self {
            Error::Network(err) => err.user_message(),
            Error::Io { message, .. } => Cow::Owned(message.clone()),
            _ => Cow::Owned(self.to_string()),
        }
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Error::Args(err) => err.user_hint(),
            Error::Environment(err) => err.user_hint(),
            Error::Network(err) => err.user_hint(),
            Error::Storage(err) => err.user_hint(),
            Error::Build(err) => err.user_hint(),
            Error::Recipe { source, .. } => source.user_hint(),
            Error::Config(_) => Some("Check your kiln configuration file."),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(err) => err.is_retryable(),
            Error::Storage(err) => err.is_retryable(),
            Error::Recipe { source, .. } => source.is_retryable(),
            Error::Io { .. } => true,
            _ => false,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        match self {
            Error::Args(err) => err.user_code(),
            Error::Environment(err) => err.user_code(),
            Error::Network(err) => err.user_code(),
            Error::Storage(err) => err.user_code(),
            Error::Config(err) => err.user_code(),
            Error::Build(err) => err.user_code(),
            Error::Recipe { source, .. } => source.user_code(),
            Error::Internal(_) => Some("error.internal"),
            Error::Cancelled => Some("error.cancelled"),
            Error::Io { .. } => Some("error.io"),
        }
    }
}

#[cfg(feature = "serde")]
mod io_kind_as_str {
    use serde::{Deserialize, Deserializer, Serializer};
    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S>(kind: &std::io::ErrorKind, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&format!("{kind:?}"))
    }
    pub fn deserialize<'de, D>(deserializer: D) -> Result<std::io::ErrorKind, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "NotFound" => std::io::ErrorKind::NotFound,
            "PermissionDenied" => std::io::ErrorKind::PermissionDenied,
            "AlreadyExists" => std::io::ErrorKind::AlreadyExists,
            "InvalidInput" => std::io::ErrorKind::InvalidInput,
            "InvalidData" => std::io::ErrorKind::InvalidData,
            "TimedOut" => std::io::ErrorKind::TimedOut,
            "Interrupted" => std::io::ErrorKind::Interrupted,
            "Unsupported" => std::io::ErrorKind::Unsupported,
            "UnexpectedEof" => std::io::ErrorKind::UnexpectedEof,
            _ => std::io::ErrorKind::Other,
        })
    }
}
