//! Environment composition error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum EnvironmentError {
    #[error("environment conflict on {variable}: {first_source} sets {first_value:?}, {second_source} sets {second_value:?}")]
    EnvironmentConflict {
        variable: String,
        first_source: String,
        first_value: String,
        second_source: String,
        second_value: String,
    },

    #[error("invalid value for environment variable {variable}: {message}")]
    InvalidValue { variable: String, message: String },
}

impl UserFacingError for EnvironmentError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::EnvironmentConflict { .. } => {
                Some("Set the variable explicitly in the build's env overrides to pick a value.")
            }
            Self::InvalidValue { .. } => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::EnvironmentConflict { .. } => "environment.conflict",
            Self::InvalidValue { .. } => "environment.invalid_value",
        };
        Some(code)
    }
}
