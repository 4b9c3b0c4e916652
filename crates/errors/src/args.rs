//! Argument composition error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum ArgsError {
    /// Two fragments used a schema-exclusive key in incompatible ways
    #[error("argument conflict on `{key}`: fragment {first} {first_use} it but fragment {second} {second_use} it")]
    ArgumentConflict {
        key: String,
        first: usize,
        first_use: String,
        second: usize,
        second_use: String,
    },

    /// A mutation was applied to a value of the wrong shape
    #[error("type mismatch at `{key}`: {mutation} expects {expected}, found {found}")]
    TypeMismatch {
        key: String,
        mutation: String,
        expected: String,
        found: String,
    },

    #[error("invalid argument fragment: {message}")]
    InvalidFragment { message: String },
}

impl UserFacingError for ArgsError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::ArgumentConflict { .. } => Some(
                "Either replace the whole key in one place or patch its entries, not both.",
            ),
            Self::TypeMismatch { .. } => {
                Some("Use a mutation that matches the existing value's type.")
            }
            Self::InvalidFragment { .. } => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::ArgumentConflict { .. } => "args.argument_conflict",
            Self::TypeMismatch { .. } => "args.type_mismatch",
            Self::InvalidFragment { .. } => "args.invalid_fragment",
        };
        Some(code)
    }
}
