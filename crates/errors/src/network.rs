//! Network and source-fetch error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum NetworkError {
    #[error("connection timeout to {url}")]
    Timeout { url: String },

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error {status} for {url}: {message}")]
    HttpError {
        url: String,
        status: u16,
        message: String,
    },

    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("unsupported checksum algorithm: {algorithm}")]
    UnsupportedChecksum { algorithm: String },

    #[error("invalid checksum {value}: {reason}")]
    InvalidChecksum { value: String, reason: String },

    #[error("network unavailable")]
    NetworkUnavailable,
}

impl UserFacingError for NetworkError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::Timeout { .. } | Self::NetworkUnavailable => {
                Some("Check your network connection or point the recipe at a local mirror.")
            }
            Self::ChecksumMismatch { .. } => Some(
                "The downloaded bytes differ from the recipe's checksum; verify the source and update the checksum deliberately.",
            ),
            Self::UnsupportedChecksum { .. } | Self::InvalidChecksum { .. } => {
                Some("Checksums are written as `sha256:<64 hex digits>`.")
            }
            Self::InvalidUrl(_) => Some("Correct the source URL in the recipe."),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::DownloadFailed(_) | Self::NetworkUnavailable
        ) || matches!(self, Self::HttpError { status, .. } if *status >= 500)
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::Timeout { .. } => "network.timeout",
            Self::DownloadFailed(_) => "network.download_failed",
            Self::InvalidUrl(_) => "network.invalid_url",
            Self::HttpError { .. } => "network.http_error",
            Self::ChecksumMismatch { .. } => "network.checksum_mismatch",
            Self::UnsupportedChecksum { .. } => "network.unsupported_checksum",
            Self::InvalidChecksum { .. } => "network.invalid_checksum",
            Self::NetworkUnavailable => "network.unavailable",
        };
        Some(code)
    }
}
